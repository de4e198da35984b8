pub mod account;
pub mod auth_event;
pub mod login_attempt;
pub mod mfa_factor;
pub mod refresh_token;

pub use account::{Account, AccountPublic};
pub use auth_event::{AuthEvent, AuthEventType};
pub use login_attempt::LoginAttempt;
pub use mfa_factor::{MfaFactor, MfaType};
pub use refresh_token::RefreshToken;
