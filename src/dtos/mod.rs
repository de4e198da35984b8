pub mod auth;

pub use auth::{
    LoginRequest, LogoutRequest, MessageResponse, PasswordResetConfirm, PasswordResetRequest,
    RefreshRequest, RegisterRequest, RegisterResponse,
};
