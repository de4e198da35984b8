//! Authentication security engine.
//!
//! Credential validation, access/refresh-token lifecycle, fixed-window rate
//! limiting, account lockout, suspicious-activity detection, and TOTP-based
//! multi-factor authentication, composed behind an orchestrator.
//!
//! Storage and mail delivery are injected as trait handles
//! ([`stores`], [`services::MailSender`]); HTTP transport, admin CRUD, and
//! schema management live outside this crate. Correctness under concurrency
//! is delegated to store-level atomicity - conditional updates and
//! compare-and-set - rather than in-process locking.

pub mod config;
pub mod dtos;
pub mod models;
pub mod services;
pub mod stores;
pub mod telemetry;
pub mod utils;

pub use services::{AuthError, AuthService};
