//! Outbound email for export jobs.
//!
//! This crate provides:
//! - `Mailer` trait for pluggable delivery
//! - SMTP implementation via `lettre`
//! - Minijinja rendering of the completion and failure templates

pub mod email;
pub mod templates;
pub mod traits;

pub use email::{SmtpMailer, SmtpSettings};
pub use templates::{CompletionContext, FailureContext, TemplateKind, TemplateRenderer};
pub use traits::{Mailer, NotifyError};
