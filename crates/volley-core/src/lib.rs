//! Volley Core - Campaign dispatch engine
//!
//! This crate provides the bulk-send machinery: sender allocation under
//! quota, single-message delivery, bounded retry with backoff, the
//! per-campaign runner state machine, and the process-wide supervisor.

pub mod credentials;
pub mod dispatch;
pub mod notify;

pub use credentials::CredentialCodec;
pub use dispatch::{
    AllocError, CampaignSupervisor, ControlError, ControlOutcome, DeliveryExecutor,
    DeliveryOutcome, DispatchPacing, Mailer, OutboundEmail, RetryController, SendOutcome,
    SenderAllocator, SmtpMailer,
};
pub use notify::{Notifier, NullNotifier, TelegramNotifier};
