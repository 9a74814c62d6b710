//! Campaign dispatch - allocation, delivery, retry, and supervision

pub mod allocator;
pub mod delivery;
pub mod retry;
pub mod runner;
pub mod supervisor;

pub use allocator::{AllocError, SenderAllocator};
pub use delivery::{DeliveryExecutor, DeliveryOutcome, Mailer, OutboundEmail, SmtpMailer};
pub use retry::{RetryController, RetryPolicy, SendOutcome};
pub use runner::{CampaignRunner, DispatchPacing};
pub use supervisor::{CampaignSupervisor, ControlError, ControlOutcome};
