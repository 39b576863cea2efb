//! Mail notifications for the approval workflow.
//!
//! This crate turns workflow events into outbound mail:
//! - **Messages** (`messages`) - subject/body templates for the three
//!   notification kinds (approval requested, approval complete, rejected)
//! - **Mailer** (`mailer`) - the HTTP gateway and the `Notifier`
//!   implementation the workflow engine talks to
//!
//! Delivery is fire-and-forget by contract: the engine logs failures and
//! moves on, so nothing here may panic or block a workflow transition.

pub mod mailer;
pub mod messages;

pub use mailer::{HttpMailGateway, MailError, MailGateway, MailNotifier, RecordingMailGateway};
pub use messages::MailMessage;
