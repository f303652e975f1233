//! Account mail: the [`Mailer`] transport seam and the background
//! confirmation queue.

mod mailer;
mod queue;

#[cfg(any(test, feature = "test-utils"))]
pub use mailer::RecordingMailer;
pub use mailer::{ConfirmationMessage, LogMailer, MailError, Mailer, SmtpMailer};
pub use queue::{ConfirmationJob, ConfirmationQueue, DeliveryOutcome, spawn_confirmation_worker};
