//! Fire-and-forget confirmation mail delivery.
//!
//! Services only hold a [`ConfirmationQueue`] and call
//! [`ConfirmationQueue::enqueue`] after a user row is committed. Enqueueing
//! never fails from the caller's point of view. A background worker looks the
//! user up again, renders the message and retries transient failures with
//! exponential backoff.

use std::sync::Arc;

use schoolhouse_config::{EmailConfig, MailQueueConfig};
use schoolhouse_core::presence;
use schoolhouse_models::UserId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::mailer::{ConfirmationMessage, Mailer};
use crate::store::UserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationJob {
    pub user_id: UserId,
}

/// Sending half of the confirmation mail queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConfirmationQueue {
    tx: mpsc::Sender<ConfirmationJob>,
}

impl ConfirmationQueue {
    /// Schedules a confirmation mail for `user_id`. Failures are logged and
    /// swallowed so the request that created the user is unaffected.
    pub fn enqueue(&self, user_id: UserId) {
        match self.tx.try_send(ConfirmationJob { user_id }) {
            Ok(()) => debug!(%user_id, "confirmation mail enqueued"),
            Err(TrySendError::Full(_)) => {
                warn!(%user_id, "confirmation queue is full, mail dropped")
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%user_id, "confirmation worker is not running, mail dropped")
            }
        }
    }

    /// A queue with no worker behind it. Every job is dropped.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { attempts: u32 },
    Skipped,
    Failed { attempts: u32 },
}

#[derive(Clone)]
struct ConfirmationWorker {
    store: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    email_config: EmailConfig,
    config: MailQueueConfig,
}

impl ConfirmationWorker {
    async fn run(self, mut rx: mpsc::Receiver<ConfirmationJob>) {
        let mut in_flight = JoinSet::new();
        while let Some(job) = rx.recv().await {
            let worker = self.clone();
            in_flight.spawn(async move { worker.deliver(job).await });
            // reap finished deliveries so the set does not grow unbounded
            while in_flight.try_join_next().is_some() {}
        }
        while in_flight.join_next().await.is_some() {}
        debug!("confirmation worker drained");
    }

    #[instrument(skip(self), fields(user_id = %job.user_id))]
    async fn deliver(&self, job: ConfirmationJob) -> DeliveryOutcome {
        let user = match self.store.find_user(job.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("user disappeared before confirmation mail was sent");
                return DeliveryOutcome::Skipped;
            }
            Err(e) => {
                error!(error = %e, "failed to load user for confirmation mail");
                return DeliveryOutcome::Failed { attempts: 0 };
            }
        };

        if user.is_confirmed() {
            debug!("user already confirmed");
            return DeliveryOutcome::Skipped;
        }

        let (Some(email), Some(token)) = (
            presence(user.email.as_deref()),
            presence(user.confirmation_token.as_deref()),
        ) else {
            debug!("user has no email or confirmation token");
            return DeliveryOutcome::Skipped;
        };

        let message = ConfirmationMessage {
            to_email: email.to_string(),
            to_name: user
                .name
                .clone()
                .or_else(|| user.username.clone())
                .unwrap_or_else(|| email.to_string()),
            confirmation_url: self.email_config.confirmation_url(token),
        };

        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.mailer.send_confirmation(&message).await {
                Ok(()) => {
                    info!(attempt, "confirmation mail sent");
                    return DeliveryOutcome::Sent { attempts: attempt };
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(attempt, error = %e, retry_in_ms = delay.as_millis() as u64, "confirmation mail failed");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "giving up on confirmation mail");
                }
            }
        }
        DeliveryOutcome::Failed {
            attempts: max_attempts,
        }
    }
}

/// Starts the delivery worker. It stops once every [`ConfirmationQueue`]
/// clone has been dropped and all in-flight deliveries have finished.
pub fn spawn_confirmation_worker(
    store: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    email_config: EmailConfig,
    config: MailQueueConfig,
) -> (ConfirmationQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let worker = ConfirmationWorker {
        store,
        mailer,
        email_config,
        config,
    };
    let handle = tokio::spawn(worker.run(rx));
    (ConfirmationQueue { tx }, handle)
}
