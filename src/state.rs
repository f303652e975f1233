use std::sync::Arc;

use schoolhouse_config::{EmailConfig, MailQueueConfig};
use schoolhouse_db::{init_db_pool, run_migrations};
use tokio::task::JoinHandle;
use tracing::info;

use crate::mail::{ConfirmationQueue, LogMailer, Mailer, SmtpMailer, spawn_confirmation_worker};
use crate::store::{PgUserStore, UserStore};

/// Everything a service call needs: the store and the mail queue.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub confirmations: ConfirmationQueue,
    pub email_config: EmailConfig,
}

impl AppState {
    /// Wires the store to a freshly spawned confirmation worker. The handle
    /// completes once every clone of the state has been dropped.
    pub fn new(
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        email_config: EmailConfig,
        mail_queue_config: MailQueueConfig,
    ) -> (Self, JoinHandle<()>) {
        let (confirmations, worker) = spawn_confirmation_worker(
            store.clone(),
            mailer,
            email_config.clone(),
            mail_queue_config,
        );
        let state = Self {
            store,
            confirmations,
            email_config,
        };
        (state, worker)
    }
}

pub async fn init_app_state() -> anyhow::Result<(AppState, JoinHandle<()>)> {
    let pool = init_db_pool().await?;
    run_migrations(&pool).await?;

    let email_config = EmailConfig::from_env();
    let mailer: Arc<dyn Mailer> = if email_config.enabled {
        info!(host = %email_config.smtp_host, "delivering mail over SMTP");
        Arc::new(SmtpMailer::new(email_config.clone()))
    } else {
        Arc::new(LogMailer)
    };

    Ok(AppState::new(
        Arc::new(PgUserStore::new(pool)),
        mailer,
        email_config,
        MailQueueConfig::from_env(),
    ))
}
