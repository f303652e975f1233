use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use fake::Fake;
use fake::faker::name::en::FirstName;
use schoolhouse::mail::{ConfirmationQueue, RecordingMailer, spawn_confirmation_worker};
use schoolhouse::modules::users::UserService;
use schoolhouse::store::{MemoryUserStore, UserStore};
use schoolhouse_config::{EmailConfig, MailQueueConfig};
use schoolhouse_models::{
    AuthInfo, AuthPayload, BranchId, Course, CourseId, CreateCourseDto, DisciplineId, LevelId,
    NewUser, Role, User, UserId,
};
use tokio::task::JoinHandle;

#[allow(dead_code)]
/// An in-memory store wired to a recording mailer through a real
/// confirmation worker.
pub struct TestContext {
    pub store: Arc<MemoryUserStore>,
    pub mailer: Arc<RecordingMailer>,
    pub confirmations: ConfirmationQueue,
    worker: JoinHandle<()>,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        Self::with_mailer(RecordingMailer::new())
    }

    pub fn with_mailer(mailer: RecordingMailer) -> Self {
        let store = Arc::new(MemoryUserStore::new());
        let mailer = Arc::new(mailer);
        let (confirmations, worker) = spawn_confirmation_worker(
            store.clone(),
            mailer.clone(),
            EmailConfig::default(),
            fast_mail_queue_config(),
        );
        Self {
            store,
            mailer,
            confirmations,
            worker,
        }
    }

    pub fn store(&self) -> &dyn UserStore {
        self.store.as_ref()
    }

    /// Closes the queue and waits for every pending delivery.
    pub async fn drain(self) -> Arc<RecordingMailer> {
        drop(self.confirmations);
        self.worker.await.unwrap();
        self.mailer
    }
}

#[allow(dead_code)]
pub fn fast_mail_queue_config() -> MailQueueConfig {
    MailQueueConfig {
        capacity: 64,
        max_attempts: 3,
        base_retry_delay_ms: 1,
        max_retry_delay_ms: 5,
    }
}

#[allow(dead_code)]
pub fn generate_unique_email() -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let first_name: String = FirstName().fake();
    format!(
        "{}{}@example.com",
        first_name.to_lowercase().replace(|c: char| !c.is_ascii_alphanumeric(), ""),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

#[allow(dead_code)]
pub fn draft(role: Option<Role>, email: &str) -> NewUser {
    NewUser {
        email: Some(email.to_string()),
        password: Some("password123".to_string()),
        role,
        ..NewUser::default()
    }
}

#[allow(dead_code)]
pub fn student_draft(email: &str, course_id: CourseId) -> NewUser {
    NewUser {
        course_id: Some(course_id),
        ..draft(Some(Role::Student), email)
    }
}

/// Inserts a course straight into the store so students have one to join.
#[allow(dead_code)]
pub async fn create_course(ctx: &TestContext) -> Course {
    static INDEX: AtomicUsize = AtomicUsize::new(1);
    let index = INDEX.fetch_add(1, Ordering::SeqCst) as i32;
    ctx.store()
        .insert_course(&CreateCourseDto {
            name: "Web Basics".to_string(),
            code: format!("WB-{}", index),
            description: "HTML, CSS and a little JavaScript".to_string(),
            duration: 6,
            price: 19_900,
            status: "open".to_string(),
            index,
            discipline_id: DisciplineId::new(1),
            level_id: LevelId::new(1),
            teacher_id: UserId::new(1),
            tags: "web".to_string(),
        })
        .await
        .unwrap()
}

#[allow(dead_code)]
pub fn staff_draft(email: &str, branch_id: i64) -> NewUser {
    NewUser {
        branch_id: Some(BranchId::new(branch_id)),
        ..draft(Some(Role::Staff), email)
    }
}

#[allow(dead_code)]
pub fn auth_payload(provider: &str, uid: &str, nickname: Option<&str>, email: Option<&str>) -> AuthPayload {
    AuthPayload {
        provider: provider.to_string(),
        uid: uid.to_string(),
        info: AuthInfo {
            nickname: nickname.map(str::to_string),
            email: email.map(str::to_string),
            first_name: None,
        },
    }
}

/// Creates a user with `password` and marks it confirmed.
#[allow(dead_code)]
pub async fn create_confirmed_user(ctx: &TestContext, draft: NewUser) -> User {
    let mut user = UserService::create_user(ctx.store(), &ctx.confirmations, draft)
        .await
        .unwrap();
    user.confirmed_at = Some(Utc::now());
    ctx.store().update_user(&user).await.unwrap()
}
