//! Persistence boundary.
//!
//! Services never talk to the database directly; they go through
//! [`UserStore`]. [`PgUserStore`] is the production implementation. With the
//! `test-utils` feature an in-memory [`MemoryUserStore`] is available that
//! enforces the same unique constraints.
//!
//! Two constraints carry correctness guarantees rather than just data hygiene:
//!
//! - `(provider, uid)` is unique on identities, so concurrent callbacks for
//!   the same external account can never produce two identity rows.
//! - [`UserStore::create_user_for_identity`] creates and links the owner of an
//!   identity atomically, so at most one user is ever created per identity.

use anyhow::anyhow;
use async_trait::async_trait;
use schoolhouse_core::{AppError, errors::field_error};
use schoolhouse_models::{
    Batch, BatchId, BranchId, Course, CourseId, CreateCourseDto, DisciplineId, Identity,
    IdentityId, NewIdentity, Role, User, UserId,
};
use thiserror::Error;
use validator::ValidationErrors;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

pub const USERNAME_UNIQUE: &str = "users_username_lower_key";
pub const IDENTITY_UNIQUE: &str = "identities_provider_uid_key";
pub const COURSE_INDEX_UNIQUE: &str = "courses_discipline_index_key";
pub const USER_COURSE_FKEY: &str = "users_course_id_fkey";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error("record not found")]
    NotFound,

    #[error(transparent)]
    Database(sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == name)
    }

    /// Maps storage failures onto API errors. Unique violations on columns
    /// that users type in become field errors.
    pub fn into_app_error(self) -> AppError {
        match self {
            StoreError::UniqueViolation { constraint } if constraint == USERNAME_UNIQUE => {
                let mut errors = ValidationErrors::new();
                errors.add("username", field_error("taken", "has already been taken"));
                AppError::validation(errors)
            }
            StoreError::UniqueViolation { constraint } if constraint == COURSE_INDEX_UNIQUE => {
                let mut errors = ValidationErrors::new();
                errors.add("index", field_error("taken", "has already been taken"));
                AppError::validation(errors)
            }
            StoreError::UniqueViolation { constraint } => {
                AppError::conflict(anyhow!("Record conflicts with {}", constraint))
            }
            StoreError::ForeignKeyViolation { constraint } if constraint == USER_COURSE_FKEY => {
                let mut errors = ValidationErrors::new();
                errors.add("course", field_error("missing", "does not exist"));
                AppError::validation(errors)
            }
            StoreError::ForeignKeyViolation { constraint } => {
                AppError::unprocessable(anyhow!("Referenced record does not exist ({})", constraint))
            }
            StoreError::NotFound => AppError::not_found(anyhow!("Record not found")),
            StoreError::Database(err) => AppError::database(err),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation { constraint };
            }
            if db_err.is_foreign_key_violation() {
                return StoreError::ForeignKeyViolation { constraint };
            }
        }
        StoreError::Database(err)
    }
}

/// Column values for a new user row, plus the join rows written with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub encrypted_password: Option<String>,
    pub role: Option<Role>,
    pub course_id: Option<CourseId>,
    pub branch_id: Option<BranchId>,
    pub confirmation_token: Option<String>,
    pub batch_ids: Vec<BatchId>,
    pub identity_ids: Vec<IdentityId>,
}

/// Result of [`UserStore::create_user_for_identity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// This call created the user and linked the identity to it.
    Created(User),
    /// The identity already had an owner by the time the link was attempted.
    Existing(User),
}

impl LinkOutcome {
    pub fn user(&self) -> &User {
        match self {
            LinkOutcome::Created(user) | LinkOutcome::Existing(user) => user,
        }
    }

    pub fn into_user(self) -> User {
        match self {
            LinkOutcome::Created(user) | LinkOutcome::Existing(user) => user,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Case-insensitive match on username or email.
    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_confirmation_token(&self, token: &str) -> StoreResult<Option<User>>;

    /// Whether another user already holds `username`, ignoring case.
    async fn username_taken(&self, username: &str, except: Option<UserId>) -> StoreResult<bool>;

    /// Inserts the user and its batch and identity links in one transaction.
    async fn insert_user(&self, record: &UserRecord) -> StoreResult<User>;

    /// Writes every column of `user` back and bumps `updated_at`.
    async fn update_user(&self, user: &User) -> StoreResult<User>;

    async fn batch_ids_for_user(&self, user_id: UserId) -> StoreResult<Vec<BatchId>>;

    async fn find_batch(&self, id: BatchId) -> StoreResult<Option<Batch>>;

    async fn insert_batch(&self, name: &str) -> StoreResult<Batch>;

    async fn find_identity(&self, provider: &str, uid: &str) -> StoreResult<Option<Identity>>;

    async fn find_identity_by_id(&self, id: IdentityId) -> StoreResult<Option<Identity>>;

    /// Fails with [`StoreError::UniqueViolation`] when the pair already exists.
    async fn insert_identity(&self, identity: &NewIdentity) -> StoreResult<Identity>;

    async fn identities_for_user(&self, user_id: UserId) -> StoreResult<Vec<Identity>>;

    async fn attach_identity(&self, identity_id: IdentityId, user_id: UserId) -> StoreResult<()>;

    /// Creates a user from `record` and makes it the owner of the identity,
    /// unless the identity already has an owner, in which case that owner is
    /// returned and nothing is written. Atomic with respect to concurrent
    /// calls for the same identity.
    async fn create_user_for_identity(
        &self,
        identity_id: IdentityId,
        record: &UserRecord,
    ) -> StoreResult<LinkOutcome>;

    async fn course_index_taken(
        &self,
        discipline_id: DisciplineId,
        index: i32,
    ) -> StoreResult<bool>;

    async fn insert_course(&self, course: &CreateCourseDto) -> StoreResult<Course>;
}
