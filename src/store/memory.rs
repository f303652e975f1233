use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use schoolhouse_models::{
    Batch, BatchId, Course, CourseId, CreateCourseDto, DisciplineId, Identity, IdentityId,
    NewIdentity, User, UserId,
};
use tokio::sync::Mutex;

use super::{
    COURSE_INDEX_UNIQUE, IDENTITY_UNIQUE, LinkOutcome, StoreError, StoreResult, USER_COURSE_FKEY,
    USERNAME_UNIQUE, UserRecord, UserStore,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<UserId, User>,
    identities: BTreeMap<IdentityId, Identity>,
    batches: BTreeMap<BatchId, Batch>,
    batches_users: Vec<(BatchId, UserId)>,
    courses: BTreeMap<CourseId, Course>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn username_taken(&self, username: &str, except: Option<UserId>) -> bool {
        self.users.values().any(|user| {
            Some(user.id) != except
                && user
                    .username
                    .as_deref()
                    .is_some_and(|existing| existing.to_lowercase() == username.to_lowercase())
        })
    }

    fn check_user_constraints(&self, user: &User) -> StoreResult<()> {
        if let Some(username) = user.username.as_deref() {
            if self.username_taken(username, Some(user.id)) {
                return Err(StoreError::UniqueViolation {
                    constraint: USERNAME_UNIQUE.to_string(),
                });
            }
        }
        if let Some(course_id) = user.course_id {
            if !self.courses.contains_key(&course_id) {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: USER_COURSE_FKEY.to_string(),
                });
            }
        }
        Ok(())
    }

    fn insert_user(&mut self, record: &UserRecord) -> StoreResult<User> {
        let now = Utc::now();
        let user = User {
            id: UserId::new(self.next_id()),
            username: record.username.clone(),
            email: record.email.clone(),
            name: record.name.clone(),
            encrypted_password: record.encrypted_password.clone(),
            role: record.role,
            course_id: record.course_id,
            branch_id: record.branch_id,
            confirmation_token: record.confirmation_token.clone(),
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.check_user_constraints(&user)?;

        for batch_id in &record.batch_ids {
            if !self.batches.contains_key(batch_id) {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: "batches_users_batch_id_fkey".to_string(),
                });
            }
        }
        for identity_id in &record.identity_ids {
            if !self.identities.contains_key(identity_id) {
                return Err(StoreError::NotFound);
            }
        }

        for batch_id in &record.batch_ids {
            self.batches_users.push((*batch_id, user.id));
        }
        for identity_id in &record.identity_ids {
            if let Some(identity) = self.identities.get_mut(identity_id) {
                identity.user_id = Some(user.id);
                identity.updated_at = now;
            }
        }
        self.users.insert(user.id, user.clone());
        Ok(user)
    }
}

/// In-process [`UserStore`] for tests.
///
/// All tables sit behind one async mutex, which gives every operation the
/// same atomicity the Postgres store gets from transactions. Each call yields
/// to the scheduler before taking the lock so concurrent callers interleave.
#[derive(Default)]
pub struct MemoryUserStore {
    tables: Mutex<Tables>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    pub async fn identity_count(&self) -> usize {
        self.tables.lock().await.identities.len()
    }

    pub async fn all_users(&self) -> Vec<User> {
        self.tables.lock().await.users.values().cloned().collect()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        tokio::task::yield_now().await;
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        tokio::task::yield_now().await;
        let login = login.to_lowercase();
        let matches = |value: &Option<String>| {
            value
                .as_deref()
                .is_some_and(|v| v.to_lowercase() == login)
        };
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|user| matches(&user.username) || matches(&user.email))
            .cloned())
    }

    async fn find_user_by_confirmation_token(&self, token: &str) -> StoreResult<Option<User>> {
        tokio::task::yield_now().await;
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|user| user.confirmation_token.as_deref() == Some(token))
            .cloned())
    }

    async fn username_taken(&self, username: &str, except: Option<UserId>) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        Ok(self.tables.lock().await.username_taken(username, except))
    }

    async fn insert_user(&self, record: &UserRecord) -> StoreResult<User> {
        tokio::task::yield_now().await;
        self.tables.lock().await.insert_user(record)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        tokio::task::yield_now().await;
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        tables.check_user_constraints(user)?;
        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        tables.users.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn batch_ids_for_user(&self, user_id: UserId) -> StoreResult<Vec<BatchId>> {
        tokio::task::yield_now().await;
        let tables = self.tables.lock().await;
        let mut ids: Vec<BatchId> = tables
            .batches_users
            .iter()
            .filter(|(_, member)| *member == user_id)
            .map(|(batch_id, _)| *batch_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn find_batch(&self, id: BatchId) -> StoreResult<Option<Batch>> {
        tokio::task::yield_now().await;
        Ok(self.tables.lock().await.batches.get(&id).cloned())
    }

    async fn insert_batch(&self, name: &str) -> StoreResult<Batch> {
        tokio::task::yield_now().await;
        let mut tables = self.tables.lock().await;
        let batch = Batch {
            id: BatchId::new(tables.next_id()),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tables.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn find_identity(&self, provider: &str, uid: &str) -> StoreResult<Option<Identity>> {
        tokio::task::yield_now().await;
        Ok(self
            .tables
            .lock()
            .await
            .identities
            .values()
            .find(|identity| identity.provider == provider && identity.uid == uid)
            .cloned())
    }

    async fn find_identity_by_id(&self, id: IdentityId) -> StoreResult<Option<Identity>> {
        tokio::task::yield_now().await;
        Ok(self.tables.lock().await.identities.get(&id).cloned())
    }

    async fn insert_identity(&self, identity: &NewIdentity) -> StoreResult<Identity> {
        tokio::task::yield_now().await;
        let mut tables = self.tables.lock().await;
        let duplicate = tables
            .identities
            .values()
            .any(|existing| existing.provider == identity.provider && existing.uid == identity.uid);
        if duplicate {
            return Err(StoreError::UniqueViolation {
                constraint: IDENTITY_UNIQUE.to_string(),
            });
        }
        let now = Utc::now();
        let created = Identity {
            id: IdentityId::new(tables.next_id()),
            user_id: None,
            provider: identity.provider.clone(),
            uid: identity.uid.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.identities.insert(created.id, created.clone());
        Ok(created)
    }

    async fn identities_for_user(&self, user_id: UserId) -> StoreResult<Vec<Identity>> {
        tokio::task::yield_now().await;
        Ok(self
            .tables
            .lock()
            .await
            .identities
            .values()
            .filter(|identity| identity.user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn attach_identity(&self, identity_id: IdentityId, user_id: UserId) -> StoreResult<()> {
        tokio::task::yield_now().await;
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::ForeignKeyViolation {
                constraint: "identities_user_id_fkey".to_string(),
            });
        }
        let identity = tables
            .identities
            .get_mut(&identity_id)
            .ok_or(StoreError::NotFound)?;
        identity.user_id = Some(user_id);
        identity.updated_at = Utc::now();
        Ok(())
    }

    async fn create_user_for_identity(
        &self,
        identity_id: IdentityId,
        record: &UserRecord,
    ) -> StoreResult<LinkOutcome> {
        tokio::task::yield_now().await;
        let mut tables = self.tables.lock().await;
        let identity = tables
            .identities
            .get(&identity_id)
            .ok_or(StoreError::NotFound)?;

        if let Some(owner) = identity.user_id.and_then(|id| tables.users.get(&id)) {
            return Ok(LinkOutcome::Existing(owner.clone()));
        }

        let mut record = record.clone();
        if !record.identity_ids.contains(&identity_id) {
            record.identity_ids.push(identity_id);
        }
        tables.insert_user(&record).map(LinkOutcome::Created)
    }

    async fn course_index_taken(
        &self,
        discipline_id: DisciplineId,
        index: i32,
    ) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        Ok(self
            .tables
            .lock()
            .await
            .courses
            .values()
            .any(|course| course.discipline_id == discipline_id && course.index == index))
    }

    async fn insert_course(&self, course: &CreateCourseDto) -> StoreResult<Course> {
        tokio::task::yield_now().await;
        let mut tables = self.tables.lock().await;
        let duplicate = tables.courses.values().any(|existing| {
            existing.discipline_id == course.discipline_id && existing.index == course.index
        });
        if duplicate {
            return Err(StoreError::UniqueViolation {
                constraint: COURSE_INDEX_UNIQUE.to_string(),
            });
        }
        let now = Utc::now();
        let created = Course {
            id: CourseId::new(tables.next_id()),
            name: course.name.clone(),
            code: course.code.clone(),
            description: course.description.clone(),
            duration: course.duration,
            price: course.price,
            status: course.status.clone(),
            index: course.index,
            discipline_id: course.discipline_id,
            level_id: course.level_id,
            teacher_id: course.teacher_id,
            tag_list: course.tag_list(),
            created_at: now,
            updated_at: now,
        };
        tables.courses.insert(created.id, created.clone());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use schoolhouse_models::Role;

    use super::*;

    fn record(username: &str) -> UserRecord {
        UserRecord {
            username: Some(username.to_string()),
            email: Some(format!("{}@example.com", username.to_lowercase())),
            ..UserRecord::default()
        }
    }

    #[tokio::test]
    async fn test_username_unique_ignoring_case() {
        let store = MemoryUserStore::new();
        store.insert_user(&record("Alice")).await.unwrap();
        let err = store.insert_user(&record("alice")).await.unwrap_err();
        assert!(err.is_unique_violation_of(USERNAME_UNIQUE));
        assert!(store.username_taken("ALICE", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_identity_pair_unique() {
        let store = MemoryUserStore::new();
        let key = NewIdentity {
            provider: "github".to_string(),
            uid: "1".to_string(),
        };
        store.insert_identity(&key).await.unwrap();
        let err = store.insert_identity(&key).await.unwrap_err();
        assert!(err.is_unique_violation_of(IDENTITY_UNIQUE));
    }

    #[tokio::test]
    async fn test_create_user_for_identity_returns_existing_owner() {
        let store = MemoryUserStore::new();
        let identity = store
            .insert_identity(&NewIdentity {
                provider: "github".to_string(),
                uid: "1".to_string(),
            })
            .await
            .unwrap();

        let first = store
            .create_user_for_identity(identity.id, &record("jane"))
            .await
            .unwrap();
        assert!(matches!(first, LinkOutcome::Created(_)));

        let second = store
            .create_user_for_identity(identity.id, &record("other"))
            .await
            .unwrap();
        assert_eq!(second, LinkOutcome::Existing(first.user().clone()));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_insert_user_rejects_unknown_batch() {
        let store = MemoryUserStore::new();
        let mut rec = record("sam");
        rec.batch_ids.push(BatchId::new(404));
        assert!(matches!(
            store.insert_user(&rec).await,
            Err(StoreError::ForeignKeyViolation { .. })
        ));
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_user_course_must_exist() {
        let store = MemoryUserStore::new();
        let mut rec = record("kim");
        rec.role = Some(Role::Student);
        rec.course_id = Some(CourseId::new(424242));
        let err = store.insert_user(&rec).await.unwrap_err();
        assert!(matches!(
            &err,
            StoreError::ForeignKeyViolation { constraint } if constraint == USER_COURSE_FKEY
        ));
        assert_eq!(store.user_count().await, 0);

        let teacher = store.insert_user(&record("tess")).await.unwrap();
        let mut moved = teacher.clone();
        moved.course_id = Some(CourseId::new(424242));
        assert!(matches!(
            store.update_user(&moved).await,
            Err(StoreError::ForeignKeyViolation { .. })
        ));
    }
}
