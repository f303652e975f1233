use async_trait::async_trait;
use schoolhouse_models::{
    Batch, BatchId, Course, CreateCourseDto, DisciplineId, Identity, IdentityId, NewIdentity,
    User, UserId,
};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use super::{LinkOutcome, StoreError, StoreResult, UserRecord, UserStore};

const USER_COLUMNS: &str = "id, username, email, name, encrypted_password, role, course_id, \
     branch_id, confirmation_token, confirmed_at, created_at, updated_at";

const IDENTITY_COLUMNS: &str = "id, user_id, provider, uid, created_at, updated_at";

const COURSE_COLUMNS: &str = r#"id, name, code, description, duration, price, status, "index",
     discipline_id, level_id, teacher_id, tag_list, created_at, updated_at"#;

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn insert_user_tx(
    tx: &mut Transaction<'_, Postgres>,
    record: &UserRecord,
) -> StoreResult<User> {
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (username, email, name, encrypted_password, role, course_id,
                           branch_id, confirmation_token)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(&record.username)
    .bind(&record.email)
    .bind(&record.name)
    .bind(&record.encrypted_password)
    .bind(record.role)
    .bind(record.course_id)
    .bind(record.branch_id)
    .bind(&record.confirmation_token)
    .fetch_one(&mut **tx)
    .await?;

    for batch_id in &record.batch_ids {
        sqlx::query("INSERT INTO batches_users (batch_id, user_id) VALUES ($1, $2)")
            .bind(*batch_id)
            .bind(user.id)
            .execute(&mut **tx)
            .await?;
    }

    for identity_id in &record.identity_ids {
        sqlx::query("UPDATE identities SET user_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(user.id)
            .bind(*identity_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(user)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE lower(username) = lower($1) OR lower(email) = lower($1)
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_confirmation_token(&self, token: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE confirmation_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn username_taken(&self, username: &str, except: Option<UserId>) -> StoreResult<bool> {
        let taken = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM users
                WHERE lower(username) = lower($1) AND ($2::BIGINT IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(username)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    #[instrument(skip(self, record))]
    async fn insert_user(&self, record: &UserRecord) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;
        let user = insert_user_tx(&mut tx, record).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn update_user(&self, user: &User) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET username = $2, email = $3, name = $4, encrypted_password = $5, role = $6,
                course_id = $7, branch_id = $8, confirmation_token = $9, confirmed_at = $10,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.encrypted_password)
        .bind(user.role)
        .bind(user.course_id)
        .bind(user.branch_id)
        .bind(&user.confirmation_token)
        .bind(user.confirmed_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn batch_ids_for_user(&self, user_id: UserId) -> StoreResult<Vec<BatchId>> {
        let ids = sqlx::query_scalar::<_, BatchId>(
            "SELECT batch_id FROM batches_users WHERE user_id = $1 ORDER BY batch_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn find_batch(&self, id: BatchId) -> StoreResult<Option<Batch>> {
        let batch =
            sqlx::query_as::<_, Batch>("SELECT id, name, created_at FROM batches WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(batch)
    }

    async fn insert_batch(&self, name: &str) -> StoreResult<Batch> {
        let batch = sqlx::query_as::<_, Batch>(
            "INSERT INTO batches (name) VALUES ($1) RETURNING id, name, created_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(batch)
    }

    async fn find_identity(&self, provider: &str, uid: &str) -> StoreResult<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE provider = $1 AND uid = $2"
        ))
        .bind(provider)
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn find_identity_by_id(&self, id: IdentityId) -> StoreResult<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn insert_identity(&self, identity: &NewIdentity) -> StoreResult<Identity> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "INSERT INTO identities (provider, uid) VALUES ($1, $2) RETURNING {IDENTITY_COLUMNS}"
        ))
        .bind(&identity.provider)
        .bind(&identity.uid)
        .fetch_one(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn identities_for_user(&self, user_id: UserId) -> StoreResult<Vec<Identity>> {
        let identities = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(identities)
    }

    async fn attach_identity(&self, identity_id: IdentityId, user_id: UserId) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE identities SET user_id = $1, updated_at = NOW() WHERE id = $2")
                .bind(user_id)
                .bind(identity_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, record))]
    async fn create_user_for_identity(
        &self,
        identity_id: IdentityId,
        record: &UserRecord,
    ) -> StoreResult<LinkOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent links of the same identity; the
        // loser blocks here until the winner commits and then sees its owner.
        let owner = sqlx::query_scalar::<_, Option<UserId>>(
            "SELECT user_id FROM identities WHERE id = $1 FOR UPDATE",
        )
        .bind(identity_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

        if let Some(owner_id) = owner {
            let existing = sqlx::query_as::<_, User>(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
            ))
            .bind(owner_id)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(user) = existing {
                tx.commit().await?;
                debug!(user_id = %user.id, "identity already linked");
                return Ok(LinkOutcome::Existing(user));
            }
        }

        let mut record = record.clone();
        if !record.identity_ids.contains(&identity_id) {
            record.identity_ids.push(identity_id);
        }
        let user = insert_user_tx(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(LinkOutcome::Created(user))
    }

    async fn course_index_taken(
        &self,
        discipline_id: DisciplineId,
        index: i32,
    ) -> StoreResult<bool> {
        let taken = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM courses WHERE discipline_id = $1 AND "index" = $2)"#,
        )
        .bind(discipline_id)
        .bind(index)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn insert_course(&self, course: &CreateCourseDto) -> StoreResult<Course> {
        let created = sqlx::query_as::<_, Course>(&format!(
            r#"
            INSERT INTO courses (name, code, description, duration, price, status, "index",
                                 discipline_id, level_id, teacher_id, tag_list)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(&course.name)
        .bind(&course.code)
        .bind(&course.description)
        .bind(course.duration)
        .bind(course.price)
        .bind(&course.status)
        .bind(course.index)
        .bind(course.discipline_id)
        .bind(course.level_id)
        .bind(course.teacher_id)
        .bind(course.tag_list())
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }
}
