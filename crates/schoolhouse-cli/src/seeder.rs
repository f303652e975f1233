//! Fake data for development databases.
//!
//! Users are created through [`UserService::create_user`], so seeded rows go
//! through the same validation and get the same confirmation mail as real
//! ones.

use std::time::Instant;

use fake::Fake;
use fake::faker::company::en::Buzzword;
use fake::faker::name::en::{FirstName, LastName};
use schoolhouse::modules::users::UserService;
use schoolhouse::state::AppState;
use schoolhouse_core::AppError;
use schoolhouse_models::{BranchId, NewUser, Role};
use tracing::info;

pub const DEFAULT_SEED_PASSWORD: &str = "password123";

#[derive(Debug, Clone)]
pub struct SeedConfig {
    pub teachers: usize,
    pub staff: usize,
    pub branches: usize,
    pub batches: usize,
    pub password: String,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            teachers: 5,
            staff: 3,
            branches: 2,
            batches: 2,
            password: DEFAULT_SEED_PASSWORD.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub batches: usize,
}

fn generate_user(role: Role, idx: usize, password: &str) -> NewUser {
    let first_name: String = FirstName().fake();
    let last_name: String = LastName().fake();
    let prefix = role.as_str().to_lowercase();

    NewUser {
        username: Some(format!(
            "{}.{}{}",
            first_name.to_lowercase(),
            prefix,
            idx
        )),
        email: Some(format!(
            "{}.{}+{}{}@example.com",
            first_name.to_lowercase(),
            last_name.to_lowercase(),
            prefix,
            idx
        )),
        name: Some(format!("{} {}", first_name, last_name)),
        password: Some(password.to_string()),
        role: Some(role),
        ..NewUser::default()
    }
}

/// Teachers and staff. Staff are spread round-robin over `1..=branches`.
pub fn generate_users(config: &SeedConfig) -> Vec<NewUser> {
    let teachers = (0..config.teachers).map(|idx| generate_user(Role::Teacher, idx, &config.password));
    let branches = config.branches.max(1);
    let staff = (0..config.staff).map(|idx| NewUser {
        branch_id: Some(BranchId::new((idx % branches) as i64 + 1)),
        ..generate_user(Role::Staff, idx, &config.password)
    });
    teachers.chain(staff).collect()
}

pub async fn seed_all(state: &AppState, config: SeedConfig) -> Result<SeedSummary, AppError> {
    let start = Instant::now();
    let mut summary = SeedSummary::default();

    for _ in 0..config.batches {
        let name: String = Buzzword().fake();
        state
            .store
            .insert_batch(&format!("{} cohort", name))
            .await
            .map_err(|e| e.into_app_error())?;
        summary.batches += 1;
    }

    for draft in generate_users(&config) {
        UserService::create_user(state.store.as_ref(), &state.confirmations, draft).await?;
        summary.users += 1;
    }

    info!(
        users = summary.users,
        batches = summary.batches,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "seeding finished"
    );
    Ok(summary)
}
