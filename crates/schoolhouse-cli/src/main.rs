use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use dotenvy::dotenv;
use schoolhouse::modules::identities::{IdentityService, SignIn};
use schoolhouse::modules::users::UserService;
use schoolhouse::state::{AppState, init_app_state};
use schoolhouse_cli::seeder::{self, SeedConfig};
use schoolhouse_core::AppError;
use schoolhouse_models::{AuthPayload, BranchId, CourseId, EnrollmentRecord, NewUser, Role, User};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "schoolhouse-cli")]
#[command(about = "Schoolhouse CLI - Administrative tools for Schoolhouse", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user account
    CreateUser {
        /// Role: administrator, teacher, staff or student
        #[arg(short = 'r', long)]
        role: Option<Role>,

        /// Username (derived from the email if omitted)
        #[arg(short = 'u', long)]
        username: Option<String>,

        /// Email address
        #[arg(short = 'e', long)]
        email: Option<String>,

        /// Display name
        #[arg(short = 'n', long)]
        name: Option<String>,

        /// Course, required for students
        #[arg(long)]
        course_id: Option<i64>,

        /// Branch, required for staff
        #[arg(long)]
        branch_id: Option<i64>,

        /// Password (will be prompted securely if not provided)
        #[arg(short = 'p', long)]
        password: Option<String>,
    },
    /// Convert enrollment records (a JSON object or array) into students
    ImportEnrollment {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Resolve an identity provider callback payload (JSON) to a user
    LinkIdentity {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Confirm an account by its confirmation token
    Confirm {
        token: String,
    },
    /// Seed the database with fake teachers, staff and batches
    Seed {
        /// Number of teachers to create
        #[arg(long, default_value = "5")]
        teachers: usize,

        /// Number of staff members to create
        #[arg(long, default_value = "3")]
        staff: usize,

        /// Number of branches staff are spread over
        #[arg(long, default_value = "2")]
        branches: usize,

        /// Number of batches to create
        #[arg(short = 'b', long, default_value = "2")]
        batches: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    schoolhouse_observability::init_logging();

    let cli = Cli::parse();
    let (state, worker) = init_app_state().await?;

    let result = match cli.command {
        Commands::CreateUser {
            role,
            username,
            email,
            name,
            course_id,
            branch_id,
            password,
        } => {
            handle_create_user(
                &state,
                NewUser {
                    username,
                    email,
                    name,
                    password,
                    role,
                    course_id: course_id.map(CourseId::new),
                    branch_id: branch_id.map(BranchId::new),
                    ..NewUser::default()
                },
            )
            .await
        }
        Commands::ImportEnrollment { file } => handle_import_enrollment(&state, file).await,
        Commands::LinkIdentity { file } => handle_link_identity(&state, file).await,
        Commands::Confirm { token } => handle_confirm(&state, &token).await,
        Commands::Seed {
            teachers,
            staff,
            branches,
            batches,
        } => {
            handle_seed(
                &state,
                SeedConfig {
                    teachers,
                    staff,
                    branches,
                    batches,
                    ..SeedConfig::default()
                },
            )
            .await
        }
    };

    // Dropping the last queue handle lets the mail worker drain and exit.
    drop(state);
    worker.await.context("confirmation worker panicked")?;

    result
}

fn print_user(heading: &str, user: &User) {
    println!("\n✅ {}", heading);
    println!("   ID: {}", user.id);
    if let Some(username) = &user.username {
        println!("   Username: {}", username);
    }
    if let Some(email) = &user.email {
        println!("   Email: {}", email);
    }
    if let Some(role) = user.role {
        println!("   Role: {}", role);
    }
}

fn report(err: AppError) -> anyhow::Error {
    anyhow::anyhow!("{} ({})", err.error, err.status)
}

async fn handle_create_user(state: &AppState, mut draft: NewUser) -> anyhow::Result<()> {
    if draft.email.is_none() {
        draft.email = Some(
            Input::new()
                .with_prompt("Email address")
                .interact_text()?,
        );
    }

    if draft.password.is_none() {
        draft.password = Some(
            Password::new()
                .with_prompt("Password")
                .with_confirmation("Confirm password", "Passwords don't match")
                .interact()?,
        );
    }

    let user = UserService::create_user(state.store.as_ref(), &state.confirmations, draft)
        .await
        .map_err(report)?;
    print_user("User created successfully!", &user);
    Ok(())
}

async fn handle_import_enrollment(state: &AppState, file: PathBuf) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let records: Vec<EnrollmentRecord> = match serde_json::from_str::<Value>(&raw)? {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?,
        other => vec![serde_json::from_value(other)?],
    };

    let mut failures = 0;
    for record in &records {
        match UserService::create_from_enrollment(state.store.as_ref(), &state.confirmations, record)
            .await
        {
            Ok(user) => print_user("Student created", &user),
            Err(e) => {
                failures += 1;
                eprintln!("\n❌ Enrollment rejected: {}", e.error);
            }
        }
    }

    println!(
        "\n{} of {} enrollments imported",
        records.len() - failures,
        records.len()
    );
    if failures > 0 {
        anyhow::bail!("{} enrollments failed", failures);
    }
    Ok(())
}

async fn handle_link_identity(state: &AppState, file: PathBuf) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let payload: AuthPayload = serde_json::from_str(&raw).context("Invalid auth payload")?;

    let outcome = IdentityService::sign_in(state.store.as_ref(), &state.confirmations, &payload)
        .await
        .map_err(report)?;
    match outcome {
        SignIn::Resolved(user) => {
            print_user(
                &format!("Identity {}/{} resolved", payload.provider, payload.uid),
                &user,
            );
            Ok(())
        }
        SignIn::NeedsSignup { pending, error } => {
            println!(
                "\n⚠️  Identity {}/{} needs a signup to finish:",
                payload.provider, payload.uid
            );
            println!("{}", serde_json::to_string_pretty(&pending)?);
            Err(report(error))
        }
    }
}

async fn handle_confirm(state: &AppState, token: &str) -> anyhow::Result<()> {
    let user = UserService::confirm(state.store.as_ref(), token)
        .await
        .map_err(report)?;
    print_user("Account confirmed", &user);
    Ok(())
}

async fn handle_seed(state: &AppState, config: SeedConfig) -> anyhow::Result<()> {
    let summary = seeder::seed_all(state, config).await.map_err(report)?;
    println!(
        "\n✅ Seeded {} users and {} batches",
        summary.users, summary.batches
    );
    Ok(())
}
