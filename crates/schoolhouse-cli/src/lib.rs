//! # Schoolhouse CLI
//!
//! Database seeding utilities for Schoolhouse development environments.
//!
//! This library crate provides the seeding functionality used by the CLI binary.
//!
//! ## Usage
//!
//! ```ignore
//! use schoolhouse_cli::seeder::{seed_all, SeedConfig};
//!
//! let summary = seed_all(&state, SeedConfig::default()).await?;
//! println!("{} users", summary.users);
//! ```

pub mod seeder;
