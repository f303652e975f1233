//! # Schoolhouse Core
//!
//! Core types, errors, and utilities shared by every Schoolhouse crate.
//!
//! - [`errors`]: Application error type with HTTP response conversion
//! - [`password`]: bcrypt password hashing and verification
//! - [`serde`]: Deserialization helpers for loosely-typed external payloads
//!
//! # Example
//!
//! ```ignore
//! use schoolhouse_core::errors::AppError;
//! use schoolhouse_core::password::{hash_password, verify_password};
//!
//! let error = AppError::not_found(anyhow::anyhow!("User not found"));
//! let hash = hash_password("secure_password")?;
//! assert!(verify_password("secure_password", &hash)?);
//! ```

pub mod errors;
pub mod password;
pub mod serde;

// Re-export commonly used types at crate root
pub use errors::AppError;
pub use password::{hash_password, verify_password};
pub use crate::serde::presence;
