pub mod service;
pub mod validation;

pub use service::{SignupDraft, UserService};
pub use validation::validate_role_associations;
