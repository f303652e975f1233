pub mod service;

pub use service::{IdentityService, SignIn};
