pub mod service;

pub use service::{AuthService, INVALID_CREDENTIALS, UNCONFIRMED};
