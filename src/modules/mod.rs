pub mod auth;
pub mod courses;
pub mod identities;
pub mod users;
