//! # Schoolhouse Models
//!
//! Domain models and DTOs for Schoolhouse: database entities, request
//! payloads and their validation rules.
//!
//! # Modules
//!
//! - [`ids`]: Strongly-typed entity identifiers
//! - [`users`]: Users, roles and account DTOs
//! - [`identities`]: External identities and provider callback payloads
//! - [`enrollments`]: Enrollment records converted into students
//! - [`courses`]: Courses and batches
//!
//! # Example
//!
//! ```ignore
//! use schoolhouse_models::users::{Role, UserAttributes};
//!
//! if user.is_student() {
//!     println!("enrolled in course {:?}", user.course_id);
//! }
//! ```

pub mod courses;
pub mod enrollments;
pub mod identities;
pub mod ids;
pub mod users;

// Re-export commonly used types at crate root for convenience
pub use courses::{Batch, Course, CreateCourseDto};
pub use enrollments::EnrollmentRecord;
pub use identities::{AuthInfo, AuthPayload, Identity, NewIdentity};
pub use ids::{BatchId, BranchId, CourseId, DisciplineId, IdentityId, LevelId, UserId};
pub use users::{
    LoginRequest, Membership, NewUser, PendingSignup, RegisterUserDto, Role, UpdateAccountDto,
    User, UserAttributes, UsernameError,
};
