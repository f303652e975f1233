//! Role association rules.

use schoolhouse_core::errors::field_error;
use schoolhouse_models::{Role, UserAttributes};
use validator::ValidationErrors;

/// Checks that the associations a user carries match their role.
///
/// - a student must reference a course
/// - anyone else (including a user with no role yet) must not
/// - staff must reference a branch
pub fn validate_role_associations<A: UserAttributes + ?Sized>(user: &A) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    if user.is_student() {
        if user.course_id().is_none() {
            errors.add(
                "course",
                field_error("student_without_course", "should be associated with a course"),
            );
        }
    } else if user.course_id().is_some() {
        errors.add(
            "course",
            field_error(
                "course_for_non_student",
                "should not be associated with a course",
            ),
        );
    }

    if user.role() == Some(Role::Staff) && user.branch_id().is_none() {
        errors.add(
            "branch",
            field_error("staff_without_branch", "should be associated with a branch"),
        );
    }

    errors
}
