//! User domain models and DTOs.
//!
//! A [`User`] carries an optional [`Role`] discriminator. The role decides
//! which associations are mandatory: students belong to a course, staff
//! belong to a branch, and nobody but a student may reference a course.
//! Those rules are checked by the service layer against any type that
//! implements [`UserAttributes`], so persisted users and unsaved drafts
//! ([`NewUser`]) share one set of validations.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schoolhouse_core::presence;
use serde::{Deserialize, Serialize};
use sqlx::{
    Database, Decode, Encode, FromRow, Type,
    postgres::{PgTypeInfo, Postgres},
};
use thiserror::Error;
use validator::Validate;

use crate::ids::{BatchId, BranchId, CourseId, IdentityId, UserId};

/// Attribute names a user record owns. Foreign records (enrollments) are
/// projected onto this set before being applied to a user.
pub const USER_ATTRIBUTES: &[&str] = &["username", "email", "name", "course_id", "branch_id"];

/// The closed set of roles a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Administrator,
    Teacher,
    Staff,
    Student,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Administrator, Role::Teacher, Role::Staff, Role::Student];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::Teacher => "Teacher",
            Role::Staff => "Staff",
            Role::Student => "Student",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct RoleParseError(pub String);

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RoleParseError(s.to_string()))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Stored as TEXT so the column stays readable from SQL.
impl Type<Postgres> for Role {
    fn type_info() -> PgTypeInfo {
        <&str as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <&str as Type<Postgres>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Postgres> for Role {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as Encode<'q, Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> Decode<'r, Postgres> for Role {
    fn decode(value: <Postgres as Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as Decode<'r, Postgres>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

/// Raised when a username has to be derived but there is nothing to derive it from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("cannot derive a username: email is missing")]
    NoEmail,
    #[error("cannot derive a username: email has no local part")]
    EmptyLocalPart,
}

/// Returns the part of `email` before the `@`.
pub fn derive_username(email: Option<&str>) -> Result<String, UsernameError> {
    let email = presence(email).ok_or(UsernameError::NoEmail)?;
    let local = email.trim().split('@').next().unwrap_or_default();
    if local.is_empty() {
        return Err(UsernameError::EmptyLocalPart);
    }
    Ok(local.to_string())
}

/// Mutable view of the profile fields an identity provider may overwrite.
pub struct ProfileFields<'a> {
    pub username: &'a mut Option<String>,
    pub email: &'a mut Option<String>,
    pub name: &'a mut Option<String>,
}

/// Read access to the attributes that role and uniqueness rules inspect.
pub trait UserAttributes {
    /// `None` for records that have not been persisted yet.
    fn user_id(&self) -> Option<UserId>;
    fn username(&self) -> Option<&str>;
    fn email(&self) -> Option<&str>;
    fn role(&self) -> Option<Role>;
    fn course_id(&self) -> Option<CourseId>;
    fn branch_id(&self) -> Option<BranchId>;
    fn profile_mut(&mut self) -> ProfileFields<'_>;

    fn derive_username(&self) -> Result<String, UsernameError> {
        derive_username(self.email())
    }

    fn is_admin(&self) -> bool {
        self.role() == Some(Role::Administrator)
    }

    fn is_staff(&self) -> bool {
        self.role() == Some(Role::Staff)
    }

    fn is_teacher(&self) -> bool {
        self.role() == Some(Role::Teacher)
    }

    fn is_student(&self) -> bool {
        self.role() == Some(Role::Student)
    }
}

/// A user in the system.
#[derive(Serialize, Deserialize, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(skip_serializing, default)]
    pub encrypted_password: Option<String>,
    pub role: Option<Role>,
    pub course_id: Option<CourseId>,
    pub branch_id: Option<BranchId>,
    #[serde(skip_serializing, default)]
    pub confirmation_token: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    pub fn has_password(&self) -> bool {
        presence(self.encrypted_password.as_deref()).is_some()
    }

    /// The typed role view, or `None` when the association rules are broken.
    pub fn membership(&self) -> Option<Membership> {
        Membership::of(self)
    }
}

impl UserAttributes for User {
    fn user_id(&self) -> Option<UserId> {
        Some(self.id)
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn role(&self) -> Option<Role> {
        self.role
    }

    fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    fn profile_mut(&mut self) -> ProfileFields<'_> {
        ProfileFields {
            username: &mut self.username,
            email: &mut self.email,
            name: &mut self.name,
        }
    }
}

/// Role together with the association it requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role")]
pub enum Membership {
    Unassigned,
    Administrator,
    Teacher,
    Staff { branch_id: BranchId },
    Student { course_id: CourseId },
}

impl Membership {
    pub fn of<A: UserAttributes + ?Sized>(user: &A) -> Option<Self> {
        match (user.role(), user.course_id()) {
            (Some(Role::Student), Some(course_id)) => Some(Membership::Student { course_id }),
            (Some(Role::Student), None) | (_, Some(_)) => None,
            (Some(Role::Staff), None) => user
                .branch_id()
                .map(|branch_id| Membership::Staff { branch_id }),
            (Some(Role::Teacher), None) => Some(Membership::Teacher),
            (Some(Role::Administrator), None) => Some(Membership::Administrator),
            (None, None) => Some(Membership::Unassigned),
        }
    }
}

/// An unsaved user. Converted into a row by the user service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewUser {
    #[serde(default)]
    pub username: Option<String>,
    #[validate(email)]
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Plain-text password, hashed before insert.
    #[validate(length(min = 6, max = 128))]
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub course_id: Option<CourseId>,
    #[serde(default)]
    pub branch_id: Option<BranchId>,
    #[serde(default)]
    pub batch_ids: Vec<BatchId>,
    #[serde(skip)]
    pub identity_ids: Vec<IdentityId>,
}

impl UserAttributes for NewUser {
    fn user_id(&self) -> Option<UserId> {
        None
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn role(&self) -> Option<Role> {
        self.role
    }

    fn course_id(&self) -> Option<CourseId> {
        self.course_id
    }

    fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    fn profile_mut(&mut self) -> ProfileFields<'_> {
        ProfileFields {
            username: &mut self.username,
            email: &mut self.email,
            name: &mut self.name,
        }
    }
}

/// Self-service registration.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterUserDto {
    pub username: Option<String>,
    #[validate(email)]
    pub email: String,
    pub name: Option<String>,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    #[validate(must_match(other = "password"))]
    pub password_confirmation: String,
}

impl From<RegisterUserDto> for NewUser {
    fn from(dto: RegisterUserDto) -> Self {
        NewUser {
            username: dto.username,
            email: Some(dto.email),
            name: dto.name,
            password: Some(dto.password),
            ..NewUser::default()
        }
    }
}

/// Account changes submitted by the user.
///
/// `current_password` is only checked when the account already has a
/// password; identity-only accounts set their first password without it.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAccountDto {
    pub username: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub name: Option<String>,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
    /// Checked against `password` by the user service when both are given.
    pub password_confirmation: Option<String>,
    pub current_password: Option<String>,
}

/// Login by username or email.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub login: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Sign-up state left behind by an identity callback that could not create
/// the user on its own (for example because the derived username was taken).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingSignup {
    #[serde(default)]
    pub attributes: NewUser,
    pub identity_id: Option<IdentityId>,
}
