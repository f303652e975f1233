use anyhow::anyhow;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{Rng, thread_rng};
use schoolhouse_core::errors::field_error;
use schoolhouse_core::{AppError, hash_password, presence, verify_password};
use schoolhouse_models::{
    EnrollmentRecord, NewUser, PendingSignup, Role, UpdateAccountDto, User, UserAttributes,
};
use tracing::{debug, info, instrument, warn};
use validator::{Validate, ValidationErrors};

use super::validation::validate_role_associations;
use crate::mail::ConfirmationQueue;
use crate::store::{StoreError, UserRecord, UserStore};

const CONFIRMATION_TOKEN_LEN: usize = 32;
const TEMPORARY_PASSWORD_LEN: usize = 10;

/// A registration draft built from a pending identity sign-up. The draft is
/// returned even when it does not validate, so the form can be re-rendered.
#[derive(Debug)]
pub struct SignupDraft {
    pub user: NewUser,
    pub validation: Result<(), ValidationErrors>,
}

pub struct UserService;

impl UserService {
    /// Role association rules plus case-insensitive username uniqueness.
    ///
    /// The outer `Result` carries store failures; the inner one is the
    /// validation verdict.
    #[instrument(skip(store, user))]
    pub async fn validate<A>(
        store: &dyn UserStore,
        user: &A,
    ) -> Result<Result<(), ValidationErrors>, AppError>
    where
        A: UserAttributes + Sync + ?Sized,
    {
        let mut errors = validate_role_associations(user);

        if let Some(username) = presence(user.username()) {
            let taken = store
                .username_taken(username, user.user_id())
                .await
                .map_err(StoreError::into_app_error)?;
            if taken {
                errors.add("username", field_error("taken", "has already been taken"));
            }
        }

        Ok(if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        })
    }

    async fn ensure_valid<A>(store: &dyn UserStore, user: &A) -> Result<(), AppError>
    where
        A: UserAttributes + Sync + ?Sized,
    {
        Self::validate(store, user).await?.map_err(AppError::validation)
    }

    /// Persists a new user and schedules the confirmation mail.
    #[instrument(skip(store, confirmations, new_user))]
    pub async fn create_user(
        store: &dyn UserStore,
        confirmations: &ConfirmationQueue,
        new_user: NewUser,
    ) -> Result<User, AppError> {
        let record = Self::prepare_record(store, new_user).await?;
        let user = store
            .insert_user(&record)
            .await
            .map_err(StoreError::into_app_error)?;

        info!(user_id = %user.id, role = ?user.role, "user created");
        confirmations.enqueue(user.id);
        Ok(user)
    }

    /// Turns a draft into insertable column values: fills in the username,
    /// validates, hashes the password and issues a confirmation token.
    pub(crate) async fn prepare_record(
        store: &dyn UserStore,
        mut new_user: NewUser,
    ) -> Result<UserRecord, AppError> {
        new_user.validate().map_err(AppError::validation)?;

        if presence(new_user.username.as_deref()).is_none() {
            let username = new_user
                .derive_username()
                .map_err(AppError::unprocessable)?;
            new_user.username = Some(username);
        }

        let mut errors = match Self::validate(store, &new_user).await? {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        if Self::draft_requires_password(&new_user)
            && presence(new_user.password.as_deref()).is_none()
        {
            errors.add("password", field_error("blank", "can't be blank"));
        }
        if !errors.is_empty() {
            return Err(AppError::validation(errors));
        }

        let encrypted_password = match presence(new_user.password.as_deref()) {
            Some(password) => Some(hash_password(password)?),
            None => None,
        };

        Ok(UserRecord {
            username: new_user.username,
            email: new_user.email,
            name: new_user.name,
            encrypted_password,
            role: new_user.role,
            course_id: new_user.course_id,
            branch_id: new_user.branch_id,
            confirmation_token: Some(generate_confirmation_token()),
            batch_ids: new_user.batch_ids,
            identity_ids: new_user.identity_ids,
        })
    }

    fn draft_requires_password(new_user: &NewUser) -> bool {
        new_user.identity_ids.is_empty()
    }

    /// A password is required unless the user signs in through a linked identity.
    pub async fn password_required(store: &dyn UserStore, user: &User) -> Result<bool, AppError> {
        let identities = store
            .identities_for_user(user.id)
            .await
            .map_err(StoreError::into_app_error)?;
        Ok(identities.is_empty())
    }

    /// Checks `supplied` against the stored hash. Identity-linked users pass
    /// unconditionally since they may never have set a password.
    #[instrument(skip(store, user, supplied), fields(user_id = %user.id))]
    pub async fn authenticate_with_password(
        store: &dyn UserStore,
        user: &User,
        supplied: &str,
    ) -> Result<bool, AppError> {
        if !Self::password_required(store, user).await? {
            debug!("identity-linked user, password gate skipped");
            return Ok(true);
        }

        match presence(user.encrypted_password.as_deref()) {
            Some(hash) => verify_password(supplied, hash),
            None => Ok(false),
        }
    }

    /// Applies account changes. Accounts that already have a password must
    /// confirm the current one first.
    #[instrument(skip(store, user, dto), fields(user_id = %user.id))]
    pub async fn update_password(
        store: &dyn UserStore,
        mut user: User,
        dto: UpdateAccountDto,
    ) -> Result<User, AppError> {
        let mut errors = dto.validate().err().unwrap_or_default();
        if let (Some(password), Some(confirmation)) =
            (dto.password.as_deref(), dto.password_confirmation.as_deref())
        {
            if password != confirmation {
                errors.add(
                    "password_confirmation",
                    field_error("confirmation", "doesn't match Password"),
                );
            }
        }
        if !errors.is_empty() {
            return Err(AppError::validation(errors));
        }

        if let Some(hash) = presence(user.encrypted_password.as_deref()) {
            let current = presence(dto.current_password.as_deref());
            let verified = match current {
                Some(current) => verify_password(current, hash)?,
                None => false,
            };
            if !verified {
                warn!("current password rejected");
                let mut errors = ValidationErrors::new();
                let error = if current.is_none() {
                    field_error("blank", "can't be blank")
                } else {
                    field_error("invalid", "is invalid")
                };
                errors.add("current_password", error);
                return Err(AppError::validation(errors));
            }
        }

        if let Some(username) = dto.username {
            user.username = presence(Some(username.as_str())).map(str::to_string);
        }
        if let Some(email) = dto.email {
            user.email = presence(Some(email.as_str())).map(str::to_string);
        }
        if let Some(name) = dto.name {
            user.name = presence(Some(name.as_str())).map(str::to_string);
        }
        // a blank password means "keep the current one"
        if let Some(password) = presence(dto.password.as_deref()) {
            user.encrypted_password = Some(hash_password(password)?);
        }

        Self::save(store, user).await
    }

    /// Validates and writes back an existing user, deriving a username first
    /// if it is blank.
    pub async fn save(store: &dyn UserStore, mut user: User) -> Result<User, AppError> {
        if presence(user.username.as_deref()).is_none() {
            let username = user.derive_username().map_err(AppError::unprocessable)?;
            user.username = Some(username);
        }

        Self::ensure_valid(store, &user).await?;

        store
            .update_user(&user)
            .await
            .map_err(StoreError::into_app_error)
    }

    pub async fn find_for_login(
        store: &dyn UserStore,
        login: &str,
    ) -> Result<Option<User>, AppError> {
        let Some(login) = presence(Some(login)) else {
            return Ok(None);
        };
        store
            .find_user_by_login(login.trim())
            .await
            .map_err(StoreError::into_app_error)
    }

    /// Projects an enrollment onto a new student draft with a temporary
    /// password, a derived username and membership in the enrollment's batch.
    #[instrument(skip(store, record))]
    pub async fn build_from_enrollment(
        store: &dyn UserStore,
        record: &EnrollmentRecord,
    ) -> Result<NewUser, AppError> {
        let mut draft = record.to_new_user().map_err(AppError::bad_request)?;
        draft.username = Some(draft.derive_username().map_err(AppError::unprocessable)?);
        draft.course_id = record.course_id();
        draft.password = Some(temporary_password());
        draft.role = Some(Role::Student);

        let batch_id = record
            .batch_id()
            .ok_or_else(|| AppError::bad_request(anyhow!("Enrollment has no batch_id")))?;
        let batch = store
            .find_batch(batch_id)
            .await
            .map_err(StoreError::into_app_error)?
            .ok_or_else(|| AppError::not_found(anyhow!("Batch with id {} not found", batch_id)))?;
        draft.batch_ids.push(batch.id);

        Ok(draft)
    }

    pub async fn create_from_enrollment(
        store: &dyn UserStore,
        confirmations: &ConfirmationQueue,
        record: &EnrollmentRecord,
    ) -> Result<User, AppError> {
        let draft = Self::build_from_enrollment(store, record).await?;
        Self::create_user(store, confirmations, draft).await
    }

    /// Completes an identity sign-in that was interrupted for missing or
    /// conflicting profile data.
    pub async fn build_with_pending_identity(
        store: &dyn UserStore,
        params: NewUser,
        pending: &PendingSignup,
    ) -> Result<SignupDraft, AppError> {
        let mut user = pending.attributes.clone();
        if params.username.is_some() {
            user.username = params.username;
        }
        if params.email.is_some() {
            user.email = params.email;
        }
        if params.name.is_some() {
            user.name = params.name;
        }
        if params.password.is_some() {
            user.password = params.password;
        }

        if let Some(identity_id) = pending.identity_id {
            let identity = store
                .find_identity_by_id(identity_id)
                .await
                .map_err(StoreError::into_app_error)?
                .ok_or_else(|| {
                    AppError::not_found(anyhow!("Identity with id {} not found", identity_id))
                })?;
            user.identity_ids.push(identity.id);
        }

        let validation = match user.validate() {
            Ok(()) => Self::validate(store, &user).await?,
            Err(errors) => Err(errors),
        };
        Ok(SignupDraft { user, validation })
    }

    #[instrument(skip(store, token))]
    pub async fn confirm(store: &dyn UserStore, token: &str) -> Result<User, AppError> {
        let mut user = store
            .find_user_by_confirmation_token(token)
            .await
            .map_err(StoreError::into_app_error)?
            .ok_or_else(|| AppError::not_found(anyhow!("Confirmation token is invalid")))?;

        user.confirmed_at = Some(Utc::now());
        user.confirmation_token = None;
        let user = store
            .update_user(&user)
            .await
            .map_err(StoreError::into_app_error)?;

        info!(user_id = %user.id, "user confirmed");
        Ok(user)
    }
}

fn generate_confirmation_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONFIRMATION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Ten distinct lowercase letters. A placeholder only; it is never sent to
/// the student, who sets a real password later.
fn temporary_password() -> String {
    let mut letters: Vec<char> = ('a'..='z').collect();
    letters.shuffle(&mut thread_rng());
    letters.into_iter().take(TEMPORARY_PASSWORD_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_temporary_password_shape() {
        let password = temporary_password();
        assert_eq!(password.len(), TEMPORARY_PASSWORD_LEN);
        assert!(password.chars().all(|c| c.is_ascii_lowercase()));
        let distinct: HashSet<char> = password.chars().collect();
        assert_eq!(distinct.len(), TEMPORARY_PASSWORD_LEN);
    }

    #[test]
    fn test_confirmation_tokens_are_unique() {
        let a = generate_confirmation_token();
        let b = generate_confirmation_token();
        assert_eq!(a.len(), CONFIRMATION_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
