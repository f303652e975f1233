use anyhow::anyhow;
use schoolhouse_core::{AppError, presence, verify_password};
use schoolhouse_models::{LoginRequest, NewUser, PendingSignup, RegisterUserDto, User};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::mail::ConfirmationQueue;
use crate::modules::users::UserService;
use crate::store::UserStore;

pub const INVALID_CREDENTIALS: &str = "Invalid email/username or password";
pub const UNCONFIRMED: &str = "You have to confirm your email address before continuing.";

fn invalid_credentials() -> AppError {
    AppError::unauthorized(anyhow!(INVALID_CREDENTIALS))
}

pub struct AuthService;

impl AuthService {
    /// Self-service sign-up. When `pending` is given the registration
    /// completes an interrupted identity sign-in and the new user owns that
    /// identity.
    #[instrument(skip(store, confirmations, dto, pending))]
    pub async fn register(
        store: &dyn UserStore,
        confirmations: &ConfirmationQueue,
        dto: RegisterUserDto,
        pending: Option<&PendingSignup>,
    ) -> Result<User, AppError> {
        dto.validate().map_err(AppError::validation)?;
        let params = NewUser::from(dto);

        let draft = match pending {
            Some(pending) => {
                let draft = UserService::build_with_pending_identity(store, params, pending).await?;
                draft.validation.map_err(AppError::validation)?;
                draft.user
            }
            None => params,
        };

        UserService::create_user(store, confirmations, draft).await
    }

    #[instrument(skip(store, dto), fields(login = %dto.login))]
    pub async fn login(store: &dyn UserStore, dto: LoginRequest) -> Result<User, AppError> {
        if dto.validate().is_err() {
            return Err(invalid_credentials());
        }

        let Some(user) = UserService::find_for_login(store, &dto.login).await? else {
            warn!("login for unknown user");
            return Err(invalid_credentials());
        };

        let Some(hash) = presence(user.encrypted_password.as_deref()) else {
            warn!(user_id = %user.id, "login for user without password");
            return Err(invalid_credentials());
        };

        if !verify_password(&dto.password, hash)? {
            warn!(user_id = %user.id, "wrong password");
            return Err(invalid_credentials());
        }

        if !user.is_confirmed() {
            return Err(AppError::unauthorized(anyhow!(UNCONFIRMED)));
        }

        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }
}
