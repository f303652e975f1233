use schoolhouse_core::{AppError, presence};
use schoolhouse_models::users::derive_username;
use schoolhouse_models::{
    AuthPayload, Identity, IdentityId, NewUser, PendingSignup, User, UserAttributes,
};
use tracing::{debug, info, instrument};

use crate::mail::ConfirmationQueue;
use crate::modules::users::UserService;
use crate::store::{IDENTITY_UNIQUE, LinkOutcome, StoreError, UserStore};

pub struct IdentityService;

/// Result of an identity callback.
#[derive(Debug)]
pub enum SignIn {
    Resolved(User),
    /// The provider's claims did not make a valid user (for example the
    /// nickname is taken). The identity exists but has no owner yet; the
    /// pending signup carries the claims into registration.
    NeedsSignup {
        pending: PendingSignup,
        error: AppError,
    },
}

impl IdentityService {
    /// Looks up the identity for the payload's `(provider, uid)`, inserting
    /// it when missing. A concurrent insert of the same pair surfaces as a
    /// unique violation and is resolved by reading the winner's row.
    #[instrument(skip(store, payload), fields(provider = %payload.provider, uid = %payload.uid))]
    pub async fn find_or_create_identity(
        store: &dyn UserStore,
        payload: &AuthPayload,
    ) -> Result<Identity, AppError> {
        if let Some(identity) = store
            .find_identity(&payload.provider, &payload.uid)
            .await
            .map_err(StoreError::into_app_error)?
        {
            return Ok(identity);
        }

        match store.insert_identity(&payload.identity_key()).await {
            Ok(identity) => {
                debug!(identity_id = %identity.id, "identity created");
                Ok(identity)
            }
            Err(err) if err.is_unique_violation_of(IDENTITY_UNIQUE) => {
                debug!("identity inserted concurrently, re-reading");
                store
                    .find_identity(&payload.provider, &payload.uid)
                    .await
                    .map_err(StoreError::into_app_error)?
                    .ok_or_else(|| err.into_app_error())
            }
            Err(err) => Err(err.into_app_error()),
        }
    }

    /// Copies provider claims onto the profile. Present values win; absent
    /// ones keep what is already there. A still-blank username is derived
    /// from the email when one is known.
    pub fn populate_from_auth<A: UserAttributes + ?Sized>(user: &mut A, payload: &AuthPayload) {
        let info = &payload.info;
        let fields = user.profile_mut();

        if let Some(nickname) = presence(info.nickname.as_deref()) {
            *fields.username = Some(nickname.to_string());
        }
        if let Some(email) = presence(info.email.as_deref()) {
            *fields.email = Some(email.to_string());
        }
        if presence(fields.username.as_deref()).is_none() {
            if let Ok(username) = derive_username(fields.email.as_deref()) {
                *fields.username = Some(username);
            }
        }
        if let Some(first_name) = presence(info.first_name.as_deref()) {
            *fields.name = Some(first_name.to_string());
        }
    }

    /// Returns the user owning the payload's identity, creating identity and
    /// user as needed. Concurrent calls for the same identity all return the
    /// same user.
    pub async fn resolve_or_create_user(
        store: &dyn UserStore,
        confirmations: &ConfirmationQueue,
        payload: &AuthPayload,
    ) -> Result<User, AppError> {
        match Self::sign_in(store, confirmations, payload).await? {
            SignIn::Resolved(user) => Ok(user),
            SignIn::NeedsSignup { error, .. } => Err(error),
        }
    }

    /// Like [`Self::resolve_or_create_user`], but a draft that fails
    /// validation comes back as a [`PendingSignup`] instead of an error.
    #[instrument(skip(store, confirmations, payload), fields(provider = %payload.provider))]
    pub async fn sign_in(
        store: &dyn UserStore,
        confirmations: &ConfirmationQueue,
        payload: &AuthPayload,
    ) -> Result<SignIn, AppError> {
        let identity = Self::find_or_create_identity(store, payload).await?;
        if let Some(user) = Self::owner_of(store, identity.id).await? {
            return Ok(SignIn::Resolved(user));
        }

        let mut attributes = NewUser::default();
        Self::populate_from_auth(&mut attributes, payload);
        let mut draft = attributes.clone();
        draft.identity_ids.push(identity.id);

        let record = match UserService::prepare_record(store, draft).await {
            Ok(record) => record,
            Err(err) => {
                // A racer may have linked the identity since we looked, in
                // which case its user now holds our username.
                if let Some(user) = Self::owner_of(store, identity.id).await? {
                    return Ok(SignIn::Resolved(user));
                }
                if err.is_validation() {
                    info!(identity_id = %identity.id, "identity needs signup");
                    return Ok(SignIn::NeedsSignup {
                        pending: PendingSignup {
                            attributes,
                            identity_id: Some(identity.id),
                        },
                        error: err,
                    });
                }
                return Err(err);
            }
        };

        match store
            .create_user_for_identity(identity.id, &record)
            .await
            .map_err(StoreError::into_app_error)?
        {
            LinkOutcome::Created(user) => {
                info!(user_id = %user.id, identity_id = %identity.id, "user created from identity");
                confirmations.enqueue(user.id);
                Ok(SignIn::Resolved(user))
            }
            LinkOutcome::Existing(user) => {
                debug!(user_id = %user.id, "identity linked concurrently");
                Ok(SignIn::Resolved(user))
            }
        }
    }

    /// Refreshes an existing user from a provider payload and links the
    /// identity to them.
    #[instrument(skip(store, user, payload), fields(user_id = %user.id))]
    pub async fn update_from_auth(
        store: &dyn UserStore,
        mut user: User,
        payload: &AuthPayload,
    ) -> Result<User, AppError> {
        let identity = Self::find_or_create_identity(store, payload).await?;
        Self::populate_from_auth(&mut user, payload);
        let user = UserService::save(store, user).await?;
        store
            .attach_identity(identity.id, user.id)
            .await
            .map_err(StoreError::into_app_error)?;
        Ok(user)
    }

    async fn owner_of(
        store: &dyn UserStore,
        identity_id: IdentityId,
    ) -> Result<Option<User>, AppError> {
        let identity = store
            .find_identity_by_id(identity_id)
            .await
            .map_err(StoreError::into_app_error)?;
        match identity.and_then(|identity| identity.user_id) {
            Some(user_id) => store
                .find_user(user_id)
                .await
                .map_err(StoreError::into_app_error),
            None => Ok(None),
        }
    }
}
