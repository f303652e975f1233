//! External identity models.
//!
//! An [`Identity`] links one `(provider, uid)` pair to a local user. The
//! [`AuthPayload`] is what an identity provider hands back on its callback;
//! only `provider`, `uid` and the `info` claims are read.

use chrono::{DateTime, Utc};
use schoolhouse_core::serde::{deserialize_blank_as_none, deserialize_string_or_number};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::ids::{IdentityId, UserId};

/// A linked external credential.
#[derive(Serialize, Deserialize, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    /// Unset only between the identity insert and the owner link.
    pub user_id: Option<UserId>,
    pub provider: String,
    pub uid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lookup key of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewIdentity {
    pub provider: String,
    pub uid: String,
}

/// Claims copied onto the local profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    #[serde(default, deserialize_with = "deserialize_blank_as_none")]
    pub nickname: Option<String>,
    #[serde(default, deserialize_with = "deserialize_blank_as_none")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_blank_as_none")]
    pub first_name: Option<String>,
}

/// Identity provider callback payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub provider: String,
    #[serde(deserialize_with = "deserialize_string_or_number")]
    pub uid: String,
    #[serde(default)]
    pub info: AuthInfo,
}

impl AuthPayload {
    pub fn identity_key(&self) -> NewIdentity {
        NewIdentity {
            provider: self.provider.clone(),
            uid: self.uid.clone(),
        }
    }
}
