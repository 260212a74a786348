//! Database row types and store errors.
//! Distinct from prochat-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use prochat_types::models::{PublicUser, UserProfile, UserRef};

pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password: String,
    pub handle: String,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            handle: self.handle.clone(),
        }
    }

    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id,
            name: self.name.clone(),
            handle: self.handle.clone(),
        }
    }

    pub fn into_profile(self, friends: Vec<Uuid>) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name,
            email: self.email,
            handle: self.handle,
            friends,
            created_at: self.created_at,
        }
    }
}

/// Input for `Database::create_user`. Email and handle must already be normalised.
pub struct NewUser<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub handle: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("handle already taken")]
    DuplicateHandle,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, Some(msg)) = &err {
            if code.code == rusqlite::ErrorCode::ConstraintViolation {
                if msg.contains("users.email") {
                    return StoreError::DuplicateEmail;
                }
                if msg.contains("users.handle") {
                    return StoreError::DuplicateHandle;
                }
            }
        }
        StoreError::Other(err.into())
    }
}
