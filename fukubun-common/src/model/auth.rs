use crate::{
    model::{Id, user::UserMarker},
    util::PositiveDuration,
};
use argon2::{
    Argon2, Params, PasswordHasher, PasswordVerifier,
    password_hash::{self, PasswordHash, SaltString},
};
use base64::{DecodeError, Engine, display::Base64Display, prelude::BASE64_URL_SAFE_NO_PAD};
use std::{
    fmt::{Debug, Formatter},
    num::ParseIntError,
    str::FromStr,
    sync::LazyLock,
};
use thiserror::Error;
use time::UtcDateTime;

pub const AUTH_TOKEN_CORE_LEN: usize = 24;
pub const AUTH_TOKEN_SALT_LEN: usize = 18;
pub const AUTH_TOKEN_HASH_LEN: usize = Params::DEFAULT_OUTPUT_LEN;
pub const PASSWORD_SALT_LEN: usize = 16;
pub const PASSWORD_MIN_LEN: usize = 4;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing auth token failed: {0}")]
pub struct AuthTokenHashError(argon2::Error);

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum AuthTokenDecodeError {
    #[error("Not enough parts separated by ':'")]
    NotEnoughParts,
    #[error("Invalid user id: {0}")]
    InvalidUserId(ParseIntError),
    #[error("Decoding base64 failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("The length of the core part is incorrect")]
    InvalidCoreLength,
    #[error("The length of the salt part is incorrect")]
    InvalidSaltLength,
}

/// Session token handed to the client. Only its hash is stored.
///
/// The string form is `user_id:core:salt` with both byte parts in url-safe
/// base64 so the token can travel in a cookie.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct AuthToken {
    pub user_id: Id<UserMarker>,
    pub core: [u8; AUTH_TOKEN_CORE_LEN],
    pub salt: [u8; AUTH_TOKEN_SALT_LEN],
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct AuthTokenHash(pub Box<[u8; AUTH_TOKEN_HASH_LEN]>);

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Authentication {
    pub user: Id<UserMarker>,
    pub token_hash: AuthTokenHash,
    pub created_at: UtcDateTime,
    pub expires_after: Option<PositiveDuration>,
}

impl Authentication {
    #[must_use]
    pub fn is_expired_at(&self, now: UtcDateTime) -> bool {
        self.expires_after
            .is_some_and(|expires_after| self.created_at + expires_after.get() < now)
    }
}

impl AuthToken {
    #[must_use]
    pub fn generate_random(user_id: Id<UserMarker>) -> Self {
        let core = rand::random();
        let salt = rand::random();

        Self {
            user_id,
            core,
            salt,
        }
    }

    #[must_use]
    pub fn as_token_str(&self) -> String {
        let user_id = self.user_id;
        let encoded_core = Base64Display::new(&self.core, &BASE64_URL_SAFE_NO_PAD);
        let encoded_salt = Base64Display::new(&self.salt, &BASE64_URL_SAFE_NO_PAD);

        format!("{user_id}:{encoded_core}:{encoded_salt}")
    }

    pub fn hash(&self) -> Result<AuthTokenHash, AuthTokenHashError> {
        let argon2 = Argon2::default();

        let mut hash = Box::new([0; AUTH_TOKEN_HASH_LEN]);
        argon2
            .hash_password_into(&self.core, &self.salt, &mut *hash)
            .map_err(AuthTokenHashError)?;

        Ok(AuthTokenHash(hash))
    }
}

impl FromStr for AuthToken {
    type Err = AuthTokenDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');

        let user_id_part = parts.next().ok_or(Self::Err::NotEnoughParts)?;
        let core_part = parts.next().ok_or(Self::Err::NotEnoughParts)?;
        let salt_part = parts.next().ok_or(Self::Err::NotEnoughParts)?;

        let user_id = u64::from_str(user_id_part)
            .map_err(Self::Err::InvalidUserId)?
            .into();
        let core = BASE64_URL_SAFE_NO_PAD
            .decode(core_part)?
            .try_into()
            .map_err(|_| Self::Err::InvalidCoreLength)?;
        let salt = BASE64_URL_SAFE_NO_PAD
            .decode(salt_part)?
            .try_into()
            .map_err(|_| Self::Err::InvalidSaltLength)?;

        Ok(Self {
            user_id,
            core,
            salt,
        })
    }
}

impl Debug for AuthToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("user_id", &self.user_id)
            .field("core", &"[redacted]")
            .field("salt", &"[redacted]")
            .finish()
    }
}

impl Debug for AuthTokenHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthTokenHash").field(&"[redacted]").finish()
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The auth token hash had an invalid length")]
pub struct InvalidAuthTokenHashError;

impl TryFrom<Box<[u8]>> for AuthTokenHash {
    type Error = InvalidAuthTokenHashError;

    fn try_from(value: Box<[u8]>) -> Result<Self, Self::Error> {
        Ok(Self(
            value.try_into().map_err(|_| InvalidAuthTokenHashError)?,
        ))
    }
}

impl From<AuthTokenHash> for Vec<u8> {
    fn from(value: AuthTokenHash) -> Self {
        value.0.to_vec()
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum PasswordError {
    #[error("Password must be at least {PASSWORD_MIN_LEN} characters")]
    TooShort,
    #[error("Hashing password failed: {0}")]
    Hash(password_hash::Error),
}

/// Argon2 PHC string of a user's password.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PasswordDigest(String);

/// Stand-in checked when a login names no existing user.
static UNKNOWN_USER_DIGEST: LazyLock<Option<PasswordDigest>> =
    LazyLock::new(|| PasswordDigest::hash("unknown user").ok());

impl PasswordDigest {
    pub fn hash(password: &str) -> Result<Self, PasswordError> {
        if password.chars().count() < PASSWORD_MIN_LEN {
            return Err(PasswordError::TooShort);
        }

        let salt_bytes: [u8; PASSWORD_SALT_LEN] = rand::random();
        let salt = SaltString::encode_b64(&salt_bytes).map_err(PasswordError::Hash)?;
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(PasswordError::Hash)?;

        Ok(Self(hash.to_string()))
    }

    /// Wraps a digest read back from storage.
    #[must_use]
    pub fn from_stored(digest: String) -> Self {
        Self(digest)
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    /// A digest that fails to parse never verifies.
    #[must_use]
    pub fn verify(&self, password: &str) -> bool {
        PasswordHash::new(&self.0).is_ok_and(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
    }

    /// Does the work of [`Self::verify`] for a handle that has no digest, so
    /// unknown handles take as long to reject as wrong passwords.
    pub fn verify_unknown_user(password: &str) {
        if let Some(digest) = &*UNKNOWN_USER_DIGEST {
            let _ = digest.verify(password);
        }
    }
}

impl Debug for PasswordDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasswordDigest").field(&"[redacted]").finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        model::{
            Id,
            auth::{
                AuthToken, AuthTokenDecodeError, Authentication, PasswordDigest, PasswordError,
                UNKNOWN_USER_DIGEST,
            },
        },
        util::PositiveDuration,
    };
    use time::{Duration, macros::utc_datetime};

    #[test]
    fn token_string_round_trip() {
        let token = AuthToken::generate_random(Id::from(77));
        let parsed: AuthToken = token.as_token_str().parse().unwrap();

        assert_eq!(parsed, token);
        assert_eq!(parsed.hash().unwrap(), token.hash().unwrap());
    }

    #[test]
    fn token_string_is_cookie_safe() {
        let token = AuthToken::generate_random(Id::from(1));
        let encoded = token.as_token_str();

        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_'))
        );
    }

    #[test]
    fn malformed_tokens() {
        assert_eq!(
            "123".parse::<AuthToken>(),
            Err(AuthTokenDecodeError::NotEnoughParts)
        );
        assert!(matches!(
            "abc:AAAA:AAAA".parse::<AuthToken>(),
            Err(AuthTokenDecodeError::InvalidUserId(_))
        ));
        assert_eq!(
            "1:AAAA:AAAA".parse::<AuthToken>(),
            Err(AuthTokenDecodeError::InvalidCoreLength)
        );
    }

    #[test]
    fn authentication_expiry() {
        let token = AuthToken::generate_random(Id::from(5));
        let created_at = utc_datetime!(2025-03-01 12:00);
        let mut authentication = Authentication {
            user: token.user_id,
            token_hash: token.hash().unwrap(),
            created_at,
            expires_after: None,
        };

        assert!(!authentication.is_expired_at(created_at + Duration::days(400)));

        authentication.expires_after = Some(PositiveDuration::new_unchecked(Duration::hours(1)));
        assert!(!authentication.is_expired_at(created_at + Duration::minutes(59)));
        assert!(authentication.is_expired_at(created_at + Duration::minutes(61)));
    }

    #[test]
    fn password_digest() {
        let digest = PasswordDigest::hash("correct horse").unwrap();

        assert!(digest.verify("correct horse"));
        assert!(!digest.verify("battery staple"));
        assert!(!PasswordDigest::from_stored("garbage".to_owned()).verify("garbage"));
        assert_eq!(PasswordDigest::hash("abc"), Err(PasswordError::TooShort));
    }

    #[test]
    fn unknown_users_are_checked_against_a_real_digest() {
        let digest = UNKNOWN_USER_DIGEST.as_ref().unwrap();

        assert!(digest.get().starts_with("$argon2id$"));
        assert!(digest.verify("unknown user"));
        PasswordDigest::verify_unknown_user("hunter22");
    }
}
