//! Bearer sessions.
//!
//! Clients present a [`SessionToken`] as `<user id>:<base64 core>:<base64 salt>`.
//! The store only ever sees the Argon2 hash of the core, keyed by that hash.

use crate::{
    model::{Id, user::UserMarker},
    util::PositiveDuration,
};
use argon2::{Argon2, Params};
use base64::{DecodeError, Engine, display::Base64Display, prelude::BASE64_STANDARD};
use std::{
    fmt::{Debug, Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;
use time::UtcDateTime;

pub const SESSION_TOKEN_CORE_LEN: usize = 24;
pub const SESSION_TOKEN_SALT_LEN: usize = 18;
pub const SESSION_TOKEN_HASH_LEN: usize = Params::DEFAULT_OUTPUT_LEN;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing session token failed: {0}")]
pub struct SessionTokenHashError(argon2::Error);

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum SessionTokenDecodeError {
    #[error("Expected three parts separated by ':'")]
    WrongPartCount,
    #[error("Invalid user id: {0}")]
    InvalidUserId(#[from] ParseIntError),
    #[error("The {part} is not valid base64: {source}")]
    Decode {
        part: &'static str,
        source: DecodeError,
    },
    #[error("The {part} is {actual} bytes long, expected {expected}")]
    InvalidLength {
        part: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionToken {
    pub user_id: Id<UserMarker>,
    pub core: [u8; SESSION_TOKEN_CORE_LEN],
    pub salt: [u8; SESSION_TOKEN_SALT_LEN],
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionTokenHash(pub Box<[u8; SESSION_TOKEN_HASH_LEN]>);

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Session {
    pub user_id: Id<UserMarker>,
    pub token_hash: SessionTokenHash,
    pub created_at: UtcDateTime,
    pub expires_after: Option<PositiveDuration>,
}

impl SessionToken {
    #[must_use]
    pub fn generate_random(user_id: Id<UserMarker>) -> Self {
        Self {
            user_id,
            core: rand::random(),
            salt: rand::random(),
        }
    }

    pub fn hash(&self) -> Result<SessionTokenHash, SessionTokenHashError> {
        let mut hash = Box::new([0; SESSION_TOKEN_HASH_LEN]);
        Argon2::default()
            .hash_password_into(&self.core, &self.salt, &mut *hash)
            .map_err(SessionTokenHashError)?;

        Ok(SessionTokenHash(hash))
    }
}

impl Session {
    /// Starts a session for `user_id` and hands back the token the client has to present.
    pub fn issue(
        user_id: Id<UserMarker>,
        created_at: UtcDateTime,
        expires_after: Option<PositiveDuration>,
    ) -> Result<(Self, SessionToken), SessionTokenHashError> {
        let token = SessionToken::generate_random(user_id);
        let session = Self {
            user_id,
            token_hash: token.hash()?,
            created_at,
            expires_after,
        };

        Ok((session, token))
    }

    /// A token whose id part names another user is rejected even if the hash matches.
    #[must_use]
    pub fn is_valid_for(&self, token: &SessionToken, now: UtcDateTime) -> bool {
        self.user_id == token.user_id && !self.is_expired_at(now)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: UtcDateTime) -> bool {
        self.expires_after
            .is_some_and(|expires_after| self.created_at + expires_after.get() < now)
    }
}

fn decode_part<const LEN: usize>(
    part: &'static str,
    encoded: &str,
) -> Result<[u8; LEN], SessionTokenDecodeError> {
    let decoded = BASE64_STANDARD
        .decode(encoded)
        .map_err(|source| SessionTokenDecodeError::Decode { part, source })?;

    let actual = decoded.len();
    decoded
        .try_into()
        .map_err(|_| SessionTokenDecodeError::InvalidLength {
            part,
            expected: LEN,
            actual,
        })
}

impl FromStr for SessionToken {
    type Err = SessionTokenDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(user_id), Some(core), Some(salt), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Self::Err::WrongPartCount);
        };

        Ok(Self {
            user_id: user_id.parse()?,
            core: decode_part("core", core)?,
            salt: decode_part("salt", salt)?,
        })
    }
}

/// The wire form. Only ever sent to the client the session belongs to.
impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.user_id,
            Base64Display::new(&self.core, &BASE64_STANDARD),
            Base64Display::new(&self.salt, &BASE64_STANDARD)
        )
    }
}

impl Debug for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Debug for SessionTokenHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionTokenHash(..)")
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The session token hash is {0} bytes long, expected {SESSION_TOKEN_HASH_LEN}")]
pub struct InvalidSessionTokenHashError(usize);

impl TryFrom<Vec<u8>> for SessionTokenHash {
    type Error = InvalidSessionTokenHashError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let len = value.len();
        value
            .try_into()
            .map(Self)
            .map_err(|_| InvalidSessionTokenHashError(len))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        model::session::{
            InvalidSessionTokenHashError, SESSION_TOKEN_HASH_LEN, Session, SessionToken,
            SessionTokenDecodeError, SessionTokenHash,
        },
        util::PositiveDuration,
    };
    use time::{Duration, macros::utc_datetime};

    #[test]
    fn token_string_parses_back() {
        let token = SessionToken::generate_random(42_u64.into());
        let parsed: SessionToken = token.to_string().parse().unwrap();

        assert_eq!(parsed, token);
        assert_eq!(parsed.hash().unwrap(), token.hash().unwrap());
    }

    #[test]
    fn malformed_tokens() {
        assert_eq!(
            "42:abc".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::WrongPartCount)
        );
        assert_eq!(
            "42:AAAA:AAAA:AAAA".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::WrongPartCount)
        );
        assert!(matches!(
            "me:AAAA:AAAA".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::InvalidUserId(_))
        ));
        assert!(matches!(
            "42:%%%%:AAAA".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::Decode { part: "core", .. })
        ));
        assert_eq!(
            "42:AAAA:AAAA".parse::<SessionToken>(),
            Err(SessionTokenDecodeError::InvalidLength {
                part: "core",
                expected: 24,
                actual: 3,
            })
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let token = SessionToken::generate_random(1_u64.into());
        let debug = format!("{token:?} {:?}", token.hash().unwrap());

        assert!(!debug.contains(&token.to_string()));
        assert!(debug.starts_with("SessionToken { user_id: "));
        assert!(debug.ends_with(", .. } SessionTokenHash(..)"));
    }

    #[test]
    fn hash_length_is_checked() {
        assert!(SessionTokenHash::try_from(vec![0; SESSION_TOKEN_HASH_LEN]).is_ok());
        assert_eq!(
            SessionTokenHash::try_from(vec![0; 3]),
            Err(InvalidSessionTokenHashError(3))
        );
    }

    #[test]
    fn session_expiry() {
        let created_at = utc_datetime!(2025-10-19 12:00);
        let (mut session, token) = Session::issue(7_u64.into(), created_at, None).unwrap();

        assert_eq!(session.token_hash, token.hash().unwrap());
        assert!(session.is_valid_for(&token, created_at + Duration::days(3650)));

        session.expires_after = PositiveDuration::new(Duration::hours(1));
        assert!(session.is_valid_for(&token, created_at + Duration::minutes(59)));
        assert!(!session.is_valid_for(&token, created_at + Duration::minutes(61)));

        let other_user = SessionToken {
            user_id: 8_u64.into(),
            ..token.clone()
        };
        assert!(!session.is_valid_for(&other_user, created_at));
    }
}
