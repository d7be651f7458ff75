use crate::model::{Id, post::PostMarker, user::UserMarker};
use serde::{
    Deserialize, Deserializer, Serialize,
    de::Error as _,
};
use thiserror::Error;
use time::OffsetDateTime;

pub const FEED_NAME_MAX_LEN: usize = 100;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct FeedMarker;

/// A named collection of post references, owned by exactly one user.
///
/// `post_ids` behaves like an insertion ordered set: a post is referenced at most once.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Feed {
    pub id: Id<FeedMarker>,
    pub name: FeedName,
    pub description: String,
    pub owner_id: Id<UserMarker>,
    pub post_ids: Vec<Id<PostMarker>>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The user editable part of a feed, as sent when creating or updating one.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct FeedContent {
    pub name: FeedName,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreateFeed {
    pub owner_id: Id<UserMarker>,
    pub content: FeedContent,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct FeedName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum InvalidFeedNameError {
    #[error("The feed name must not be blank")]
    Blank,
    #[error("The feed name is too long: {0}")]
    TooLong(String),
}

impl Feed {
    #[must_use]
    pub fn is_owned_by(&self, user_id: Id<UserMarker>) -> bool {
        self.owner_id == user_id
    }

    #[must_use]
    pub fn contains_post(&self, post_id: Id<PostMarker>) -> bool {
        self.post_ids.contains(&post_id)
    }

    /// Returns whether the post was newly added.
    pub fn add_post(&mut self, post_id: Id<PostMarker>) -> bool {
        if self.contains_post(post_id) {
            false
        } else {
            self.post_ids.push(post_id);
            true
        }
    }

    /// Returns whether the post was referenced before.
    pub fn remove_post(&mut self, post_id: Id<PostMarker>) -> bool {
        let len_before = self.post_ids.len();
        self.post_ids.retain(|&id| id != post_id);
        self.post_ids.len() != len_before
    }
}

impl FeedName {
    pub fn new(name: String) -> Result<Self, InvalidFeedNameError> {
        if name.trim().is_empty() {
            Err(InvalidFeedNameError::Blank)
        } else if name.chars().count() > FEED_NAME_MAX_LEN {
            Err(InvalidFeedNameError::TooLong(name))
        } else {
            Ok(Self(name))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FeedName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        FeedName::new(inner).map_err(D::Error::custom)
    }
}
