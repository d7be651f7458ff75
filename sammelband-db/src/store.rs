//! The operations the feed service needs from persistence.
//!
//! Every write is a single call so that implementations can make it atomic.

use async_trait::async_trait;
use sammelband_common::{
    model::{
        Id, ModelValidationError,
        feed::{CreateFeed, Feed, FeedContent, FeedMarker, FeedName},
        page::{Page, PageRequest},
        post::{Post, PostMarker},
        session::{Session, SessionTokenHash},
        user::UserMarker,
    },
    snowflake::SnowflakeTimestampError,
};
use thiserror::Error;
use time::OffsetDateTime;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("The owner already has a feed with this name")]
    FeedNameTaken,
    #[error("Could not generate an id: {0}")]
    Snowflake(#[from] SnowflakeTimestampError),
    #[error("Running migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn fetch_feed(&self, feed_id: Id<FeedMarker>) -> Result<Option<Feed>>;

    /// The owner's feeds in creation order.
    async fn fetch_user_feeds(
        &self,
        owner_id: Id<UserMarker>,
        page_request: PageRequest,
    ) -> Result<Page<Feed>>;

    async fn feed_name_exists(&self, owner_id: Id<UserMarker>, name: &FeedName) -> Result<bool>;

    /// Fails with [`DbError::FeedNameTaken`] if the owner already has a feed with this name.
    async fn create_feed(&self, feed: &CreateFeed) -> Result<Feed>;

    /// Replaces name and description. `None` if the feed does not exist.
    async fn update_feed(
        &self,
        feed_id: Id<FeedMarker>,
        content: &FeedContent,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>>;

    /// Returns whether a feed was deleted.
    async fn delete_feed(&self, feed_id: Id<FeedMarker>) -> Result<bool>;

    /// Adds the post unless the feed already references it and bumps `updated_at`.
    async fn add_feed_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>>;

    /// Removes the post if the feed references it and bumps `updated_at`.
    async fn remove_feed_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn fetch_session(&self, token_hash: &SessionTokenHash) -> Result<Option<Session>>;
}
