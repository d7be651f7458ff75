use sammelband_common::model::{
    Id,
    feed::{CreateFeed, Feed, FeedContent, FeedMarker, FeedName},
    page::{Page, PageRequest},
    post::PostMarker,
    user::UserMarker,
};
use sammelband_db::{DbError, FeedStore, PostStore};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

pub type Result<T, E = FeedServiceError> = std::result::Result<T, E>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum FeedAction {
    View,
    Update,
    Delete,
    Modify,
}

impl Display for FeedAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FeedAction::View => "view",
            FeedAction::Update => "update",
            FeedAction::Delete => "delete",
            FeedAction::Modify => "modify",
        })
    }
}

#[derive(Debug, Error)]
pub enum FeedServiceError {
    #[error("Feed with id {0} was not found.")]
    FeedNotFound(Id<FeedMarker>),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("Not authorized to {action} feed {feed_id}.")]
    Forbidden {
        feed_id: Id<FeedMarker>,
        action: FeedAction,
    },
    #[error("A feed named {:?} already exists.", .0.get())]
    NameConflict(FeedName),
    #[error(transparent)]
    Store(#[from] DbError),
}

/// Feed operations on behalf of an authenticated caller.
///
/// A caller only ever sees and changes feeds they own.
pub struct FeedService {
    feeds: Arc<dyn FeedStore>,
    posts: Arc<dyn PostStore>,
}

impl FeedService {
    #[must_use]
    pub fn new(feeds: Arc<dyn FeedStore>, posts: Arc<dyn PostStore>) -> Self {
        Self { feeds, posts }
    }

    #[instrument(skip(self, content), fields(name = content.name.get()))]
    pub async fn create_feed(&self, content: FeedContent, caller: Id<UserMarker>) -> Result<Feed> {
        if self.feeds.feed_name_exists(caller, &content.name).await? {
            debug!("Feed name already taken");
            return Err(FeedServiceError::NameConflict(content.name));
        }

        let name = content.name.clone();
        let feed = self
            .feeds
            .create_feed(&CreateFeed {
                owner_id: caller,
                content,
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .map_err(|err| name_conflict_or_store(err, name))?;

        info!(feed_id = %feed.id, "Created feed");
        Ok(feed)
    }

    #[instrument(skip(self))]
    pub async fn list_feeds(
        &self,
        caller: Id<UserMarker>,
        page_request: PageRequest,
    ) -> Result<Page<Feed>> {
        Ok(self.feeds.fetch_user_feeds(caller, page_request).await?)
    }

    #[instrument(skip(self))]
    pub async fn get_feed(&self, feed_id: Id<FeedMarker>, caller: Id<UserMarker>) -> Result<Feed> {
        self.owned_feed(feed_id, caller, FeedAction::View).await
    }

    #[instrument(skip(self, content), fields(name = content.name.get()))]
    pub async fn update_feed(
        &self,
        feed_id: Id<FeedMarker>,
        content: FeedContent,
        caller: Id<UserMarker>,
    ) -> Result<Feed> {
        let feed = self.owned_feed(feed_id, caller, FeedAction::Update).await?;

        if feed.name != content.name && self.feeds.feed_name_exists(caller, &content.name).await? {
            debug!("Feed name already taken");
            return Err(FeedServiceError::NameConflict(content.name));
        }

        self.feeds
            .update_feed(feed_id, &content, OffsetDateTime::now_utc())
            .await
            .map_err(|err| name_conflict_or_store(err, content.name))?
            .ok_or(FeedServiceError::FeedNotFound(feed_id))
    }

    #[instrument(skip(self))]
    pub async fn delete_feed(&self, feed_id: Id<FeedMarker>, caller: Id<UserMarker>) -> Result<()> {
        self.owned_feed(feed_id, caller, FeedAction::Delete).await?;

        if !self.feeds.delete_feed(feed_id).await? {
            return Err(FeedServiceError::FeedNotFound(feed_id));
        }

        info!("Deleted feed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        caller: Id<UserMarker>,
    ) -> Result<Feed> {
        self.owned_feed(feed_id, caller, FeedAction::Modify).await?;
        self.existing_post(post_id).await?;

        self.feeds
            .add_feed_post(feed_id, post_id, OffsetDateTime::now_utc())
            .await?
            .ok_or(FeedServiceError::FeedNotFound(feed_id))
    }

    /// The post has to exist even though only the reference is removed.
    #[instrument(skip(self))]
    pub async fn remove_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        caller: Id<UserMarker>,
    ) -> Result<Feed> {
        self.owned_feed(feed_id, caller, FeedAction::Modify).await?;
        self.existing_post(post_id).await?;

        self.feeds
            .remove_feed_post(feed_id, post_id, OffsetDateTime::now_utc())
            .await?
            .ok_or(FeedServiceError::FeedNotFound(feed_id))
    }

    async fn owned_feed(
        &self,
        feed_id: Id<FeedMarker>,
        caller: Id<UserMarker>,
        action: FeedAction,
    ) -> Result<Feed> {
        let feed = self
            .feeds
            .fetch_feed(feed_id)
            .await?
            .ok_or(FeedServiceError::FeedNotFound(feed_id))?;

        if !feed.is_owned_by(caller) {
            debug!(owner_id = %feed.owner_id, %action, "Caller does not own feed");
            return Err(FeedServiceError::Forbidden { feed_id, action });
        }

        Ok(feed)
    }

    async fn existing_post(&self, post_id: Id<PostMarker>) -> Result<()> {
        self.posts
            .fetch_post(post_id)
            .await?
            .map(|_| ())
            .ok_or(FeedServiceError::PostNotFound(post_id))
    }
}

fn name_conflict_or_store(err: DbError, name: FeedName) -> FeedServiceError {
    match err {
        DbError::FeedNameTaken => FeedServiceError::NameConflict(name),
        other => FeedServiceError::Store(other),
    }
}
