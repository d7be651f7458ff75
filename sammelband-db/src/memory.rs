//! An in-process store with the same semantics as [`DbClient`](crate::DbClient).
//!
//! Used by the test suites and for running the API without a database.

use crate::store::{DbError, FeedStore, PostStore, Result, SessionStore};
use async_trait::async_trait;
use sammelband_common::{
    model::{
        Id, SammelbandSnowflakeGenerator,
        feed::{CreateFeed, Feed, FeedContent, FeedMarker, FeedName},
        page::{Page, PageRequest},
        post::{CreatePost, Post, PostMarker},
        session::{Session, SessionToken, SessionTokenHash, SessionTokenHashError},
        user::{CreateUser, User, UserMarker},
    },
    snowflake::{ProcessId, WorkerId},
    util::PositiveDuration,
};
use std::collections::{BTreeMap, HashMap};
use time::{OffsetDateTime, UtcDateTime};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<Id<UserMarker>, User>,
    posts: BTreeMap<Id<PostMarker>, Post>,
    feeds: BTreeMap<Id<FeedMarker>, Feed>,
    sessions: HashMap<SessionTokenHash, Session>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    snowflake_generator: Mutex<SammelbandSnowflakeGenerator>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            state: Mutex::default(),
            snowflake_generator: Mutex::new(SammelbandSnowflakeGenerator::new(
                worker_id, process_id,
            )),
        }
    }

    async fn generate_id<Marker>(&self) -> Result<Id<Marker>> {
        Ok(self.snowflake_generator.lock().await.generate()?.into())
    }

    pub async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let user = User {
            id: self.generate_id().await?,
            handle: user.handle.clone(),
        };

        self.state
            .lock()
            .await
            .users
            .insert(user.id, user.clone());
        Ok(user)
    }

    #[cfg(test)]
    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Option<User> {
        self.state.lock().await.users.get(&user_id).cloned()
    }

    pub async fn create_post(&self, post: &CreatePost) -> Result<Post> {
        let post = Post {
            id: self.generate_id().await?,
            author_id: post.author_id,
            content: post.content.clone(),
        };

        self.state
            .lock()
            .await
            .posts
            .insert(post.id, post.clone());
        Ok(post)
    }

    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> bool {
        self.state.lock().await.posts.remove(&post_id).is_some()
    }

    /// Issues a new session for the user and returns the token the client has to present.
    pub async fn create_session(
        &self,
        user_id: Id<UserMarker>,
        expires_after: Option<PositiveDuration>,
    ) -> Result<SessionToken, SessionTokenHashError> {
        let (session, token) = Session::issue(user_id, UtcDateTime::now(), expires_after)?;
        self.state
            .lock()
            .await
            .sessions
            .insert(session.token_hash.clone(), session);

        Ok(token)
    }

    async fn change_feed(
        &self,
        feed_id: Id<FeedMarker>,
        updated_at: OffsetDateTime,
        change: impl FnOnce(&mut Feed) + Send,
    ) -> Option<Feed> {
        let mut state = self.state.lock().await;
        let feed = state.feeds.get_mut(&feed_id)?;

        change(feed);
        feed.updated_at = updated_at;

        Some(feed.clone())
    }
}

fn name_taken(state: &MemoryState, owner_id: Id<UserMarker>, name: &FeedName) -> bool {
    state
        .feeds
        .values()
        .any(|feed| feed.is_owned_by(owner_id) && feed.name == *name)
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn fetch_feed(&self, feed_id: Id<FeedMarker>) -> Result<Option<Feed>> {
        Ok(self.state.lock().await.feeds.get(&feed_id).cloned())
    }

    async fn fetch_user_feeds(
        &self,
        owner_id: Id<UserMarker>,
        page_request: PageRequest,
    ) -> Result<Page<Feed>> {
        let state = self.state.lock().await;
        let owned: Vec<&Feed> = state
            .feeds
            .values()
            .filter(|feed| feed.is_owned_by(owner_id))
            .collect();

        let total_elements = owned.len() as u64;
        let content = owned
            .into_iter()
            .skip(usize::try_from(page_request.offset()).unwrap_or(usize::MAX))
            .take(page_request.size() as usize)
            .cloned()
            .collect();

        Ok(Page::new(content, page_request, total_elements))
    }

    async fn feed_name_exists(&self, owner_id: Id<UserMarker>, name: &FeedName) -> Result<bool> {
        Ok(name_taken(&*self.state.lock().await, owner_id, name))
    }

    async fn create_feed(&self, feed: &CreateFeed) -> Result<Feed> {
        let feed = Feed {
            id: self.generate_id().await?,
            name: feed.content.name.clone(),
            description: feed.content.description.clone(),
            owner_id: feed.owner_id,
            post_ids: Vec::new(),
            created_at: feed.created_at,
            updated_at: feed.created_at,
        };

        let mut state = self.state.lock().await;
        if name_taken(&state, feed.owner_id, &feed.name) {
            return Err(DbError::FeedNameTaken);
        }
        state.feeds.insert(feed.id, feed.clone());

        Ok(feed)
    }

    async fn update_feed(
        &self,
        feed_id: Id<FeedMarker>,
        content: &FeedContent,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>> {
        let mut state = self.state.lock().await;
        let Some(owner_id) = state.feeds.get(&feed_id).map(|feed| feed.owner_id) else {
            return Ok(None);
        };

        let collides = state.feeds.values().any(|feed| {
            feed.id != feed_id && feed.is_owned_by(owner_id) && feed.name == content.name
        });
        if collides {
            return Err(DbError::FeedNameTaken);
        }

        let feed = state.feeds.get_mut(&feed_id).map(|feed| {
            feed.name = content.name.clone();
            feed.description.clone_from(&content.description);
            feed.updated_at = updated_at;
            feed.clone()
        });
        Ok(feed)
    }

    async fn delete_feed(&self, feed_id: Id<FeedMarker>) -> Result<bool> {
        Ok(self.state.lock().await.feeds.remove(&feed_id).is_some())
    }

    async fn add_feed_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>> {
        Ok(self
            .change_feed(feed_id, updated_at, |feed| {
                feed.add_post(post_id);
            })
            .await)
    }

    async fn remove_feed_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>> {
        Ok(self
            .change_feed(feed_id, updated_at, |feed| {
                feed.remove_post(post_id);
            })
            .await)
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        Ok(self.state.lock().await.posts.get(&post_id).cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn fetch_session(&self, token_hash: &SessionTokenHash) -> Result<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(token_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::MemoryStore,
        store::{DbError, FeedStore, PostStore, SessionStore},
    };
    use sammelband_common::model::{
        Id,
        feed::{CreateFeed, FeedContent, FeedName},
        page::PageRequest,
        post::CreatePost,
        user::{CreateUser, User, UserHandle},
    };
    use time::{Duration, OffsetDateTime};

    fn content(name: &str) -> FeedContent {
        FeedContent {
            name: FeedName::new(name.to_owned()).unwrap(),
            description: format!("About {name}"),
        }
    }

    async fn user(store: &MemoryStore, handle: &str) -> User {
        store
            .create_user(&CreateUser {
                handle: UserHandle::new(handle.to_owned()).unwrap(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn feed_lifecycle() {
        let store = MemoryStore::default();
        let alice = user(&store, "alice").await;
        let now = OffsetDateTime::now_utc();

        let feed = store
            .create_feed(&CreateFeed {
                owner_id: alice.id,
                content: content("Guitar Basics"),
                created_at: now,
            })
            .await
            .unwrap();
        assert_eq!(feed.updated_at, now);
        assert_eq!(store.fetch_feed(feed.id).await.unwrap(), Some(feed.clone()));

        let later = now + Duration::minutes(1);
        let updated = store
            .update_feed(feed.id, &content("Jazz Guitar"), later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name.get(), "Jazz Guitar");
        assert_eq!(updated.created_at, now);
        assert_eq!(updated.updated_at, later);

        assert!(store.delete_feed(feed.id).await.unwrap());
        assert!(!store.delete_feed(feed.id).await.unwrap());
        assert_eq!(store.fetch_feed(feed.id).await.unwrap(), None);
        assert_eq!(
            store
                .update_feed(feed.id, &content("Gone"), later)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn names_are_unique_per_owner() {
        let store = MemoryStore::default();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let create = |owner_id, name| CreateFeed {
            owner_id,
            content: content(name),
            created_at: OffsetDateTime::now_utc(),
        };

        let jazz = store.create_feed(&create(alice.id, "Jazz")).await.unwrap();
        store.create_feed(&create(alice.id, "Blues")).await.unwrap();
        store.create_feed(&create(bob.id, "Jazz")).await.unwrap();

        assert!(matches!(
            store.create_feed(&create(alice.id, "Jazz")).await,
            Err(DbError::FeedNameTaken)
        ));
        assert!(matches!(
            store
                .update_feed(jazz.id, &content("Blues"), OffsetDateTime::now_utc())
                .await,
            Err(DbError::FeedNameTaken)
        ));
        assert!(
            store
                .feed_name_exists(alice.id, &FeedName::new("Blues".to_owned()).unwrap())
                .await
                .unwrap()
        );
        assert!(
            !store
                .feed_name_exists(bob.id, &FeedName::new("Blues".to_owned()).unwrap())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn user_feeds_are_paged_in_creation_order() {
        let store = MemoryStore::default();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;

        for name in ["a", "b", "c", "d", "e"] {
            store
                .create_feed(&CreateFeed {
                    owner_id: alice.id,
                    content: content(name),
                    created_at: OffsetDateTime::now_utc(),
                })
                .await
                .unwrap();
        }
        store
            .create_feed(&CreateFeed {
                owner_id: bob.id,
                content: content("z"),
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();

        let page = store
            .fetch_user_feeds(alice.id, PageRequest::new(1, 2))
            .await
            .unwrap();
        let names: Vec<_> = page.content.iter().map(|feed| feed.name.get()).collect();
        assert_eq!(names, ["c", "d"]);
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages, 3);

        let past_the_end = store
            .fetch_user_feeds(alice.id, PageRequest::new(7, 2))
            .await
            .unwrap();
        assert!(past_the_end.content.is_empty());
    }

    #[tokio::test]
    async fn post_references() {
        let store = MemoryStore::default();
        let alice = user(&store, "alice").await;
        let post = store
            .create_post(&CreatePost {
                author_id: alice.id,
                content: "Learn the C major scale".to_owned(),
            })
            .await
            .unwrap();
        let feed = store
            .create_feed(&CreateFeed {
                owner_id: alice.id,
                content: content("Guitar Basics"),
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
        let now = OffsetDateTime::now_utc();

        assert_eq!(store.fetch_post(post.id).await.unwrap(), Some(post.clone()));

        store.add_feed_post(feed.id, post.id, now).await.unwrap();
        let feed = store
            .add_feed_post(feed.id, post.id, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feed.post_ids, [post.id]);

        let feed = store
            .remove_feed_post(feed.id, post.id, now)
            .await
            .unwrap()
            .unwrap();
        assert!(feed.post_ids.is_empty());

        assert_eq!(
            store
                .add_feed_post(Id::from(1_u64), post.id, now)
                .await
                .unwrap(),
            None
        );

        assert!(store.delete_post(post.id).await);
        assert_eq!(store.fetch_post(post.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sessions_are_found_by_hash() {
        let store = MemoryStore::default();
        let alice = user(&store, "alice").await;

        let token = store.create_session(alice.id, None).await.unwrap();
        let session = store
            .fetch_session(&token.hash().unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.user_id, alice.id);
        assert_eq!(session.expires_after, None);
        assert_eq!(store.fetch_user(session.user_id).await, Some(alice));
    }
}
