use crate::{
    record::{AuthenticationRecord, FeedPostRecord, FeedRecord, PostRecord, snowflake_of},
    store::{DbError, FeedStore, PostStore, Result, SessionStore},
};
use async_trait::async_trait;
use sammelband_common::{
    model::{
        Id, SammelbandSnowflakeGenerator,
        feed::{CreateFeed, Feed, FeedContent, FeedMarker, FeedName},
        page::{Page, PageRequest},
        post::{Post, PostMarker},
        session::{Session, SessionTokenHash},
        user::UserMarker,
    },
    snowflake::{ProcessId, WorkerId},
};
use sqlx::{
    PgExecutor, PgPool, Postgres, Transaction, migrate::Migrator, postgres::PgPoolOptions,
    query, query_as, query_scalar,
};
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

static MIGRATOR: Migrator = sqlx::migrate!();

const FEEDS_OWNER_NAME_UNIQUE: &str = "feeds_owner_name_unique";

pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<SammelbandSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId, process_id: ProcessId) -> Self {
        let snowflake_generator =
            Mutex::new(SammelbandSnowflakeGenerator::new(worker_id, process_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        worker_id: WorkerId,
        process_id: ProcessId,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool, worker_id, process_id))
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    async fn fetch_post_ids<'c>(
        executor: impl PgExecutor<'c>,
        feed_id: Id<FeedMarker>,
    ) -> Result<Vec<Id<PostMarker>>> {
        let post_snowflakes = query_scalar::<_, i64>(
            "
            SELECT
                feed_posts.post_snowflake
            FROM
                feeds.feed_posts
            WHERE
                feed_posts.feed_snowflake = $1
            ORDER BY
                feed_posts.position
            ",
        )
        .bind(snowflake_of(feed_id))
        .fetch_all(executor)
        .await?;

        Ok(post_snowflakes
            .into_iter()
            .map(|snowflake| snowflake.cast_unsigned().into())
            .collect())
    }

    /// Bumps `updated_at` and returns the feed row, or `None` if the feed is gone.
    async fn touch_feed(
        transaction: &mut Transaction<'_, Postgres>,
        feed_id: Id<FeedMarker>,
        updated_at: OffsetDateTime,
    ) -> Result<Option<FeedRecord>> {
        let record = query_as::<_, FeedRecord>(
            "
            UPDATE feeds.feeds
            SET updated_at = $2
            WHERE feeds.feed_snowflake = $1
            RETURNING feed_snowflake, name, description, user_snowflake, created_at, updated_at
            ",
        )
        .bind(snowflake_of(feed_id))
        .bind(updated_at)
        .fetch_optional(&mut **transaction)
        .await?;

        Ok(record)
    }

    async fn finish_feed_change(
        mut transaction: Transaction<'_, Postgres>,
        record: FeedRecord,
    ) -> Result<Feed> {
        let feed_id = record.feed_snowflake.cast_unsigned().into();
        let post_ids = Self::fetch_post_ids(&mut *transaction, feed_id).await?;
        transaction.commit().await?;

        Ok(record.into_feed(post_ids)?)
    }
}

fn map_name_conflict(err: sqlx::Error) -> DbError {
    let is_name_conflict = err.as_database_error().is_some_and(|db_err| {
        db_err.is_unique_violation() && db_err.constraint() == Some(FEEDS_OWNER_NAME_UNIQUE)
    });

    if is_name_conflict {
        DbError::FeedNameTaken
    } else {
        DbError::Sqlx(err)
    }
}

#[async_trait]
impl FeedStore for DbClient {
    #[instrument(skip(self))]
    async fn fetch_feed(&self, feed_id: Id<FeedMarker>) -> Result<Option<Feed>> {
        let record = query_as::<_, FeedRecord>(
            "
            SELECT
                feeds.feed_snowflake,
                feeds.name,
                feeds.description,
                feeds.user_snowflake,
                feeds.created_at,
                feeds.updated_at
            FROM
                feeds.feeds
            WHERE
                feeds.feed_snowflake = $1
            ",
        )
        .bind(snowflake_of(feed_id))
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let post_ids = Self::fetch_post_ids(&self.pool, feed_id).await?;
        Ok(Some(record.into_feed(post_ids)?))
    }

    #[instrument(skip(self))]
    async fn fetch_user_feeds(
        &self,
        owner_id: Id<UserMarker>,
        page_request: PageRequest,
    ) -> Result<Page<Feed>> {
        let total_elements = query_scalar::<_, i64>(
            "
            SELECT COUNT(*) FROM feeds.feeds WHERE feeds.user_snowflake = $1
            ",
        )
        .bind(snowflake_of(owner_id))
        .fetch_one(&self.pool)
        .await?;

        let records = query_as::<_, FeedRecord>(
            "
            SELECT
                feeds.feed_snowflake,
                feeds.name,
                feeds.description,
                feeds.user_snowflake,
                feeds.created_at,
                feeds.updated_at
            FROM
                feeds.feeds
            WHERE
                feeds.user_snowflake = $1
            ORDER BY
                feeds.feed_snowflake
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(snowflake_of(owner_id))
        .bind(i64::from(page_request.size()))
        .bind(page_request.offset().cast_signed())
        .fetch_all(&self.pool)
        .await?;

        let feed_snowflakes: Vec<i64> = records
            .iter()
            .map(|record| record.feed_snowflake)
            .collect();

        let feed_posts = query_as::<_, FeedPostRecord>(
            "
            SELECT
                feed_posts.feed_snowflake,
                feed_posts.post_snowflake
            FROM
                feeds.feed_posts
            WHERE
                feed_posts.feed_snowflake = ANY($1)
            ORDER BY
                feed_posts.position
            ",
        )
        .bind(&feed_snowflakes)
        .fetch_all(&self.pool)
        .await?;

        let mut post_ids_by_feed: HashMap<i64, Vec<Id<PostMarker>>> = HashMap::new();
        for feed_post in feed_posts {
            post_ids_by_feed
                .entry(feed_post.feed_snowflake)
                .or_default()
                .push(feed_post.post_snowflake.cast_unsigned().into());
        }

        let feeds = records
            .into_iter()
            .map(|record| {
                let post_ids = post_ids_by_feed
                    .remove(&record.feed_snowflake)
                    .unwrap_or_default();
                record.into_feed(post_ids)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(
            feeds,
            page_request,
            total_elements.cast_unsigned(),
        ))
    }

    #[instrument(skip(self))]
    async fn feed_name_exists(&self, owner_id: Id<UserMarker>, name: &FeedName) -> Result<bool> {
        let exists = query_scalar::<_, bool>(
            "
            SELECT EXISTS (
                SELECT 1 FROM feeds.feeds
                WHERE feeds.user_snowflake = $1 AND feeds.name = $2
            )
            ",
        )
        .bind(snowflake_of(owner_id))
        .bind(name.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn create_feed(&self, feed: &CreateFeed) -> Result<Feed> {
        let feed_snowflake = self.snowflake_generator.lock().await.generate()?;

        let record = query_as::<_, FeedRecord>(
            "
            INSERT INTO feeds.feeds
                (feed_snowflake, name, description, user_snowflake, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING feed_snowflake, name, description, user_snowflake, created_at, updated_at
            ",
        )
        .bind(feed_snowflake.get().cast_signed())
        .bind(feed.content.name.get())
        .bind(&feed.content.description)
        .bind(snowflake_of(feed.owner_id))
        .bind(feed.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_name_conflict)?;

        Ok(record.into_feed(Vec::new())?)
    }

    #[instrument(skip(self))]
    async fn update_feed(
        &self,
        feed_id: Id<FeedMarker>,
        content: &FeedContent,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>> {
        let mut transaction = self.pool.begin().await?;

        let record = query_as::<_, FeedRecord>(
            "
            UPDATE feeds.feeds
            SET name = $2, description = $3, updated_at = $4
            WHERE feeds.feed_snowflake = $1
            RETURNING feed_snowflake, name, description, user_snowflake, created_at, updated_at
            ",
        )
        .bind(snowflake_of(feed_id))
        .bind(content.name.get())
        .bind(&content.description)
        .bind(updated_at)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(map_name_conflict)?;

        match record {
            Some(record) => Ok(Some(Self::finish_feed_change(transaction, record).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn delete_feed(&self, feed_id: Id<FeedMarker>) -> Result<bool> {
        let result = query(
            "
            DELETE FROM feeds.feeds WHERE feeds.feed_snowflake = $1
            ",
        )
        .bind(snowflake_of(feed_id))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn add_feed_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>> {
        let mut transaction = self.pool.begin().await?;

        let Some(record) = Self::touch_feed(&mut transaction, feed_id, updated_at).await? else {
            return Ok(None);
        };

        query(
            "
            INSERT INTO feeds.feed_posts (feed_snowflake, post_snowflake)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(snowflake_of(feed_id))
        .bind(snowflake_of(post_id))
        .execute(&mut *transaction)
        .await?;

        Ok(Some(Self::finish_feed_change(transaction, record).await?))
    }

    #[instrument(skip(self))]
    async fn remove_feed_post(
        &self,
        feed_id: Id<FeedMarker>,
        post_id: Id<PostMarker>,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Feed>> {
        let mut transaction = self.pool.begin().await?;

        let Some(record) = Self::touch_feed(&mut transaction, feed_id, updated_at).await? else {
            return Ok(None);
        };

        query(
            "
            DELETE FROM feeds.feed_posts
            WHERE feed_posts.feed_snowflake = $1 AND feed_posts.post_snowflake = $2
            ",
        )
        .bind(snowflake_of(feed_id))
        .bind(snowflake_of(post_id))
        .execute(&mut *transaction)
        .await?;

        Ok(Some(Self::finish_feed_change(transaction, record).await?))
    }
}

#[async_trait]
impl PostStore for DbClient {
    #[instrument(skip(self))]
    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.content,
                posts.user_snowflake
            FROM
                posts.posts
            WHERE
                posts.post_snowflake = $1
            ",
        )
        .bind(snowflake_of(post_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Post::from))
    }
}

#[async_trait]
impl SessionStore for DbClient {
    #[instrument(skip(self))]
    async fn fetch_session(&self, token_hash: &SessionTokenHash) -> Result<Option<Session>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                authentications.user_snowflake,
                authentications.token_hash,
                authentications.created_at,
                authentications.expires_after_seconds
            FROM
                users.authentications
            WHERE
                authentications.token_hash = $1
            ",
        )
        .bind(token_hash.0.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        let session = record.map(Session::try_from).transpose()?;
        Ok(session)
    }
}
