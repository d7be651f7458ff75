use sammelband_common::model::{
    Id, ModelValidationError,
    feed::{Feed, FeedName},
    post::{Post, PostMarker},
    session::Session,
};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FeedRecord {
    pub feed_snowflake: i64,
    pub name: String,
    pub description: String,
    pub user_snowflake: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct FeedPostRecord {
    pub feed_snowflake: i64,
    pub post_snowflake: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_snowflake: i64,
    pub content: String,
    pub user_snowflake: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: PrimitiveDateTime,
    pub expires_after_seconds: Option<i64>,
}

pub(crate) fn snowflake_of<Marker>(id: Id<Marker>) -> i64 {
    id.snowflake().get().cast_signed()
}

impl FeedRecord {
    pub fn into_feed(self, post_ids: Vec<Id<PostMarker>>) -> Result<Feed, ModelValidationError> {
        Ok(Feed {
            id: self.feed_snowflake.cast_unsigned().into(),
            name: FeedName::new(self.name)?,
            description: self.description,
            owner_id: self.user_snowflake.cast_unsigned().into(),
            post_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<PostRecord> for Post {
    fn from(value: PostRecord) -> Self {
        Self {
            id: value.post_snowflake.cast_unsigned().into(),
            author_id: value.user_snowflake.cast_unsigned().into(),
            content: value.content,
        }
    }
}

impl TryFrom<AuthenticationRecord> for Session {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: value.user_snowflake.cast_unsigned().into(),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at.as_utc(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| Duration::seconds(seconds).try_into())
                .transpose()?,
        })
    }
}
