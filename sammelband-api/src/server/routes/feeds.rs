use crate::{
    server::{
        Result, ServerError, ServerRouter,
        auth::AuthenticatedUser,
        extract::{Json, Query},
    },
    service::FeedService,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use sammelband_common::model::{
    Id,
    feed::{Feed, FeedContent, FeedMarker},
    page::{Page, PageRequest},
    post::PostMarker,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_feed)
        .typed_get(list_feeds)
        .typed_get(get_feed)
        .typed_put(update_feed)
        .typed_delete(delete_feed)
        .typed_post(add_post)
        .typed_delete(remove_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/feeds", rejection(ServerError))]
struct FeedsPath();

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/feeds/{id}", rejection(ServerError))]
struct FeedPath {
    id: Id<FeedMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/feeds/{id}/posts/{post_id}", rejection(ServerError))]
struct FeedPostPath {
    id: Id<FeedMarker>,
    post_id: Id<PostMarker>,
}

async fn create_feed(
    FeedsPath(): FeedsPath,
    State(feed_service): State<Arc<FeedService>>,
    user: AuthenticatedUser,
    Json(content): Json<FeedContent>,
) -> Result<Json<Feed>> {
    let feed = feed_service.create_feed(content, user.user_id()).await?;

    Ok(Json(feed))
}

async fn list_feeds(
    FeedsPath(): FeedsPath,
    State(feed_service): State<Arc<FeedService>>,
    user: AuthenticatedUser,
    Query(page_request): Query<PageRequest>,
) -> Result<Json<Page<Feed>>> {
    let feeds = feed_service
        .list_feeds(user.user_id(), page_request)
        .await?;

    Ok(Json(feeds))
}

async fn get_feed(
    FeedPath { id }: FeedPath,
    State(feed_service): State<Arc<FeedService>>,
    user: AuthenticatedUser,
) -> Result<Json<Feed>> {
    let feed = feed_service.get_feed(id, user.user_id()).await?;

    Ok(Json(feed))
}

async fn update_feed(
    FeedPath { id }: FeedPath,
    State(feed_service): State<Arc<FeedService>>,
    user: AuthenticatedUser,
    Json(content): Json<FeedContent>,
) -> Result<Json<Feed>> {
    let feed = feed_service
        .update_feed(id, content, user.user_id())
        .await?;

    Ok(Json(feed))
}

async fn delete_feed(
    FeedPath { id }: FeedPath,
    State(feed_service): State<Arc<FeedService>>,
    user: AuthenticatedUser,
) -> Result<()> {
    feed_service.delete_feed(id, user.user_id()).await?;

    Ok(())
}

async fn add_post(
    FeedPostPath { id, post_id }: FeedPostPath,
    State(feed_service): State<Arc<FeedService>>,
    user: AuthenticatedUser,
) -> Result<Json<Feed>> {
    let feed = feed_service.add_post(id, post_id, user.user_id()).await?;

    Ok(Json(feed))
}

async fn remove_post(
    FeedPostPath { id, post_id }: FeedPostPath,
    State(feed_service): State<Arc<FeedService>>,
    user: AuthenticatedUser,
) -> Result<Json<Feed>> {
    let feed = feed_service
        .remove_post(id, post_id, user.user_id())
        .await?;

    Ok(Json(feed))
}
