use axum::http::{Method, StatusCode};
use axum_test::TestServer;
use sammelband_api::{
    server::{self, ErrorResponse, ServerState},
    service::FeedService,
};
use sammelband_common::model::{
    feed::{Feed, FeedContent, FeedName},
    page::Page,
    post::{CreatePost, Post},
    user::{CreateUser, User, UserHandle},
};
use sammelband_db::MemoryStore;
use serde_json::json;
use std::sync::Arc;

struct TestUser {
    user: User,
    token: String,
}

struct Setup {
    server: TestServer,
    alice: TestUser,
    bob: TestUser,
    post: Post,
}

async fn test_user(store: &MemoryStore, handle: &str) -> TestUser {
    let user = store
        .create_user(&CreateUser {
            handle: UserHandle::new(handle.to_owned()).unwrap(),
        })
        .await
        .unwrap();
    let token = store
        .create_session(user.id, None)
        .await
        .unwrap()
        .to_string();

    TestUser { user, token }
}

async fn setup() -> Setup {
    let store = Arc::new(MemoryStore::default());
    let alice = test_user(&store, "alice").await;
    let bob = test_user(&store, "bob").await;
    let post = store
        .create_post(&CreatePost {
            author_id: bob.user.id,
            content: "Strumming patterns".to_owned(),
        })
        .await
        .unwrap();

    let state = ServerState {
        feed_service: Arc::new(FeedService::new(store.clone(), store.clone())),
        session_store: store,
    };
    let server = TestServer::new(server::app(state)).unwrap();

    Setup {
        server,
        alice,
        bob,
        post,
    }
}

fn content(name: &str) -> FeedContent {
    FeedContent {
        name: FeedName::new(name.to_owned()).unwrap(),
        description: format!("All about {name}"),
    }
}

async fn create_feed(server: &TestServer, user: &TestUser, name: &str) -> Feed {
    let response = server
        .post("/api/feeds")
        .authorization_bearer(&user.token)
        .json(&content(name))
        .await;

    response.assert_status_ok();
    response.json::<Feed>()
}

#[tokio::test]
async fn guitar_basics_walkthrough() {
    let Setup {
        server,
        alice,
        bob,
        post,
    } = setup().await;

    let feed = create_feed(&server, &alice, "Guitar Basics").await;
    assert_eq!(feed.owner_id, alice.user.id);
    assert_eq!(feed.description, "All about Guitar Basics");

    let listed = server
        .get("/api/feeds")
        .authorization_bearer(&alice.token)
        .await;
    listed.assert_status_ok();
    let listed = listed.json::<Page<Feed>>();
    assert_eq!(listed.content, [feed.clone()]);
    assert_eq!(listed.total_elements, 1);

    let foreign = server
        .get(&format!("/api/feeds/{}", feed.id))
        .authorization_bearer(&bob.token)
        .await;
    foreign.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(foreign.json::<ErrorResponse>().status, 403);

    let added = server
        .post(&format!("/api/feeds/{}/posts/{}", feed.id, post.id))
        .authorization_bearer(&alice.token)
        .await;
    added.assert_status_ok();
    assert_eq!(added.json::<Feed>().post_ids, [post.id]);

    let removed = server
        .delete(&format!("/api/feeds/{}/posts/{}", feed.id, post.id))
        .authorization_bearer(&alice.token)
        .await;
    removed.assert_status_ok();
    assert!(removed.json::<Feed>().post_ids.is_empty());
}

#[tokio::test]
async fn requests_need_a_valid_token() {
    let Setup { server, alice, .. } = setup().await;

    server
        .get("/api/feeds")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    server
        .get("/api/feeds")
        .authorization_bearer("not-a-token")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let forged = format!(
        "{}:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA:AAAAAAAAAAAAAAAAAAAAAAAA",
        alice.user.id
    );
    server
        .get("/api/feeds")
        .authorization_bearer(forged)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn get_update_and_delete() {
    let Setup { server, alice, .. } = setup().await;
    let feed = create_feed(&server, &alice, "Jazz").await;
    let path = format!("/api/feeds/{}", feed.id);

    let fetched = server.get(&path).authorization_bearer(&alice.token).await;
    fetched.assert_status_ok();
    assert_eq!(fetched.json::<Feed>(), feed);

    let updated = server
        .put(&path)
        .authorization_bearer(&alice.token)
        .json(&json!({ "name": "Bebop", "description": "Fast" }))
        .await;
    updated.assert_status_ok();
    let updated = updated.json::<Feed>();
    assert_eq!(updated.id, feed.id);
    assert_eq!(updated.name.get(), "Bebop");
    assert_eq!(updated.description, "Fast");

    let deleted = server.delete(&path).authorization_bearer(&alice.token).await;
    deleted.assert_status_ok();
    assert!(deleted.as_bytes().is_empty());

    server
        .delete(&path)
        .authorization_bearer(&alice.token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get(&path)
        .authorization_bearer(&alice.token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_names_conflict() {
    let Setup {
        server, alice, bob, ..
    } = setup().await;
    create_feed(&server, &alice, "Blues").await;
    let jazz = create_feed(&server, &alice, "Jazz").await;

    let duplicate = server
        .post("/api/feeds")
        .authorization_bearer(&alice.token)
        .json(&content("Blues"))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
    let error = duplicate.json::<ErrorResponse>();
    assert_eq!(error.status, 409);
    assert!(error.message.contains("Blues"));

    server
        .put(&format!("/api/feeds/{}", jazz.id))
        .authorization_bearer(&alice.token)
        .json(&content("Blues"))
        .await
        .assert_status(StatusCode::CONFLICT);

    create_feed(&server, &bob, "Blues").await;
}

#[tokio::test]
async fn invalid_requests() {
    let Setup {
        server,
        alice,
        post,
        ..
    } = setup().await;

    let blank = server
        .post("/api/feeds")
        .authorization_bearer(&alice.token)
        .json(&json!({ "name": "   " }))
        .await;
    blank.assert_status(StatusCode::BAD_REQUEST);
    let error = blank.json::<ErrorResponse>();
    assert!(error.message.contains("must not be blank"), "{}", error.message);

    server
        .get("/api/feeds?page=first")
        .authorization_bearer(&alice.token)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .get("/api/feeds/not-an-id")
        .authorization_bearer(&alice.token)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let feed = create_feed(&server, &alice, "Guitar Basics").await;
    let missing_post = server
        .post(&format!("/api/feeds/{}/posts/{}", feed.id, u64::from(post.id) + 1))
        .authorization_bearer(&alice.token)
        .await;
    missing_post.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(missing_post.json::<ErrorResponse>().status, 404);

    let wrong_method = server
        .method(Method::PATCH, &format!("/api/feeds/{}", feed.id))
        .authorization_bearer(&alice.token)
        .json(&content("Blues"))
        .await;
    wrong_method.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    let error = wrong_method.json::<ErrorResponse>();
    assert_eq!(error.status, 405);
    assert!(error.message.contains("PATCH"), "{}", error.message);

    server
        .get("/api/nothing-here")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_is_paged_and_private() {
    let Setup {
        server, alice, bob, ..
    } = setup().await;

    for name in ["One", "Two", "Three"] {
        create_feed(&server, &alice, name).await;
    }
    create_feed(&server, &bob, "Bob's").await;

    let page = server
        .get("/api/feeds")
        .add_query_param("page", 1)
        .add_query_param("size", 2)
        .authorization_bearer(&alice.token)
        .await;
    page.assert_status_ok();
    let page = page.json::<Page<Feed>>();

    assert_eq!(page.page, 1);
    assert_eq!(page.size, 2);
    assert_eq!(page.total_elements, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.content.len(), 1);
    assert_eq!(page.content[0].name.get(), "Three");

    let bobs = server
        .get("/api/feeds")
        .authorization_bearer(&bob.token)
        .await
        .json::<Page<Feed>>();
    assert_eq!(bobs.total_elements, 1);
    assert!(bobs.content.iter().all(|feed| feed.owner_id == bob.user.id));
}
