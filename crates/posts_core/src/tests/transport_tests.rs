use super::*;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use shared::{
    domain::{CommentId, UserId},
    error::ErrorCode,
};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct ServerState {
    deleted: Arc<Mutex<Vec<i64>>>,
    replaced: Arc<Mutex<Vec<(i64, PostRecord)>>>,
}

fn placeholder_post(id: i64) -> PostRecord {
    PostRecord {
        user_id: UserId(1),
        id: Some(PostId(id)),
        title: format!("title {id}"),
        body: format!("body {id}"),
        author: None,
        metadata: None,
    }
}

async fn list_posts() -> Json<Vec<PostRecord>> {
    Json((1..=12).map(placeholder_post).collect())
}

async fn get_post(Path(id): Path<i64>) -> Result<Json<PostRecord>, (StatusCode, Json<ApiError>)> {
    if id > 100 {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(ErrorCode::NotFound, format!("post {id} not found"))),
        ));
    }
    Ok(Json(placeholder_post(id)))
}

async fn create_post(Json(mut post): Json<PostRecord>) -> (StatusCode, Json<PostRecord>) {
    post.id = Some(PostId(101));
    (StatusCode::CREATED, Json(post))
}

async fn replace_post(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
    Json(post): Json<PostRecord>,
) -> Json<PostRecord> {
    state.replaced.lock().await.push((id, post.clone()));
    Json(PostRecord {
        id: Some(PostId(id)),
        ..post
    })
}

async fn delete_post(State(state): State<ServerState>, Path(id): Path<i64>) -> StatusCode {
    state.deleted.lock().await.push(id);
    StatusCode::OK
}

async fn list_comments(Path(id): Path<i64>) -> Json<Vec<CommentRecord>> {
    Json(
        (1..=3)
            .map(|n| CommentRecord {
                post_id: PostId(id),
                id: Some(CommentId(id * 10 + n)),
                name: format!("comment {n}"),
                email: "c@test.com".into(),
                body: "hello".into(),
            })
            .collect(),
    )
}

async fn create_comment(
    Path(id): Path<i64>,
    Json(comment): Json<CommentRecord>,
) -> (StatusCode, Json<CommentRecord>) {
    (
        StatusCode::CREATED,
        Json(CommentRecord {
            post_id: PostId(id),
            id: Some(CommentId(501)),
            ..comment
        }),
    )
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn spawn_posts_server() -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState::default();
    let app = Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route(
            "/posts/:id",
            get(get_post).put(replace_post).delete(delete_post),
        )
        .route("/posts/:id/comments", get(list_comments).post(create_comment))
        .route("/broken", get(broken))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn lists_posts_from_collection() {
    let (server_url, _) = spawn_posts_server().await;
    let transport = HttpTransport::new(&server_url).expect("transport");

    let posts = transport.list_posts().await.expect("list");
    assert_eq!(posts.len(), 12);
    assert_eq!(posts[0].id, Some(PostId(1)));
    assert!(posts[0].author.is_none());
}

#[tokio::test]
async fn fetches_single_post() {
    let (server_url, _) = spawn_posts_server().await;
    let transport = HttpTransport::new(&server_url).expect("transport");

    let post = transport.get_post(PostId(7)).await.expect("get");
    assert_eq!(post.title, "title 7");
}

#[tokio::test]
async fn surfaces_api_error_message_and_status() {
    let (server_url, _) = spawn_posts_server().await;
    let transport = HttpTransport::new(&server_url).expect("transport");

    let err = transport.get_post(PostId(404)).await.expect_err("must fail");
    assert_eq!(err.status, Some(404));
    assert_eq!(err.message, "post 404 not found");
}

#[tokio::test]
async fn non_json_error_body_reports_status() {
    let (server_url, _) = spawn_posts_server().await;
    let transport = HttpTransport::new(&server_url)
        .expect("transport")
        .with_collection("broken");

    let err = transport.list_posts().await.expect_err("must fail");
    assert_eq!(err.status, Some(500));
    assert!(
        err.message.contains("500"),
        "unexpected message: {}",
        err.message
    );
}

#[tokio::test]
async fn create_returns_server_assigned_id() {
    let (server_url, _) = spawn_posts_server().await;
    let transport = HttpTransport::new(&server_url).expect("transport");

    let mut draft = placeholder_post(0);
    draft.id = None;
    let created = transport.create_post(&draft).await.expect("create");
    assert_eq!(created.id, Some(PostId(101)));
    assert_eq!(created.title, draft.title);
}

#[tokio::test]
async fn replace_and_delete_hit_the_item_path() {
    let (server_url, state) = spawn_posts_server().await;
    let transport = HttpTransport::new(&server_url).expect("transport");

    let mut edited = placeholder_post(3);
    edited.title = "edited".into();
    let replaced = transport
        .replace_post(PostId(3), &edited)
        .await
        .expect("replace");
    assert_eq!(replaced.title, "edited");
    transport.delete_post(PostId(3)).await.expect("delete");

    assert_eq!(state.replaced.lock().await[0].0, 3);
    assert_eq!(*state.deleted.lock().await, vec![3]);
}

#[tokio::test]
async fn comments_live_under_the_post_path() {
    let (server_url, _) = spawn_posts_server().await;
    let transport = HttpTransport::new(&server_url).expect("transport");

    let comments = transport.list_comments(PostId(2)).await.expect("list");
    assert_eq!(comments.len(), 3);
    assert!(comments.iter().all(|comment| comment.post_id == PostId(2)));

    let created = transport
        .create_comment(
            PostId(2),
            &CommentRecord {
                post_id: PostId(2),
                id: None,
                name: "new".into(),
                email: "n@test.com".into(),
                body: "body".into(),
            },
        )
        .await
        .expect("create");
    assert_eq!(created.id, Some(CommentId(501)));
    assert_eq!(created.name, "new");
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport = HttpTransport::new(&format!("http://{addr}")).expect("transport");
    let err = transport.list_posts().await.expect_err("must fail");
    assert!(err.status.is_none());
    assert!(!err.message.is_empty());
}

#[test]
fn rejects_non_http_base_urls() {
    assert!(HttpTransport::new("not a url").is_err());
    assert!(HttpTransport::new("mailto:someone@example.com").is_err());
    assert!(HttpTransport::new("ftp://example.com").is_err());
}

#[test]
fn builds_collection_paths_under_base_path() {
    let transport = HttpTransport::new("http://localhost:3000/api/").expect("transport");
    assert_eq!(
        transport.url(&[]).expect("url").as_str(),
        "http://localhost:3000/api/posts"
    );
    assert_eq!(
        transport.comments_url(PostId(4)).expect("url").as_str(),
        "http://localhost:3000/api/posts/4/comments"
    );
}

#[tokio::test]
async fn missing_transport_always_fails() {
    let err = MissingTransport.list_posts().await.expect_err("must fail");
    assert_eq!(err.message, "posts transport is unavailable");
}
