use reqwest::StatusCode;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tw_snoopbot::api;

async fn setup_pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Serve the management API on an ephemeral port and return its base URL.
async fn spawn_api(pool: SqlitePool) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(pool);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn body(resp: reqwest::Response) -> Value {
    resp.json().await.unwrap()
}

#[tokio::test]
async fn watch_returns_201_then_409() {
    let base = spawn_api(setup_pool().await).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/watcher/123/watch/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body(resp).await;
    assert_eq!(json["success"], Value::Bool(true));

    let resp = client
        .post(format!("{base}/watcher/123/watch/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let json = body(resp).await;
    assert_eq!(json["success"], Value::Bool(false));
    assert!(json["error"]["message"].as_str().unwrap().contains("alice"));
}

#[tokio::test]
async fn handle_listing_and_lookup() {
    let base = spawn_api(setup_pool().await).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/handles")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body(resp).await;
    assert_eq!(json["payload"]["handles"], Value::Array(vec![]));

    let resp = client
        .post(format!("{base}/handle/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body(resp).await;
    assert_eq!(json["payload"]["handle"], "alice");

    // Creation is idempotent at the HTTP level too.
    let resp = client
        .post(format!("{base}/handle/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = client
        .get(format!("{base}/handle/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body(resp).await;
    assert_eq!(json["payload"]["name"], "alice");
    assert_eq!(json["payload"]["watchers"], Value::Array(vec![]));

    let resp = client
        .get(format!("{base}/handle/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json = body(resp).await;
    assert_eq!(json["success"], Value::Bool(false));
    assert!(json["error"]["message"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn watcher_round_trip() {
    let base = spawn_api(setup_pool().await).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/watcher/123/watch/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = client
        .get(format!("{base}/watcher/123"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body(resp).await;
    assert_eq!(json["payload"]["chatId"], "123");
    let names: Vec<&str> = json["payload"]["handles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alice"]);

    let resp = client
        .delete(format!("{base}/watcher/123/unwatch/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body(resp).await;
    assert_eq!(json["success"], Value::Bool(true));

    // The relationship is gone but both entities remain.
    let resp = client
        .get(format!("{base}/watcher/123"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body(resp).await;
    assert_eq!(json["payload"]["handles"], Value::Array(vec![]));

    let resp = client
        .get(format!("{base}/handle/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // A second unwatch is an error, not a silent no-op.
    let resp = client
        .delete(format!("{base}/watcher/123/unwatch/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = client
        .delete(format!("{base}/watcher/999/unwatch/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
