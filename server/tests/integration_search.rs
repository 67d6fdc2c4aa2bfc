use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use shardseek_core::batch::{build_index, BuildConfig};
use shardseek_core::merge::{merge_index, MergeConfig};
use shardseek_core::persist::IndexPaths;
use shardseek_core::RawDocument;
use tempfile::tempdir;
use tower::ServiceExt;

fn build_tiny_index(dir: &std::path::Path) {
    let paths = IndexPaths::new(dir);
    let docs = vec![
        RawDocument { url: "http://one".into(), content: "<p>rust is great. rust systems programming.</p>".into() },
        RawDocument { url: "http://two".into(), content: "<p>learning rust</p>".into() },
        RawDocument { url: "http://three".into(), content: "<p>gardening tips</p>".into() },
    ];
    build_index(&paths, &BuildConfig::default(), docs).unwrap();
    merge_index(&paths, &MergeConfig::default()).unwrap();
}

async fn call(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = server::build_app(dir.path().to_string_lossy().to_string()).unwrap();

    let (status, json) = call(app, "/search?q=rust&k=2").await;
    assert_eq!(status, StatusCode::OK);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["url"], "http://one");
    assert_eq!(arr[1]["url"], "http://two");
    assert!(arr[0]["score"].as_f64().unwrap() > arr[1]["score"].as_f64().unwrap());
}

#[tokio::test]
async fn unknown_terms_are_listed_not_failed() {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let app = server::build_app(dir.path().to_string_lossy().to_string()).unwrap();

    let (status, json) = call(app, "/search?q=zeppelin").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["results"].as_array().unwrap().is_empty());
    assert_eq!(json["missing_terms"][0], "zeppelin");
}
