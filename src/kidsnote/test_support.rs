//! Mock-server fixtures shared by the lister and downloader tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::Lister;
use crate::auth::Session;
use crate::config::ApiConfig;
use crate::retry::RetryConfig;

pub(crate) fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter_ratio: 0.0,
    }
}

pub(crate) fn api_for(server: &MockServer) -> ApiConfig {
    let mut api = ApiConfig::with_base_url(&format!("{}/api", server.uri()));
    api.user_cookie_domain = "127.0.0.1".into();
    api.session_cookie_domain = "127.0.0.1".into();
    api.timeout = Duration::from_secs(5);
    api
}

pub(crate) fn lister_for(server: &MockServer) -> Lister {
    let api = api_for(server);
    let session = Session::new(api.timeout).unwrap();
    Lister::new(session, Arc::new(api), fast_retry(2))
}

pub(crate) fn child_json(id: i64, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "gender": "F",
        "date_birth": "2019-02-03",
        "enrollment": [{"center_id": 100 + id, "belong_to_class": 200 + id}]
    })
}

pub(crate) async fn mount_children(server: &MockServer, children: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v1/me/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "children": children })))
        .mount(server)
        .await;
}

pub(crate) fn image_json(id: i64, size: u64, url: &str) -> Value {
    json!({"id": id, "file_size": size, "original": url})
}

pub(crate) fn video_json(id: i64, size: u64, url: &str) -> Value {
    json!({"id": id, "original_file_name": "clip.mov", "file_size": size, "high": url})
}

pub(crate) fn album_json(id: i64, title: &str, images: Vec<Value>, video: Option<Value>) -> Value {
    json!({
        "id": id,
        "created": "2023-06-15T10:00:00.000000Z",
        "title": title,
        "content": format!("notes for {title}"),
        "attached_video": video,
        "attached_images": images
    })
}

pub(crate) fn albums_path(child_id: i64) -> String {
    format!("/api/v1_2/children/{child_id}/albums")
}

/// Mount one album listing page. `page` is the cursor this page is fetched
/// with (`None` for the first page); `next` is the cursor it hands out.
pub(crate) async fn mount_album_page(
    server: &MockServer,
    child_id: i64,
    page: Option<&str>,
    results: Vec<Value>,
    next: Option<&str>,
) {
    let body = ResponseTemplate::new(200).set_body_json(json!({
        "results": results,
        "next": next,
    }));
    let mock = Mock::given(method("GET")).and(path(albums_path(child_id)));
    match page {
        Some(cursor) => {
            mock.and(query_param("page", cursor))
                .respond_with(body)
                .with_priority(1)
                .mount(server)
                .await
        }
        None => mock.respond_with(body).mount(server).await,
    }
}
