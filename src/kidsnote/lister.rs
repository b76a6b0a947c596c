//! Child enumeration and the streaming album lister.
//!
//! Albums are pushed into the caller's channel as each page is parsed, so a
//! consumer can start on page 1 before page 2 has been requested. With
//! [`ChildSelector::All`] one task per child lists concurrently; albums from
//! different children interleave freely but each child's pages stay in order.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::error::ApiError;
use super::models::{Album, AlbumPage, AlbumRecord, Child, ChildSelector, InfoResponse};
use crate::auth::Session;
use crate::config::ApiConfig;
use crate::download::paths;
use crate::retry::{self, RetryAction, RetryConfig};

/// Receiving end of an album listing.
pub type AlbumSink = mpsc::UnboundedSender<Album>;

#[derive(Clone)]
pub struct Lister {
    session: Session,
    api: Arc<ApiConfig>,
    retry: RetryConfig,
    /// Filled by `list_children`; album listing resolves children from here.
    children: Arc<RwLock<Option<Vec<Child>>>>,
}

impl Lister {
    pub fn new(session: Session, api: Arc<ApiConfig>, retry: RetryConfig) -> Self {
        Self {
            session,
            api,
            retry,
            children: Arc::new(RwLock::new(None)),
        }
    }

    /// Fetch the account's children and remember them for album listing.
    ///
    /// One child with missing or zero enrollment IDs fails the whole call.
    pub async fn list_children(&self, token: &CancellationToken) -> Result<Vec<Child>, ApiError> {
        let info: InfoResponse = self.get_json(token, &self.api.info_url).await?;
        let records = info
            .children
            .ok_or_else(|| ApiError::DataShape("no children data found".to_string()))?;
        let children = records
            .into_iter()
            .map(Child::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(count = children.len(), "Listed children");
        *self.children.write().await = Some(children.clone());
        Ok(children)
    }

    /// Children from the last successful `list_children`, if any.
    pub async fn children(&self) -> Option<Vec<Child>> {
        self.children.read().await.clone()
    }

    /// Stream the albums of the selected children into `sink`.
    ///
    /// Requires a prior `list_children`. For [`ChildSelector::All`] every
    /// child's listing runs to completion even if others fail; failures are
    /// reported together as [`ApiError::Partial`] afterwards.
    pub async fn list_albums(
        &self,
        token: &CancellationToken,
        selector: ChildSelector,
        sink: AlbumSink,
    ) -> Result<(), ApiError> {
        let children = self.children().await.ok_or(ApiError::NotReady)?;

        match selector {
            ChildSelector::Id(id) => {
                let child = children
                    .into_iter()
                    .find(|c| c.id == id)
                    .ok_or(ApiError::ChildNotFound(id))?;
                self.list_child_albums(token, &child, &sink).await?;
                Ok(())
            }
            ChildSelector::All => {
                let mut tasks = JoinSet::new();
                for child in children {
                    let lister = self.clone();
                    let token = token.clone();
                    let sink = sink.clone();
                    tasks.spawn(async move {
                        let result = lister.list_child_albums(&token, &child, &sink).await;
                        result.map_err(|e| (child, e))
                    });
                }
                drop(sink);

                let mut errors = Vec::new();
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok(Ok(_)) => {}
                        Ok(Err((child, e))) => {
                            tracing::error!(
                                child_id = child.id,
                                child = %child.name,
                                error = %e,
                                "Album listing failed"
                            );
                            errors.push(e);
                        }
                        Err(e) => errors.push(ApiError::TaskFailed(e.to_string())),
                    }
                }

                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(ApiError::Partial(errors))
                }
            }
        }
    }

    /// Walk one child's pages, emitting albums as each page arrives.
    /// Returns the number of albums emitted.
    async fn list_child_albums(
        &self,
        token: &CancellationToken,
        child: &Child,
        sink: &AlbumSink,
    ) -> Result<usize, ApiError> {
        let mut url = self.api.album_url_for(child.id);
        let mut emitted = 0usize;
        let mut pages = 0usize;

        loop {
            let page: AlbumPage = self.get_json(token, &url).await?;
            pages += 1;
            let records = page
                .results
                .ok_or_else(|| ApiError::DataShape(format!("no album data found at {url}")))?;

            for record in records {
                if let Some(album) = shape_album(child, record) {
                    sink.send(album).map_err(|_| ApiError::Cancelled)?;
                    emitted += 1;
                }
            }

            match page.next.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                Some(cursor) => url = next_page_url(&url, cursor)?,
                None => break,
            }
        }

        tracing::debug!(child_id = child.id, pages, albums = emitted, "Finished album listing");
        Ok(emitted)
    }

    /// GET `url` and decode the JSON body, retrying transport, status and
    /// parse failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &CancellationToken,
        url: &str,
    ) -> Result<T, ApiError> {
        retry::retry_with_backoff(
            &self.retry,
            token,
            |e: &ApiError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || async {
                tokio::select! {
                    result = self.fetch_json(url) => result,
                    _ = token.cancelled() => Err(ApiError::Cancelled),
                }
            },
        )
        .await
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self
            .session
            .client()
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Network {
                url: url.to_string(),
                source,
            })?;
        if response.status() != StatusCode::OK {
            return Err(ApiError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.bytes().await.map_err(|source| ApiError::Network {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice::<T>(&body).map_err(|source| ApiError::Parse {
            url: url.to_string(),
            source,
        })
    }
}

/// `current` with its `page` query parameter set to `cursor`.
fn next_page_url(current: &str, cursor: &str) -> Result<String, ApiError> {
    let mut url = url::Url::parse(current).map_err(|source| ApiError::InvalidUrl {
        url: current.to_string(),
        source,
    })?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", cursor);
    Ok(url.to_string())
}

/// Turn a wire record into an [`Album`]; `None` when no safe folder name
/// can be derived for it.
fn shape_album(child: &Child, record: AlbumRecord) -> Option<Album> {
    let folder_name = match paths::album_folder_name(
        child.id,
        &child.name,
        &record.created,
        record.id,
        &record.title,
    ) {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(
                album_id = record.id,
                error = %e,
                "Failed to generate folder name, skipping album"
            );
            return None;
        }
    };

    tracing::debug!(
        album_id = record.id,
        images = record.attached_images.len(),
        folder = %folder_name,
        "Parsed album"
    );

    Some(Album {
        id: record.id,
        child_id: child.id,
        folder_name,
        created: record.created,
        title: record.title,
        content: record.content,
        video: record.attached_video.map(Into::into),
        images: record.attached_images.into_iter().map(Into::into).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kidsnote::test_support::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(
        lister: &Lister,
        selector: ChildSelector,
    ) -> (Result<(), ApiError>, Vec<Album>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = lister
            .list_albums(&CancellationToken::new(), selector, tx)
            .await;
        let mut albums = Vec::new();
        while let Some(a) = rx.recv().await {
            albums.push(a);
        }
        (result, albums)
    }

    #[test]
    fn test_next_page_url_sets_page() {
        assert_eq!(
            next_page_url("https://x/api/v1_2/children/1/albums", "abc").unwrap(),
            "https://x/api/v1_2/children/1/albums?page=abc"
        );
    }

    #[test]
    fn test_next_page_url_replaces_existing_page() {
        let next =
            next_page_url("https://x/albums?tz=Asia%2FSeoul&page=abc&page_size=20", "def").unwrap();
        let url = url::Url::parse(&next).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("tz".to_string(), "Asia/Seoul".to_string()),
                ("page_size".to_string(), "20".to_string()),
                ("page".to_string(), "def".to_string()),
            ]
        );
    }

    #[test]
    fn test_next_page_url_rejects_garbage() {
        assert!(matches!(
            next_page_url("not a url", "x"),
            Err(ApiError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_children_caches_result() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice"), child_json(2, "Bob")]).await;
        let lister = lister_for(&server);

        assert!(lister.children().await.is_none());
        let children = lister.list_children(&CancellationToken::new()).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "Alice");
        assert_eq!(children[0].center_id, 101);
        assert_eq!(children[1].class_id, 202);
        assert_eq!(lister.children().await.unwrap(), children);
    }

    #[tokio::test]
    async fn test_list_children_bad_record_fails_whole_call_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/me/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "children": [child_json(1, "Alice"), {"id": 2, "name": "Bob", "enrollment": []}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let lister = lister_for(&server);

        let err = lister
            .list_children(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DataShape(_)));
        assert!(lister.children().await.is_none());
    }

    #[tokio::test]
    async fn test_child_without_id_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/me/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "children": [{
                    "name": "Alice",
                    "enrollment": [{"center_id": 1, "belong_to_class": 2}]
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let lister = lister_for(&server);

        let err = lister
            .list_children(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DataShape(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_list_children_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/me/info"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;

        let children = lister_for(&server)
            .list_children(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
    }

    #[tokio::test]
    async fn test_list_children_malformed_json_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/me/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .expect(2)
            .mount(&server)
            .await;

        let err = lister_for(&server)
            .list_children(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_list_albums_requires_children() {
        let server = MockServer::start().await;
        let (result, albums) = collect(&lister_for(&server), ChildSelector::All).await;
        assert!(matches!(result, Err(ApiError::NotReady)));
        assert!(albums.is_empty());
    }

    #[tokio::test]
    async fn test_list_albums_unknown_child() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();

        let (result, _) = collect(&lister, ChildSelector::Id(99)).await;
        assert!(matches!(result, Err(ApiError::ChildNotFound(99))));
    }

    #[tokio::test]
    async fn test_pagination_emits_every_album_in_page_order() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        mount_album_page(
            &server,
            1,
            None,
            vec![album_json(1, "one", vec![], None), album_json(2, "two", vec![], None)],
            Some("p2"),
        )
        .await;
        mount_album_page(&server, 1, Some("p2"), vec![album_json(3, "three", vec![], None)], Some("p3"))
            .await;
        mount_album_page(
            &server,
            1,
            Some("p3"),
            vec![album_json(4, "four", vec![], None), album_json(5, "five", vec![], None)],
            None,
        )
        .await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();
        let (result, albums) = collect(&lister, ChildSelector::Id(1)).await;

        result.unwrap();
        let ids: Vec<i64> = albums.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(albums[0].folder_name, "Alice/2023/06_1_one");
        assert!(albums.iter().all(|a| a.child_id == 1));
    }

    #[tokio::test]
    async fn test_empty_cursor_ends_pagination() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        mount_album_page(&server, 1, None, vec![album_json(1, "one", vec![], None)], Some("  "))
            .await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();
        let (result, albums) = collect(&lister, ChildSelector::Id(1)).await;
        result.unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_albums_stream_before_next_page_arrives() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        mount_album_page(&server, 1, None, vec![album_json(1, "first", vec![], None)], Some("p2"))
            .await;
        Mock::given(method("GET"))
            .and(path(albums_path(1)))
            .and(wiremock::matchers::query_param("page", "p2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"results": [album_json(2, "second", vec![], None)]}))
                    .set_delay(Duration::from_millis(500)),
            )
            .with_priority(1)
            .mount(&server)
            .await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let task_lister = lister.clone();
        let handle = tokio::spawn(async move {
            task_lister
                .list_albums(&CancellationToken::new(), ChildSelector::Id(1), tx)
                .await
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.id, 1);
        assert!(!handle.is_finished());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.id, 2);
        assert!(rx.recv().await.is_none());
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unnamable_album_is_skipped() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        let mut bad = album_json(1, "bad", vec![], None);
        bad["created"] = json!("");
        mount_album_page(&server, 1, None, vec![bad, album_json(2, "good", vec![], None)], None)
            .await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();
        let (result, albums) = collect(&lister, ChildSelector::Id(1)).await;
        result.unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].id, 2);
    }

    #[tokio::test]
    async fn test_hangul_child_name_still_lists_albums() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(3, "김민준")]).await;
        mount_album_page(
            &server,
            3,
            None,
            vec![
                album_json(41, "소풍", vec![], None),
                album_json(42, "Field trip", vec![], None),
            ],
            None,
        )
        .await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();
        let (result, albums) = collect(&lister, ChildSelector::Id(3)).await;
        result.unwrap();
        let folders: Vec<_> = albums.iter().map(|a| a.folder_name.as_str()).collect();
        assert_eq!(folders, ["child_3/2023/06_41_", "child_3/2023/06_42_Field_trip"]);
    }

    #[tokio::test]
    async fn test_missing_results_is_data_shape_error() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        Mock::given(method("GET"))
            .and(path(albums_path(1)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"next": null})))
            .expect(1)
            .mount(&server)
            .await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();
        let (result, _) = collect(&lister, ChildSelector::Id(1)).await;
        assert!(matches!(result, Err(ApiError::DataShape(_))));
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failing_child() {
        let server = MockServer::start().await;
        mount_children(
            &server,
            vec![child_json(1, "Alice"), child_json(2, "Bob"), child_json(3, "Cleo")],
        )
        .await;
        mount_album_page(&server, 1, None, vec![album_json(10, "a", vec![], None)], Some("p2")).await;
        mount_album_page(&server, 1, Some("p2"), vec![album_json(11, "b", vec![], None)], None).await;
        Mock::given(method("GET"))
            .and(path(albums_path(2)))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_album_page(&server, 3, None, vec![album_json(30, "c", vec![], None)], None).await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();
        let (result, albums) = collect(&lister, ChildSelector::All).await;

        match result {
            Err(ApiError::Partial(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(errors[0], ApiError::HttpStatus { status: 500, .. }));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        let mut ids: Vec<i64> = albums.iter().map(|a| a.id).collect();
        let alice: Vec<i64> = albums
            .iter()
            .filter(|a| a.child_id == 1)
            .map(|a| a.id)
            .collect();
        assert_eq!(alice, vec![10, 11]);
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 11, 30]);
    }

    #[tokio::test]
    async fn test_closed_sink_reports_cancelled() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        mount_album_page(&server, 1, None, vec![album_json(1, "one", vec![], None)], None).await;

        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let err = lister
            .list_albums(&CancellationToken::new(), ChildSelector::Id(1), tx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_listing() {
        let server = MockServer::start().await;
        mount_children(&server, vec![child_json(1, "Alice")]).await;
        let lister = lister_for(&server);
        lister.list_children(&CancellationToken::new()).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = lister
            .list_albums(&token, ChildSelector::All, tx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
