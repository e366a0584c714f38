//! Reads through signed links of the local object store.

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
    AppState,
    errors::{Error, Result},
    storage::StorageError,
};

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub signature: String,
}

/// Serve an object whose link carries a valid, unexpired signature
#[tracing::instrument(skip_all, fields(key = %key))]
pub async fn serve_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response> {
    let local = state.objects.as_local().ok_or_else(|| Error::NotFound {
        resource: "Object".to_string(),
        id: key.clone(),
    })?;
    local.verify(&key, query.expires, &query.signature)?;

    let object = state.objects.get(&key).await.map_err(|e| match e {
        StorageError::InvalidKey(_) => Error::Storage(StorageError::NotFound { key: key.clone() }),
        other => other.into(),
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, object.content_type),
            (header::CACHE_CONTROL, "private, max-age=300".to_string()),
        ],
        object.bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{TestHarness, test_config};
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use bytes::Bytes;
    use std::time::Duration;
    use url::Url;

    #[tokio::test]
    async fn test_signed_link_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();
        let objects = &harness.state.objects;
        objects
            .put("results/u/j-result.png", Bytes::from_static(b"png-bytes"), "image/png")
            .await
            .unwrap();

        let signed = objects.signed_url("results/u/j-result.png", Duration::from_secs(60)).await.unwrap();
        let url = Url::parse(&signed.url).unwrap();
        let path_and_query = format!("{}?{}", url.path(), url.query().unwrap());

        let response = server.get(&path_and_query).await;
        response.assert_status_ok();
        assert_eq!(response.as_bytes().as_ref(), b"png-bytes");
        assert_eq!(response.header("content-type"), "image/png");

        let tampered = path_and_query.replace("j-result.png", "other.png");
        server.get(&tampered).await.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_expired_link_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let harness = TestHarness::new(test_config(dir.path()));
        let server = TestServer::new(harness.router().unwrap()).unwrap();
        let local = harness.state.objects.as_local().unwrap();
        let expires = chrono::Utc::now().timestamp() - 10;
        let signature = local.sign("results/u/old.png", expires).unwrap();

        server
            .get(&format!("/storage/results/u/old.png?expires={expires}&signature={signature}"))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }
}
