//! `/credentials` resource

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use regcred_core::AuthConfig;
use regcred_store::{CredentialStore, SharedStore};

use crate::error::ApiError;

/// Path of the only resource the server exposes
pub const CREDENTIALS_PATH: &str = "/credentials";

/// `?key=<server>`
#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

/// Build the router serving `store`
pub fn build_router(store: SharedStore, request_timeout: Duration) -> Router {
    Router::new()
        .route(
            CREDENTIALS_PATH,
            get(get_credentials)
                .post(store_credentials)
                .delete(erase_credentials),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// `GET /credentials[?key=]`
async fn get_credentials(
    State(store): State<SharedStore>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    match query.key.filter(|k| !k.is_empty()) {
        Some(key) => {
            debug!(server = %key, "credential lookup");
            match store.get(&key).await? {
                Some(auth) => Ok(Json(auth).into_response()),
                None => Err(ApiError::NotFound(format!("no credentials for {key}"))),
            }
        }
        None => Ok(Json(store.get_all().await?).into_response()),
    }
}

/// `POST /credentials`
async fn store_credentials(
    State(store): State<SharedStore>,
    Json(auth): Json<AuthConfig>,
) -> Result<StatusCode, ApiError> {
    if auth.server_address.is_empty() {
        return Err(ApiError::BadRequest("serveraddress is required".to_string()));
    }
    debug!(server = %auth.server_address, "storing credentials");
    store.store(auth).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /credentials?key=`
async fn erase_credentials(
    State(store): State<SharedStore>,
    Query(query): Query<KeyQuery>,
) -> Result<StatusCode, ApiError> {
    let key = query
        .key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("key query parameter is required".to_string()))?;
    debug!(server = %key, "erasing credentials");
    store.erase(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use regcred_store::MemoryStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> (Router, SharedStore) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        (build_router(store.clone(), Duration::from_secs(5)), store)
    }

    async fn send(router: Router, method: Method, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_get_missing_key_is_404() {
        let (router, _) = router();
        let (status, body) = send(router, Method::GET, "/credentials?key=r.test", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["error"], "not_found");
    }

    #[tokio::test]
    async fn test_post_then_get() {
        let (router, store) = router();
        let body = serde_json::to_vec(&AuthConfig::new("r.test", "u", "p")).unwrap();

        let (status, _) = send(router.clone(), Method::POST, "/credentials", Body::from(body)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(store.get("r.test").await.unwrap().unwrap().username, "u");

        let (status, body) = send(router.clone(), Method::GET, "/credentials", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let all: std::collections::BTreeMap<String, AuthConfig> =
            serde_json::from_slice(&body).unwrap();
        assert_eq!(all["r.test"].password, "p");
    }

    #[tokio::test]
    async fn test_delete_requires_key() {
        let (router, _) = router();
        let (status, _) = send(router.clone(), Method::DELETE, "/credentials", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(router, Method::DELETE, "/credentials?key=r.test", Body::empty()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_post_without_server_is_rejected() {
        let (router, _) = router();
        let (status, _) = send(router, Method::POST, "/credentials", Body::from("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
