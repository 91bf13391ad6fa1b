use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tracing::error;

use crate::{
    lifecycle::{CreateRequest, RevealRequest, DEFAULT_TTL_SECS},
    AppState, Error,
};

/// Shown for both unknown keys and failed decryption, so a wrong passphrase
/// does not confirm that the key exists.
pub const UNAVAILABLE: &str = "secret unavailable";

// ── Error mapping ─────────────────────────────────────────────────────────────

pub fn error_response(e: &Error) -> Response {
    let (status, message) = match e {
        Error::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        Error::NotFound | Error::Authentication => (StatusCode::NOT_FOUND, UNAVAILABLE.into()),
        Error::StorageTimeout | Error::StorageUnavailable(_) => {
            error!(error = %e, "storage error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage unavailable, try again".into(),
            )
        }
        Error::Internal(_) => {
            error!(error = %e, "internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
        }
    };
    (status, Json(json!({ "error": message }))).into_response()
}

/// Decode a JSON request body. Bad bodies get the same `{"error": ..}` shape
/// as every other failure.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::Validation(format!("invalid request body: {e}")))
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn create_secret(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CreateRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&e),
    };
    match state.manager.create(request).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub passphrase: String,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

pub async fn create_password(State(state): State<AppState>, body: Bytes) -> Response {
    let body: PasswordRequest = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };
    match state
        .manager
        .create_password(body.ttl_seconds, body.passphrase)
        .await
    {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Reveal ────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct RevealBody {
    #[serde(default)]
    pub passphrase: String,
}

pub async fn reveal_secret(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    // The passphrase is optional, and so is the body carrying it.
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        RevealBody::default()
    } else {
        match parse_body::<RevealBody>(&body) {
            Ok(body) => body,
            Err(e) => return error_response(&e),
        }
    };
    let request = RevealRequest {
        key,
        passphrase: body.passphrase,
    };
    match state.manager.reveal(request).await {
        Ok(revealed) => Json(revealed).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::{CipherEngine, KdfParams};
    use crate::store::MemoryStore;
    use crate::LifecycleManager;

    fn state() -> AppState {
        let cipher = CipherEngine::new(KdfParams {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        });
        AppState {
            manager: LifecycleManager::new(Arc::new(MemoryStore::new())).with_cipher(cipher),
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), 1024)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn not_found_and_authentication_look_the_same() {
        let a = error_response(&Error::NotFound);
        let b = error_response(&Error::Authentication);
        assert_eq!(a.status(), StatusCode::NOT_FOUND);
        assert_eq!(b.status(), StatusCode::NOT_FOUND);

        let a = body_bytes(a).await;
        assert_eq!(a, body_bytes(b).await);
        let json: serde_json::Value = serde_json::from_slice(&a).unwrap();
        assert_eq!(json["error"], UNAVAILABLE);
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            error_response(&Error::Validation("bad".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&Error::StorageTimeout).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_response(&Error::StorageUnavailable("x".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_response(&Error::Internal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn reveal_without_body_uses_empty_passphrase() {
        let state = state();
        let created = create_secret(
            State(state.clone()),
            Bytes::from_static(br#"{"content":"hello","ttl_seconds":86400}"#),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let key = body_json(created).await["key"].as_str().unwrap().to_owned();

        let resp = reveal_secret(State(state), Path(key), Bytes::new()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["content"], "hello");
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let state = state();

        let resp = create_secret(State(state.clone()), Bytes::from_static(b"not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());

        let resp = create_secret(State(state.clone()), Bytes::new()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());

        let resp = create_password(State(state.clone()), Bytes::from_static(b"[1]")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());

        let resp = reveal_secret(
            State(state),
            Path("somekey".into()),
            Bytes::from_static(b"{oops"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_key_is_unavailable() {
        let resp = reveal_secret(
            State(state()),
            Path("doesnotexist".into()),
            Bytes::from_static(br#"{"passphrase":""}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], UNAVAILABLE);
    }

    #[test]
    fn password_request_defaults() {
        let req: PasswordRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.ttl_seconds, DEFAULT_TTL_SECS);
        assert!(req.passphrase.is_empty());
    }
}
