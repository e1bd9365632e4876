//! # HTTP Verification API
//!
//! Builds the axum router that exposes the identity engine over HTTP. All
//! handlers share [`AppState`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                          |
//! |--------|------------------------|--------------------------------------|
//! | GET    | `/health`              | Liveness probe                       |
//! | POST   | `/v1/accounts/derive`  | Derive or look up a chip's account   |
//! | GET    | `/v1/accounts/:uid`    | Account record by chip UID           |
//! | POST   | `/v1/auth/challenge`   | Issue a challenge                    |
//! | POST   | `/v1/auth/verify`      | Verify a signed challenge (once)     |
//! | GET    | `/metrics`             | Prometheus exposition                |
//!
//! Private keys never cross this boundary: derive responses carry only the
//! public summary.

use std::sync::Arc;

use axum::{
    extract::{FromRef, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kairos_identity::account::{AccountManager, AccountStatus, AccountSummary};
use kairos_identity::auth::{ChallengeIssuer, ChallengeVerdict};
use kairos_identity::{ErrorKind, KairosError};

use crate::metrics::{metrics_handler, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone: everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub accounts: Arc<AccountManager>,
    pub issuer: Arc<ChallengeIssuer>,
    pub metrics: SharedMetrics,
}

impl FromRef<AppState> for SharedMetrics {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.metrics)
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/accounts/derive", post(derive_handler))
        .route("/v1/accounts/:uid", get(account_handler))
        .route("/v1/auth/challenge", post(challenge_handler))
        .route("/v1/auth/verify", post(verify_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct DeriveRequest {
    #[serde(rename = "chipUID")]
    pub chip_uid: String,
    #[serde(default)]
    pub pin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeriveResponse {
    pub status: AccountStatus,
    pub persisted: bool,
    #[serde(rename = "chipUID")]
    pub chip_uid: String,
    pub account: AccountSummary,
}

/// Public view of a stored account. The PIN verifier stays server-side.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    #[serde(rename = "chipUID")]
    pub chip_uid: String,
    #[serde(rename = "hasPIN")]
    pub has_pin: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub account: AccountSummary,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub challenge: String,
    pub signature: String,
    pub public_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub verdict: ChallengeVerdict,
    pub verified: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps library errors onto HTTP statuses by [`ErrorKind`].
pub struct ApiError(KairosError);

impl<E: Into<KairosError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Resource => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Liveness only; does not touch storage.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": state.version }))
}

/// `POST /v1/accounts/derive`
async fn derive_handler(
    State(state): State<AppState>,
    Json(req): Json<DeriveRequest>,
) -> Result<Json<DeriveResponse>, ApiError> {
    let derived = state
        .accounts
        .derive_account(&req.chip_uid, req.pin.as_deref())
        .await?;
    state.metrics.record_derivation(derived.status);

    Ok(Json(DeriveResponse {
        status: derived.status,
        persisted: derived.persisted,
        chip_uid: derived.record.chip_uid.to_string(),
        account: derived.record.summary(),
    }))
}

/// `GET /v1/accounts/:uid`
async fn account_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Response, ApiError> {
    match state.accounts.get_account(&uid).await? {
        Some(record) => Ok(Json(AccountResponse {
            chip_uid: record.chip_uid.to_string(),
            has_pin: record.has_pin,
            last_seen: record.last_seen,
            account: record.summary(),
        })
        .into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no account for chip {uid}"),
            }),
        )
            .into_response()),
    }
}

/// `POST /v1/auth/challenge`
async fn challenge_handler(
    State(state): State<AppState>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = state.issuer.issue().await?;
    state.metrics.challenges_issued_total.inc();
    Ok(Json(ChallengeResponse {
        challenge: challenge.challenge,
        expires_at: challenge.expires_at,
    }))
}

/// `POST /v1/auth/verify`
///
/// Consumes the challenge whatever the verdict. Undecodable signature or
/// key hex is a bad signature, not a 400: it is untrusted input.
async fn verify_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let signature = hex::decode(&req.signature).unwrap_or_default();
    let public_key = hex::decode(&req.public_key).unwrap_or_default();

    let verdict = state
        .issuer
        .verify(&signature, &req.challenge, &public_key)
        .await?;
    state.metrics.record_verification(verdict);

    Ok(Json(VerifyResponse {
        verdict,
        verified: verdict.is_verified(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use kairos_identity::account::{ChipUid, IdentitySeed};
    use kairos_identity::auth::sign_challenge;
    use kairos_identity::config::DEFAULT_CHALLENGE_TTL;
    use kairos_identity::store::{KeyValueStore, MemoryStore};
    use tower::ServiceExt;

    const CHIP: &str = "04:A1:B2:C3:D4:E5:F6";

    fn test_app_state() -> AppState {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        AppState {
            version: "0.1.0-test".into(),
            accounts: Arc::new(AccountManager::new(Arc::clone(&store))),
            issuer: Arc::new(ChallengeIssuer::new(store, DEFAULT_CHALLENGE_TTL)),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
        }
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    async fn issue(router: &Router) -> ChallengeResponse {
        let (status, body) = post_json(router, "/v1/auth/challenge", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    fn signed_body(challenge: &str, pin: Option<&str>) -> serde_json::Value {
        let uid = ChipUid::parse(CHIP).unwrap();
        let keypair = IdentitySeed::derive(&uid, pin).unwrap().keypair();
        let signed = sign_challenge(&keypair, challenge).unwrap();
        serde_json::to_value(signed).unwrap()
    }

    // -- Health --------------------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], "0.1.0-test");
    }

    // -- Accounts ------------------------------------------------------------

    #[tokio::test]
    async fn derive_creates_then_returns() {
        let router = create_router(test_app_state());
        let req = serde_json::json!({ "chipUID": "04a1b2c3d4e5f6", "pin": "1234" });

        let (status, body) = post_json(&router, "/v1/accounts/derive", req.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let first: DeriveResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(first.status, AccountStatus::Created);
        assert!(first.persisted);
        assert_eq!(first.chip_uid, CHIP);
        assert!(first.account.did.starts_with("did:key:z"));

        let (_, body) = post_json(&router, "/v1/accounts/derive", req).await;
        let second: DeriveResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(second.status, AccountStatus::Returning);
        assert_eq!(second.account.verification_count, 2);
        assert_eq!(second.account.did, first.account.did);
    }

    #[tokio::test]
    async fn derive_rejects_malformed_uid() {
        let router = create_router(test_app_state());
        let (status, body) = post_json(
            &router,
            "/v1/accounts/derive",
            serde_json::json!({ "chipUID": "not-a-uid" }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(!err.error.is_empty());
    }

    #[tokio::test]
    async fn account_lookup_404_then_found() {
        let router = create_router(test_app_state());
        let (status, _) = get(&router, "/v1/accounts/04A1B2C3D4E5F6").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        post_json(
            &router,
            "/v1/accounts/derive",
            serde_json::json!({ "chipUID": CHIP }),
        )
        .await;

        let (status, body) = get(&router, "/v1/accounts/04A1B2C3D4E5F6").await;
        assert_eq!(status, StatusCode::OK);
        let resp: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.chip_uid, CHIP);
        assert!(!resp.has_pin);
        assert_eq!(resp.account.verification_count, 1);
        assert!(!String::from_utf8_lossy(&body).contains("encryptedPIN"));
    }

    // -- Challenge / verify --------------------------------------------------

    #[tokio::test]
    async fn challenge_verifies_once() {
        let router = create_router(test_app_state());
        let challenge = issue(&router).await;
        assert_eq!(challenge.challenge.len(), 64);

        let body = signed_body(&challenge.challenge, Some("1234"));
        let (status, resp) = post_json(&router, "/v1/auth/verify", body.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let resp: VerifyResponse = serde_json::from_slice(&resp).unwrap();
        assert!(resp.verified);
        assert_eq!(resp.verdict, ChallengeVerdict::Verified);

        let (_, resp) = post_json(&router, "/v1/auth/verify", body).await;
        let resp: VerifyResponse = serde_json::from_slice(&resp).unwrap();
        assert_eq!(resp.verdict, ChallengeVerdict::Unknown);
    }

    #[tokio::test]
    async fn wrong_key_is_bad_signature() {
        let router = create_router(test_app_state());
        let challenge = issue(&router).await;

        let mut body = signed_body(&challenge.challenge, Some("1234"));
        let other = signed_body(&challenge.challenge, Some("5678"));
        body["publicKey"] = other["publicKey"].clone();

        let (_, resp) = post_json(&router, "/v1/auth/verify", body).await;
        let resp: VerifyResponse = serde_json::from_slice(&resp).unwrap();
        assert_eq!(resp.verdict, ChallengeVerdict::BadSignature);
        assert!(!resp.verified);
    }

    #[tokio::test]
    async fn garbage_hex_is_bad_signature() {
        let router = create_router(test_app_state());
        let challenge = issue(&router).await;
        let body = serde_json::json!({
            "challenge": challenge.challenge,
            "signature": "zz",
            "publicKey": "not hex",
        });

        let (status, resp) = post_json(&router, "/v1/auth/verify", body).await;
        assert_eq!(status, StatusCode::OK);
        let resp: VerifyResponse = serde_json::from_slice(&resp).unwrap();
        assert_eq!(resp.verdict, ChallengeVerdict::BadSignature);
    }

    #[tokio::test]
    async fn malformed_challenge_is_400() {
        let router = create_router(test_app_state());
        let body = serde_json::json!({
            "challenge": "abc",
            "signature": "00",
            "publicKey": "00",
        });
        let (status, _) = post_json(&router, "/v1/auth/verify", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- Metrics -------------------------------------------------------------

    #[tokio::test]
    async fn metrics_reflect_traffic() {
        let router = create_router(test_app_state());
        post_json(
            &router,
            "/v1/accounts/derive",
            serde_json::json!({ "chipUID": CHIP }),
        )
        .await;
        let challenge = issue(&router).await;
        let body = signed_body(&challenge.challenge, None);
        post_json(&router, "/v1/auth/verify", body).await;

        let (status, body) = get(&router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("kairos_accounts_derived_total{status=\"created\"} 1"));
        assert!(text.contains("kairos_challenges_issued_total 1"));
        assert!(text.contains("kairos_verifications_total{verdict=\"verified\"} 1"));
    }
}
