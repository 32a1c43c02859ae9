use axum::{
    extract::{rejection::FormRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    store::{Severity, Verification},
    AppState,
};

const OK: &str = "OK";
const NOK: &str = "NOK";

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "outstanding": state.store.len()}))
}

// ── Issue ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IssueParams {
    pub id: i32,
}

/// `GET /string?id=N`: returns a fresh plaintext secret bound to `id`.
pub async fn issue_secret(
    State(state): State<AppState>,
    Query(params): Query<IssueParams>,
) -> Response {
    let store = state.store.clone();
    let request_id = params.id;
    let issued = tokio::task::spawn_blocking(move || store.issue(request_id)).await;
    match issued {
        Ok(Ok(secret)) => {
            info!(request_id, "secret issued");
            (StatusCode::OK, secret).into_response()
        }
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(e.into()),
    }
}

// ── Redeem ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RedeemParams {
    pub id: i32,
    /// bcrypt hash of the secret returned by issue.
    pub string: String,
}

/// `POST /string?id=N&string=HASH`. Parameters may also arrive as a form body.
pub async fn redeem_secret(
    State(state): State<AppState>,
    query: Result<Query<RedeemParams>, QueryRejection>,
    form: Result<Form<RedeemParams>, FormRejection>,
) -> Response {
    let params = match (query, form) {
        (Ok(Query(p)), _) | (_, Ok(Form(p))) => p,
        (Err(rejection), _) => return rejection.into_response(),
    };

    let store = state.store.clone();
    let request_id = params.id;
    let outcome =
        match tokio::task::spawn_blocking(move || store.redeem(request_id, &params.string)).await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "redeem task failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, NOK).into_response();
            }
        };

    match outcome {
        Ok(Verification::Verified) => {
            info!(request_id, "secret redeemed");
            (StatusCode::OK, OK).into_response()
        }
        Ok(Verification::Mismatch) => {
            debug!(request_id, "secret mismatch");
            (StatusCode::BAD_REQUEST, NOK).into_response()
        }
        Err(e) => match e.severity() {
            Severity::Client => {
                debug!(request_id, error = %e, "redeem rejected");
                (StatusCode::BAD_REQUEST, NOK).into_response()
            }
            Severity::Server => {
                warn!(request_id, error = %e, "redeem failed");
                (StatusCode::INTERNAL_SERVER_ERROR, NOK).into_response()
            }
        },
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn internal_error(e: anyhow::Error) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request},
        Router,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::store::{Store, DEFAULT_RETENTION};

    fn app() -> Router {
        crate::server::router(AppState {
            store: Store::new(DEFAULT_RETENTION),
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn issue(app: &Router, id: i32) -> (StatusCode, String) {
        let request = Request::get(format!("/string?id={id}"))
            .body(Body::empty())
            .unwrap();
        send(app, request).await
    }

    async fn redeem(app: &Router, id: i32, hash: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/string?id={id}&string={}", encode(hash)))
            .body(Body::empty())
            .unwrap();
        send(app, request).await
    }

    /// Percent-encode the characters bcrypt output can contain that are not query-safe.
    fn encode(value: &str) -> String {
        value
            .replace('$', "%24")
            .replace('/', "%2F")
            .replace('+', "%2B")
    }

    fn client_hash(plaintext: &str) -> String {
        bcrypt::hash(plaintext, 4).unwrap()
    }

    #[tokio::test]
    async fn issue_returns_nonempty_secret() {
        let app = app();
        let (status, body) = issue(&app, 1).await;
        assert_eq!(status, StatusCode::OK);
        assert!((8..33).contains(&body.len()));
        assert!(body.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[tokio::test]
    async fn issue_then_redeem_ok_then_not_found() {
        let app = app();
        issue(&app, 50).await;
        let (_, secret) = issue(&app, 1).await;
        let hash = client_hash(&secret);

        assert_eq!(redeem(&app, 1, &hash).await, (StatusCode::OK, "OK".into()));
        assert_eq!(
            redeem(&app, 1, &hash).await,
            (StatusCode::BAD_REQUEST, "NOK".into())
        );
    }

    #[tokio::test]
    async fn redeeming_last_record_twice_reports_empty_store() {
        let app = app();
        let (_, secret) = issue(&app, 1).await;
        let hash = client_hash(&secret);

        assert_eq!(redeem(&app, 1, &hash).await, (StatusCode::OK, "OK".into()));
        assert_eq!(
            redeem(&app, 1, &hash).await,
            (StatusCode::INTERNAL_SERVER_ERROR, "NOK".into())
        );
    }

    #[tokio::test]
    async fn redeem_on_empty_store_is_server_error() {
        let app = app();
        assert_eq!(
            redeem(&app, 99, "anything").await,
            (StatusCode::INTERNAL_SERVER_ERROR, "NOK".into())
        );
    }

    #[tokio::test]
    async fn plaintext_instead_of_hash_is_server_error() {
        let app = app();
        let (_, secret) = issue(&app, 2).await;
        assert_eq!(
            redeem(&app, 2, &secret).await,
            (StatusCode::INTERNAL_SERVER_ERROR, "NOK".into())
        );
    }

    #[tokio::test]
    async fn wrong_id_is_client_error_and_keeps_record() {
        let app = app();
        let (_, secret) = issue(&app, 3).await;
        let hash = client_hash(&secret);

        assert_eq!(
            redeem(&app, 4, &hash).await,
            (StatusCode::BAD_REQUEST, "NOK".into())
        );
        assert_eq!(redeem(&app, 3, &hash).await, (StatusCode::OK, "OK".into()));
    }

    #[tokio::test]
    async fn wrong_secret_is_client_error() {
        let app = app();
        issue(&app, 6).await;
        assert_eq!(
            redeem(&app, 6, &client_hash("definitelywrong")).await,
            (StatusCode::BAD_REQUEST, "NOK".into())
        );
    }

    #[tokio::test]
    async fn redeem_accepts_form_body() {
        let app = app();
        let (_, secret) = issue(&app, 8).await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/string")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!(
                "id=8&string={}",
                encode(&client_hash(&secret))
            )))
            .unwrap();
        assert_eq!(send(&app, request).await, (StatusCode::OK, "OK".into()));
    }

    #[tokio::test]
    async fn missing_id_is_rejected() {
        let app = app();
        let request = Request::get("/string").body(Body::empty()).unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::get("/string?id=abc").body(Body::empty()).unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_outstanding() {
        let app = app();
        issue(&app, 10).await;
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["outstanding"], 1);
    }
}
