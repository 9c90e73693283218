//! Liveness and readiness endpoints.

use crate::services::post_service::PostService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, fmt::Display};

/// `GET /healthz`: always 200, no I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(ReadyResponse::default()))
}

/// `GET /readyz`: 200 when SQLite answers and the blob root accepts a
/// write, 503 otherwise. Each check is reported by name.
pub async fn readyz(State(service): State<PostService>) -> impl IntoResponse {
    let sqlite = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await;
    let blobs = service.blobs.check_writable().await;

    let mut body = ReadyResponse::default();
    body.record("sqlite", sqlite.map(|_| ()));
    body.record("blobs", blobs);

    let status = if body.status == "ok" {
        StatusCode::OK
    } else {
        tracing::warn!(checks = ?body.checks, "readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    checks: BTreeMap<&'static str, CheckStatus>,
}

impl Default for ReadyResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            checks: BTreeMap::new(),
        }
    }
}

impl ReadyResponse {
    fn record<E: Display>(&mut self, name: &'static str, outcome: Result<(), E>) {
        let check = match outcome {
            Ok(()) => CheckStatus { ok: true, error: None },
            Err(err) => {
                self.status = "error";
                CheckStatus {
                    ok: false,
                    error: Some(err.to_string()),
                }
            }
        };
        self.checks.insert(name, check);
    }
}

#[derive(Debug, Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestEnv;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn ready_body(env: &TestEnv) -> (StatusCode, Value) {
        let response = readyz(State(env.service.clone())).await.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn readyz_reports_ok_when_db_and_blob_root_work() {
        let env = TestEnv::new().await;
        std::fs::create_dir_all(env.blob_root()).unwrap();

        let (status, body) = ready_body(&env).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["blobs"]["ok"], true);
    }

    #[tokio::test]
    async fn readyz_names_the_failing_blob_check() {
        let env = TestEnv::new().await;

        let (status, body) = ready_body(&env).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["blobs"]["ok"], false);
        assert!(body["checks"]["blobs"]["error"].is_string());
    }
}
