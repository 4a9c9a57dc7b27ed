//! Backup API handlers

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::{ApiError, ApiResult, AppState};
use crate::backup::{is_explicit_confirmation, Artifact, BackupStats, CreateOutcome, RestoreOutcome, VerificationReport};
use crate::scheduler::SchedulerStatus;

/// Catalog listing
#[derive(Debug, Serialize)]
pub struct BackupListResponse {
    pub backups: Vec<Artifact>,
    pub max_backups: usize,
}

/// Body of a restore request
#[derive(Debug, Default, Deserialize)]
pub struct RestoreRequest {
    /// Must be the JSON boolean `true`
    #[serde(default)]
    pub confirm: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

/// List all backups, newest first
pub async fn list_backups(State(state): State<AppState>) -> ApiResult<Json<BackupListResponse>> {
    let backups = state.manager.list()?;
    Ok(Json(BackupListResponse {
        backups,
        max_backups: state.manager.max_backups(),
    }))
}

/// Aggregate statistics
pub async fn backup_stats(State(state): State<AppState>) -> ApiResult<Json<BackupStats>> {
    Ok(Json(state.manager.stats()?))
}

/// Create a backup now
pub async fn create_backup(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CreateOutcome>)> {
    let outcome = state.manager.create().await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Verify one backup
pub async fn verify_backup(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<VerificationReport>> {
    Ok(Json(state.manager.verify(&name).await?))
}

/// Stream the raw artifact
pub async fn download_backup(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let path = state.manager.download_path(&name)?;
    let file = tokio::fs::File::open(&path).await.map_err(|e| ApiError::Internal {
        message: format!("Failed to open backup: {}", e),
        details: None,
    })?;
    let length = file.metadata().await.map(|m| m.len()).ok();

    let mut response = (
        [
            (header::CONTENT_TYPE, "application/sql".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", name),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response();

    if let Some(length) = length {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, length.into());
    }

    Ok(response)
}

/// Overwrite the live database with a backup
///
/// A missing or malformed body counts as unconfirmed.
pub async fn restore_backup(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<RestoreRequest>>,
) -> ApiResult<Json<RestoreOutcome>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let confirmed = is_explicit_confirmation(&request.confirm);

    Ok(Json(state.manager.restore(&name, confirmed).await?))
}

/// Delete one backup
pub async fn delete_backup(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    state.manager.delete(&name)?;
    Ok(Json(DeleteResponse { deleted: name }))
}

/// Scheduler state
pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::backup::{ArtifactStore, BackupManager, DumpRunner, RestoreRunner};
    use crate::config::settings::{CommandSettings, ScheduleConfig};
    use crate::scheduler::BackupScheduler;
    use crate::server::router;

    const DUMP_SQL: &str = "BEGIN;\nCREATE TABLE t (id int);\nCOMMIT;\n";

    fn sh(script: &str, args: &[&str]) -> CommandSettings {
        let mut full = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
        full.extend(args.iter().map(|s| s.to_string()));
        CommandSettings {
            program: "sh".to_string(),
            args: full,
            timeout_secs: 30,
        }
    }

    fn test_state(temp: &TempDir) -> AppState {
        let store = ArtifactStore::new(temp.path().join("backups"));
        store.ensure_directory().unwrap();
        let dump = sh("printf 'CREATE TABLE t (id int);\\n' > \"$1\"", &["{output}"]);
        let restore = sh("cat \"$1\" > \"$2\"", &["{input}", "{target}"]);
        let target = temp.path().join("live.sql");

        let manager = Arc::new(BackupManager::new(
            store.clone(),
            DumpRunner::new(store, &dump),
            RestoreRunner::new(&restore),
            target.to_string_lossy().to_string(),
            30,
        ));
        let scheduler = Arc::new(BackupScheduler::new(
            Arc::clone(&manager),
            &ScheduleConfig {
                schedule: Default::default(),
                enabled: false,
                max_backups: 30,
            },
        ));
        AppState::new(manager, scheduler)
    }

    fn seed(state: &AppState, name: &str, contents: &str) {
        std::fs::write(state.manager.store().root().join(name), contents).unwrap();
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(state, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn restore_request(name: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/backups/{}/restore", name))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_empty() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);

        let (status, body) = send_json(&state, get("/api/backups")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backups"], serde_json::json!([]));
        assert_eq!(body["max_backups"], 30);
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);
        seed(&state, "backup-20250101-020000-000.sql", DUMP_SQL);
        seed(&state, "backup-20250102-020000-000.sql", DUMP_SQL);
        seed(&state, "notes.txt", "ignored");

        let (_, body) = send_json(&state, get("/api/backups")).await;
        let names: Vec<_> = body["backups"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["backup-20250102-020000-000.sql", "backup-20250101-020000-000.sql"]
        );
        assert!(body["backups"][0].get("path").is_none());

        let (status, body) = send_json(&state, get("/api/backups/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["total_bytes"], (DUMP_SQL.len() * 2) as u64);
        assert_eq!(body["newest"]["name"], "backup-20250102-020000-000.sql");
    }

    #[tokio::test]
    async fn test_traversal_is_bad_request() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);

        let (status, body) =
            send_json(&state, get("/api/backups/..%2F..%2Fetc%2Fpasswd/verify")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
        assert!(body["message"].as_str().unwrap().starts_with("Invalid backup name"));
    }

    #[tokio::test]
    async fn test_verify_reports_invalid_artifact() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);
        seed(&state, "backup-20250101-020000-000.sql", "");

        let (status, body) =
            send_json(&state, get("/api/backups/backup-20250101-020000-000.sql/verify")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], false);
        assert_eq!(body["reasons"], serde_json::json!(["missing structural markers"]));
    }

    #[tokio::test]
    async fn test_download_streams_bytes() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);
        seed(&state, "backup-20250101-020000-000.sql", DUMP_SQL);

        let response = router(state.clone())
            .oneshot(get("/api/backups/backup-20250101-020000-000.sql/download"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/sql");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"backup-20250101-020000-000.sql\""
        );
        assert_eq!(headers[header::CONTENT_LENGTH], DUMP_SQL.len().to_string().as_str());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], DUMP_SQL.as_bytes());
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);

        let (status, body) =
            send_json(&state, get("/api/backups/backup-20250101-020000-000.sql/download")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);
    }

    #[tokio::test]
    async fn test_restore_confirmation_gate() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);
        seed(&state, "backup-20250101-020000-000.sql", DUMP_SQL);
        let name = "backup-20250101-020000-000.sql";

        for body in ["", "{}", r#"{"confirm":false}"#, r#"{"confirm":"true"}"#, r#"{"confirm":1}"#, "not json"] {
            let (status, json) = send_json(&state, restore_request(name, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
            assert_eq!(json["message"], "Restore requires explicit confirmation");
        }

        assert!(!temp.path().join("live.sql").exists());
    }

    #[tokio::test]
    async fn test_restore_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);

        let (status, _) = send_json(
            &state,
            restore_request("backup-20250101-020000-000.sql", r#"{"confirm":true}"#),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);
        seed(&state, "backup-20250101-020000-000.sql", DUMP_SQL);

        let delete = |name: &str| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/backups/{}", name))
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send_json(&state, delete("backup-20250101-020000-000.sql")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], "backup-20250101-020000-000.sql");

        let (status, _) = send_json(&state, delete("backup-20250101-020000-000.sql")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(&state, delete("config.json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scheduler_status() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);

        let (status, body) = send_json(&state, get("/api/backups/scheduler/status")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["active"], false);
        assert_eq!(body["schedule"], "0 2 * * *");
        assert_eq!(body["description"], "daily at 02:00 UTC");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_and_restore() {
        let temp = TempDir::new().unwrap();
        let state = test_state(&temp);

        let request = Request::builder()
            .method("POST")
            .uri("/api/backups")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send_json(&state, request).await;
        assert_eq!(status, StatusCode::CREATED);
        let name = body["artifact"]["name"].as_str().unwrap().to_string();
        assert!(name.starts_with("backup-"));
        assert_eq!(body["pruned"], serde_json::json!([]));

        let (status, body) = send_json(&state, restore_request(&name, r#"{"confirm":true}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], name);
        assert_eq!(
            std::fs::read_to_string(temp.path().join("live.sql")).unwrap(),
            "CREATE TABLE t (id int);\n"
        );
    }
}
