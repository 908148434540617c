use super::{ApiError, AppState};
use crate::ingest;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use logging::*;
use std::result::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

pub fn add_route(app: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    app.route("/", get(health))
        .route("/api/files", get(list_files))
        .route("/api/file-content", get(file_content))
}

#[derive(Debug, Serialize, PartialEq)]
struct Health {
    status: &'static str,
    message: &'static str,
    endpoints: Vec<&'static str>,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        message: "PowerSight backend is running",
        endpoints: vec![
            "/api/files",
            "/api/file-content",
            "/api/regions",
            "/api/formulas/{region}",
            "/api/normalize",
            "/api/preview",
            "/api/calculate",
            "/api/status",
        ],
    })
}

#[derive(Debug, Deserialize)]
struct FilesQuery {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ContentQuery {
    path: String,
    filename: String,
}

/// `SERVER_DATA_ROOT` の外は拒否する
async fn check_root(state: &AppState, path: &Path) -> Result<(), ApiError> {
    let Some(root) = &state.data_root else {
        return Ok(());
    };
    // 存在しないパスは正規化できないので字面で比べる
    let resolved = fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf());
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "path is outside the data root: {}",
            path.display()
        )))
    }
}

/// ディレクトリ内の CSV ファイル名。ディレクトリが無ければ空。
async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let log = DEFAULT.new(o!("function" => "list_files", "path" => query.path.clone()));
    let dir = PathBuf::from(&query.path);
    check_root(&state, &dir).await?;

    if !fs::try_exists(&dir).await.unwrap_or(false) {
        debug!(log, "directory not found");
        return Ok(Json(Vec::new()));
    }

    let read_error = |e: std::io::Error| ApiError::internal(format!("cannot read directory: {}", e));
    let mut entries = fs::read_dir(&dir).await.map_err(read_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".csv") && !name.starts_with('.') {
            files.push(name);
        }
    }
    files.sort();
    info!(log, "files listed"; "count" => files.len());
    Ok(Json(files))
}

/// CSV ファイルの中身を返す。UTF-8 で読めなければ GBK として読む。
async fn file_content(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContentQuery>,
) -> Result<String, ApiError> {
    let log = DEFAULT.new(o!(
        "function" => "file_content",
        "path" => query.path.clone(),
        "filename" => query.filename.clone(),
    ));
    let full = Path::new(&query.path).join(&query.filename);
    check_root(&state, &full).await?;

    let metadata = match fs::metadata(&full).await {
        Ok(metadata) => metadata,
        Err(_) => return Err(ApiError::not_found("file not found")),
    };
    if !metadata.is_file() {
        return Err(ApiError::bad_request("target is not a file"));
    }

    let bytes = fs::read(&full)
        .await
        .map_err(|e| ApiError::internal(format!("failed to read file: {}", e)))?;
    let text = ingest::decode_text(bytes).map_err(|e| {
        warn!(log, "undecodable file"; "error" => %e);
        ApiError::internal(e.to_string())
    })?;
    info!(log, "file served"; "bytes" => text.len());
    Ok(text)
}
