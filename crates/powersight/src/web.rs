mod error;
mod files;
mod formulas;
mod scoring_api;

pub use error::ApiError;

use anyhow::{Context, Result};
use axum::Router;
use chrono::FixedOffset;
use common::config;
use logging::*;
use persistence::formula_store::FormulaStore;
use scoring::preview::{self, PreviewDebouncer};
use scoring::{CalculationState, Sandbox, ScriptAssembler, dataset};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tower_http::cors::{Any, CorsLayer};

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
const DEFAULT_PREVIEW_DEBOUNCE: Duration = Duration::from_millis(300);

pub struct AppState {
    pub sandbox: &'static Sandbox,
    pub assembler: ScriptAssembler,
    pub offset: FixedOffset,
    /// None なら任意のディレクトリを参照できる
    pub data_root: Option<PathBuf>,
    pub preview_rows: usize,
    pub preview_debounce: Duration,
    pub debouncer: PreviewDebouncer,
    pub store: Mutex<FormulaStore>,
    /// 一括計算は同時に 1 つだけ
    pub calculation: Mutex<()>,
    pub status: watch::Sender<CalculationState>,
}

impl AppState {
    pub fn new(sandbox: &'static Sandbox, store: FormulaStore) -> Self {
        let (status, _) = watch::channel(CalculationState::Idle);
        Self {
            sandbox,
            assembler: ScriptAssembler::new(sandbox.alias(), Default::default()),
            offset: dataset::utc_offset_from_config(),
            data_root: None,
            preview_rows: preview::DEFAULT_PREVIEW_ROWS,
            preview_debounce: DEFAULT_PREVIEW_DEBOUNCE,
            debouncer: PreviewDebouncer::new(),
            store: Mutex::new(store),
            calculation: Mutex::new(()),
            status,
        }
    }

    pub async fn from_config() -> Result<Self> {
        let log = DEFAULT.new(o!("function" => "AppState::from_config"));
        let sandbox = Sandbox::initialize()?;
        let store = FormulaStore::from_config().await?;

        let data_root = match config::get("SERVER_DATA_ROOT") {
            Ok(root) => Some(
                tokio::fs::canonicalize(&root)
                    .await
                    .with_context(|| format!("invalid SERVER_DATA_ROOT '{}'", root))?,
            ),
            Err(_) => None,
        };
        let preview_debounce = match config::get("SERVER_PREVIEW_DEBOUNCE") {
            Ok(text) => humantime::parse_duration(&text).unwrap_or_else(|e| {
                warn!(log, "invalid preview debounce, using default"; "value" => &text, "error" => %e);
                DEFAULT_PREVIEW_DEBOUNCE
            }),
            Err(_) => DEFAULT_PREVIEW_DEBOUNCE,
        };

        let state = Self {
            assembler: ScriptAssembler::from_config(),
            data_root,
            preview_rows: preview::preview_rows_from_config(),
            preview_debounce,
            ..Self::new(sandbox, store)
        };
        info!(log, "server state ready";
            "data_root" => ?state.data_root,
            "preview_rows" => state.preview_rows,
            "preview_debounce" => %humantime::format_duration(state.preview_debounce),
        );
        Ok(state)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    add_routes(
        Router::new(),
        &[files::add_route, formulas::add_route, scoring_api::add_route],
    )
    .with_state(state)
    .layer(cors)
}

pub async fn run(bind: Option<String>) -> Result<()> {
    let log = DEFAULT.new(o!("function" => "web::run"));
    let state = Arc::new(AppState::from_config().await?);
    let addr = match bind {
        Some(addr) => addr,
        None => config::get("SERVER_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(log, "server listening"; "addr" => &addr);
    axum::serve(listener, router(state))
        .await
        .context("server failed")?;
    Ok(())
}

fn add_routes<T>(app: Router<T>, funcs: &[fn(Router<T>) -> Router<T>]) -> Router<T> {
    let mut app = app;
    for func in funcs {
        app = func(app);
    }
    app
}

/// テスト用の状態。保存先は `dir` の下。
#[cfg(test)]
pub(crate) async fn test_state(dir: &std::path::Path) -> AppState {
    let store = FormulaStore::open(dir.join("formulas.json"))
        .await
        .expect("open store");
    let sandbox = Sandbox::initialize().expect("sandbox");
    AppState {
        preview_debounce: Duration::ZERO,
        ..AppState::new(sandbox, store)
    }
}

#[cfg(test)]
mod tests;
