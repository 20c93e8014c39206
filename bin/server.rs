// COE Analyzer - Web Server
// JSON API over the analysis core: upload a CSV export, get the report back.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use coe_analyzer::{
    analyze, parse_reference_date, read_csv, AnalysisConfig, AnalysisReport, AnnotatedRecord,
    Phase,
};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Shared application state
#[derive(Clone)]
struct AppState {
    config: Arc<AnalysisConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::err(message)),
    )
        .into_response()
}

/// Query parameters shared by the upload endpoints
#[derive(Debug, Default, Deserialize)]
struct AnalysisQuery {
    reference_date: Option<String>,
    mode: Option<String>,
}

/// Filtered records response
#[derive(Serialize)]
struct RecordsResponse {
    reference_date: String,
    mode: Phase,
    total_records: usize,
    records: Vec<AnnotatedRecord>,
}

/// Per-request config: the server's, with the query's reference date
fn config_for(state: &AppState, query: &AnalysisQuery) -> Result<AnalysisConfig, String> {
    let mut config = (*state.config).clone();
    if let Some(raw) = query.reference_date.as_deref() {
        config.reference_date = Some(parse_reference_date(raw).map_err(|e| e.to_string())?);
    }
    Ok(config)
}

fn run_analysis(
    state: &AppState,
    query: &AnalysisQuery,
    body: &[u8],
) -> Result<AnalysisReport, String> {
    let config = config_for(state, query)?;
    let ingested = read_csv(body).map_err(|e| format!("{:#}", e))?;
    analyze(&ingested.normalize(), &config).map_err(|e| e.to_string())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/analyze - CSV body → full analysis report
async fn analyze_upload(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
    body: Bytes,
) -> Response {
    match run_analysis(&state, &query, &body) {
        Ok(report) => (StatusCode::OK, Json(ApiResponse::ok(report))).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "analysis rejected");
            bad_request(e)
        }
    }
}

/// POST /api/records?mode=active - CSV body → annotated records in one phase
async fn filter_records(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
    body: Bytes,
) -> Response {
    let mode = match query.mode.as_deref().unwrap_or("active").parse::<Phase>() {
        Ok(mode) => mode,
        Err(e) => return bad_request(e.to_string()),
    };

    match run_analysis(&state, &query, &body) {
        Ok(report) => {
            let records: Vec<AnnotatedRecord> = report.in_mode(mode).cloned().collect();
            let response = RecordsResponse {
                reference_date: report.reference_date.to_string(),
                mode,
                total_records: report.total_records,
                records,
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "records request rejected");
            bad_request(e)
        }
    }
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/analyze", post(analyze_upload))
        .route("/records", post(filter_records))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🌐 COE Analyzer - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = match std::env::var("COE_ANALYZER_CONFIG") {
        Ok(path) => {
            let config = AnalysisConfig::from_file(std::path::Path::new(&path))
                .with_context(|| format!("Failed to load config {}", path))?;
            println!("✓ Config loaded: {}", path);
            config
        }
        Err(_) => AnalysisConfig::default(),
    };
    config.validate()?;

    let state = AppState {
        config: Arc::new(config),
    };
    let app = build_router(state);

    let addr = std::env::var("COE_ANALYZER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   POST a CSV export to /api/analyze or /api/records?mode=active");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
