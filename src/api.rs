use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    chain::{self, ChainAudit},
    client::{bundle_file_name, REQUEST_ID_HEADER},
    config::Config,
    error::{ChainError, StoreError},
    evidence::{
        DeepfakeAnalysis, EvidenceItem, EvidenceReport, EvidenceSource, EvidenceType, ReportSummary,
        Severity, SourceInput,
    },
    package::{self, Provenance},
    redaction::RedactionPolicy,
    store::ReportStore,
};

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// sled 自身线程安全，仓库只需要 Arc 共享。
pub struct AppState {
    pub store: Arc<ReportStore>,
    pub config: Config,
    pub redaction: RedactionPolicy,
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

// 请求：生成报告
#[derive(Deserialize)]
pub struct GenerateRequest {
    /// 缺省时由服务端生成
    #[serde(default)]
    pub report_id: Option<String>,
    pub executive_summary: String,
    #[serde(default)]
    pub pattern_analysis: Option<String>,
    #[serde(default)]
    pub potential_legal_violations: Vec<String>,
    #[serde(default)]
    pub recommended_next_steps: Vec<String>,
    pub items: Vec<ItemRequest>,
}

#[derive(Deserialize)]
pub struct ItemRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EvidenceType,
    pub severity: u8,
    pub claim_text: String,
    #[serde(default)]
    pub sources: Vec<SourceRequest>,
}

#[derive(Deserialize)]
pub struct SourceRequest {
    #[serde(flatten)]
    pub source: SourceInput,
    #[serde(default)]
    pub deepfake_analysis: Option<DeepfakeAnalysis>,
}

// 响应：生成回执
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateReceipt {
    pub report_id: String,
    pub report_hash: String,
    pub chain_valid: bool,
    pub item_count: usize,
    pub excluded_items: usize,
    pub excluded_item_ids: Vec<String>,
}

type ApiError = (StatusCode, String);

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/evidence-report", post(generate_report))
        .route("/evidence-report/{report_id}", get(get_report))
        .route("/evidence-report/{report_id}/audit", get(audit_report))
        .route("/evidence-report/{report_id}/export", get(export_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()) // ⚠️ 开发模式：允许所有跨域
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

/// 接口：生成并冻结报告
async fn generate_report(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateReceipt>), ApiError> {
    let report_id = req
        .report_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(%report_id, items = req.items.len(), "📥 收到报告生成请求");

    let mut items = Vec::with_capacity(req.items.len());
    for item in req.items {
        let severity = Severity::new(item.severity).map_err(unprocessable)?;
        let mut sources = Vec::with_capacity(item.sources.len());
        for source in item.sources {
            let mut built = EvidenceSource::new(source.source, state.redaction).map_err(unprocessable)?;
            if let Some(analysis) = source.deepfake_analysis {
                analysis.validate().map_err(unprocessable)?;
                built = built.with_deepfake_analysis(analysis);
            }
            sources.push(built);
        }
        items.push(EvidenceItem::new(item.id, item.kind, severity, item.claim_text, sources));
    }

    let summary = ReportSummary {
        report_id,
        generated_at: chrono::Utc::now(),
        executive_summary: req.executive_summary,
        pattern_analysis: req.pattern_analysis,
        potential_legal_violations: req.potential_legal_violations,
        recommended_next_steps: req.recommended_next_steps,
    };
    let build = chain::build_report(items, summary).map_err(unprocessable)?;

    // 报告只写一次；sled flush 会阻塞，移出异步线程
    let store = Arc::clone(&state.store);
    let build = tokio::task::spawn_blocking(move || store.insert(&build.report).map(|()| build))
        .await
        .map_err(|e| internal(format!("Task join error: {}", e)))?
        .map_err(|e| match e {
            StoreError::AlreadyExists(_) => (StatusCode::CONFLICT, e.to_string()),
            other => internal(other),
        })?;

    let report = &build.report;
    Ok((
        StatusCode::CREATED,
        Json(GenerateReceipt {
            report_id: report.report_id().to_string(),
            report_hash: report.report_hash().to_string(),
            chain_valid: report.chain_valid(),
            item_count: report.items().len(),
            excluded_items: build.excluded_count(),
            excluded_item_ids: build.incomplete.iter().map(|e| e.item_id.clone()).collect(),
        }),
    ))
}

/// 接口：读取报告
async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> Result<Json<EvidenceReport>, ApiError> {
    load(&state, &report_id).map(Json)
}

/// 接口：生产端证据链复核
async fn audit_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> Result<Json<ChainAudit>, ApiError> {
    let report = load(&state, &report_id)?;
    let audit = chain::audit_chain(&report).map_err(internal)?;
    Ok(Json(audit))
}

/// 接口：导出证据包 (ZIP)
async fn export_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let report = load(&state, &report_id)?;
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(%report_id, %request_id, "📦 收到导出请求");

    let provenance = Provenance::new(
        state.config.exported_by.clone(),
        request_id,
        state.config.environment.clone(),
    );

    // 序列化 + 压缩是 CPU 密集型操作，移出异步线程
    let bytes = tokio::task::spawn_blocking(move || package::export_package(&report, &provenance))
        .await
        .map_err(|e| internal(format!("Task join error: {}", e)))?
        .map_err(internal)?;

    let disposition = format!("attachment; filename=\"{}\"", bundle_file_name(&report_id));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn load(state: &AppState, report_id: &str) -> Result<EvidenceReport, ApiError> {
    state
        .store
        .get(report_id)
        .map_err(internal)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("report `{report_id}` not found")))
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "❌ 请求处理失败");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn unprocessable(e: ChainError) -> ApiError {
    (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
}
