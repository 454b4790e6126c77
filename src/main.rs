use evidence_integrity::{api, config::Config, redaction::RedactionPolicy, store::ReportStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        db = %config.db_path,
        environment = %config.environment,
        "⚙️  配置加载完成"
    );

    // ----------------------------------------------------------------
    // 1. 初始化报告仓库
    // ----------------------------------------------------------------
    tracing::info!("🛡️ 证据包完整性服务启动中...");
    let store = ReportStore::open(&config.db_path)?;
    if store.is_empty() {
        tracing::info!(db = %config.db_path, "📭 报告仓库为空，等待第一份报告");
    } else {
        tracing::info!(reports = store.len(), "📚 报告仓库初始化完成");
    }

    // ----------------------------------------------------------------
    // 2. 状态共享容器
    // ----------------------------------------------------------------
    let addr = format!("{}:{}", config.host, config.port);
    let shared_state = Arc::new(api::AppState {
        store: Arc::new(store),
        config,
        redaction: RedactionPolicy::Standard,
    });

    // ----------------------------------------------------------------
    // 3. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let app = api::app(shared_state);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("🚀 API 服务已运行在: http://{}", addr);
    tracing::info!("   - POST /evidence-report              : 生成并冻结报告");
    tracing::info!("   - GET  /evidence-report/{{id}}         : 读取报告");
    tracing::info!("   - GET  /evidence-report/{{id}}/audit   : 生产端证据链复核");
    tracing::info!("   - GET  /evidence-report/{{id}}/export  : 导出证据包 (ZIP)");

    axum::serve(listener, app).await?;

    Ok(())
}
