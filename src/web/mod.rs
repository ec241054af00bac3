pub mod handlers;
pub mod ui;

use crate::detect::DetectPipeline;
use crate::models::ModelRegistry;
use crate::{Config, Result};
use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// 请求处理路径共享的应用状态：配置与已加载的流水线
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<DetectPipeline>,
}

pub async fn serve(config: Config) -> Result<()> {
    // 启动时创建上传与输出目录
    config.ensure_dirs()?;

    // 两个模型各加载一次，显式注入应用状态
    let registry = ModelRegistry::load(&config)?;
    let pipeline = Arc::new(DetectPipeline::new(registry)?);

    let state = AppState {
        config: config.clone(),
        pipeline,
    };
    let app = create_app(state);

    let addr: SocketAddr = config.bind_addr.parse().map_err(|e| {
        crate::utils::error::DetectError::Config(format!(
            "Invalid bind address {}: {}",
            config.bind_addr, e
        ))
    })?;

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /                          - Upload page");
    tracing::info!("  POST /                          - Form upload, annotated result page");
    tracing::info!("  POST /api/detect                - Multipart upload, JSON report");
    tracing::info!("  GET  /static/outputs/:filename  - Annotated images");
    tracing::info!("  GET  /health                    - Health check");
    tracing::info!("  GET  /api/info                  - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        crate::utils::error::DetectError::Internal(format!(
            "Failed to bind to address {}: {}",
            addr, e
        ))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::utils::error::DetectError::Internal(format!("Server failed: {}", e)))?;

    Ok(())
}

fn create_app(state: AppState) -> Router {
    let max_request_size = state.config.server_config.max_request_size;
    let request_timeout = state.config.server_config.request_timeout;

    Router::new()
        // 页面与上传
        .route("/", get(ui::index_handler).post(handlers::upload_handler))
        .route(
            "/static/outputs/:filename",
            get(handlers::output_file_handler),
        )
        // JSON接口
        .route("/api/detect", post(handlers::api_detect_handler))
        // 系统路由
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        // 中间件 - 分层模式避免复杂类型嵌套
        .layer(DefaultBodyLimit::max(max_request_size))
        .layer(RequestBodyLimitLayer::new(max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout)))
        .layer(CorsLayer::permissive()) // 开发环境使用宽松CORS
        .with_state(state)
}

/// 健康检查端点
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 服务信息端点
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "Traffic Sign Detection Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "models": state.pipeline.registry().stats(),
        "features": {
            "dual_models": true,
            "annotated_output": true,
            "json_api": true
        }
    }))
}
