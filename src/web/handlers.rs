use crate::detect::types::DetectReport;
use crate::image::ImageLoader;
use crate::utils::error::DetectError;
use crate::web::{ui, AppState};
use crate::{DetectOutcome, Result};
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Json};
use serde::Serialize;

/// 上传表单的固定字段名
const UPLOAD_FIELD: &str = "image";

/// JSON响应格式
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: String,
    pub request_id: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            timestamp: chrono::Utc::now().to_rfc3339(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// 表单上传处理器：保存上传、跑双模型流水线、写出标注图、渲染结果页
pub async fn upload_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Html<String>> {
    let (filename, data) = read_image_field(multipart).await?;
    let (image_url, outcome) = process_upload(&state, &filename, &data).await?;

    Ok(Html(ui::render_page(Some(&ui::PageResult {
        image_url,
        labels: outcome.labels,
    }))))
}

/// JSON接口：同样的流水线，返回检测摘要而非页面
pub async fn api_detect_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<DetectReport>>> {
    let (filename, data) = read_image_field(multipart).await?;
    let (image_url, outcome) = process_upload(&state, &filename, &data).await?;

    Ok(Json(ApiResponse::success(DetectReport {
        labels: outcome.labels,
        models: outcome.summaries,
        result_image: image_url,
        processing_time: outcome.processing_time,
    })))
}

/// 输出目录的静态文件透传
pub async fn output_file_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let filename = sanitize_filename(&filename)
        .ok_or_else(|| DetectError::InvalidInput(format!("Invalid filename: {}", filename)))?;

    let path = state.config.output_dir().join(&filename);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DetectError::NotFound(filename.clone())
        } else {
            DetectError::Io(e)
        }
    })?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&filename))], bytes))
}

/// 解析multipart数据，取出固定字段名下的上传文件。
/// 缺失或为空的上传是请求错误，流水线不会被触发。
async fn read_image_field(mut multipart: Multipart) -> Result<(String, Bytes)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectError::InvalidInput(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            tracing::debug!("Ignoring unknown field: {:?}", field.name());
            continue;
        }

        // 验证内容类型
        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") {
                return Err(DetectError::UnsupportedFormat(content_type.to_string()));
            }
        }

        let filename = field
            .file_name()
            .and_then(sanitize_filename)
            .ok_or_else(|| DetectError::InvalidInput("No file selected".to_string()))?;

        let data = field
            .bytes()
            .await
            .map_err(|e| DetectError::InvalidInput(format!("Failed to read file data: {}", e)))?;
        if data.is_empty() {
            return Err(DetectError::InvalidInput("Empty file".to_string()));
        }

        tracing::debug!("Received file '{}': {} bytes", filename, data.len());
        return Ok((filename, data));
    }

    Err(DetectError::InvalidInput("No file selected".to_string()))
}

/// 公共处理路径：原样保存上传，解码，跑流水线，写出同名标注图。
/// 输出目录中的同名文件被覆盖。
async fn process_upload(
    state: &AppState,
    filename: &str,
    data: &[u8],
) -> Result<(String, DetectOutcome)> {
    let in_path = state.config.upload_dir().join(filename);
    tokio::fs::write(&in_path, data).await?;

    let image = ImageLoader::from_bytes(data, state.config.server_config.max_request_size)?;
    let outcome = state.pipeline.run(image.to_rgb8())?;

    let out_path = state.config.output_dir().join(filename);
    outcome.image.save(&out_path)?;

    tracing::info!(
        "Processed '{}': {} labels in {:.3}s",
        filename,
        outcome.labels.len(),
        outcome.processing_time
    );

    let image_url = format!("/static/outputs/{}", urlencoding::encode(filename));
    Ok((image_url, outcome))
}

/// 上传文件名收敛到最后一个路径分量，挡住目录穿越；
/// 空名、`.`、`..` 一律拒绝。
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "bmp" => "image/bmp",
        Some(ext) if ext == "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
