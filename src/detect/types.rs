use image::{Rgb, RgbImage};
use serde::Serialize;

/// 单个检测结果：原图像素坐标的包围框、类别索引与分数
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// [x1, y1, x2, y2]，原图像素坐标
    pub bbox: [f32; 4],
    /// 类别索引，通过所属模型的名称表解析为标签
    pub class_id: usize,
    /// 置信度分数 (0.0 - 1.0)
    pub score: f32,
}

/// 固定顺序的两个模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// 红绿灯、限速与停车标志
    SpeedSignal,
    /// 其余交通标志
    General,
}

impl ModelKind {
    /// 标注颜色：红绿灯/限速模型绿色，通用模型橙色
    pub fn color(&self) -> Rgb<u8> {
        match self {
            ModelKind::SpeedSignal => Rgb([0, 255, 0]),
            ModelKind::General => Rgb([255, 140, 0]),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::SpeedSignal => "speed_signal",
            ModelKind::General => "general",
        }
    }
}

/// 一次请求的完整处理结果
#[derive(Debug)]
pub struct DetectOutcome {
    /// 标注后的图像缓冲
    pub image: RgbImage,
    /// 按绘制顺序累积的标签列表（模型1在前，模型2在后）
    pub labels: Vec<String>,
    /// 每个模型的检测摘要
    pub summaries: Vec<ModelSummary>,
    /// 处理耗时（秒）
    pub processing_time: f32,
}

/// 单个模型的检测摘要（用于JSON接口）
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model: ModelKind,
    pub detections: Vec<DetectionJson>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionJson {
    pub label: String,
    pub score: f32,
    pub bbox: [f32; 4],
}

/// JSON接口的响应体（不含图像本身，图像通过输出目录访问）
#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
    pub labels: Vec<String>,
    pub models: Vec<ModelSummary>,
    pub result_image: String,
    pub processing_time: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_colors_are_distinct() {
        assert_ne!(ModelKind::SpeedSignal.color(), ModelKind::General.color());
        assert_eq!(ModelKind::SpeedSignal.color(), Rgb([0, 255, 0]));
        assert_eq!(ModelKind::General.color(), Rgb([255, 140, 0]));
    }
}
