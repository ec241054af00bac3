use crate::detect::types::Detection;
use crate::utils::error::DetectError;
use crate::{Config, Result};
use image::{imageops, Rgb, RgbImage};
use ndarray::{s, Array2, Array4, ArrayViewD};
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;

/// 模型输入尺寸（YOLO导出默认640x640）
const INPUT_SIZE: u32 = 640;
/// letterbox填充色
const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// 单个已加载的ONNX检测器，进程启动时加载一次，跨请求只读复用
pub struct Detector {
    session: Mutex<Session>,
    input_name: String,
    output_name: String, // 动态发现的输出名称
    names: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl Detector {
    pub fn new(config: &Config, model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(DetectError::ModelLoad(format!(
                "Detection model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading detection model from: {}", model_path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.onnx_config.intra_threads)?
            .commit_from_file(model_path)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| DetectError::ModelLoad("Detection model has no inputs".to_string()))?;

        // 动态发现输出名称
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| DetectError::ModelLoad("Detection model has no outputs".to_string()))?;
        tracing::info!("Detection model output: '{}'", output_name);

        // 类别索引到名称的映射来自模型内嵌的names元数据
        let names_raw = session
            .metadata()?
            .custom("names")?
            .ok_or_else(|| {
                DetectError::ModelLoad(format!(
                    "Model {} has no 'names' metadata",
                    model_path.display()
                ))
            })?;
        let names = parse_names_dict(&names_raw)?;
        tracing::info!("Model {} classes: {}", model_path.display(), names.len());

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            names,
            confidence_threshold: config.onnx_config.confidence_threshold,
            iou_threshold: config.onnx_config.iou_threshold,
        })
    }

    /// 类别索引到名称的映射
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_classes(&self) -> usize {
        self.names.len()
    }

    /// 单图检测推理：一次调用，无重试，无部分结果
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.preprocess(image);

        // 推理 - 立即提取数据避免生命周期冲突
        let input_tensor = Tensor::from_array(input)?;
        let prediction = {
            let mut session = self.session.lock();
            let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

            match outputs.get(&self.output_name) {
                Some(output) => output.try_extract_array::<f32>()?.into_owned(),
                None => {
                    let available: Vec<String> =
                        outputs.keys().map(|name| name.to_string()).collect();
                    return Err(DetectError::Inference(format!(
                        "Output '{}' not found. Available outputs: {:?}",
                        self.output_name, available
                    )));
                }
            }
        };

        let detections = decode_output(
            &prediction.view(),
            self.names.len(),
            &letterbox,
            self.confidence_threshold,
            self.iou_threshold,
        )?;

        tracing::debug!("Detected {} objects", detections.len());
        Ok(detections)
    }

    /// 预处理：letterbox缩放到模型输入尺寸，归一化为NCHW f32
    fn preprocess(&self, image: &RgbImage) -> (Array4<f32>, Letterbox) {
        let letterbox = Letterbox::fit(image.width(), image.height());

        let resized = imageops::resize(
            image,
            letterbox.new_w,
            letterbox.new_h,
            imageops::FilterType::Triangle,
        );

        let mut canvas = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, PAD_COLOR);
        imageops::replace(
            &mut canvas,
            &resized,
            letterbox.pad_x as i64,
            letterbox.pad_y as i64,
        );

        let size = INPUT_SIZE as usize;
        let mut input = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        (input, letterbox)
    }
}

/// letterbox缩放参数，用于把模型坐标映射回原图像素坐标
#[derive(Debug, Clone, Copy)]
pub(crate) struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    new_w: u32,
    new_h: u32,
    orig_w: u32,
    orig_h: u32,
}

impl Letterbox {
    fn fit(orig_w: u32, orig_h: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / orig_w as f32).min(INPUT_SIZE as f32 / orig_h as f32);
        let new_w = ((orig_w as f32 * scale) as u32).max(1);
        let new_h = ((orig_h as f32 * scale) as u32).max(1);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) / 2,
            pad_y: (INPUT_SIZE - new_h) / 2,
            new_w,
            new_h,
            orig_w,
            orig_h,
        }
    }

    /// 模型空间坐标 -> 原图像素坐标，越界截断
    fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let ox = ((x - self.pad_x as f32) / self.scale).clamp(0.0, self.orig_w as f32);
        let oy = ((y - self.pad_y as f32) / self.scale).clamp(0.0, self.orig_h as f32);
        (ox, oy)
    }

    #[cfg(test)]
    fn identity() -> Self {
        Self::fit(INPUT_SIZE, INPUT_SIZE)
    }
}

/// 解码YOLO输出张量 [1, 4+nc, N]（转置布局亦可），阈值为含下界比较
pub(crate) fn decode_output(
    prediction: &ArrayViewD<f32>,
    num_classes: usize,
    letterbox: &Letterbox,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<Detection>> {
    let shape = prediction.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(DetectError::Inference(format!(
            "Unsupported detection output shape: {:?}. Expected [1, {}, N]",
            shape,
            num_classes + 4
        )));
    }

    let attrs = num_classes + 4;
    let pred: Array2<f32> = if shape[1] == attrs {
        prediction.slice(s![0, .., ..]).to_owned()
    } else if shape[2] == attrs {
        prediction.slice(s![0, .., ..]).t().to_owned()
    } else {
        return Err(DetectError::Inference(format!(
            "Detection output shape {:?} does not match {} classes",
            shape, num_classes
        )));
    };

    let num_boxes = pred.shape()[1];
    let mut detections = Vec::new();

    for i in 0..num_boxes {
        let mut best_score = 0.0f32;
        let mut best_class = 0usize;
        for class_id in 0..num_classes {
            let score = pred[[4 + class_id, i]];
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }

        // 含下界：恰好等于阈值的检测保留
        if best_score < confidence_threshold {
            continue;
        }

        let cx = pred[[0, i]];
        let cy = pred[[1, i]];
        let w = pred[[2, i]];
        let h = pred[[3, i]];
        if w <= 0.0 || h <= 0.0 {
            continue;
        }

        let (x1, y1) = letterbox.to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_original(cx + w / 2.0, cy + h / 2.0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(Detection {
            bbox: [x1, y1, x2, y2],
            class_id: best_class,
            score: best_score,
        });
    }

    // 分数降序的稳定排序保证确定性
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(non_max_suppression(detections, iou_threshold))
}

/// 逐类别NMS，输入须按分数降序
fn non_max_suppression(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());

    for detection in detections {
        let overlapping = kept.iter().any(|existing| {
            existing.class_id == detection.class_id
                && iou(&existing.bbox, &detection.bbox) > iou_threshold
        });
        if !overlapping {
            kept.push(detection);
        }
    }

    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);

    if ix2 <= ix1 || iy2 <= iy1 {
        return 0.0;
    }

    let intersection = (ix2 - ix1) * (iy2 - iy1);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// 解析模型元数据中的names表，形如 {0: 'red_light', 1: 'stop'}
pub(crate) fn parse_names_dict(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim().trim_start_matches('{').trim_end_matches('}');
    let mut entries = BTreeMap::new();

    for part in split_outside_quotes(trimmed) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (index, name) = part.split_once(':').ok_or_else(|| {
            DetectError::ModelLoad(format!("Malformed names entry: '{}'", part))
        })?;
        let index: usize = index.trim().parse().map_err(|_| {
            DetectError::ModelLoad(format!("Malformed names index: '{}'", index.trim()))
        })?;
        let name = name
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .to_string();
        entries.insert(index, name);
    }

    if entries.is_empty() {
        return Err(DetectError::ModelLoad("Empty names metadata".to_string()));
    }

    // 索引必须从0开始连续，否则后续的类别查找没有意义
    let expected_len = entries
        .keys()
        .next_back()
        .map(|max| max + 1)
        .unwrap_or(0);
    if entries.len() != expected_len {
        return Err(DetectError::ModelLoad(format!(
            "Non-contiguous class indices in names metadata: {} entries, max index {}",
            entries.len(),
            expected_len - 1
        )));
    }

    Ok(entries.into_values().collect())
}

/// 只在引号外的逗号处切分条目；类别名自身可以含逗号
fn split_outside_quotes(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;

    for (i, c) in raw.char_indices() {
        match (quote, c) {
            (None, '\'') | (None, '"') => quote = Some(c),
            (Some(open), _) if c == open => quote = None,
            (None, ',') => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// 构造 [1, 4+nc, N] 输出张量；每个box为 (cx, cy, w, h, 各类分数)
    fn prediction(num_classes: usize, boxes: &[Vec<f32>]) -> ndarray::ArrayD<f32> {
        let attrs = num_classes + 4;
        let mut out = Array3::<f32>::zeros((1, attrs, boxes.len()));
        for (i, values) in boxes.iter().enumerate() {
            assert_eq!(values.len(), attrs);
            for (a, v) in values.iter().enumerate() {
                out[[0, a, i]] = *v;
            }
        }
        out.into_dyn()
    }

    #[test]
    fn score_exactly_at_threshold_is_kept() {
        let pred = prediction(
            2,
            &[
                vec![100.0, 100.0, 40.0, 40.0, 0.20, 0.0], // 恰好等于阈值
                vec![300.0, 300.0, 40.0, 40.0, 0.19, 0.0], // 低于阈值
            ],
        );
        let detections =
            decode_output(&pred.view(), 2, &Letterbox::identity(), 0.20, 0.45).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].score, 0.20);
    }

    #[test]
    fn boxes_are_converted_from_center_to_corner_coordinates() {
        let pred = prediction(1, &[vec![100.0, 80.0, 40.0, 20.0, 0.9]]);
        let detections =
            decode_output(&pred.view(), 1, &Letterbox::identity(), 0.20, 0.45).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, [80.0, 70.0, 120.0, 90.0]);
    }

    #[test]
    fn nms_suppresses_overlapping_boxes_of_same_class() {
        let pred = prediction(
            1,
            &[
                vec![100.0, 100.0, 40.0, 40.0, 0.9],
                vec![102.0, 102.0, 40.0, 40.0, 0.8], // 与上一个高度重叠
                vec![400.0, 400.0, 40.0, 40.0, 0.7], // 独立
            ],
        );
        let detections =
            decode_output(&pred.view(), 1, &Letterbox::identity(), 0.20, 0.45).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].score, 0.9);
        assert_eq!(detections[1].score, 0.7);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let pred = prediction(
            2,
            &[
                vec![100.0, 100.0, 40.0, 40.0, 0.9, 0.0],
                vec![100.0, 100.0, 40.0, 40.0, 0.0, 0.8],
            ],
        );
        let detections =
            decode_output(&pred.view(), 2, &Letterbox::identity(), 0.20, 0.45).unwrap();

        assert_eq!(detections.len(), 2);
    }

    #[test]
    fn transposed_output_layout_is_accepted() {
        let attrs = 5;
        let mut out = Array3::<f32>::zeros((1, 2, attrs));
        // 两个box，[1, N, 4+nc] 布局
        out[[0, 0, 0]] = 100.0;
        out[[0, 0, 1]] = 100.0;
        out[[0, 0, 2]] = 40.0;
        out[[0, 0, 3]] = 40.0;
        out[[0, 0, 4]] = 0.9;
        out[[0, 1, 0]] = 400.0;
        out[[0, 1, 1]] = 400.0;
        out[[0, 1, 2]] = 40.0;
        out[[0, 1, 3]] = 40.0;
        out[[0, 1, 4]] = 0.5;
        let pred = out.into_dyn();

        let detections =
            decode_output(&pred.view(), 1, &Letterbox::identity(), 0.20, 0.45).unwrap();
        assert_eq!(detections.len(), 2);
    }

    #[test]
    fn letterbox_maps_padded_coordinates_back_to_source_pixels() {
        // 1280x640原图：缩放0.5，上下各填充160
        let lb = Letterbox::fit(1280, 640);
        let (x, y) = lb.to_original(320.0, 320.0);
        assert_eq!((x, y), (640.0, 320.0));

        // 填充区内的坐标截断到图像边界
        let (x, y) = lb.to_original(0.0, 0.0);
        assert_eq!((x, y), (0.0, 0.0));
    }

    #[test]
    fn parse_names_dict_reads_ultralytics_format() {
        let names = parse_names_dict("{0: 'red_light', 1: 'green_light', 2: \"stop\"}").unwrap();
        assert_eq!(names, vec!["red_light", "green_light", "stop"]);
    }

    #[test]
    fn parse_names_dict_keeps_commas_inside_quoted_names() {
        let names = parse_names_dict("{0: 'no entry, vehicles', 1: \"give way, all\", 2: 'stop'}")
            .unwrap();
        assert_eq!(names, vec!["no entry, vehicles", "give way, all", "stop"]);
    }

    #[test]
    fn parse_names_dict_rejects_gaps() {
        assert!(parse_names_dict("{0: 'a', 2: 'b'}").is_err());
    }

    #[test]
    fn parse_names_dict_rejects_garbage() {
        assert!(parse_names_dict("").is_err());
        assert!(parse_names_dict("{zero 'a'}").is_err());
    }
}
