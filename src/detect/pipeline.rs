use crate::detect::types::{DetectOutcome, DetectionJson, ModelSummary};
use crate::image::{AnnotationContext, Annotator};
use crate::models::ModelRegistry;
use crate::Result;
use image::RgbImage;
use std::time::Instant;

/// 双模型检测与标注流水线：
/// 每个模型对未标注的原图各推理一次，两组结果按固定顺序
/// 喂入同一个标注上下文。
pub struct DetectPipeline {
    registry: ModelRegistry,
    annotator: Annotator,
}

impl DetectPipeline {
    pub fn new(registry: ModelRegistry) -> Result<Self> {
        Ok(Self {
            registry,
            annotator: Annotator::new()?,
        })
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// 同步单趟处理：解码后的图像进，标注图像与标签列表出。
    /// 无重试、无部分结果；任一环节失败则整个请求失败。
    pub fn run(&self, image: RgbImage) -> Result<DetectOutcome> {
        let start = Instant::now();

        // 两个模型独立地在同一张原图上推理，先于任何绘制
        let mut model_results = Vec::with_capacity(2);
        for (kind, detector) in self.registry.in_order() {
            let inference_start = Instant::now();
            let detections = detector.detect(&image)?;
            tracing::debug!(
                "{} model: {} detections in {:.3}s",
                kind.as_str(),
                detections.len(),
                inference_start.elapsed().as_secs_f32()
            );
            model_results.push((kind, detector, detections));
        }

        // 两趟标注共享同一个上下文，模型1的检测全部处理完才轮到模型2
        let mut ctx = AnnotationContext::new(image);
        let mut summaries = Vec::with_capacity(model_results.len());
        for (kind, detector, detections) in &model_results {
            let pass_start = ctx.labels.len();
            self.annotator
                .annotate(&mut ctx, detections, detector.names(), kind.color())?;

            // 标注已逐检测追加标签，摘要直接复用这一段
            let detection_reports = detections
                .iter()
                .zip(&ctx.labels[pass_start..])
                .map(|(detection, label)| DetectionJson {
                    label: label.clone(),
                    score: detection.score,
                    bbox: detection.bbox,
                })
                .collect();
            summaries.push(ModelSummary {
                model: *kind,
                detections: detection_reports,
            });
        }

        // 不变量：标签数 == 两个模型的检测数之和
        debug_assert_eq!(
            ctx.labels.len(),
            model_results.iter().map(|(_, _, d)| d.len()).sum::<usize>()
        );

        let processing_time = start.elapsed().as_secs_f32();
        tracing::info!("Detected labels: {:?}", ctx.labels);

        Ok(DetectOutcome {
            image: ctx.image,
            labels: ctx.labels,
            summaries,
            processing_time,
        })
    }
}
