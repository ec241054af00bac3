use crate::detect::types::Detection;
use crate::utils::error::DetectError;
use crate::Result;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const BOX_THICKNESS: i32 = 2;

/// 一次请求的共享可变状态：标注图像缓冲与按绘制顺序累积的标签列表。
/// 显式作为值在两次标注调用之间传递，使顺序依赖可见。
pub struct AnnotationContext {
    pub image: RgbImage,
    pub labels: Vec<String>,
}

impl AnnotationContext {
    /// 以上传图像的副本初始化
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            labels: Vec::new(),
        }
    }
}

/// 在共享图像缓冲上绘制检测框与标签文本
pub struct Annotator {
    font: FontRef<'static>,
}

impl Annotator {
    pub fn new() -> Result<Self> {
        let font_data: &'static [u8] = include_bytes!("../../assets/font.ttf");
        let font = FontRef::try_from_slice(font_data)
            .map_err(|_| DetectError::Config("Embedded font is invalid".to_string()))?;
        Ok(Self { font })
    }

    /// 对一个模型的全部检测做一趟确定性处理：
    /// 逐检测解析标签、画框、在框左上角上方画标签文本、追加标签到列表。
    /// 画框与追加标签成对原子发生，越界的类别索引使整个请求失败。
    pub fn annotate(
        &self,
        ctx: &mut AnnotationContext,
        detections: &[Detection],
        names: &[String],
        color: Rgb<u8>,
    ) -> Result<()> {
        for detection in detections {
            let label = names
                .get(detection.class_id)
                .ok_or(DetectError::LabelLookup {
                    class_id: detection.class_id,
                    known: names.len(),
                })?;

            self.draw_box(&mut ctx.image, &detection.bbox, color);
            self.draw_label(&mut ctx.image, &detection.bbox, label, color);
            ctx.labels.push(label.clone());
        }

        Ok(())
    }

    fn draw_box(&self, image: &mut RgbImage, bbox: &[f32; 4], color: Rgb<u8>) {
        let (w, h) = (image.width() as i32, image.height() as i32);
        if w < 2 || h < 2 {
            return;
        }

        // 贴边的浮点框取整截断后可能塌缩为零宽/零高；
        // 压到至少1像素，每个检测总有可见的框与其标签成对出现
        let x1 = (bbox[0] as i32).clamp(0, w - 2);
        let y1 = (bbox[1] as i32).clamp(0, h - 2);
        let x2 = (bbox[2] as i32).clamp(x1 + 1, w - 1);
        let y2 = (bbox[3] as i32).clamp(y1 + 1, h - 1);

        // 向内收缩绘制多圈实现2像素边框
        for inset in 0..BOX_THICKNESS {
            let bw = x2 - x1 - 2 * inset;
            let bh = y2 - y1 - 2 * inset;
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x1 + inset, y1 + inset).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    fn draw_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str, color: Rgb<u8>) {
        let x = (bbox[0] as i32).clamp(0, image.width() as i32 - 1);
        // 紧贴框的左上角上方，顶边处截断到可见区域
        let y = ((bbox[1] as i32) - LABEL_TEXT_HEIGHT).max(0);

        draw_text_mut(
            image,
            color,
            x,
            y,
            PxScale::from(LABEL_FONT_SIZE),
            &self.font,
            label,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["red_light".to_string(), "stop".to_string()]
    }

    fn detection(class_id: usize) -> Detection {
        Detection {
            bbox: [20.0, 30.0, 80.0, 90.0],
            class_id,
            score: 0.5,
        }
    }

    #[test]
    fn zero_detections_leave_image_pixel_identical_and_labels_empty() {
        let annotator = Annotator::new().unwrap();
        let image = RgbImage::from_pixel(120, 120, Rgb([7, 8, 9]));
        let original = image.clone();

        let mut ctx = AnnotationContext::new(image);
        annotator
            .annotate(&mut ctx, &[], &names(), Rgb([0, 255, 0]))
            .unwrap();

        assert_eq!(ctx.image.as_raw(), original.as_raw());
        assert!(ctx.labels.is_empty());
    }

    #[test]
    fn labels_accumulate_in_draw_order_across_both_passes() {
        let annotator = Annotator::new().unwrap();
        let mut ctx = AnnotationContext::new(RgbImage::new(120, 120));

        let first = vec![detection(0), detection(1)];
        let second = vec![detection(1)];
        annotator
            .annotate(&mut ctx, &first, &names(), Rgb([0, 255, 0]))
            .unwrap();
        annotator
            .annotate(&mut ctx, &second, &names(), Rgb([255, 140, 0]))
            .unwrap();

        // N1 + N2 个标签，模型1在前，未去重，大小写原样
        assert_eq!(ctx.labels, vec!["red_light", "stop", "stop"]);
    }

    #[test]
    fn annotation_is_deterministic() {
        let annotator = Annotator::new().unwrap();
        let detections = vec![detection(0), detection(1)];

        let mut first = AnnotationContext::new(RgbImage::new(120, 120));
        let mut second = AnnotationContext::new(RgbImage::new(120, 120));
        annotator
            .annotate(&mut first, &detections, &names(), Rgb([0, 255, 0]))
            .unwrap();
        annotator
            .annotate(&mut second, &detections, &names(), Rgb([0, 255, 0]))
            .unwrap();

        assert_eq!(first.image.as_raw(), second.image.as_raw());
        assert_eq!(first.labels, second.labels);
    }

    #[test]
    fn boxes_are_drawn_in_the_given_color() {
        let annotator = Annotator::new().unwrap();
        let mut ctx = AnnotationContext::new(RgbImage::new(120, 120));

        annotator
            .annotate(&mut ctx, &[detection(0)], &names(), Rgb([0, 255, 0]))
            .unwrap();

        // 框的顶边落在 (20..=80, 30)
        assert_eq!(*ctx.image.get_pixel(50, 30), Rgb([0, 255, 0]));
        assert_eq!(*ctx.image.get_pixel(50, 31), Rgb([0, 255, 0]));
    }

    #[test]
    fn out_of_range_class_index_fails_the_pass() {
        let annotator = Annotator::new().unwrap();
        let mut ctx = AnnotationContext::new(RgbImage::new(120, 120));

        let result = annotator.annotate(&mut ctx, &[detection(7)], &names(), Rgb([0, 255, 0]));

        assert!(matches!(
            result,
            Err(DetectError::LabelLookup { class_id: 7, known: 2 })
        ));
        assert!(ctx.labels.is_empty());
    }

    #[test]
    fn edge_hugging_box_is_widened_to_one_pixel_and_still_drawn() {
        let annotator = Annotator::new().unwrap();
        let mut ctx = AnnotationContext::new(RgbImage::new(120, 120));
        // 取整后 x1 == x2 == 119 的右边贴边框
        let sliver = Detection {
            bbox: [119.4, 60.0, 120.0, 70.0],
            class_id: 1,
            score: 0.9,
        };

        annotator
            .annotate(&mut ctx, &[sliver], &names(), Rgb([0, 255, 0]))
            .unwrap();

        // 框与标签成对出现：追加了标签就必须画了框
        assert_eq!(ctx.labels, vec!["stop"]);
        assert_eq!(*ctx.image.get_pixel(118, 65), Rgb([0, 255, 0]));
    }

    #[test]
    fn label_at_top_edge_is_clamped_into_the_image() {
        let annotator = Annotator::new().unwrap();
        let mut ctx = AnnotationContext::new(RgbImage::new(120, 120));
        let near_top = Detection {
            bbox: [10.0, 2.0, 60.0, 50.0],
            class_id: 0,
            score: 0.9,
        };

        // 不因文本基线为负而panic
        annotator
            .annotate(&mut ctx, &[near_top], &names(), Rgb([0, 255, 0]))
            .unwrap();
        assert_eq!(ctx.labels, vec!["red_light"]);
    }
}
