use crate::utils::error::DetectError;
use crate::Result;
use image::{DynamicImage, GenericImageView};

pub struct ImageLoader;

impl ImageLoader {
    /// 从上传的字节流解码图像
    pub fn from_bytes(bytes: &[u8], max_size: usize) -> Result<DynamicImage> {
        if bytes.len() > max_size {
            return Err(DetectError::FileTooLarge(bytes.len(), max_size));
        }

        let image = image::load_from_memory(bytes).map_err(DetectError::ImageDecode)?;
        Self::validate_dimensions(&image)?;

        Ok(image)
    }

    /// 验证图像尺寸
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width < 16 || height < 16 {
            return Err(DetectError::InvalidInput(format!(
                "Image too small: {}x{}, minimum 16x16",
                width, height
            )));
        }

        if width > 8192 || height > 8192 {
            return Err(DetectError::InvalidInput(format!(
                "Image too large: {}x{}, maximum 8192x8192",
                width, height
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::new(width, height);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_a_valid_png() {
        let bytes = encode_png(64, 48);
        let image = ImageLoader::from_bytes(&bytes, 1024 * 1024).unwrap();
        assert_eq!(image.dimensions(), (64, 48));
    }

    #[test]
    fn rejects_undecodable_bytes() {
        let result = ImageLoader::from_bytes(b"not an image", 1024);
        assert!(matches!(result, Err(DetectError::ImageDecode(_))));
    }

    #[test]
    fn rejects_oversized_payload() {
        let bytes = encode_png(64, 48);
        let result = ImageLoader::from_bytes(&bytes, 16);
        assert!(matches!(result, Err(DetectError::FileTooLarge(_, 16))));
    }

    #[test]
    fn rejects_degenerate_dimensions() {
        let bytes = encode_png(8, 8);
        let result = ImageLoader::from_bytes(&bytes, 1024 * 1024);
        assert!(matches!(result, Err(DetectError::InvalidInput(_))));
    }
}
