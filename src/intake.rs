use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

const ACCEPTED: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("No image was uploaded")]
    Empty,
    #[error("Image is larger than {limit} bytes")]
    TooLarge { limit: usize },
    #[error("Only JPEG, PNG or WebP images are accepted")]
    UnsupportedType,
    #[error("The file could not be read as an image")]
    Undecodable(String),
}

// ── Public result type ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Upload {
    pub format: ImageFormat,
    pub image: DynamicImage,
}

impl Upload {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn format_name(&self) -> &'static str {
        match self.format {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
            _ => "other",
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Single-attempt validation of an uploaded photo. The declared content type
/// is only advisory; the bytes decide.
pub fn accept_upload(
    bytes: &[u8],
    declared_type: Option<&str>,
    max_bytes: usize,
) -> Result<Upload, IntakeError> {
    if bytes.is_empty() {
        return Err(IntakeError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(IntakeError::TooLarge { limit: max_bytes });
    }

    if let Some(declared) = declared_type {
        let declared = declared.to_ascii_lowercase();
        if !declared.starts_with("image/") && declared != "application/octet-stream" {
            return Err(IntakeError::UnsupportedType);
        }
    }

    let format = image::guess_format(bytes).map_err(|_| IntakeError::UnsupportedType)?;
    if !ACCEPTED.contains(&format) {
        return Err(IntakeError::UnsupportedType);
    }

    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| IntakeError::Undecodable(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(IntakeError::Undecodable("zero-sized image".to_string()));
    }

    tracing::debug!(
        format = ?format,
        width = image.width(),
        height = image.height(),
        "upload accepted"
    );
    Ok(Upload { format, image })
}

/// Drops the alpha channel by compositing onto white, so transparent areas of
/// a PNG or WebP do not turn black.
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let a = a as u16;
        let blend = |c: u8| ((c as u16 * a + 255 * (255 - a)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 120])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn accepts_png() {
        let bytes = sample_png(40, 30);
        let upload = accept_upload(&bytes, Some("image/png"), 1 << 20).unwrap();
        assert_eq!(upload.format, ImageFormat::Png);
        assert_eq!((upload.width(), upload.height()), (40, 30));
        assert_eq!(upload.format_name(), "png");
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            accept_upload(&[], None, 1 << 20),
            Err(IntakeError::Empty)
        ));
    }

    #[test]
    fn rejects_oversized() {
        let bytes = sample_png(40, 30);
        assert!(matches!(
            accept_upload(&bytes, None, 10),
            Err(IntakeError::TooLarge { limit: 10 })
        ));
    }

    #[test]
    fn rejects_text_file() {
        let bytes = b"name,price\nchair,1200\n";
        assert!(matches!(
            accept_upload(bytes, None, 1 << 20),
            Err(IntakeError::UnsupportedType)
        ));
        assert!(matches!(
            accept_upload(&sample_png(4, 4), Some("text/csv"), 1 << 20),
            Err(IntakeError::UnsupportedType)
        ));
    }

    #[test]
    fn flattens_transparency_to_white() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        img.put_pixel(1, 0, Rgba([10, 20, 30, 255]));
        let flat = flatten_onto_white(&DynamicImage::ImageRgba8(img));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn rejects_truncated_image() {
        let bytes = sample_png(40, 30);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(matches!(
            accept_upload(truncated, Some("image/png"), 1 << 20),
            Err(IntakeError::Undecodable(_))
        ));
    }
}
