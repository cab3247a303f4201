//! Raster image headers via the `image` crate. Only the header is decoded.

use std::io::ErrorKind;
use std::path::Path;

use image::{ColorType, ImageDecoder, ImageError, ImageReader};
use serde_json::Value;

use super::{Extractor, Sniff};
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp"];
const IMAGE_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/webp",
];

pub struct ImageExtractor;

impl ImageExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for ImageExtractor {
    fn name(&self) -> &str {
        "image"
    }

    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool {
        entry.has_extension(IMAGE_EXTENSIONS) || IMAGE_MIMES.contains(&sniff.mime())
    }

    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
        let path = entry.path.as_path();
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| ExtractionError::unreadable(path, &e))?;
        let format = reader.format();
        let decoder = reader.into_decoder().map_err(|e| image_error(path, e))?;
        let (width, height) = decoder.dimensions();
        let color = decoder.color_type();

        let mut fields = Fields::new();
        if let Some(format) = format {
            fields.insert(
                "format".into(),
                Value::String(format!("{:?}", format).to_uppercase()),
            );
        }
        fields.insert("width".into(), Value::from(width));
        fields.insert("height".into(), Value::from(height));
        fields.insert("mode".into(), Value::String(color_mode(color)));
        fields.insert("bits_per_pixel".into(), Value::from(color.bits_per_pixel()));
        fields.insert("has_alpha".into(), Value::Bool(color.has_alpha()));
        fields.insert(
            "pixel_count".into(),
            Value::from(u64::from(width) * u64::from(height)),
        );
        if height > 0 {
            let ratio = (f64::from(width) / f64::from(height) * 10_000.0).round() / 10_000.0;
            fields.insert("aspect_ratio".into(), Value::from(ratio));
        }
        Ok(fields)
    }
}

/// Mode names in the conventional imaging-library spelling.
fn color_mode(color: ColorType) -> String {
    match color {
        ColorType::L8 => "L".into(),
        ColorType::La8 => "LA".into(),
        ColorType::Rgb8 => "RGB".into(),
        ColorType::Rgba8 => "RGBA".into(),
        ColorType::L16 => "I;16".into(),
        ColorType::La16 => "LA;16".into(),
        ColorType::Rgb16 => "RGB;16".into(),
        ColorType::Rgba16 => "RGBA;16".into(),
        ColorType::Rgb32F => "RGB;F32".into(),
        ColorType::Rgba32F => "RGBA;F32".into(),
        other => format!("{:?}", other),
    }
}

fn image_error(path: &Path, err: ImageError) -> ExtractionError {
    match err {
        ImageError::IoError(io)
            if matches!(io.kind(), ErrorKind::UnexpectedEof | ErrorKind::InvalidData) =>
        {
            ExtractionError::corrupt(path, io.to_string())
        }
        ImageError::IoError(io) => ExtractionError::unreadable(path, &io),
        ImageError::Unsupported(e) => ExtractionError::unsupported(path, e.to_string()),
        ImageError::Limits(e) => ExtractionError::unsupported(path, e.to_string()),
        other => ExtractionError::corrupt(path, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionErrorKind;
    use crate::extract::test_support::entry_for;

    #[test]
    fn png_header_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        image::RgbaImage::new(4, 2).save(&path).unwrap();

        let fields = ImageExtractor::new().extract(&entry_for(&path)).unwrap();
        assert_eq!(fields["format"], "PNG");
        assert_eq!(fields["width"], 4);
        assert_eq!(fields["height"], 2);
        assert_eq!(fields["mode"], "RGBA");
        assert_eq!(fields["has_alpha"], true);
        assert_eq!(fields["pixel_count"], 8);
        assert_eq!(fields["aspect_ratio"], 2.0);
    }

    #[test]
    fn content_beats_misleading_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("real.png");
        image::GrayImage::new(3, 3).save(&png).unwrap();
        let disguised = dir.path().join("photo.jpg");
        std::fs::rename(&png, &disguised).unwrap();

        let fields = ImageExtractor::new()
            .extract(&entry_for(&disguised))
            .unwrap();
        assert_eq!(fields["format"], "PNG");
        assert_eq!(fields["mode"], "L");
    }

    #[test]
    fn truncated_png_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.png");
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&[0xFF; 6]);
        std::fs::write(&path, bytes).unwrap();

        let err = ImageExtractor::new().extract(&entry_for(&path)).unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::Corrupt);
    }
}
