use super::{OutputFormat, TransformError, TransformSpec};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder};

/// Cover-resize `raw` to `spec.width x spec.height` and encode it as `spec.format`.
///
/// The image is scaled until it fully covers `width x height`, then the
/// overflow is cropped evenly from both sides. Never letterboxes.
pub fn cover_and_encode(raw: &[u8], spec: &TransformSpec) -> Result<Vec<u8>, TransformError> {
    let img = image::load_from_memory(raw).map_err(|e| TransformError::Decode(e.to_string()))?;
    let covered = img.resize_to_fill(spec.width, spec.height, FilterType::Lanczos3);
    encode(&covered, spec)
}

fn encode(img: &DynamicImage, spec: &TransformSpec) -> Result<Vec<u8>, TransformError> {
    let mut out = Vec::new();
    let encode_err = |e: image::ImageError| TransformError::Encode {
        format: spec.format,
        message: e.to_string(),
    };

    match spec.format {
        OutputFormat::Jpeg => {
            // JPEG no soporta canal alfa
            let rgb = img.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, jpeg_quality(spec.quality))
                .write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        OutputFormat::Png => {
            let rgba = img.to_rgba8();
            PngEncoder::new_with_quality(&mut out, png_compression(spec.quality), PngFilter::Adaptive)
                .write_image(rgba.as_raw(), rgba.width(), rgba.height(), image::ExtendedColorType::Rgba8)
                .map_err(encode_err)?;
        }
        OutputFormat::Mp4 => {
            return Err(TransformError::Encode {
                format: spec.format,
                message: "not an image format".to_string(),
            })
        }
    }

    Ok(out)
}

fn jpeg_quality(quality: f32) -> u8 {
    quality.round().clamp(1.0, 100.0) as u8
}

/// PNG es sin pérdida: la calidad sólo decide cuánto esfuerzo de compresión usar.
fn png_compression(quality: f32) -> CompressionType {
    if quality >= 90.0 {
        CompressionType::Best
    } else if quality >= 50.0 {
        CompressionType::Default
    } else {
        CompressionType::Fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::test_support::{jpeg_spec, sample_image};
    use image::{GenericImageView, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    #[test]
    fn test_cover_fills_box_without_letterbox() {
        let raw = sample_image(800, 200, ImageFormat::Png);
        let out = cover_and_encode(&raw, &jpeg_spec(100, 100)).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (100, 100));
    }

    #[test]
    fn test_cover_crops_symmetrically() {
        // Franja izquierda negra, centro blanco, franja derecha negra.
        let img = ImageBuffer::from_fn(300, 100, |x, _| {
            if x < 100 || x >= 200 {
                Rgb([0u8, 0, 0])
            } else {
                Rgb([255u8, 255, 255])
            }
        });
        let mut raw = Vec::new();
        img.write_to(&mut Cursor::new(&mut raw), ImageFormat::Png).unwrap();

        let spec = TransformSpec {
            format: OutputFormat::Png,
            extension: "png".to_string(),
            quality: 100.0,
            ..jpeg_spec(100, 100)
        };
        let out = cover_and_encode(&raw, &spec).unwrap();
        let decoded = image::load_from_memory(&out).unwrap().to_rgb8();

        assert_eq!(decoded.dimensions(), (100, 100));
        for x in [5, 50, 94] {
            let Rgb([r, g, b]) = *decoded.get_pixel(x, 50);
            assert!(r > 240 && g > 240 && b > 240, "pixel {x} should come from the white centre");
        }
    }

    #[test]
    fn test_png_output_keeps_format() {
        let raw = sample_image(32, 32, ImageFormat::Jpeg);
        let spec = TransformSpec {
            format: OutputFormat::Png,
            extension: "png".to_string(),
            quality: 100.0,
            ..jpeg_spec(16, 16)
        };
        let out = cover_and_encode(&raw, &spec).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_quality_mapping() {
        assert_eq!(jpeg_quality(75.0), 75);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(140.0), 100);
        assert!(matches!(png_compression(100.0), CompressionType::Best));
    }
}
