use crate::error::ClassifierError;
use base64::Engine;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::time::SystemTime;

/// WebSocket message kind a frame arrived as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Raw encoded image bytes
    Binary,
    /// Base64 text, optionally prefixed with a data URL header
    Text,
}

/// One opaque frame as sent by a publisher
///
/// The relay never looks inside `payload`; only the recognition pipeline
/// decodes it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the publisher's send order
    pub seq: u64,
    pub kind: FrameKind,
    pub payload: Bytes,
    pub received_at: SystemTime,
}

impl Frame {
    pub fn binary(seq: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            kind: FrameKind::Binary,
            payload: payload.into(),
            received_at: SystemTime::now(),
        }
    }

    pub fn text(seq: u64, payload: impl Into<String>) -> Self {
        Self {
            seq,
            kind: FrameKind::Text,
            payload: Bytes::from(payload.into()),
            received_at: SystemTime::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encoded image bytes, base64-decoding text frames
    pub fn image_bytes(&self) -> Result<Bytes, ClassifierError> {
        match self.kind {
            FrameKind::Binary => Ok(self.payload.clone()),
            FrameKind::Text => {
                let text = std::str::from_utf8(&self.payload).map_err(|e| {
                    ClassifierError::Decode {
                        details: format!("text frame is not UTF-8: {}", e),
                    }
                })?;
                let encoded = match text.find("base64,") {
                    Some(idx) if text.starts_with("data:") => &text[idx + "base64,".len()..],
                    _ => text,
                };
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map(Bytes::from)
                    .map_err(|e| ClassifierError::Decode {
                        details: format!("invalid base64 frame: {}", e),
                    })
            }
        }
    }

    /// Decode the frame into an RGB image
    pub fn decode(&self) -> Result<RgbImage, ClassifierError> {
        let bytes = self.image_bytes()?;
        let image = image::load_from_memory(&bytes).map_err(|e| ClassifierError::Decode {
            details: format!("frame {} is not a decodable image: {}", self.seq, e),
        })?;
        Ok(image.to_rgb8())
    }
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ClassifierError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ClassifierError::Decode {
            details: "cannot encode an empty image".to_string(),
        });
    }

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| ClassifierError::Decode {
            details: format!("JPEG encoding failed: {}", e),
        })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample_jpeg() -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 6, Rgb([200, 40, 40]));
        encode_jpeg(&image, 90).unwrap()
    }

    #[test]
    fn test_binary_frame_decodes() {
        let frame = Frame::binary(1, sample_jpeg());
        let image = frame.decode().unwrap();
        assert_eq!(image.dimensions(), (8, 6));
    }

    #[test]
    fn test_text_frame_decodes_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(sample_jpeg());
        let frame = Frame::text(2, encoded.clone());
        assert_eq!(frame.decode().unwrap().dimensions(), (8, 6));

        let data_url = Frame::text(3, format!("data:image/jpeg;base64,{}", encoded));
        assert_eq!(data_url.decode().unwrap().dimensions(), (8, 6));
    }

    #[test]
    fn test_garbage_frame_is_a_decode_error() {
        let frame = Frame::binary(4, vec![1u8, 2, 3]);
        assert!(matches!(
            frame.decode(),
            Err(ClassifierError::Decode { .. })
        ));

        let frame = Frame::text(5, "not base64 !!");
        assert!(matches!(
            frame.image_bytes(),
            Err(ClassifierError::Decode { .. })
        ));
    }

    #[test]
    fn test_encode_jpeg_markers() {
        let jpeg = sample_jpeg();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_jpeg_rejects_empty_image() {
        assert!(matches!(
            encode_jpeg(&RgbImage::new(0, 0), 90),
            Err(ClassifierError::Decode { .. })
        ));
    }
}
