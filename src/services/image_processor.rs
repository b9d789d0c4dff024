// src/services/image_processor.rs
use crate::errors::BatchError;
use base64::{Engine as _, engine::general_purpose};
use image::ImageFormat;

pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Builds the `data:` URL the provider payloads are stored as.
    pub fn to_data_url(&self, mime_type: &str, base64_data: &str) -> String {
        format!("data:{};base64,{}", mime_type, base64_data)
    }

    /// The base64 portion of a data URL: everything after the first comma.
    pub fn data_portion<'a>(&self, image: &'a str) -> Option<&'a str> {
        image
            .split_once(',')
            .map(|(_, data)| data)
            .filter(|data| !data.is_empty())
    }

    /// MIME type declared by a `data:<mime>;base64,` prefix.
    pub fn declared_mime<'a>(&self, image: &'a str) -> Option<&'a str> {
        let (header, _) = image.split_once(',')?;
        let mime = header.strip_prefix("data:")?.split(';').next()?;
        (!mime.is_empty()).then_some(mime)
    }

    pub fn decode(&self, base64_data: &str) -> Result<Vec<u8>, BatchError> {
        general_purpose::STANDARD
            .decode(base64_data.trim())
            .map_err(|e| BatchError::ImageProcessing(format!("Failed to decode image: {}", e)))
    }

    /// Decodes either a data URL or a bare base64 payload.
    pub fn decode_payload(&self, image: &str) -> Result<Vec<u8>, BatchError> {
        let data = if image.starts_with("data:") {
            self.data_portion(image).ok_or_else(|| {
                BatchError::ImageProcessing("Data URL carries no payload".to_string())
            })?
        } else {
            image
        };
        self.decode(data)
    }

    /// Content type for a decoded image, sniffed from its magic bytes.
    pub fn content_type(&self, data: &[u8], declared: Option<&str>) -> String {
        let sniffed = match image::guess_format(data) {
            Ok(ImageFormat::Jpeg) => Some("image/jpeg"),
            Ok(ImageFormat::Png) => Some("image/png"),
            Ok(ImageFormat::WebP) => Some("image/webp"),
            Ok(ImageFormat::Gif) => Some("image/gif"),
            _ => None,
        };

        sniffed
            .or(declared)
            .unwrap_or("application/octet-stream")
            .to_string()
    }
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}
