// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_IMAGE_COUNT: u8 = 1;
pub const MAX_IMAGE_COUNT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Standard,
        AspectRatio::StandardPortrait,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Standard => "4:3",
            AspectRatio::StandardPortrait => "3:4",
        }
    }
}

/// Which REST surface a model is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelApi {
    Imagen,
    GeminiNative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageModel {
    #[default]
    #[serde(rename = "gemini-2.5-flash-image")]
    GeminiFlashImage,
    #[serde(rename = "imagen-4.0-generate-001")]
    Imagen4,
    #[serde(rename = "imagen-4.0-ultra-generate-001")]
    Imagen4Ultra,
    #[serde(rename = "imagen-4.0-fast-generate-001")]
    Imagen4Fast,
}

impl ImageModel {
    pub const ALL: [ImageModel; 4] = [
        ImageModel::GeminiFlashImage,
        ImageModel::Imagen4,
        ImageModel::Imagen4Ultra,
        ImageModel::Imagen4Fast,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            ImageModel::GeminiFlashImage => "gemini-2.5-flash-image",
            ImageModel::Imagen4 => "imagen-4.0-generate-001",
            ImageModel::Imagen4Ultra => "imagen-4.0-ultra-generate-001",
            ImageModel::Imagen4Fast => "imagen-4.0-fast-generate-001",
        }
    }

    pub fn api(&self) -> ModelApi {
        match self {
            ImageModel::GeminiFlashImage => ModelApi::GeminiNative,
            _ => ModelApi::Imagen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StylePreset {
    #[default]
    None,
    Photorealistic,
    Cinematic,
    Anime,
    DigitalArt,
    OilPainting,
    Watercolor,
    #[serde(rename = "3d-render")]
    Render3d,
    PixelArt,
}

impl StylePreset {
    pub const ALL: [StylePreset; 9] = [
        StylePreset::None,
        StylePreset::Photorealistic,
        StylePreset::Cinematic,
        StylePreset::Anime,
        StylePreset::DigitalArt,
        StylePreset::OilPainting,
        StylePreset::Watercolor,
        StylePreset::Render3d,
        StylePreset::PixelArt,
    ];

    /// Text appended to every prompt. Empty means no style.
    pub fn text(&self) -> &'static str {
        match self {
            StylePreset::None => "",
            StylePreset::Photorealistic => "photorealistic, highly detailed, natural lighting",
            StylePreset::Cinematic => "cinematic still, dramatic lighting, shallow depth of field",
            StylePreset::Anime => "anime style, vibrant colors, cel shading",
            StylePreset::DigitalArt => "digital art, concept art, sharp details",
            StylePreset::OilPainting => "oil painting, visible brushstrokes, rich texture",
            StylePreset::Watercolor => "watercolor painting, soft washes, paper texture",
            StylePreset::Render3d => "3D render, octane render, studio lighting",
            StylePreset::PixelArt => "pixel art, 16-bit, retro video game style",
        }
    }
}

/// Clamps a user supplied image count into [1, 4].
///
/// Numbers are truncated. Strings are read like `parseInt`: optional sign,
/// then the leading digits, so `"3abc"` counts as 3. Anything without a
/// number, or zero, falls back to 1.
pub fn clamp_image_count(raw: Option<&serde_json::Value>) -> u8 {
    let parsed = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => leading_integer(s).map(|n| n as f64),
        _ => None,
    };

    match parsed.map(f64::trunc) {
        Some(n) if n.is_finite() && n != 0.0 => {
            n.clamp(MIN_IMAGE_COUNT as f64, MAX_IMAGE_COUNT as f64) as u8
        }
        _ => MIN_IMAGE_COUNT,
    }
}

fn leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }

    // digits too long for i64 still mean "a lot"
    let magnitude = rest[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(sign * magnitude)
}

/// Snapshot of the generation settings, taken once when a batch starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationOptions {
    pub aspect_ratio: AspectRatio,
    pub count: u8,
    /// Style text to append; the empty string means no preset.
    pub style: String,
    pub model: ImageModel,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            count: MIN_IMAGE_COUNT,
            style: String::new(),
            model: ImageModel::default(),
        }
    }
}

impl GenerationOptions {
    pub fn new(aspect_ratio: AspectRatio, count: u8, style: StylePreset, model: ImageModel) -> Self {
        Self {
            aspect_ratio,
            count: count.clamp(MIN_IMAGE_COUNT, MAX_IMAGE_COUNT),
            style: style.text().to_string(),
            model,
        }
    }

    /// The prompt actually sent to the provider. The stored prompt stays untouched.
    pub fn effective_prompt(&self, prompt: &str) -> String {
        if self.style.is_empty() {
            prompt.to_string()
        } else {
            format!("{}, {}", prompt, self.style)
        }
    }
}

/// Body of `POST /api/v1/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub prompts: String,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub count: Option<serde_json::Value>,
    #[serde(default)]
    pub style: StylePreset,
    #[serde(default)]
    pub model: ImageModel,
}

impl GenerateRequest {
    pub fn options(&self) -> GenerationOptions {
        GenerationOptions::new(
            self.aspect_ratio,
            clamp_image_count(self.count.as_ref()),
            self.style,
            self.model,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub prompt: String,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEntry {
    pub fn loading(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            status: ResultStatus::Loading,
            images: None,
            error: None,
        }
    }

    /// Images with empty payloads filtered out.
    pub fn usable_images(&self) -> impl Iterator<Item = (usize, &str)> {
        self.images
            .iter()
            .flatten()
            .enumerate()
            .filter(|(_, image)| !image.is_empty())
            .map(|(index, image)| (index, image.as_str()))
    }

    pub fn has_images(&self) -> bool {
        self.status == ResultStatus::Success && self.usable_images().next().is_some()
    }
}

/// How a single prompt resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Vec<String>),
    Failure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueProgress {
    pub total: usize,
    pub completed: usize,
    pub current_index: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueState {
    pub batch_id: Option<Uuid>,
    pub running: bool,
    pub entries: Vec<ResultEntry>,
    pub total: usize,
    pub completed: usize,
    pub current_index: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueueState {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }

    pub fn progress(&self) -> QueueProgress {
        QueueProgress {
            total: self.total,
            completed: self.completed,
            current_index: self.current_index,
            percentage: self.percentage(),
        }
    }

    pub fn has_successful_images(&self) -> bool {
        self.entries.iter().any(ResultEntry::has_images)
    }

    /// Swaps in a fresh batch of loading entries and resets the counters.
    pub fn begin(&mut self, batch_id: Uuid, prompts: &[String]) {
        self.batch_id = Some(batch_id);
        self.entries = prompts.iter().map(ResultEntry::loading).collect();
        self.total = prompts.len();
        self.completed = 0;
        self.current_index = 0;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }
}

/// What the HTTP surface reports for the current batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    pub batch_id: Option<Uuid>,
    pub running: bool,
    pub progress: QueueProgress,
    pub has_successful_images: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exporting: bool,
    pub entries: Vec<ResultEntry>,
}

impl From<&QueueState> for BatchView {
    fn from(state: &QueueState) -> Self {
        Self {
            batch_id: state.batch_id,
            running: state.running,
            progress: state.progress(),
            has_successful_images: state.has_successful_images(),
            started_at: state.started_at,
            finished_at: state.finished_at,
            exporting: false,
            entries: state.entries.clone(),
        }
    }
}
