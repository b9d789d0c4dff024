// src/services/exporter.rs
use crate::errors::BatchError;
use crate::models::ResultEntry;
use crate::services::ImageProcessor;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const ARCHIVE_NAME: &str = "generated_images.zip";
const FALLBACK_STEM: &str = "generated_image";
const MAX_STEM_LEN: usize = 50;

/// A named blob ready to be handed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Derives `<slug>_<n>.jpeg` from a prompt and a zero-based image index.
pub fn image_filename(prompt: &str, index: usize) -> String {
    let mut stem = String::with_capacity(prompt.len());
    let mut in_gap = false;

    for c in prompt.to_lowercase().chars() {
        match c {
            'a'..='z' | '0'..='9' | '-' => {
                stem.push(c);
                in_gap = false;
            }
            ' ' => {
                // a run of spaces collapses into a single underscore
                if !in_gap {
                    stem.push('_');
                }
                in_gap = true;
            }
            _ => {}
        }
    }

    stem.truncate(MAX_STEM_LEN);
    if stem.is_empty() {
        stem.push_str(FALLBACK_STEM);
    }

    format!("{}_{}.jpeg", stem, index + 1)
}

/// Prepares a single image for saving. Empty payloads yield nothing.
pub fn single_download(
    processor: &ImageProcessor,
    image: &str,
    prompt: &str,
    index: usize,
) -> Option<Download> {
    if image.trim().is_empty() {
        return None;
    }

    match processor.decode_payload(image) {
        Ok(data) => Some(Download {
            filename: image_filename(prompt, index),
            content_type: processor.content_type(&data, processor.declared_mime(image)),
            data,
        }),
        Err(e) => {
            warn!("Skipping download for \"{}\": {}", prompt, e);
            None
        }
    }
}

/// Turns named files into one binary package.
pub trait Packager: Send + Sync {
    fn pack(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, BatchError>;
}

pub struct ZipPackager;

impl Packager for ZipPackager {
    fn pack(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>, BatchError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        for (name, data) in files {
            writer
                .start_file(name.as_str(), options)
                .map_err(|e| BatchError::Archive(format!("Failed to add {}: {}", name, e)))?;
            writer
                .write_all(&data)
                .map_err(|e| BatchError::Archive(format!("Failed to write {}: {}", name, e)))?;
        }

        let cursor = writer
            .finish()
            .map_err(|e| BatchError::Archive(format!("Failed to finalize archive: {}", e)))?;
        Ok(cursor.into_inner())
    }
}

/// Builds the combined archive. At most one export runs at a time.
pub struct ArchiveExporter {
    packager: Arc<dyn Packager>,
    image_processor: ImageProcessor,
    in_progress: AtomicBool,
}

/// Clears the single-flight flag on every exit path.
struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ArchiveExporter {
    pub fn new(packager: Arc<dyn Packager>) -> Self {
        Self {
            packager,
            image_processor: ImageProcessor::new(),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Packs every image of every successful entry. Returns `None` when an
    /// export is already running or the archive could not be built.
    pub async fn export(&self, entries: &[ResultEntry]) -> Option<Download> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Archive export already in progress");
            return None;
        }
        let _guard = InProgressGuard(&self.in_progress);

        match self.build(entries).await {
            Ok(download) => {
                info!("Exported archive with {} byte(s)", download.data.len());
                Some(download)
            }
            Err(e) => {
                error!("Archive export failed: {}", e);
                None
            }
        }
    }

    async fn build(&self, entries: &[ResultEntry]) -> Result<Download, BatchError> {
        let files = self.collect_files(entries)?;
        let count = files.len();
        let packager = Arc::clone(&self.packager);

        let data = tokio::task::spawn_blocking(move || packager.pack(files))
            .await
            .map_err(|e| BatchError::Archive(format!("Packaging task failed: {}", e)))??;

        debug!("Packed {} image(s) into {}", count, ARCHIVE_NAME);
        Ok(Download {
            filename: ARCHIVE_NAME.to_string(),
            content_type: "application/zip".to_string(),
            data,
        })
    }

    fn collect_files(&self, entries: &[ResultEntry]) -> Result<Vec<(String, Vec<u8>)>, BatchError> {
        let mut files: IndexMap<String, Vec<u8>> = IndexMap::new();

        for entry in entries.iter().filter(|e| e.has_images()) {
            for (index, image) in entry.usable_images() {
                let Some(payload) = self.image_processor.data_portion(image) else {
                    debug!("No payload in image {} of \"{}\"", index, entry.prompt);
                    continue;
                };
                let data = self.image_processor.decode(payload)?;
                let filename = image_filename(&entry.prompt, index);

                // later images with the same name replace earlier ones in place
                files.insert(filename, data);
            }
        }

        Ok(files.into_iter().collect())
    }
}
