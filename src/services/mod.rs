// src/services/mod.rs
pub mod exporter;
pub mod generation_client;
pub mod image_processor;
pub mod prompt_splitter;
pub mod queue;
pub mod result_store;

pub use exporter::{ArchiveExporter, Download, ZipPackager};
pub use generation_client::{GeminiClient, GenerationClient};
pub use image_processor::ImageProcessor;
pub use prompt_splitter::split_prompts;
pub use queue::{QueueOrchestrator, StartedBatch};
pub use result_store::ResultStore;
