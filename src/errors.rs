// src/errors.rs
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BatchError {
    /// The bare message without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            BatchError::Generation(msg)
            | BatchError::ImageProcessing(msg)
            | BatchError::Archive(msg)
            | BatchError::Serialization(msg)
            | BatchError::Validation(msg)
            | BatchError::NotFound(msg)
            | BatchError::Config(msg) => msg,
        }
    }
}

impl ResponseError for BatchError {
    fn error_response(&self) -> HttpResponse {
        match self {
            BatchError::Generation(_) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "Generation service error",
                "message": self.to_string()
            })),
            BatchError::ImageProcessing(_) => {
                HttpResponse::UnprocessableEntity().json(serde_json::json!({
                    "error": "Image processing error",
                    "message": self.to_string()
                }))
            }
            BatchError::Archive(_) | BatchError::Serialization(_) | BatchError::Config(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Internal error",
                    "message": self.to_string()
                }))
            }
            BatchError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation error",
                "message": self.to_string()
            })),
            BatchError::NotFound(_) => HttpResponse::NotFound().json(serde_json::json!({
                "error": "Not found",
                "message": self.to_string()
            })),
        }
    }
}
