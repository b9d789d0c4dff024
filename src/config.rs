// src/config.rs
use crate::errors::BatchError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub api_base: String,
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, BatchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BatchError> {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = read("GEMINI_API_KEY")
            .ok_or_else(|| BatchError::Config("GEMINI_API_KEY must be set".to_string()))?;

        Ok(Self {
            api_key,
            api_base: read("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            bind_addr: read("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}
