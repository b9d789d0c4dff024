// src/services/prompt_splitter.rs

/// Splits raw multi-line input into trimmed, non-empty prompts in input order.
pub fn split_prompts(raw: &str) -> Vec<String> {
    raw.trim()
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
