use anyhow::{Context, Result};
use std::path::PathBuf;

/// How much human review is required before an approved translation is
/// uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewMode {
    /// Every translation is confirmed interactively (AUTO=0).
    Manual,
    /// Only translations with residual formatting doubts are confirmed (AUTO=1).
    SemiAuto,
    /// Never prompt; doubtful translations are skipped (AUTO=2).
    FullAuto,
}

impl ReviewMode {
    fn from_level(level: u8) -> Self {
        match level {
            0 => ReviewMode::Manual,
            1 => ReviewMode::SemiAuto,
            _ => ReviewMode::FullAuto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Crowdin
    pub crowdin_api_key: String,
    pub crowdin_api_url: String,

    // OpenAI
    pub openai_api_key: String,
    pub openai_api_url: String,
    pub openai_model: String,

    // Fallback translator
    pub translate_api_url: String,

    // Behavior
    pub pre_translate: bool,
    pub process_qa: bool,
    pub review_mode: ReviewMode,

    // Storage
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            // Crowdin
            crowdin_api_key: std::env::var("CROWDIN_KEY").context("CROWDIN_KEY not set")?,
            crowdin_api_url: std::env::var("CROWDIN_API_URL")
                .unwrap_or_else(|_| "https://api.crowdin.com/api/v2".to_string()),

            // OpenAI; ENDPOINT_OVERRIDE points at a compatible proxy
            openai_api_key: std::env::var("OPENAI_KEY").context("OPENAI_KEY not set")?,
            openai_api_url: std::env::var("ENDPOINT_OVERRIDE")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            openai_model: std::env::var("MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),

            // Fallback translator
            translate_api_url: std::env::var("TRANSLATE_API_URL").unwrap_or_else(|_| {
                "https://api.flowery.pw/v1/translation/translate".to_string()
            }),

            // Behavior
            pre_translate: std::env::var("PRE_TRANSLATE")
                .ok()
                .and_then(|v| v.parse::<u8>().ok())
                .unwrap_or(0)
                != 0,
            process_qa: std::env::var("PROCESS_QA")
                .ok()
                .and_then(|v| v.parse::<u8>().ok())
                .unwrap_or(0)
                != 0,
            review_mode: ReviewMode::from_level(
                std::env::var("AUTO")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
            ),

            // Storage
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
        })
    }
}
