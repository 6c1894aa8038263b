//! GPT-assisted localization for Crowdin projects.
//!
//! The conversation engine in [`engine`] drives an iterative, tool-augmented
//! dialogue with a chat model to translate one source string at a time;
//! [`orchestrator`] walks Crowdin projects and feeds untranslated strings
//! through it.

pub mod checks;
pub mod config;
pub mod crowdin;
pub mod engine;
pub mod openai;
pub mod orchestrator;
pub mod reconcile;
pub mod store;
pub mod tools;
pub mod translator;
