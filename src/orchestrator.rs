//! Top-level translation run: projects, then target languages, then strings.
//!
//! For each untranslated string the orchestrator asks the conversation
//! engine for a translation, applies the review policy, uploads approved
//! results, and records the string in the processed ledger so later runs
//! skip it. With `PROCESS_QA` set the run instead walks automated QA
//! findings and reworks the flagged translations through the engine's
//! revision conversation.

use crate::config::{Config, ReviewMode};
use crate::crowdin::{CrowdinClient, Language, Project, SourceString};
use crate::engine::ConversationEngine;
use crate::store::{
    processed_path, processed_qa_path, transcripts_dir, usage_path, ProcessedStore,
    TranscriptStore, UsageStore,
};
use crate::translator::TranslateManager;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of presenting one translation for human review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Skip,
    Amend(String),
}

/// Interactive approval seam. The console implementation blocks on stdin;
/// tests substitute a canned reviewer.
pub trait ReviewPrompt {
    fn review(&self, source: &str, translation: &str, language: &str) -> ReviewDecision;
}

/// Terminal reviewer: blank approves, `n` skips, `c` prompts for a
/// corrected translation.
pub struct ConsoleReview;

impl ReviewPrompt for ConsoleReview {
    fn review(&self, source: &str, translation: &str, language: &str) -> ReviewDecision {
        println!("{:-^100}", "English");
        println!("{source}\n");
        println!("{:-^100}", language);
        println!("{translation}\n");
        println!(
            "Does this look okay?\n\
             - Leave blank and press ENTER to upload\n\
             - Type 'n' to skip\n\
             - Type 'c' to make a correction and upload"
        );
        print!("Enter your response: ");
        let _ = std::io::stdout().flush();

        let reply = read_line();
        if reply.to_lowercase().contains('n') {
            return ReviewDecision::Skip;
        }
        if reply.to_lowercase().contains('c') {
            println!("Enter the correction. Type 'cancel' to skip");
            let correction = read_line();
            if correction.trim() == "cancel" {
                return ReviewDecision::Skip;
            }
            return ReviewDecision::Amend(correction.trim_end_matches('\n').to_string());
        }
        ReviewDecision::Approve
    }
}

fn read_line() -> String {
    let mut buffer = String::new();
    let _ = std::io::stdin().read_line(&mut buffer);
    buffer
}

/// Whether a translation must be held for review before upload: any
/// placeholder-brace or backtick count drift, and everything in manual mode.
fn needs_review(source: &str, translation: &str, mode: ReviewMode) -> bool {
    if mode == ReviewMode::Manual {
        return true;
    }
    let braces = |s: &str| s.matches('{').count();
    let backticks = |s: &str| s.matches('`').count();
    braces(source) != braces(translation) || backticks(source) != backticks(translation)
}

pub struct Orchestrator {
    client: reqwest::Client,
    config: Config,
    crowdin: CrowdinClient,
    translator: TranslateManager,
    transcripts: TranscriptStore,
    usage: UsageStore,
    processed: ProcessedStore,
    processed_qa: ProcessedStore,
    review: Arc<dyn ReviewPrompt + Send + Sync>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self::with_reviewer(config, Arc::new(ConsoleReview))
    }

    pub fn with_reviewer(config: Config, review: Arc<dyn ReviewPrompt + Send + Sync>) -> Self {
        let client = reqwest::Client::new();
        Self {
            crowdin: CrowdinClient::new(
                client.clone(),
                config.crowdin_api_url.clone(),
                config.crowdin_api_key.clone(),
            ),
            translator: TranslateManager::new(client.clone(), config.translate_api_url.clone()),
            transcripts: TranscriptStore::new(transcripts_dir(&config.data_dir)),
            usage: UsageStore::new(usage_path(&config.data_dir)),
            processed: ProcessedStore::new(processed_path(&config.data_dir)),
            processed_qa: ProcessedStore::new(processed_qa_path(&config.data_dir)),
            client,
            config,
            review,
        }
    }

    /// Run one full pass over every project: translation of untranslated
    /// strings, or QA revision when configured.
    pub async fn run(&self) -> Result<()> {
        match self.config.review_mode {
            ReviewMode::Manual => info!("Running in manual mode"),
            ReviewMode::SemiAuto => info!("Running in mostly-auto mode"),
            ReviewMode::FullAuto => info!("Running in full-auto mode"),
        }

        let projects = self.crowdin.list_projects().await?;
        if projects.is_empty() {
            warn!("No projects found");
            return Ok(());
        }

        for project in &projects {
            info!("Processing project: {}", project.name);
            if self.config.process_qa {
                self.run_qa_pass(project).await?;
            } else {
                self.run_translation_pass(project).await?;
            }
        }
        Ok(())
    }

    async fn run_translation_pass(&self, project: &Project) -> Result<()> {
        let mut processed = self
            .processed
            .load()
            .context("Failed to load the processed ledger")?;

        let strings = self.crowdin.list_strings(project.id).await?;
        info!("Found {} source strings", strings.len());

        for language in &project.target_languages {
            info!("Doing translations for {}", language.name);
            for source in &strings {
                let key = format!("{}-{}-{}", project.id, source.id, language.id);
                if processed.contains(&key) {
                    continue;
                }

                // A failed presence check skips the string without
                // recording it, so the next run picks it up again
                let needed = match self
                    .crowdin
                    .needs_translation(project.id, source.id, &language.id)
                    .await
                {
                    Ok(needed) => needed,
                    Err(e) => {
                        warn!("Skipping {key}, translation check failed: {e:#}");
                        continue;
                    }
                };

                if needed {
                    // A fatal attempt stops this string only, not the run
                    match self.translate_and_upload(project.id, source, language).await {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            error!("Translation attempt for {key} failed: {e:#}");
                            continue;
                        }
                    }
                }

                self.processed
                    .insert(&mut processed, key)
                    .context("Failed to persist the processed ledger")?;
            }
        }
        Ok(())
    }

    /// Walk the project's automated QA findings and rework each flagged
    /// translation through the revision conversation.
    async fn run_qa_pass(&self, project: &Project) -> Result<()> {
        let mut processed = self
            .processed_qa
            .load()
            .context("Failed to load the QA ledger")?;

        let strings = self.crowdin.list_strings(project.id).await?;
        let issues = self.crowdin.list_qa_issues(project.id).await?;
        info!("Found {} QA issues", issues.len());

        let strings_by_id: HashMap<u64, &SourceString> =
            strings.iter().map(|s| (s.id, s)).collect();
        let languages_by_id: HashMap<&str, &Language> = project
            .target_languages
            .iter()
            .map(|l| (l.id.as_str(), l))
            .collect();

        for issue in &issues {
            let key = format!("{}-{}", project.id, issue.id);
            if processed.contains(&key) {
                continue;
            }

            // An issue whose string or language is gone has nothing left
            // to revise
            let Some(source) = strings_by_id.get(&issue.string_id) else {
                info!("QA issue {} has no matching source string", issue.id);
                self.processed_qa
                    .insert(&mut processed, key)
                    .context("Failed to persist the QA ledger")?;
                continue;
            };
            let Some(language) = languages_by_id.get(issue.language_id.as_str()) else {
                info!(
                    "QA issue {} targets untracked language {}",
                    issue.id, issue.language_id
                );
                self.processed_qa
                    .insert(&mut processed, key)
                    .context("Failed to persist the QA ledger")?;
                continue;
            };

            let translation = match self
                .crowdin
                .get_translation(project.id, source.id, &language.id)
                .await
            {
                Ok(Some(translation)) => translation,
                Ok(None) => {
                    info!("QA issue {} has no translation to revise", issue.id);
                    self.processed_qa
                        .insert(&mut processed, key)
                        .context("Failed to persist the QA ledger")?;
                    continue;
                }
                Err(e) => {
                    warn!("Skipping QA issue {}, translation fetch failed: {e:#}", issue.id);
                    continue;
                }
            };

            self.log_running_cost();
            info!(
                "Revising {} for {}: {}",
                source.text, language.name, issue.validation_description
            );

            let engine = self.engine();
            let revised = match engine
                .revise_translation(&source.text, &translation.text, &language.name, &issue.text)
                .await
            {
                Ok(revised) => revised,
                Err(e) => {
                    error!("Revision for {key} failed: {e:#}");
                    continue;
                }
            };
            if revised.trim().is_empty() {
                warn!("Failed to revise {key}, skipping");
                continue;
            }
            info!("{} -> {}: {}", source.text, language.name, revised);

            self.crowdin
                .upload_translation(project.id, source.id, &language.id, &revised)
                .await?;
            self.processed_qa
                .insert(&mut processed, key)
                .context("Failed to persist the QA ledger")?;
        }
        Ok(())
    }

    /// Translate one string and upload it if approved. Returns whether the
    /// string should be recorded as processed.
    async fn translate_and_upload(
        &self,
        project_id: u64,
        source: &SourceString,
        language: &Language,
    ) -> Result<bool> {
        self.log_running_cost();

        let mut translation = self
            .engine()
            .attempt_translation(&source.text, &language.name)
            .await?;

        if translation.trim().is_empty() {
            warn!(
                "Failed to translate to {} (skipping): {}",
                language.name, source.text
            );
            return Ok(false);
        }
        info!("{} -> {}: {}", source.text, language.name, translation);

        if needs_review(&source.text, &translation, self.config.review_mode) {
            if self.config.review_mode == ReviewMode::FullAuto {
                warn!("Translation held for review, auto-skipping");
                return Ok(false);
            }
            match self.prompt_review(source, &translation, language).await? {
                ReviewDecision::Approve => {}
                ReviewDecision::Skip => {
                    info!("Skipping on review");
                    return Ok(false);
                }
                ReviewDecision::Amend(corrected) => translation = corrected,
            }
        }

        self.crowdin
            .upload_translation(project_id, source.id, &language.id, &translation)
            .await?;
        Ok(true)
    }

    /// Run the blocking review prompt off the async executor.
    async fn prompt_review(
        &self,
        source: &SourceString,
        translation: &str,
        language: &Language,
    ) -> Result<ReviewDecision> {
        let review = Arc::clone(&self.review);
        let source_text = source.text.clone();
        let translation = translation.to_string();
        let language_name = language.name.clone();
        tokio::task::spawn_blocking(move || {
            review.review(&source_text, &translation, &language_name)
        })
        .await
        .context("Review prompt task failed")
    }

    fn engine(&self) -> ConversationEngine<'_> {
        ConversationEngine::new(
            &self.client,
            &self.config,
            &self.translator,
            &self.transcripts,
            &self.usage,
        )
    }

    fn log_running_cost(&self) {
        let counters = match self.usage.load() {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read usage counters: {e:#}");
                return;
            }
        };
        match counters.cost(&self.config.openai_model) {
            Some(cost) => info!("Translating... (${cost} used overall)"),
            None => info!("Translating... ({} tokens used overall)", counters.total),
        }
    }
}
