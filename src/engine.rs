//! The iterative translation conversation engine.
//!
//! One attempt drives a bounded, tool-augmented dialogue with the model:
//! seed prompt, optional pre-translation hint, then a turn loop that routes
//! each reply either through the invariant checks (textual content) or the
//! tool dispatcher (function calls), with corrective feedback injected at
//! most once per directive kind. Transient backend failures are retried in
//! place with a fixed backoff; everything is bounded by explicit ceilings.
//!
//! The attempt ends with a reconciled translation, or the empty string when
//! no usable translation could be produced. Callers treat the empty string
//! uniformly as "translation unavailable, skip".

use crate::checks::{self, Directive};
use crate::config::Config;
use crate::openai::{self, CompletionError, FunctionCall, Message};
use crate::reconcile::reconcile;
use crate::store::{TranscriptStore, UsageStore};
use crate::tools::{self, ArgError};
use crate::translator::TranslateManager;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Inert stand-in for backtick-delimited spans, substituted before the
/// prompt is built and restored after the final reply, so the model never
/// has to preserve the delimiter syntax itself.
const BACKTICK_SENTINEL: &str = "<x>";

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a professional translator for software localization strings. Translate the text the user provides from English to {target_language}.

Rules:
- Return only the translated text, nothing else
- Text in {curly_braces} is a placeholder that is filled in by the software at runtime: keep every placeholder exactly as written, in a position that reads naturally
- Keep markdown formatting, <x> markers, and emojis exactly as they appear
- Do not add or remove punctuation, leading whitespace, or trailing whitespace
- Keep the translation close to the source text in length
- If you are unsure about a translation, call the get_translation function for a draft and refine it"#;

fn build_system_prompt(target_language: &str) -> String {
    SYSTEM_PROMPT_TEMPLATE.replace("{target_language}", target_language)
}

/// Appended to a QA issue description when asking the model to rework an
/// existing translation.
const REVISION_ADDON: &str = "\nRevise your translation and return only the updated version";

/// Hard stops for one attempt. The ceilings are normal loop-exit
/// conditions, not advisory limits.
#[derive(Debug, Clone)]
pub struct EngineLimits {
    /// Maximum model round trips per attempt.
    pub max_turns: u32,
    /// Maximum successful tool dispatches before function calling is
    /// disabled for the rest of the attempt.
    pub max_tool_calls: u32,
    /// Transient backend failures tolerated before the attempt is
    /// abandoned with the empty sentinel.
    pub max_backend_failures: u32,
    /// Backoff after a connectivity-class failure.
    pub unavailable_backoff: Duration,
    /// Backoff after a rate-limit response.
    pub rate_limit_backoff: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_tool_calls: 7,
            max_backend_failures: 1,
            unavailable_backoff: Duration::from_secs(5),
            rate_limit_backoff: Duration::from_secs(60),
        }
    }
}

pub struct ConversationEngine<'a> {
    client: &'a reqwest::Client,
    config: &'a Config,
    translator: &'a TranslateManager,
    transcripts: &'a TranscriptStore,
    usage: &'a UsageStore,
    limits: EngineLimits,
}

impl<'a> ConversationEngine<'a> {
    pub fn new(
        client: &'a reqwest::Client,
        config: &'a Config,
        translator: &'a TranslateManager,
        transcripts: &'a TranscriptStore,
        usage: &'a UsageStore,
    ) -> Self {
        Self {
            client,
            config,
            translator,
            transcripts,
            usage,
            limits: EngineLimits::default(),
        }
    }

    /// Override the default ceilings and backoffs.
    pub fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run one full translation attempt for a (source string, target
    /// language) pair.
    ///
    /// Returns the reconciled translation, the empty string when the
    /// attempt could not produce usable content, or an error for fatal
    /// upstream failures.
    pub async fn attempt_translation(
        &self,
        source_text: &str,
        target_language: &str,
    ) -> Result<String> {
        let escaped_source = source_text.replace('`', BACKTICK_SENTINEL);
        let mut messages = self.seed_messages(&escaped_source, target_language).await;

        let mut turns = 0u32;
        let mut tool_calls = 0u32;
        let mut failures = 0u32;
        let mut applied: HashSet<Directive> = HashSet::new();
        let mut reply = String::new();

        loop {
            if failures > self.limits.max_backend_failures {
                warn!(
                    "Abandoning attempt after {} backend failures, skipping",
                    failures
                );
                reply.clear();
                break;
            }
            if turns >= self.limits.max_turns {
                debug!("Turn ceiling reached, keeping most recent content");
                break;
            }

            let allow_tools = tool_calls < self.limits.max_tool_calls
                && openai::supports_function_calling(&self.config.openai_model);

            let completion =
                match openai::complete(self.client, self.config, &messages, allow_tools).await {
                    Ok(completion) => completion,
                    Err(CompletionError::Unavailable(e)) => {
                        failures += 1;
                        warn!(
                            "Model backend unavailable, waiting {:?} before trying again: {}",
                            self.limits.unavailable_backoff, e
                        );
                        sleep(self.limits.unavailable_backoff).await;
                        continue;
                    }
                    Err(CompletionError::RateLimited(e)) => {
                        failures += 1;
                        warn!(
                            "Rate limited, waiting {:?} before trying again: {}",
                            self.limits.rate_limit_backoff, e
                        );
                        sleep(self.limits.rate_limit_backoff).await;
                        continue;
                    }
                    Err(CompletionError::Fatal(e)) => {
                        // Keep the message log around for diagnosis
                        if let Err(persist_err) = self.transcripts.append(&messages) {
                            warn!("Failed to persist transcript: {persist_err:#}");
                        }
                        return Err(e.context(format!(
                            "Translation to {target_language} failed fatally on turn {}",
                            turns + 1
                        )));
                    }
                };
            turns += 1;

            // Token usage counts even on paths that ultimately fail
            self.usage
                .add(
                    completion.usage.prompt_tokens,
                    completion.usage.completion_tokens,
                    completion.usage.total_tokens,
                )
                .context("Failed to persist token usage")?;

            if let Some(content) = completion.content.filter(|c| !c.is_empty()) {
                messages.push(Message::assistant(&content));
                reply = content;

                let candidate = reply.replace(BACKTICK_SENTINEL, "`");
                if let Some(directive) = checks::check(source_text, &candidate, &applied) {
                    info!("Quality check failed: {:?}", directive);
                    messages.push(Message::user(directive.prompt()));
                    applied.insert(directive);
                    continue;
                }
                break;
            }

            if let Some(call) = completion.function_call {
                messages.push(Message::tool_call(call.clone()));
                self.handle_tool_call(&mut messages, call, &mut tool_calls)
                    .await;
                continue;
            }

            // Neither content nor a tool call; the turn ceiling bounds this
            debug!("Model reply carried neither content nor a tool call");
        }

        let reply = reply.replace(BACKTICK_SENTINEL, "`");
        let reply = if reply.is_empty() {
            reply
        } else {
            reconcile(source_text, &reply)
        };

        if let Err(e) = self.transcripts.append(&messages) {
            warn!("Failed to persist transcript: {e:#}");
        }
        if tool_calls > 0 {
            debug!("Called translate function {tool_calls} time(s)");
        }

        Ok(reply)
    }

    /// Rework an existing translation that automated QA flagged.
    ///
    /// The conversation replays the original exchange (source in, current
    /// translation out) and appends the issue description as the corrective
    /// turn. Tools stay disabled; the first non-empty reply wins. Returns
    /// the reconciled revision, or the empty string when the attempt could
    /// not produce one.
    pub async fn revise_translation(
        &self,
        source_text: &str,
        current_translation: &str,
        target_language: &str,
        issue_text: &str,
    ) -> Result<String> {
        let mut messages = vec![
            Message::user(&format!("Translate the following text to {target_language}")),
            Message::user(source_text),
            Message::assistant(current_translation),
            Message::user(&format!("{issue_text}{REVISION_ADDON}")),
        ];

        let mut turns = 0u32;
        let mut failures = 0u32;
        let mut reply = String::new();

        loop {
            if failures > self.limits.max_backend_failures {
                warn!(
                    "Abandoning revision after {} backend failures, skipping",
                    failures
                );
                reply.clear();
                break;
            }
            if turns >= self.limits.max_turns {
                break;
            }

            let completion = match openai::complete(self.client, self.config, &messages, false)
                .await
            {
                Ok(completion) => completion,
                Err(CompletionError::Unavailable(e)) => {
                    failures += 1;
                    warn!(
                        "Model backend unavailable, waiting {:?} before trying again: {}",
                        self.limits.unavailable_backoff, e
                    );
                    sleep(self.limits.unavailable_backoff).await;
                    continue;
                }
                Err(CompletionError::RateLimited(e)) => {
                    failures += 1;
                    warn!(
                        "Rate limited, waiting {:?} before trying again: {}",
                        self.limits.rate_limit_backoff, e
                    );
                    sleep(self.limits.rate_limit_backoff).await;
                    continue;
                }
                Err(CompletionError::Fatal(e)) => {
                    if let Err(persist_err) = self.transcripts.append(&messages) {
                        warn!("Failed to persist transcript: {persist_err:#}");
                    }
                    return Err(e.context(format!(
                        "Revision for {target_language} failed fatally on turn {}",
                        turns + 1
                    )));
                }
            };
            turns += 1;

            self.usage
                .add(
                    completion.usage.prompt_tokens,
                    completion.usage.completion_tokens,
                    completion.usage.total_tokens,
                )
                .context("Failed to persist token usage")?;

            if let Some(content) = completion.content.filter(|c| !c.is_empty()) {
                messages.push(Message::assistant(&content));
                reply = content;
                break;
            }

            debug!("Model reply carried no content");
        }

        let reply = if reply.is_empty() {
            reply
        } else {
            reconcile(source_text, &reply)
        };

        if let Err(e) = self.transcripts.append(&messages) {
            warn!("Failed to persist transcript: {e:#}");
        }

        Ok(reply)
    }

    /// Seed the conversation: system instruction, the labeled source turn,
    /// and optionally a fabricated tool exchange holding a machine
    /// translation for the model to refine.
    async fn seed_messages(&self, escaped_source: &str, target_language: &str) -> Vec<Message> {
        let mut messages = vec![
            Message::system(&build_system_prompt(target_language)),
            Message::user_named(escaped_source, "source_text"),
        ];

        if self.config.pre_translate {
            if let Some(hint) = self.translator.translate(escaped_source, target_language).await {
                if hint.text.trim() != escaped_source.trim() {
                    let arguments = serde_json::json!({
                        "message": escaped_source,
                        "to_language": target_language,
                    })
                    .to_string();
                    messages.push(Message::tool_call(FunctionCall {
                        name: tools::TRANSLATE_FUNCTION.to_string(),
                        arguments,
                    }));
                    messages.push(Message::function(tools::TRANSLATE_FUNCTION, &hint.text));
                }
            }
        }

        messages
    }

    /// Validate and dispatch one model-issued function call, folding every
    /// failure mode into a conversation turn rather than an error.
    async fn handle_tool_call(
        &self,
        messages: &mut Vec<Message>,
        call: FunctionCall,
        tool_calls: &mut u32,
    ) {
        if call.name != tools::TRANSLATE_FUNCTION {
            debug!("Invalid function called: {}", call.name);
            messages.push(Message::system(&format!(
                "{} is not a valid function",
                call.name
            )));
            return;
        }

        let args = match tools::parse_args(&call.arguments) {
            Ok(args) => args,
            Err(ArgError::Unparseable) => {
                debug!("Arguments failed to parse: {}", call.arguments);
                messages.push(Message::function(
                    tools::TRANSLATE_FUNCTION,
                    "arguments failed to parse",
                ));
                return;
            }
            Err(ArgError::MissingFields) => {
                debug!("Missing arguments for translate call");
                messages.push(Message::function(
                    tools::TRANSLATE_FUNCTION,
                    "get_translation requires 'message' and 'to_language' arguments",
                ));
                return;
            }
        };

        if self.translator.resolve_language(&args.to_language).is_none() {
            debug!("Invalid target language: {}", args.to_language);
            messages.push(Message::function(
                tools::TRANSLATE_FUNCTION,
                "Invalid target language!",
            ));
            return;
        }

        let result = tools::dispatch(self.translator, &args.message, &args.to_language).await;
        let content = result.unwrap_or_else(|| "Translation failed!".to_string());
        messages.push(Message::function(tools::TRANSLATE_FUNCTION, &content));
        *tool_calls += 1;
    }
}
