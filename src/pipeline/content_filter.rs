//! Replaces banned words in outbound request text.

use super::payload::{map_content_text, map_prompt_text, messages_mut};
use super::MiddlewareUnit;
use crate::core::Result;
use crate::settings::SettingsSnapshot;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Words replaced in request text, matched case-insensitively.
pub const BANNED_WORDS: &[&str] = &["hack", "exploit", "malware"];

/// Replacement for each banned occurrence.
pub const REPLACEMENT: &str = "[FILTERED]";

static BANNED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternatives: Vec<String> = BANNED_WORDS.iter().map(|w| regex::escape(w)).collect();
    Regex::new(&format!("(?i){}", alternatives.join("|"))).expect("banned word pattern is valid")
});

/// Content moderation on request messages and prompts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentFilter;

impl ContentFilter {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Box<dyn MiddlewareUnit> {
        Box::new(Self::new())
    }

    fn filter_text(text: &str, hits: &mut usize) -> String {
        let count = BANNED_PATTERN.find_iter(text).count();
        if count == 0 {
            return text.to_string();
        }
        *hits += count;
        BANNED_PATTERN.replace_all(text, REPLACEMENT).into_owned()
    }
}

impl MiddlewareUnit for ContentFilter {
    fn name(&self) -> &'static str {
        "content_filter"
    }

    fn description(&self) -> &'static str {
        "Filters inappropriate content from requests"
    }

    fn process_request(&self, mut payload: Value, _settings: &SettingsSnapshot) -> Result<Value> {
        let mut hits = 0usize;

        if let Some(messages) = messages_mut(&mut payload) {
            for message in messages.iter_mut() {
                map_content_text(message, |text| Self::filter_text(text, &mut hits));
            }
        }
        map_prompt_text(&mut payload, |text| Self::filter_text(text, &mut hits));

        if hits > 0 {
            tracing::warn!(unit = self.name(), replaced = hits, "Filtered banned words from request");
        }
        Ok(payload)
    }
}
