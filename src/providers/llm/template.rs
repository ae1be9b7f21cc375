//! Terminal LLM tier: offline templates with `{title}`/`{artist}`
//! placeholders. Never fails, so the pipeline always has some text.

use super::{LineRequest, LlmProvider};
use crate::providers::ProviderError;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::time::Duration;

pub const DEFAULT_TEMPLATES: &[&str] = &[
    "Up next, {artist} with {title}. Stay with us.",
    "Here comes {title} by {artist}, only on this station.",
    "You're in the right place, this is {artist} with {title}.",
    "Coming right up: {title}, from {artist}.",
    "Let's keep it rolling with {artist} and {title}.",
];

pub struct TemplateProvider {
    templates: Vec<String>,
}

impl TemplateProvider {
    pub fn new(templates: Vec<String>) -> Self {
        let templates = if templates.is_empty() {
            DEFAULT_TEMPLATES.iter().map(|t| t.to_string()).collect()
        } else {
            templates
        };
        Self { templates }
    }
}

impl Default for TemplateProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl LlmProvider for TemplateProvider {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(
        &self,
        request: &LineRequest,
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        let template = self
            .templates
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TEMPLATES[0].to_string());

        let artist = if request.artist.is_empty() {
            "a great artist"
        } else {
            &request.artist
        };
        let title = if request.title.is_empty() {
            "the next track"
        } else {
            &request.title
        };
        Ok(template.replace("{artist}", artist).replace("{title}", title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(title: &str, artist: &str) -> LineRequest {
        LineRequest {
            prompt: String::new(),
            title: title.to_string(),
            artist: artist.to_string(),
        }
    }

    #[tokio::test]
    async fn fills_in_placeholders() {
        let provider = TemplateProvider::default();
        let line = provider
            .generate(&request("Blue Monday", "New Order"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(line.contains("Blue Monday"));
        assert!(line.contains("New Order"));
        assert!(!line.contains("{title}"));
        assert!(!line.contains("{artist}"));
    }

    #[tokio::test]
    async fn handles_missing_fields() {
        let provider = TemplateProvider::default();
        let line = provider
            .generate(&request("", ""), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!line.is_empty());
        assert!(!line.contains("{artist}"));
    }

    #[tokio::test]
    async fn default_templates_pass_the_quality_gates() {
        let provider = TemplateProvider::default();
        let gates = crate::dj::TextGuardrails::default();
        // The pick is random, so sample enough to cover every template.
        for _ in 0..50 {
            let line = provider
                .generate(&request("Blue Monday", "New Order"), Duration::from_secs(1))
                .await
                .unwrap();
            gates.validate(&line, "New Order").unwrap();
        }
    }

    #[tokio::test]
    async fn custom_templates_are_used() {
        let provider = TemplateProvider::new(vec!["Now: {title} / {artist}".to_string()]);
        let line = provider
            .generate(&request("T", "A"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(line, "Now: T / A");
    }
}
