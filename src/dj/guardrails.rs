//! Quality gates for generated DJ text.
//!
//! A line must be within length bounds, contain no forbidden token and
//! mention the artist it introduces. Failing any gate forces the provider
//! registry to the next tier.

/// Artists that carry no information; their absence in a line is fine.
const GENERIC_ARTISTS: &[&str] = &["unknown", "unknown artist", "various artists", "va", "ai dj"];

pub const DEFAULT_FORBIDDEN_TOKENS: &[&str] =
    &["ai", "artificial", "algorithm", "database", "model", "generated"];

#[derive(Debug, Clone)]
pub struct TextGuardrails {
    pub min_chars: usize,
    pub max_chars: usize,
    pub forbidden_tokens: Vec<String>,
}

impl Default for TextGuardrails {
    fn default() -> Self {
        Self {
            min_chars: 6,
            max_chars: 200,
            forbidden_tokens: DEFAULT_FORBIDDEN_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl TextGuardrails {
    /// Apply all gates in order; the first violated gate is reported.
    pub fn validate(&self, text: &str, artist: &str) -> Result<(), String> {
        let trimmed = text.trim();
        let length = trimmed.chars().count();
        if length < self.min_chars {
            return Err(format!("too short: {} chars", length));
        }
        if length > self.max_chars {
            return Err(format!("too long: {} chars", length));
        }

        let lower = trimmed.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            if self.forbidden_tokens.iter().any(|f| f == token) {
                return Err(format!("forbidden token: {}", token));
            }
        }

        if !artist.is_empty() && !is_generic_artist(artist) {
            if !lower.contains(&artist.to_lowercase()) {
                return Err(format!("artist \"{}\" not mentioned", artist));
            }
        }
        Ok(())
    }
}

fn is_generic_artist(artist: &str) -> bool {
    let lower = artist.trim().to_lowercase();
    GENERIC_ARTISTS.iter().any(|g| *g == lower)
}
