//! Line-protocol codec for the audio engine's control port.
//!
//! Commands are newline-terminated; the engine replies with a block of lines
//! terminated by a lone `END`. Metadata lines have the form `key="value"`,
//! where values may contain `\uXXXX` escapes and `file://` URI prefixes.

use std::collections::HashMap;

/// Sentinel line closing every engine response.
pub const END_MARKER: &str = "END";

/// Decode `\uXXXX` escapes the engine emits for non-ASCII filenames.
/// Unknown escapes are kept verbatim.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('u') => {
                chars.next();
                let hex: String = chars.by_ref().take(4).collect();
                match (hex.len() == 4)
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32)
                {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some('"') => {
                chars.next();
                out.push('"');
            }
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Parse `key="value"` lines into a map. Non-matching lines are skipped.
pub fn parse_kv_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in lines {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"');
        out.insert(key.to_string(), unescape(value));
    }
    out
}

/// Split an `<output>.metadata` response into its `--- N ---` blocks,
/// in the order they appear. Block 1 is the currently playing item.
pub fn split_metadata_blocks(text: &str) -> Vec<HashMap<String, String>> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("--- ") && line.ends_with(" ---") {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Vec::new());
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }
    blocks.into_iter().map(parse_kv_lines).collect()
}

/// Parse a `request.all` response into request ids, in queue order.
pub fn parse_request_ids(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|token| token.chars().all(|c| c.is_ascii_digit()))
        .map(|token| token.to_string())
        .collect()
}

/// Drop a `file://` prefix if present.
pub fn strip_file_uri(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

/// Build an `annotate:` URI carrying clip metadata for an enqueue.
pub fn annotate_uri(path: &str, artist: &str, title: &str, album: &str) -> String {
    let quote = |s: &str| s.replace('"', "'");
    format!(
        "annotate:artist=\"{}\",title=\"{}\",album=\"{}\":{}",
        quote(artist),
        quote(title),
        quote(album),
        path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_kv_lines() {
        let parsed = parse_kv_lines(vec![
            "title=\"Blue Monday\"",
            "artist=\"New Order\"",
            "garbage line",
            "album=\"Power, Corruption & Lies\"",
        ]);
        assert_eq!(parsed.get("title").unwrap(), "Blue Monday");
        assert_eq!(parsed.get("artist").unwrap(), "New Order");
        assert_eq!(parsed.get("album").unwrap(), "Power, Corruption & Lies");
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn unescapes_unicode_filenames() {
        assert_eq!(unescape("Bj\\u00f6rk"), "Björk");
        assert_eq!(unescape("plain"), "plain");
        assert_eq!(unescape("say \\\"hi\\\""), "say \"hi\"");
        // Truncated escape is preserved rather than dropped.
        assert_eq!(unescape("bad\\u00"), "bad\\u00");
    }

    #[test]
    fn splits_metadata_blocks_in_order() {
        let text = "--- 1 ---\ntitle=\"Now\"\nartist=\"A\"\n--- 2 ---\ntitle=\"Next\"\n";
        let blocks = split_metadata_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].get("title").unwrap(), "Now");
        assert_eq!(blocks[1].get("title").unwrap(), "Next");
    }

    #[test]
    fn parses_request_ids_ignoring_noise() {
        assert_eq!(parse_request_ids("12 13 14"), vec!["12", "13", "14"]);
        assert_eq!(parse_request_ids("ready 7\n8"), vec!["7", "8"]);
        assert!(parse_request_ids("").is_empty());
    }

    #[test]
    fn strips_file_uri_prefix() {
        assert_eq!(strip_file_uri("file:///music/a.mp3"), "/music/a.mp3");
        assert_eq!(strip_file_uri("/music/a.mp3"), "/music/a.mp3");
    }

    #[test]
    fn annotate_uri_carries_metadata() {
        let uri = annotate_uri("/tts/intro_1.mp3", "AI DJ", "DJ Intro - Song", "AI Radio");
        assert!(uri.starts_with("annotate:artist=\"AI DJ\""));
        assert!(uri.ends_with(":/tts/intro_1.mp3"));
        assert!(uri.contains("title=\"DJ Intro - Song\""));
    }

    #[test]
    fn annotate_uri_sanitizes_quotes() {
        let uri = annotate_uri("/f.mp3", "A", "Say \"Hi\"", "B");
        assert!(uri.contains("title=\"Say 'Hi'\""));
    }
}
