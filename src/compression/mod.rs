//! Compression Engine
//!
//! Two deterministic passes for `medium` and `large` payloads:
//! pattern stripping removes verbose commentary between fixed delimiter pairs,
//! template substitution replaces recurring lines with a reference token into a
//! shared template table. `small` payloads are passed through untouched.

use crate::core::errors::{ModlinkError, Result};
use crate::registry::SizeClass;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

const TOKEN_OPEN: char = '\u{E000}';
const TOKEN_CLOSE: char = '\u{E001}';
/// Bytes charged per template table entry on top of the fragment itself
pub const TEMPLATE_ENTRY_OVERHEAD: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Delimiter pairs whose enclosed spans are stripped, applied in order
    pub strip_delimiters: Vec<(String, String)>,
    /// Minimum trimmed length of a line to become a template
    pub min_fragment_len: usize,
    /// Minimum number of occurrences before a line becomes a template
    pub min_occurrences: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            strip_delimiters: vec![
                ("<!--".to_string(), "-->".to_string()),
                ("/*".to_string(), "*/".to_string()),
            ],
            min_fragment_len: 32,
            min_occurrences: 2,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        for (open, close) in &self.strip_delimiters {
            if open.is_empty() || close.is_empty() {
                return Err(ModlinkError::configuration_field(
                    "strip delimiters cannot be empty",
                    "compression.strip_delimiters",
                ));
            }
        }
        if self.min_occurrences < 2 {
            return Err(ModlinkError::configuration_field(
                "min_occurrences must be at least 2",
                "compression.min_occurrences",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionMode {
    /// Small module, never compressed
    Bypassed,
    Compressed,
    /// Compression would have grown the payload; original kept
    FailedClosed,
}

/// Payload as stored in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedPayload {
    pub body: String,
    pub templates: Vec<String>,
    pub mode: CompressionMode,
    pub original_size: usize,
    pub stripped_bytes: usize,
}

impl CompressedPayload {
    pub fn raw(payload: String, mode: CompressionMode) -> Self {
        Self {
            original_size: payload.len(),
            body: payload,
            templates: Vec::new(),
            mode,
            stripped_bytes: 0,
        }
    }

    /// Stored size, including the template table overhead
    pub fn compressed_size(&self) -> usize {
        self.body.len()
            + self
                .templates
                .iter()
                .map(|t| t.len() + TEMPLATE_ENTRY_OVERHEAD)
                .sum::<usize>()
    }

    /// compressed_size / original_size; 1.0 for an empty original
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.compressed_size() as f64 / self.original_size as f64
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.mode == CompressionMode::Compressed
    }

    /// Rebuild the content. Stripped sections are not recoverable.
    pub fn decompress(&self) -> String {
        if self.templates.is_empty() {
            return self.body.clone();
        }

        let mut out = String::with_capacity(self.original_size);
        let mut rest = self.body.as_str();
        while let Some(start) = rest.find(TOKEN_OPEN) {
            out.push_str(&rest[..start]);
            let after = &rest[start + TOKEN_OPEN.len_utf8()..];
            let resolved = after.find(TOKEN_CLOSE).and_then(|end| {
                after[..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| self.templates.get(index))
                    .map(|template| (template, end))
            });
            match resolved {
                Some((template, end)) => {
                    out.push_str(template);
                    rest = &after[end + TOKEN_CLOSE.len_utf8()..];
                }
                None => {
                    out.push(TOKEN_OPEN);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Stateless compressor; safe to share across tasks
#[derive(Debug, Clone, Default)]
pub struct CompressionEngine {
    config: CompressionConfig,
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    pub fn compress(&self, payload: &str, size_class: SizeClass) -> CompressedPayload {
        if !size_class.is_compressible() {
            return CompressedPayload::raw(payload.to_string(), CompressionMode::Bypassed);
        }

        let stripped = self.strip_only(payload);
        let stripped_bytes = payload.len() - stripped.len();
        let (body, templates) = self.substitute_templates(&stripped);

        let compressed = CompressedPayload {
            body,
            templates,
            mode: CompressionMode::Compressed,
            original_size: payload.len(),
            stripped_bytes,
        };

        fail_closed(payload, compressed)
    }

    /// Apply only the pattern-stripping pass
    pub fn strip_only(&self, payload: &str) -> String {
        let mut current = payload.to_string();
        for (open, close) in &self.config.strip_delimiters {
            current = strip_spans(&current, open, close);
        }
        current
    }

    fn substitute_templates(&self, content: &str) -> (String, Vec<String>) {
        if content.contains(TOKEN_OPEN) || content.contains(TOKEN_CLOSE) {
            return (content.to_string(), Vec::new());
        }

        let lines: Vec<(&str, &str)> = content
            .split_inclusive('\n')
            .map(|line| match line.strip_suffix('\n') {
                Some(text) => (text, "\n"),
                None => (line, ""),
            })
            .collect();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        for (text, _) in &lines {
            if text.trim().len() < self.config.min_fragment_len {
                continue;
            }
            let count = counts.entry(*text).or_insert(0);
            if *count == 0 {
                first_seen.push(*text);
            }
            *count += 1;
        }

        let mut table: HashMap<&str, usize> = HashMap::new();
        let mut templates = Vec::new();
        for text in first_seen {
            let count = counts[text];
            if count < self.config.min_occurrences {
                continue;
            }
            let token_len = token(templates.len()).len();
            let saved = count * text.len();
            let cost = count * token_len + text.len() + TEMPLATE_ENTRY_OVERHEAD;
            if saved > cost {
                table.insert(text, templates.len());
                templates.push(text.to_string());
            }
        }

        if templates.is_empty() {
            return (content.to_string(), templates);
        }

        let mut body = String::with_capacity(content.len());
        for (text, newline) in lines {
            match table.get(text) {
                Some(index) => body.push_str(&token(*index)),
                None => body.push_str(text),
            }
            body.push_str(newline);
        }
        (body, templates)
    }
}

fn overflow(candidate: &CompressedPayload) -> Option<ModlinkError> {
    let ratio = candidate.compression_ratio();
    (ratio > 1.0).then(|| ModlinkError::CompressionOverflow {
        original_size: candidate.original_size,
        compressed_size: candidate.compressed_size(),
        ratio,
    })
}

/// Keep the candidate only if it is not larger than the original
fn fail_closed(original: &str, candidate: CompressedPayload) -> CompressedPayload {
    if let Some(overflow) = overflow(&candidate) {
        warn!("{}; keeping original payload", overflow);
        return CompressedPayload::raw(original.to_string(), CompressionMode::FailedClosed);
    }

    debug!(
        "Compressed {} -> {} bytes (ratio {:.3}, {} templates)",
        candidate.original_size,
        candidate.compressed_size(),
        candidate.compression_ratio(),
        candidate.templates.len()
    );
    candidate
}

fn token(index: usize) -> String {
    format!("{}{}{}", TOKEN_OPEN, index, TOKEN_CLOSE)
}

/// Remove every `open ... close` span. An unterminated opener is kept verbatim.
fn strip_spans(input: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(open) {
        let after_open = &rest[start + open.len()..];
        match after_open.find(close) {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &after_open[end + close.len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> CompressionEngine {
        CompressionEngine::default()
    }

    #[test]
    fn test_small_is_bypassed() {
        let payload = "<!-- note --> keep everything";
        let out = engine().compress(payload, SizeClass::Small);
        assert_eq!(out.mode, CompressionMode::Bypassed);
        assert_eq!(out.body, payload);
        assert_eq!(out.compression_ratio(), 1.0);
    }

    #[test]
    fn test_strip_spans() {
        assert_eq!(strip_spans("a<!--x-->b<!--y-->c", "<!--", "-->"), "abc");
        assert_eq!(strip_spans("a /* open only", "/*", "*/"), "a /* open only");
        assert_eq!(strip_spans("", "/*", "*/"), "");
    }

    #[test]
    fn test_thirty_percent_comments_gives_ratio_point_seven() {
        let mut payload = String::new();
        for i in 0..100 {
            if i % 10 < 3 {
                // 100 bytes including delimiters
                payload.push_str("<!--");
                payload.push_str(&"c".repeat(93));
                payload.push_str("-->");
            } else {
                let head = format!("line {:03} ", i);
                payload.push_str(&head);
                payload.push_str(&"b".repeat(99 - head.len()));
                payload.push('\n');
            }
        }
        assert_eq!(payload.len(), 10_000);

        let out = engine().compress(&payload, SizeClass::Large);
        assert_eq!(out.mode, CompressionMode::Compressed);
        assert!(out.templates.is_empty());
        assert!((out.compression_ratio() - 0.7).abs() < 0.01);
        assert_eq!(out.stripped_bytes, 3_000);
    }

    #[test]
    fn test_templates_round_trip() {
        let repeated = "    - shared section header with enough characters";
        let mut payload = String::new();
        for i in 0..6 {
            payload.push_str(repeated);
            payload.push('\n');
            payload.push_str(&format!("unique body {i}\n"));
            payload.push_str("/* drop me */");
        }
        let engine = engine();
        let out = engine.compress(&payload, SizeClass::Medium);

        assert_eq!(out.templates, vec![repeated.to_string()]);
        assert!(out.compression_ratio() < 1.0);
        assert_eq!(out.decompress(), engine.strip_only(&payload));
    }

    #[test]
    fn test_no_gain_keeps_content() {
        let payload = "short text without markers";
        let out = engine().compress(payload, SizeClass::Medium);
        assert_eq!(out.decompress(), payload);
        assert_eq!(out.compression_ratio(), 1.0);
    }

    #[test]
    fn test_overflow_fails_closed() {
        let original = "tiny";
        let candidate = CompressedPayload {
            body: original.to_string(),
            templates: vec!["padding that only adds bytes".to_string()],
            mode: CompressionMode::Compressed,
            original_size: original.len(),
            stripped_bytes: 0,
        };
        match overflow(&candidate) {
            Some(ModlinkError::CompressionOverflow {
                original_size,
                compressed_size,
                ratio,
            }) => {
                assert_eq!(original_size, 4);
                assert_eq!(compressed_size, candidate.compressed_size());
                assert!(ratio > 1.0);
            }
            other => panic!("Expected overflow, got {other:?}"),
        }
        let out = fail_closed(original, candidate);
        assert_eq!(out.mode, CompressionMode::FailedClosed);
        assert_eq!(out.body, original);
        assert!(out.templates.is_empty());
        assert!(!out.is_compressed());
    }

    #[test]
    fn test_sentinel_in_payload_skips_templates() {
        let repeated = "a line that repeats and is definitely long enough";
        let payload = format!("{repeated}\n{repeated}\n{repeated}\n\u{E000}");
        let out = engine().compress(&payload, SizeClass::Large);
        assert!(out.templates.is_empty());
        assert_eq!(out.decompress(), payload);
    }

    #[test]
    fn test_invalid_config() {
        let config = CompressionConfig {
            strip_delimiters: vec![("".into(), "x".into())],
            ..Default::default()
        };
        assert!(CompressionEngine::new(config).is_err());
    }
}
