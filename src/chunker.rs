//! Size-bounded text chunking with paragraph/sentence/punctuation boundary
//! preference for both CJK and Latin scripts.

use serde::{Deserialize, Serialize};

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；', '、'];
const BREAK_PREFERENCE: &[char] = &[' ', ',', '，', '。', '.'];
const FORCE_SPLIT_SCAN_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub max_chunk_size: usize,
    pub overlap_size: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 450,
            overlap_size: 50,
            min_chunk_size: 20,
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x2E80..=0x2EFF   // CJK radicals
        | 0x3000..=0x303F // CJK punctuation
        | 0x3040..=0x30FF // hiragana/katakana
        | 0x3400..=0x4DBF // CJK extension A
        | 0x4E00..=0x9FFF // CJK unified ideographs
        | 0xF900..=0xFAFF // CJK compatibility ideographs
        | 0xFF00..=0xFFEF // fullwidth forms
    )
}

/// `zh` when CJK ideographs exceed 30% of non-whitespace characters.
pub fn detect_language(text: &str) -> Language {
    let mut non_ws = 0usize;
    let mut cjk = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        non_ws += 1;
        if is_cjk(c) {
            cjk += 1;
        }
    }
    if non_ws == 0 {
        return Language::En;
    }
    if (cjk as f64) / (non_ws as f64) > 0.3 {
        Language::Zh
    } else {
        Language::En
    }
}

/// `ceil(cjk_chars / 1.5 + other_chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    let estimate = (cjk as f64) / 1.5 + (other as f64) / 4.0;
    estimate.ceil() as usize
}

fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n").replace('\t', " ");

    let mut collapsed = String::with_capacity(unified.len());
    let mut newline_run = 0usize;
    for c in unified.chars() {
        if c == '\n' {
            newline_run += 1;
        } else {
            if newline_run > 0 {
                collapsed.push_str(if newline_run >= 2 { "\n\n" } else { "\n" });
                newline_run = 0;
            }
            collapsed.push(c);
        }
    }
    if newline_run > 0 {
        collapsed.push_str(if newline_run >= 2 { "\n\n" } else { "\n" });
    }

    collapsed
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Greedily pack `pieces` into chunks no longer than `max`, joining
/// consecutive pieces with `sep`.
fn greedy_fill(pieces: &[String], max: usize, sep: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if piece.is_empty() {
            continue;
        }
        let candidate_len = if current.is_empty() {
            char_len(piece)
        } else {
            char_len(&current) + char_len(sep) + char_len(piece)
        };
        if candidate_len <= max {
            if !current.is_empty() {
                current.push_str(sep);
            }
            current.push_str(piece);
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current = piece.clone();
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Hard-split a single oversized sentence, scanning back up to 50 characters
/// for a preferred break character and repeating `overlap_size` characters
/// from the tail of the previous piece into the next.
fn force_split(text: &str, cfg: &ChunkerConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= cfg.max_chunk_size {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let mut end = (start + cfg.max_chunk_size).min(chars.len());
        if end < chars.len() {
            let scan_start = end.saturating_sub(FORCE_SPLIT_SCAN_WINDOW).max(start + 1);
            let mut break_at = None;
            for i in (scan_start..end).rev() {
                if BREAK_PREFERENCE.contains(&chars[i]) {
                    break_at = Some(i + 1);
                    break;
                }
            }
            if let Some(b) = break_at {
                end = b;
            }
        }
        let piece: String = chars[start..end].iter().collect();
        out.push(piece);
        if end >= chars.len() {
            break;
        }
        let next_start = end.saturating_sub(cfg.overlap_size);
        start = if next_start > start { next_start } else { end };
    }
    out
}

fn split_oversized_paragraph(paragraph: &str, cfg: &ChunkerConfig) -> Vec<String> {
    let sentences = split_sentences(paragraph);
    let mut chunks = Vec::new();
    let mut pending: Vec<String> = Vec::new();

    for sentence in sentences {
        if char_len(&sentence) > cfg.max_chunk_size {
            chunks.extend(greedy_fill(&pending, cfg.max_chunk_size, " "));
            pending.clear();
            chunks.extend(force_split(&sentence, cfg));
        } else {
            pending.push(sentence);
        }
    }
    chunks.extend(greedy_fill(&pending, cfg.max_chunk_size, " "));
    chunks
}

/// Splits `text` into chunks bounded by `cfg.min_chunk_size..=cfg.max_chunk_size`
/// characters, preferring paragraph then sentence then punctuation boundaries.
/// Never fails: empty input yields an empty list.
pub fn chunk(text: &str, cfg: &ChunkerConfig) -> Vec<String> {
    let normalized = normalize(text);
    if normalized.trim().is_empty() {
        return Vec::new();
    }

    let paragraphs: Vec<&str> = normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut pieces: Vec<String> = Vec::new();
    let mut oversized_runs: Vec<String> = Vec::new();

    // Paragraphs are greedily packed together; an oversized paragraph is
    // flushed through the sentence splitter on its own so its sub-chunks
    // don't silently absorb neighboring paragraphs.
    let mut chunks = Vec::new();
    for paragraph in paragraphs {
        if char_len(paragraph) > cfg.max_chunk_size {
            chunks.extend(greedy_fill(&pieces, cfg.max_chunk_size, "\n\n"));
            pieces.clear();
            oversized_runs.extend(split_oversized_paragraph(paragraph, cfg));
            chunks.append(&mut oversized_runs);
        } else {
            pieces.push(paragraph.to_string());
        }
    }
    chunks.extend(greedy_fill(&pieces, cfg.max_chunk_size, "\n\n"));

    if chunks.len() > 1 {
        if let Some(last) = chunks.last() {
            if char_len(last) < cfg.min_chunk_size {
                chunks.pop();
            }
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        let cfg = ChunkerConfig::default();
        assert!(chunk("", &cfg).is_empty());
        assert!(chunk("   \n\n  ", &cfg).is_empty());
    }

    #[test]
    fn short_input_is_a_single_chunk() {
        let cfg = ChunkerConfig::default();
        let out = chunk("A short sentence about surface codes.", &cfg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], "A short sentence about surface codes.");
    }

    #[test]
    fn every_chunk_respects_max_size() {
        let cfg = ChunkerConfig::default();
        let paragraph = "word ".repeat(400);
        let out = chunk(&paragraph, &cfg);
        assert!(!out.is_empty());
        for c in &out {
            assert!(char_len(c) <= cfg.max_chunk_size, "chunk too long: {c}");
        }
    }

    #[test]
    fn paragraphs_are_greedily_packed() {
        let cfg = ChunkerConfig::default();
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let out = chunk(text, &cfg);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("First paragraph."));
        assert!(out[0].contains("Third paragraph."));
    }

    #[test]
    fn normalize_collapses_excess_newlines() {
        let cfg = ChunkerConfig::default();
        let text = "Para one.\n\n\n\n\nPara two.";
        let out = chunk(text, &cfg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], "Para one.\n\nPara two.");
    }

    #[test]
    fn force_split_respects_overlap() {
        let cfg = ChunkerConfig {
            max_chunk_size: 50,
            overlap_size: 10,
            min_chunk_size: 5,
        };
        let long_sentence = "x".repeat(200) + ".";
        let out = chunk(&long_sentence, &cfg);
        assert!(out.len() > 1);
        for c in &out {
            assert!(char_len(c) <= cfg.max_chunk_size);
        }
    }

    #[test]
    fn drops_short_final_piece_unless_only_piece() {
        let cfg = ChunkerConfig {
            max_chunk_size: 30,
            overlap_size: 5,
            min_chunk_size: 20,
        };
        let text = "word ".repeat(10) + "\n\n" + "x";
        let out = chunk(&text, &cfg);
        assert!(out.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn detect_language_zh_for_mostly_cjk() {
        assert_eq!(detect_language("量子纠错与表面码是重要的研究方向"), Language::Zh);
    }

    #[test]
    fn detect_language_en_for_latin_text() {
        assert_eq!(
            detect_language("Quantum error correction via surface codes"),
            Language::En
        );
    }

    #[test]
    fn estimate_tokens_is_nonzero_for_nonempty_text() {
        assert!(estimate_tokens("hello world") > 0);
        assert_eq!(estimate_tokens(""), 0);
    }
}
