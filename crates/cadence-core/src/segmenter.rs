//! Sentence segmentation bounded by an estimated token length.
//!
//! The downstream model has a fixed maximum context length, so no produced
//! unit may exceed the caller's `max_tokens_per_sentence`. Splitting happens
//! in three stages: sentence-ending punctuation first, clause boundaries for
//! oversized sentences, and finally a hard token boundary.

use crate::error::{CadenceError, CadenceResult};
use unicode_normalization::UnicodeNormalization;

/// One sentence-level span of input text with its estimated token length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSpan {
    /// The text of this span
    pub text: String,
    /// Estimated token length (words plus CJK codepoints)
    pub est_tokens: usize,
}

/// Split text into ordered sentence spans, none exceeding
/// `max_tokens_per_sentence` estimated tokens.
///
/// Input is NFKC-normalized and trimmed before splitting.
///
/// # Errors
///
/// Returns `SegmentationError` if the trimmed input is empty or contains no
/// segmentable content, and `ValidationError` if `max_tokens_per_sentence`
/// is zero.
pub fn segment(text: &str, max_tokens_per_sentence: usize) -> CadenceResult<Vec<SentenceSpan>> {
    if max_tokens_per_sentence == 0 {
        return Err(CadenceError::validation(
            "max_tokens_per_sentence must be greater than 0",
        ));
    }

    let normalized: String = text.nfkc().collect();
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Err(CadenceError::segmentation("input text is empty"));
    }

    let mut spans = Vec::new();
    for sentence in split_keeping_delimiters(trimmed, is_sentence_end) {
        let est = estimate_tokens(&sentence);
        if est == 0 {
            continue;
        }
        if est <= max_tokens_per_sentence {
            spans.push(SentenceSpan {
                text: sentence,
                est_tokens: est,
            });
            continue;
        }
        for clause in split_oversized(&sentence, max_tokens_per_sentence) {
            let est = estimate_tokens(&clause);
            if est > 0 {
                spans.push(SentenceSpan {
                    text: clause,
                    est_tokens: est,
                });
            }
        }
    }

    if spans.is_empty() {
        return Err(CadenceError::segmentation(
            "input text contains no segmentable content",
        ));
    }
    Ok(spans)
}

/// Estimate the token length of a text span.
///
/// Whitespace-delimited words count one token each; CJK codepoints count one
/// token each. This only needs to bound batch shape, not match the model's
/// tokenizer exactly.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for ch in text.chars() {
        if is_cjk(ch) {
            count += 1;
            in_word = false;
        } else if is_word_char(ch) {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
    }
    count
}

/// Split an oversized sentence at clause boundaries, greedily re-merging
/// adjacent clauses up to the limit, then hard-splitting any clause that is
/// still too long.
fn split_oversized(sentence: &str, max_tokens: usize) -> Vec<String> {
    let clauses = split_keeping_delimiters(sentence, is_clause_break);

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    for clause in clauses {
        let candidate = if current.is_empty() {
            clause.clone()
        } else {
            format!("{current} {clause}")
        };
        if estimate_tokens(&candidate) <= max_tokens {
            current = candidate;
        } else {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            current = clause;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    let mut out = Vec::new();
    for piece in pieces {
        if estimate_tokens(&piece) <= max_tokens {
            out.push(piece);
        } else {
            out.extend(hard_split(&piece, max_tokens));
        }
    }
    out
}

/// Split text into pieces, each keeping its trailing delimiter characters.
fn split_keeping_delimiters(text: &str, is_delimiter: fn(char) -> bool) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if is_delimiter(ch) {
            // Keep runs of trailing punctuation ("..." or "?!") together.
            while let Some(&next) = chars.peek() {
                if is_delimiter(next) {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let piece = current.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            current.clear();
        }
    }
    let piece = current.trim();
    if !piece.is_empty() {
        pieces.push(piece.to_string());
    }
    pieces
}

/// Cut text at hard token boundaries so no chunk exceeds `max_tokens`.
fn hard_split(text: &str, max_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    let mut in_word = false;
    for ch in text.chars() {
        let starts_token = if is_cjk(ch) {
            true
        } else if is_word_char(ch) {
            !in_word
        } else {
            false
        };
        if starts_token && count == max_tokens {
            let chunk = current.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            current.clear();
            count = 0;
            in_word = false;
        }
        if is_cjk(ch) {
            count += 1;
            in_word = false;
        } else if is_word_char(ch) {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
        }
        current.push(ch);
    }
    let chunk = current.trim();
    if !chunk.is_empty() && estimate_tokens(chunk) > 0 {
        chunks.push(chunk.to_string());
    }
    chunks
}

fn is_sentence_end(ch: char) -> bool {
    matches!(
        ch,
        '.' | '!' | '?' | ';' | '。' | '！' | '？' | '；' | '…' | '\n'
    )
}

fn is_clause_break(ch: char) -> bool {
    matches!(ch, ',' | ':' | '，' | '、' | '：' | '—')
}

fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3040..=0x30FF      // hiragana, katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF    // CJK compatibility ideographs
    )
}

fn is_word_char(ch: char) -> bool {
    !is_cjk(ch) && ch.is_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_three_sentences() {
        let spans = segment("A. B. C.", 100).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].text, "A.");
        assert_eq!(spans[1].text, "B.");
        assert_eq!(spans[2].text, "C.");
        assert!(spans.iter().all(|s| s.est_tokens == 1));
    }

    #[test]
    fn test_segment_preserves_order() {
        let spans = segment("First sentence here. Second one! Third?", 100).unwrap();
        assert_eq!(spans.len(), 3);
        assert!(spans[0].text.starts_with("First"));
        assert!(spans[1].text.starts_with("Second"));
        assert!(spans[2].text.starts_with("Third"));
    }

    #[test]
    fn test_segment_empty_input() {
        assert!(matches!(
            segment("", 100),
            Err(CadenceError::SegmentationError { .. })
        ));
        assert!(matches!(
            segment("   \t\n ", 100),
            Err(CadenceError::SegmentationError { .. })
        ));
    }

    #[test]
    fn test_segment_punctuation_only() {
        assert!(matches!(
            segment("... !!! ???", 100),
            Err(CadenceError::SegmentationError { .. })
        ));
    }

    #[test]
    fn test_segment_zero_limit_rejected() {
        assert!(matches!(
            segment("Hello.", 0),
            Err(CadenceError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_clause_split_for_long_sentence() {
        // Nine words with a comma boundary; limit of five forces a clause split.
        let spans = segment("one two three four five, six seven eight nine.", 5).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "one two three four five,");
        assert_eq!(spans[1].text, "six seven eight nine.");
        assert!(spans.iter().all(|s| s.est_tokens <= 5));
    }

    #[test]
    fn test_clause_pieces_remerge_up_to_limit() {
        // Three short clauses that fit pairwise under the limit.
        let spans = segment("a b, c d, e f.", 5).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "a b, c d,");
        assert_eq!(spans[1].text, "e f.");
    }

    #[test]
    fn test_hard_split_without_boundaries() {
        let text = "w1 w2 w3 w4 w5 w6 w7 w8 w9 w10.";
        let spans = segment(text, 4).unwrap();
        assert!(spans.len() >= 3);
        for span in &spans {
            assert!(span.est_tokens <= 4, "span too long: {:?}", span);
        }
        let rejoined: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert!(rejoined.join(" ").starts_with("w1 w2 w3 w4"));
    }

    #[test]
    fn test_no_span_ever_exceeds_limit() {
        let text = "Lorem ipsum dolor sit amet consectetur adipiscing elit sed do \
                    eiusmod tempor incididunt ut labore, et dolore magna aliqua. Ut \
                    enim ad minim veniam quis nostrud exercitation ullamco!";
        for limit in [3, 7, 12, 50] {
            let spans = segment(text, limit).unwrap();
            for span in &spans {
                assert!(span.est_tokens <= limit);
            }
        }
    }

    #[test]
    fn test_cjk_sentences() {
        let spans = segment("你好世界。今天天气不错！", 100).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "你好世界。");
        assert_eq!(spans[0].est_tokens, 4);
        assert_eq!(spans[1].est_tokens, 6);
    }

    #[test]
    fn test_cjk_hard_split() {
        let text = "一二三四五六七八九十";
        let spans = segment(text, 4).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].text, "一二三四");
        assert_eq!(spans[2].text, "九十");
    }

    #[test]
    fn test_estimate_tokens_mixed() {
        assert_eq!(estimate_tokens("hello world"), 2);
        assert_eq!(estimate_tokens("你好 world"), 3);
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("!!!"), 0);
        assert_eq!(estimate_tokens("it's a test"), 4);
    }

    #[test]
    fn test_trailing_punctuation_runs_kept_together() {
        let spans = segment("Really?! Yes...", 100).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Really?!");
        assert_eq!(spans[1].text, "Yes...");
    }

    #[test]
    fn test_restartable() {
        let a = segment("Alpha. Beta. Gamma.", 10).unwrap();
        let b = segment("Alpha. Beta. Gamma.", 10).unwrap();
        assert_eq!(a, b);
    }
}
