//! Approximate token accounting for the context window.
//!
//! The heuristic is deliberately cheap and model-agnostic: roughly 1.3
//! tokens per word plus 0.5 per punctuation byte. Counting happens at the
//! byte level so the estimate is deterministic and monotone under append
//! for arbitrary byte strings: a multi-byte UTF-8 sequence split across
//! two appends never lowers the count, because every non-ASCII byte is
//! classed as punctuation.

/// Approximate token count of `bytes`.
///
/// `tokens = (13 × words + 5 × nonAlnum) / 10`, where a word is a maximal
/// run of non-whitespace bytes and `nonAlnum` counts bytes that are
/// neither ASCII alphanumeric nor ASCII whitespace.
pub fn approximate_tokens(bytes: &[u8]) -> usize {
    let mut words = 0usize;
    let mut non_alnum = 0usize;
    let mut in_word = false;
    for &byte in bytes {
        if byte.is_ascii_whitespace() {
            in_word = false;
        } else {
            if !in_word {
                words += 1;
                in_word = true;
            }
            if !byte.is_ascii_alphanumeric() {
                non_alnum += 1;
            }
        }
    }
    (words * 13 + non_alnum * 5) / 10
}

/// Trim `content` from the front until it fits under `max_tokens`.
///
/// Finds the smallest front cut whose suffix fits (the suffix count is
/// nonincreasing in the cut position, so binary search applies), then
/// snaps the cut forward to the nearest preferred boundary: a sentence
/// end, a blank line, a newline, a space, or, failing all of those, the
/// exact byte position.
pub fn trim_to_limit(content: Vec<u8>, max_tokens: usize) -> Vec<u8> {
    if approximate_tokens(&content) <= max_tokens {
        return content;
    }
    // Invariant: the suffix from `hi` fits, the suffix from `lo` does not.
    let mut lo = 0usize;
    let mut hi = content.len();
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if approximate_tokens(&content[mid..]) <= max_tokens {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    let cut = snap_to_boundary(&content, hi);
    content[cut..].to_vec()
}

const SENTENCE_ENDS: [&[u8]; 3] = [b". ", b"! ", b"? "];

fn snap_to_boundary(content: &[u8], cut: usize) -> usize {
    let tail = &content[cut..];
    let sentence = SENTENCE_ENDS
        .iter()
        .filter_map(|end| find(tail, end).map(|i| i + end.len()))
        .min();
    if let Some(i) = sentence {
        return cut + i;
    }
    if let Some(i) = find(tail, b"\n\n") {
        return cut + i + 2;
    }
    if let Some(i) = find(tail, b"\n") {
        return cut + i + 1;
    }
    if let Some(i) = find(tail, b" ") {
        return cut + i + 1;
    }
    cut
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero_tokens() {
        assert_eq!(approximate_tokens(b""), 0);
    }

    #[test]
    fn words_weigh_1_3() {
        // 10 plain words: 130 tenths = 13 tokens
        let text = "one two three four five six seven eight nine ten";
        assert_eq!(approximate_tokens(text.as_bytes()), 13);
    }

    #[test]
    fn punctuation_weighs_0_5() {
        // 2 words + 2 punctuation bytes: (26 + 10) / 10 = 3
        assert_eq!(approximate_tokens(b"hello, world!"), 3);
    }

    #[test]
    fn whitespace_alone_counts_nothing() {
        assert_eq!(approximate_tokens(b" \n\t  \n"), 0);
    }

    #[test]
    fn count_is_deterministic() {
        let bytes = "The quick brown fox, jumps! Over the lazy dog?".as_bytes();
        assert_eq!(approximate_tokens(bytes), approximate_tokens(bytes));
    }

    #[test]
    fn trim_noop_under_limit() {
        let content = b"short enough".to_vec();
        let trimmed = trim_to_limit(content.clone(), 100);
        assert_eq!(trimmed, content);
    }

    #[test]
    fn trim_cuts_from_front() {
        let mut content = Vec::new();
        for i in 0..200 {
            content.extend_from_slice(format!("word{i} ").as_bytes());
        }
        content.extend_from_slice(b"tail-marker");

        let trimmed = trim_to_limit(content, 20);
        assert!(approximate_tokens(&trimmed) <= 20);
        assert!(trimmed.ends_with(b"tail-marker"));
    }

    #[test]
    fn trim_prefers_sentence_boundary() {
        let mut content = Vec::new();
        for _ in 0..100 {
            content.extend_from_slice(b"Some sentence here. ");
        }
        content.extend_from_slice(b"Final words");

        let trimmed = trim_to_limit(content, 30);
        assert!(approximate_tokens(&trimmed) <= 30);
        // the cut landed just after a ". " boundary
        assert!(trimmed.starts_with(b"Some") || trimmed.starts_with(b"Final"));
    }

    #[test]
    fn trim_falls_back_to_space_boundary() {
        let mut content = Vec::new();
        for i in 0..300 {
            content.extend_from_slice(format!("w{i} ").as_bytes());
        }

        let trimmed = trim_to_limit(content, 25);
        assert!(approximate_tokens(&trimmed) <= 25);
        assert!(trimmed.starts_with(b"w"));
    }

    #[test]
    fn trim_exact_byte_when_no_boundary() {
        // one long punctuation run: no sentence end, newline, or space
        let content = vec![b'#'; 100];
        let trimmed = trim_to_limit(content, 10);
        assert!(!trimmed.is_empty());
        assert!(trimmed.len() < 100);
        assert!(approximate_tokens(&trimmed) <= 10);
    }
}
