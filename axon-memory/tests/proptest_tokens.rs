//! Property tests for the approximate tokenizer and window trimming.

use axon_memory::{approximate_tokens, trim_to_limit};
use proptest::prelude::*;

proptest! {
    /// Appending bytes never decreases the token count.
    #[test]
    fn token_count_is_monotone_under_append(
        a in proptest::collection::vec(any::<u8>(), 0..512),
        b in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut joined = a.clone();
        joined.extend_from_slice(&b);
        prop_assert!(approximate_tokens(&a) <= approximate_tokens(&joined));
    }

    /// The count is a pure function of the bytes.
    #[test]
    fn token_count_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
        prop_assert_eq!(approximate_tokens(&bytes), approximate_tokens(&bytes));
    }

    /// Trimming always lands at or under the limit.
    #[test]
    fn trimmed_content_fits_limit(
        content in proptest::collection::vec(any::<u8>(), 0..2048),
        limit in 0usize..200,
    ) {
        let trimmed = trim_to_limit(content, limit);
        prop_assert!(approximate_tokens(&trimmed) <= limit);
    }

    /// Trimming only ever removes a prefix.
    #[test]
    fn trimmed_content_is_a_suffix(
        content in proptest::collection::vec(any::<u8>(), 0..2048),
        limit in 0usize..200,
    ) {
        let trimmed = trim_to_limit(content.clone(), limit);
        prop_assert!(trimmed.len() <= content.len());
        prop_assert_eq!(&content[content.len() - trimmed.len()..], &trimmed[..]);
    }

    /// ASCII text with words under the limit survives trimming untouched.
    #[test]
    fn short_text_is_untouched(text in "[a-z ]{0,40}") {
        let bytes = text.as_bytes().to_vec();
        let tokens = approximate_tokens(&bytes);
        let trimmed = trim_to_limit(bytes.clone(), tokens);
        prop_assert_eq!(trimmed, bytes);
    }
}
