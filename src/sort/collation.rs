//! Locale-aware orderings for text sort columns.

use std::{cmp::Ordering, fmt};

/// Ordering for text values that replaces plain byte comparison.
///
/// Two values that compare [`Ordering::Equal`] under a collator belong to the
/// same group, even when their bytes differ.
pub trait Collator: Send + Sync + fmt::Debug {
    /// Locale identifier reported in operator identifiers.
    fn locale(&self) -> &str;

    /// Compare two text values.
    fn compare(&self, left: &str, right: &str) -> Ordering;
}

/// Collation that ignores letter case using Unicode lower-case folding.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaseInsensitive;

impl Collator for CaseInsensitive {
    fn locale(&self) -> &str {
        "und-u-ks-level2"
    }

    fn compare(&self, left: &str, right: &str) -> Ordering {
        left.chars()
            .flat_map(char::to_lowercase)
            .cmp(right.chars().flat_map(char::to_lowercase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_folds_case() {
        let collator = CaseInsensitive;
        assert_eq!(collator.compare("Apple", "apple"), Ordering::Equal);
        assert_eq!(collator.compare("apple", "Banana"), Ordering::Less);
        assert_eq!(collator.compare("ÉTÉ", "été"), Ordering::Equal);
        // Byte order would put "Zebra" before "apple".
        assert_eq!(collator.compare("Zebra", "apple"), Ordering::Greater);
    }
}
