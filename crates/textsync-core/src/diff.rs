//! Diff extraction: turn a full-buffer edit into a positional operation.
//!
//! The extractor trims the longest common prefix and suffix of the two
//! snapshots and describes whatever is left as a single insert, delete or
//! replace. That is exact for one contiguous edit region (typing, deleting
//! a selection, pasting over a selection). Several disjoint edits in one
//! snapshot collapse into one replace spanning all of them; callers must
//! not rely on multi-region minimality.

use crate::operation::Operation;

/// Compute the operations that turn `old` into `new`.
///
/// Returns zero operations when the texts are equal and exactly one
/// otherwise.
pub fn extract(old: &str, new: &str) -> Vec<Operation> {
    if old == new {
        return Vec::new();
    }

    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let prefix = common_prefix(&old_chars, &new_chars);
    let suffix = common_suffix(&old_chars[prefix..], &new_chars[prefix..]);

    let deleted_len = old_chars.len() - prefix - suffix;
    let inserted: String = new_chars[prefix..new_chars.len() - suffix].iter().collect();

    let op = match (deleted_len > 0, !inserted.is_empty()) {
        (true, true) => Operation::replace(prefix, deleted_len, inserted),
        (true, false) => Operation::delete(prefix, deleted_len),
        (false, true) => Operation::insert(prefix, inserted),
        (false, false) => return Vec::new(),
    };

    vec![op]
}

fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Suffix length over the regions after the prefix, so the two scans
/// never overlap.
fn common_suffix(a: &[char], b: &[char]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply;
    use proptest::prelude::*;

    fn apply_all(old: &str, ops: &[Operation]) -> String {
        ops.iter()
            .fold(old.to_string(), |text, op| apply(&text, op).unwrap())
    }

    #[test]
    fn test_insert_in_middle() {
        let ops = extract("hello world", "hello there world");
        assert_eq!(ops, vec![Operation::insert(6, "there ")]);
    }

    #[test]
    fn test_replace_word() {
        let ops = extract("cat sat", "cat ran");
        assert_eq!(ops, vec![Operation::replace(4, 3, "ran")]);
    }

    #[test]
    fn test_pure_deletion() {
        let ops = extract("abcdef", "abef");
        assert_eq!(ops, vec![Operation::delete(2, 2)]);
    }

    #[test]
    fn test_no_change_yields_nothing() {
        assert!(extract("same", "same").is_empty());
        assert!(extract("", "").is_empty());
    }

    #[test]
    fn test_from_and_to_empty() {
        assert_eq!(extract("", "abc"), vec![Operation::insert(0, "abc")]);
        assert_eq!(extract("abc", ""), vec![Operation::delete(0, 3)]);
    }

    #[test]
    fn test_repeated_characters_do_not_overlap() {
        // Prefix eats "aa", suffix must not count the same chars again.
        assert_eq!(extract("aa", "aaa"), vec![Operation::insert(2, "a")]);
        assert_eq!(extract("aaa", "aa"), vec![Operation::delete(2, 1)]);
    }

    #[test]
    fn test_positions_count_chars_not_bytes() {
        let ops = extract("你好世界", "你好,世界");
        assert_eq!(ops, vec![Operation::insert(2, ",")]);
        assert_eq!(apply_all("你好世界", &ops), "你好,世界");
    }

    #[test]
    fn test_disjoint_edits_collapse_into_one_replace() {
        let ops = extract("abcdef", "Xbcdeg");
        assert_eq!(ops, vec![Operation::replace(0, 6, "Xbcdeg")]);
    }

    proptest! {
        #[test]
        fn prop_extract_round_trips(old in "\\PC{0,24}", new in "\\PC{0,24}") {
            let ops = extract(&old, &new);
            prop_assert!(ops.len() <= 1);
            prop_assert_eq!(apply_all(&old, &ops), new);
        }

        #[test]
        fn prop_extract_same_text_is_empty(text in "\\PC{0,32}") {
            prop_assert!(extract(&text, &text).is_empty());
        }

        #[test]
        fn prop_single_insert_is_recovered(
            base in "[a-c]{0,12}",
            insert in "[x-z]{1,4}",
            at in 0usize..13,
        ) {
            let at = at.min(base.len());
            let mut edited = base.clone();
            edited.insert_str(at, &insert);

            let ops = extract(&base, &edited);
            prop_assert_eq!(ops.len(), 1);
            prop_assert_eq!(ops[0].inserted().chars().count(), insert.len());
            prop_assert_eq!(ops[0].deleted_len(), 0);
        }
    }
}
