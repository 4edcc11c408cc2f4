//! Applying operations to a buffer snapshot.
//!
//! Every kind is the same splice:
//! `buffer[..position] + inserted + buffer[position + deleted_len..]`.

use crate::operation::Operation;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("Operation out of range: position {position} + length {length} exceeds buffer length {buffer_len}")]
    OutOfRange {
        position: usize,
        length: usize,
        buffer_len: usize,
    },
}

pub type Result<T> = std::result::Result<T, ApplyError>;

/// Apply `op` to `buffer`, returning the new snapshot.
///
/// The input is never modified; on error the caller still holds the
/// unchanged buffer.
pub fn apply(buffer: &str, op: &Operation) -> Result<String> {
    let buffer_len = buffer.chars().count();
    let length = op.deleted_len();

    let end = op.position.checked_add(length);
    if op.position > buffer_len || end.is_none_or(|end| end > buffer_len) {
        return Err(ApplyError::OutOfRange {
            position: op.position,
            length,
            buffer_len,
        });
    }

    let start_byte = byte_offset(buffer, op.position);
    let end_byte = byte_offset(buffer, op.position + length);
    let inserted = op.inserted();

    let mut result = String::with_capacity(buffer.len() - (end_byte - start_byte) + inserted.len());
    result.push_str(&buffer[..start_byte]);
    result.push_str(inserted);
    result.push_str(&buffer[end_byte..]);
    Ok(result)
}

/// Byte offset of the `char_index`-th character (or the end of the string).
fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert() {
        assert_eq!(apply("hello", &Operation::insert(5, "!")).unwrap(), "hello!");
        assert_eq!(apply("hello", &Operation::insert(0, ">")).unwrap(), ">hello");
        assert_eq!(apply("", &Operation::insert(0, "x")).unwrap(), "x");
    }

    #[test]
    fn test_delete() {
        assert_eq!(apply("abcdef", &Operation::delete(2, 2)).unwrap(), "abef");
        assert_eq!(apply("abc", &Operation::delete(0, 3)).unwrap(), "");
    }

    #[test]
    fn test_replace() {
        assert_eq!(apply("cat sat", &Operation::replace(4, 3, "ran")).unwrap(), "cat ran");
    }

    #[test]
    fn test_multibyte_positions() {
        let text = "a中b";
        assert_eq!(apply(text, &Operation::delete(1, 1)).unwrap(), "ab");
        assert_eq!(apply(text, &Operation::insert(2, "文")).unwrap(), "a中文b");
    }

    #[test]
    fn test_delete_past_end_is_out_of_range() {
        let buffer = "abcdef";
        let err = apply(buffer, &Operation::delete(5, 10)).unwrap_err();
        assert_eq!(
            err,
            ApplyError::OutOfRange {
                position: 5,
                length: 10,
                buffer_len: 6
            }
        );
        assert_eq!(buffer, "abcdef");
    }

    #[test]
    fn test_insert_past_end_is_out_of_range() {
        assert!(apply("abc", &Operation::insert(4, "x")).is_err());
    }

    #[test]
    fn test_overflowing_length_is_out_of_range() {
        assert!(apply("abc", &Operation::delete(1, usize::MAX)).is_err());
    }
}
