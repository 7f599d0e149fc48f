//! The box message type with typed accessors.
//!
//! A box is one framed protocol message: an ordered mapping from short
//! string keys to byte-string values. Insertion order is preserved on the
//! wire; lookup is by key; keys are unique within a box.
//!
//! Control keys classify a box:
//! - `_command` plus optional `_ask` makes a *request*
//! - `_answer` without `_command` makes an *answer*
//! - `_answer` plus `_error` makes an *error answer*
//!
//! # Example
//!
//! ```
//! use peerwire::wire::WireBox;
//!
//! let mut bx = WireBox::request("source-ip", Some(1));
//! assert!(bx.is_request());
//! assert_eq!(bx.command(), Some("source-ip"));
//! assert_eq!(bx.ask_id(), Some(1));
//!
//! bx.insert("ip", &b"4.3.2.1"[..]).unwrap();
//! assert_eq!(bx.get("ip"), Some(&b"4.3.2.1"[..]));
//! ```

use bytes::Bytes;

use crate::error::{Result, WireError};

/// Control key carrying the command name of a request.
pub const COMMAND_KEY: &str = "_command";
/// Control key carrying the correlation id of a request expecting an answer.
pub const ASK_KEY: &str = "_ask";
/// Control key carrying the correlation id of an answer.
pub const ANSWER_KEY: &str = "_answer";
/// Control key naming the error on an error answer.
pub const ERROR_KEY: &str = "_error";

/// Maximum key length in bytes.
pub const MAX_KEY_SIZE: usize = 255;
/// Maximum value length in bytes (u16 length prefix).
pub const MAX_VALUE_SIZE: usize = u16::MAX as usize;

/// One framed protocol message: an ordered key to byte-string record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireBox {
    entries: Vec<(String, Bytes)>,
}

impl WireBox {
    /// Create an empty box.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create a request box for the named command, with an ask id when an
    /// answer is expected.
    pub fn request(command: &str, ask_id: Option<u64>) -> Self {
        let mut bx = Self::new();
        bx.push_control(COMMAND_KEY, Bytes::copy_from_slice(command.as_bytes()));
        if let Some(id) = ask_id {
            bx.push_control(ASK_KEY, Bytes::from(id.to_string()));
        }
        bx
    }

    /// Create an answer box bound to the given ask id.
    pub fn answer(answer_id: u64) -> Self {
        let mut bx = Self::new();
        bx.push_control(ANSWER_KEY, Bytes::from(answer_id.to_string()));
        bx
    }

    /// Create an error answer bound to the given ask id, naming the error.
    pub fn error(answer_id: u64, error_name: &str) -> Self {
        let mut bx = Self::answer(answer_id);
        bx.push_control(ERROR_KEY, Bytes::copy_from_slice(error_name.as_bytes()));
        bx
    }

    /// Append an entry, enforcing key uniqueness and size limits.
    pub fn insert(&mut self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        if key.is_empty() {
            return Err(WireError::MalformedBox("empty key".into()));
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(WireError::MalformedBox(format!(
                "key exceeds {} bytes",
                MAX_KEY_SIZE
            )));
        }
        let value = value.into();
        if value.len() > MAX_VALUE_SIZE {
            return Err(WireError::MalformedBox(format!(
                "value for {:?} exceeds {} bytes",
                key, MAX_VALUE_SIZE
            )));
        }
        if self.contains(key) {
            return Err(WireError::MalformedBox(format!("duplicate key: {:?}", key)));
        }
        self.entries.push((key.to_string(), value));
        Ok(())
    }

    // Control keys are distinct literals; uniqueness holds by construction.
    fn push_control(&mut self, key: &'static str, value: Bytes) {
        self.entries.push((key.to_string(), value));
    }

    /// Append an already-validated decoded entry.
    pub(crate) fn push_decoded(&mut self, key: String, value: Bytes) {
        self.entries.push((key, value));
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the box has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// The command name, if this box carries one.
    pub fn command(&self) -> Option<&str> {
        self.get(COMMAND_KEY).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// The ask id of a request expecting an answer.
    pub fn ask_id(&self) -> Option<u64> {
        parse_decimal(self.get(ASK_KEY)?)
    }

    /// The answer id of an answer or error box.
    pub fn answer_id(&self) -> Option<u64> {
        parse_decimal(self.get(ANSWER_KEY)?)
    }

    /// The wire error name of an error box.
    pub fn error_name(&self) -> Option<&str> {
        self.get(ERROR_KEY).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Check if this box is a request.
    pub fn is_request(&self) -> bool {
        self.contains(COMMAND_KEY)
    }

    /// Check if this box is an answer (success or error).
    pub fn is_answer(&self) -> bool {
        self.contains(ANSWER_KEY) && !self.contains(COMMAND_KEY)
    }

    /// Check if this box is an error answer.
    pub fn is_error(&self) -> bool {
        self.is_answer() && self.contains(ERROR_KEY)
    }
}

fn parse_decimal(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_classification() {
        let bx = WireBox::request("listen", Some(12));
        assert!(bx.is_request());
        assert!(!bx.is_answer());
        assert_eq!(bx.command(), Some("listen"));
        assert_eq!(bx.ask_id(), Some(12));
        assert_eq!(bx.answer_id(), None);
    }

    #[test]
    fn test_request_without_ask() {
        let bx = WireBox::request("choke", None);
        assert!(bx.is_request());
        assert_eq!(bx.ask_id(), None);
    }

    #[test]
    fn test_answer_classification() {
        let bx = WireBox::answer(12);
        assert!(bx.is_answer());
        assert!(!bx.is_request());
        assert!(!bx.is_error());
        assert_eq!(bx.answer_id(), Some(12));
    }

    #[test]
    fn test_error_classification() {
        let bx = WireBox::error(12, "UnknownCommand");
        assert!(bx.is_answer());
        assert!(bx.is_error());
        assert_eq!(bx.error_name(), Some("UnknownCommand"));
    }

    #[test]
    fn test_insert_rejects_duplicate_key() {
        let mut bx = WireBox::new();
        bx.insert("ip", &b"1.2.3.4"[..]).unwrap();
        let err = bx.insert("ip", &b"5.6.7.8"[..]).unwrap_err();
        assert!(matches!(err, WireError::MalformedBox(_)));
        // first value untouched
        assert_eq!(bx.get("ip"), Some(&b"1.2.3.4"[..]));
    }

    #[test]
    fn test_insert_rejects_empty_and_oversized_key() {
        let mut bx = WireBox::new();
        assert!(bx.insert("", &b"x"[..]).is_err());
        let long_key = "k".repeat(MAX_KEY_SIZE + 1);
        assert!(bx.insert(&long_key, &b"x"[..]).is_err());
    }

    #[test]
    fn test_insert_rejects_oversized_value() {
        let mut bx = WireBox::new();
        let big = vec![0u8; MAX_VALUE_SIZE + 1];
        assert!(bx.insert("blob", big).is_err());
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut bx = WireBox::new();
        bx.insert("b", &b"2"[..]).unwrap();
        bx.insert("a", &b"1"[..]).unwrap();
        bx.insert("c", &b"3"[..]).unwrap();

        let keys: Vec<&str> = bx.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_non_decimal_ask_id_is_none() {
        let mut bx = WireBox::new();
        bx.insert(ASK_KEY, &b"not-a-number"[..]).unwrap();
        assert_eq!(bx.ask_id(), None);
    }
}
