//! Key classes: the alphabet, length limit and optional extra rule that
//! every key (and every shard prefix) must satisfy.

use crate::error::{Result, StorageError};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Longest key a class may admit. Index log entries store key lengths in 16 bits.
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

const DIGITS: &str = "0123456789";
const LOWER_HEX: &str = "0123456789abcdef";
const ALNUM: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Extra predicate applied after the alphabet and length checks.
#[derive(Clone)]
pub enum KeyRule {
    /// No extra constraint.
    Any,
    /// Length must be even (byte-derived hex keys).
    EvenLength,
    /// Length must be at least this many characters.
    MinLength(usize),
    /// Caller supplied predicate receiving the key and its length.
    Custom(Arc<dyn Fn(&str, usize) -> bool + Send + Sync>),
}

impl KeyRule {
    fn accepts(&self, key: &str, len: usize) -> bool {
        match self {
            KeyRule::Any => true,
            KeyRule::EvenLength => len % 2 == 0,
            KeyRule::MinLength(min) => len >= *min,
            KeyRule::Custom(check) => check(key, len),
        }
    }
}

impl fmt::Debug for KeyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRule::Any => write!(f, "Any"),
            KeyRule::EvenLength => write!(f, "EvenLength"),
            KeyRule::MinLength(min) => write!(f, "MinLength({})", min),
            KeyRule::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Validator describing which strings are acceptable keys.
///
/// The permitted characters are printable ASCII, kept sorted so that a
/// class can be persisted byte for byte and compared on reopen.
#[derive(Clone, Debug)]
pub struct KeyClass {
    limit: usize,
    chars: BTreeSet<u8>,
    rule: KeyRule,
}

impl KeyClass {
    /// Build a class from an explicit alphabet.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the limit is zero or above [`MAX_KEY_LEN`],
    /// the alphabet is empty, or it contains non-printable or non-ASCII
    /// characters.
    pub fn new(limit: usize, chars: &str) -> Result<Self> {
        if limit == 0 || limit > MAX_KEY_LEN {
            return Err(StorageError::ConfigError(format!(
                "key length limit must be within 1..={}, got {}",
                MAX_KEY_LEN, limit
            )));
        }
        Self::from_bytes(chars.as_bytes()).map(|class| class.with_limit(limit))
    }

    /// Build a class from a raw alphabet, as stored in a name directory header.
    pub fn from_bytes(chars: &[u8]) -> Result<Self> {
        if chars.is_empty() {
            return Err(StorageError::ConfigError(
                "key alphabet cannot be empty".to_string()
            ));
        }
        if let Some(bad) = chars.iter().find(|c| !c.is_ascii_graphic()) {
            return Err(StorageError::ConfigError(format!(
                "key alphabet contains unsupported character {:#04x}",
                bad
            )));
        }
        Ok(Self {
            limit: MAX_KEY_LEN,
            chars: chars.iter().copied().collect(),
            rule: KeyRule::Any,
        })
    }

    fn builtin(chars: &str) -> Self {
        Self {
            limit: MAX_KEY_LEN,
            chars: chars.bytes().collect(),
            rule: KeyRule::Any,
        }
    }

    /// Digits only.
    pub fn numeric() -> Self {
        Self::builtin(DIGITS)
    }

    /// ASCII letters and digits.
    pub fn alnum() -> Self {
        Self::builtin(ALNUM)
    }

    /// Lowercase hexadecimal.
    pub fn hex() -> Self {
        Self::builtin(LOWER_HEX)
    }

    /// Lowercase hexadecimal with an even number of digits.
    pub fn hex_even() -> Self {
        Self::hex().with_rule(KeyRule::EvenLength)
    }

    /// Dotted IPv4 addresses.
    pub fn ipv4() -> Self {
        Self::builtin("0123456789.")
    }

    /// Colon separated IPv6 addresses.
    pub fn ipv6() -> Self {
        Self::builtin("0123456789abcdef:")
    }

    /// Either address family.
    pub fn ip46() -> Self {
        Self::builtin("0123456789abcdef.:")
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_KEY_LEN);
        self
    }

    pub fn with_rule(mut self, rule: KeyRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permitted characters in ascending order.
    pub fn characters(&self) -> impl Iterator<Item = char> + '_ {
        self.chars.iter().map(|&c| c as char)
    }

    /// Permitted characters as raw bytes in ascending order.
    pub fn alphabet(&self) -> Vec<u8> {
        self.chars.iter().copied().collect()
    }

    pub fn alphabet_len(&self) -> usize {
        self.chars.len()
    }

    /// Full validation: non-empty, within the limit, every character permitted
    /// and the extra rule satisfied.
    pub fn check(&self, key: &str) -> bool {
        let len = key.len();
        if len == 0 || len > self.limit {
            return false;
        }
        self.check_chars(key) && self.rule.accepts(key, len)
    }

    /// Alphabet-only validation, used for prefixes that are not keys themselves.
    pub fn check_chars(&self, key: &str) -> bool {
        key.bytes().all(|c| self.chars.contains(&c))
    }

    /// `check`, turned into an `InvalidKey` error.
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.check(key) {
            Ok(())
        } else {
            Err(StorageError::InvalidKey { key: key.to_string() })
        }
    }
}

impl Default for KeyClass {
    fn default() -> Self {
        Self::alnum()
    }
}

/// Render bytes as a lowercase hex key, optionally in reverse byte order.
pub fn bytes_to_key(bytes: &[u8], reverse: bool) -> String {
    let mut parts: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    if reverse {
        parts.reverse();
    }
    parts.concat()
}
