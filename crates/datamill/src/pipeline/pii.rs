//! Personal-data detectors and redaction strategies.
//!
//! Detectors are plain regexes over free text. Credit card candidates must
//! also pass the Luhn checksum.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::catalog::PiiStrategy;
use crate::job::ParseTagError;

/// Hex characters kept from the SHA-256 digest by the hash strategy.
pub const HASH_PREFIX_LEN: usize = 16;

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap()
});
static RE_CREDIT_CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").unwrap());
static RE_SSN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static RE_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b")
        .unwrap()
});
static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?\(?\b\d{3}\)?[\s.-]?\d{3}[\s.-]\d{4}\b").unwrap()
});

/// Kind of personal data a detector looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    Email,
    CreditCard,
    Ssn,
    Ipv4,
    Phone,
}

impl PiiKind {
    /// Every kind, in the order detectors run. Longer digit patterns go
    /// before phone numbers so a card number is not half-redacted as a phone.
    pub const ALL: [PiiKind; 5] = [
        PiiKind::Email,
        PiiKind::CreditCard,
        PiiKind::Ssn,
        PiiKind::Ipv4,
        PiiKind::Phone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PiiKind::Email => "email",
            PiiKind::CreditCard => "credit_card",
            PiiKind::Ssn => "ssn",
            PiiKind::Ipv4 => "ipv4",
            PiiKind::Phone => "phone",
        }
    }

    fn regex(&self) -> &'static Regex {
        match self {
            PiiKind::Email => &RE_EMAIL,
            PiiKind::CreditCard => &RE_CREDIT_CARD,
            PiiKind::Ssn => &RE_SSN,
            PiiKind::Ipv4 => &RE_IPV4,
            PiiKind::Phone => &RE_PHONE,
        }
    }

    fn accepts(&self, candidate: &str) -> bool {
        match self {
            PiiKind::CreditCard => luhn_valid(candidate),
            _ => true,
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PiiKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PiiKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseTagError::new("pii detector", s))
    }
}

/// Scans and redacts free text with a fixed set of detectors.
#[derive(Debug, Clone)]
pub struct PiiDetector {
    kinds: Vec<PiiKind>,
    mask: String,
}

impl PiiDetector {
    /// Detectors run in [`PiiKind::ALL`] order regardless of input order.
    pub fn new(kinds: &[PiiKind], mask: impl Into<String>) -> Self {
        let kinds = PiiKind::ALL
            .into_iter()
            .filter(|kind| kinds.contains(kind))
            .collect();
        Self {
            kinds,
            mask: mask.into(),
        }
    }

    pub fn mask(&self) -> &str {
        &self.mask
    }

    pub fn kinds(&self) -> &[PiiKind] {
        &self.kinds
    }

    /// Replaces every finding with the mask. Returns the redacted text and
    /// the number of findings.
    pub fn redact(&self, text: &str) -> (String, u64) {
        let mut current = text.to_string();
        let mut findings = 0u64;
        for kind in &self.kinds {
            let replaced = kind.regex().replace_all(&current, |caps: &Captures<'_>| {
                let matched = &caps[0];
                if kind.accepts(matched) {
                    findings += 1;
                    self.mask.clone()
                } else {
                    matched.to_string()
                }
            });
            current = replaced.into_owned();
        }
        (current, findings)
    }

    /// Counts findings without rewriting anything.
    pub fn scan(&self, text: &str) -> u64 {
        self.redact(text).1
    }
}

/// Applies a field's PII strategy. `None` means the field is dropped.
pub fn apply_strategy(strategy: PiiStrategy, value: &Value, mask: &str) -> Option<Value> {
    if value.is_null() {
        return match strategy {
            PiiStrategy::Remove => None,
            _ => Some(Value::Null),
        };
    }
    match strategy {
        PiiStrategy::Mask => Some(Value::String(mask.to_string())),
        PiiStrategy::Hash => Some(Value::String(hash_value(&value_text(value)))),
        PiiStrategy::Remove => None,
    }
}

/// Truncated hex SHA-256 of `text`.
pub fn hash_value(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_PREFIX_LEN);
    hex
}

/// Text form of a JSON value: strings unquoted, everything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
