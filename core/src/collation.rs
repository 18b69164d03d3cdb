//! Term ordering used by dictionaries and by the dictionary merge.
//!
//! The same collation must be used when a dictionary is built, saved, merged
//! and loaded, otherwise binary search and prefix runs break.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collation {
    /// Plain byte-wise string order.
    #[default]
    Binary,
    /// Orders by lowercased text first, then byte-wise, so distinct strings never compare equal.
    CaseInsensitive,
}

impl Collation {
    pub fn name(&self) -> &'static str {
        match self {
            Collation::Binary => "binary",
            Collation::CaseInsensitive => "case-insensitive",
        }
    }

    /// Total order over term names.
    pub fn compare(&self, left: &str, right: &str) -> Ordering {
        match self {
            Collation::Binary => left.cmp(right),
            Collation::CaseInsensitive => self
                .compare_primary(left, right)
                .then_with(|| left.cmp(right)),
        }
    }

    /// Order ignoring the byte-wise tie-break. Entries sharing a prefix form a
    /// contiguous run under this order.
    pub fn compare_primary(&self, left: &str, right: &str) -> Ordering {
        self.fold(left).cmp(&self.fold(right))
    }

    pub fn starts_with(&self, text: &str, prefix: &str) -> bool {
        self.fold(text).starts_with(self.fold(prefix).as_ref())
    }

    fn fold<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            Collation::Binary => Cow::Borrowed(text),
            Collation::CaseInsensitive => {
                if text.chars().any(char::is_uppercase) {
                    Cow::Owned(text.to_lowercase())
                } else {
                    Cow::Borrowed(text)
                }
            }
        }
    }
}

impl FromStr for Collation {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "binary" => Ok(Collation::Binary),
            "case-insensitive" => Ok(Collation::CaseInsensitive),
            _ => Err(Error::InvalidParameter(format!("unrecognized collation: {name}"))),
        }
    }
}
