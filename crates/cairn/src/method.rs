//! Protocol methods and the 9-bit method mask.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Number of protocol methods; each owns one bit of a [`MethodSet`].
pub const METHOD_COUNT: usize = 9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Method {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
    Head = 5,
    Options = 6,
    Locate = 7,
    Define = 8,
}

impl Method {
    pub const ALL: [Method; METHOD_COUNT] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Head,
        Method::Options,
        Method::Locate,
        Method::Define,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u16 {
        1 << self.index()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Locate => "LOCATE",
            Method::Define => "DEFINE",
        }
    }

    /// Methods that write chunks, metadata or header references.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Method::Put | Method::Patch | Method::Delete | Method::Define
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

/// Compact bit-per-method set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodSet(u16);

impl MethodSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self((1 << METHOD_COUNT) - 1);

    /// Returns `None` when bits above the ninth are set.
    pub fn from_bits(bits: u16) -> Option<Self> {
        (bits & !Self::ALL.0 == 0).then_some(Self(bits))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }

    pub fn with(self, method: Method) -> Self {
        Self(self.0 | method.bit())
    }

    pub fn without(self, method: Method) -> Self {
        Self(self.0 & !method.bit())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether any bit outside the nine method bits is set.
    pub fn is_valid(self) -> bool {
        self.0 & !Self::ALL.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Method> {
        Method::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl FromIterator<Method> for MethodSet {
    fn from_iter<I: IntoIterator<Item = Method>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Display for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Method::as_str).collect();
        f.write_str(&names.join(", "))
    }
}
