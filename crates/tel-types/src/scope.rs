use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Partition key isolating one append-only chain from another.
///
/// Typical scopes are an organization id (`"org-1"`) or a compliance
/// framework id (`"soc2:org-1"`). Chains in different scopes never
/// cross-link: sequence numbers, predecessor hashes and locks are all
/// per scope.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainScope(String);

impl ChainScope {
    /// Maximum scope length in bytes. Keeps the hex [`file_stem`](Self::file_stem)
    /// plus a segment extension under the usual 255-byte file name limit.
    pub const MAX_LEN: usize = 120;

    /// Create a scope, rejecting empty names, overlong names and control
    /// characters.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::InvalidScope("scope must not be empty".into()));
        }
        if name.len() > Self::MAX_LEN {
            return Err(TypeError::InvalidScope(format!(
                "scope exceeds {} bytes",
                Self::MAX_LEN
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(TypeError::InvalidScope(
                "scope must not contain control characters".into(),
            ));
        }
        Ok(Self(name))
    }

    /// The scope name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe stem for this scope (hex of the UTF-8 bytes).
    pub fn file_stem(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Inverse of [`ChainScope::file_stem`].
    pub fn from_file_stem(stem: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(stem).map_err(|e| TypeError::InvalidScope(e.to_string()))?;
        let name = String::from_utf8(bytes).map_err(|e| TypeError::InvalidScope(e.to_string()))?;
        Self::new(name)
    }
}

impl fmt::Debug for ChainScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainScope({})", self.0)
    }
}

impl fmt::Display for ChainScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChainScope {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChainScope {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ChainScope {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChainScope> for String {
    fn from(scope: ChainScope) -> Self {
        scope.0
    }
}
