//! Core type definitions for SofaDB.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sequence number in a database's change log.
///
/// Sequence numbers start at 1, strictly increase in commit order and are
/// never reused. 0 means "before the first change".
pub type Seq = u64;

/// A document revision, written `"<pos>-<hash>"`.
///
/// Ordering compares generation first, then hash strings; this is the
/// ranking used to pick winning revisions among leaves of equal
/// deletion status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
    /// Generation number, 1 for a document's first revision.
    pub pos: u64,
    /// Content hash.
    pub hash: String,
}

impl Revision {
    /// Creates a revision from its parts.
    #[must_use]
    pub fn new(pos: u64, hash: impl Into<String>) -> Self {
        Self {
            pos,
            hash: hash.into(),
        }
    }

    /// Parses a revision string.
    ///
    /// # Errors
    ///
    /// Returns `invalid_rev` unless the input is `<pos>-<hash>` with
    /// `pos >= 1` and a non-empty hash.
    pub fn parse(rev: &str) -> CoreResult<Self> {
        let (pos, hash) = rev
            .split_once('-')
            .ok_or_else(|| CoreError::invalid_rev(rev))?;
        let pos: u64 = pos.parse().map_err(|_| CoreError::invalid_rev(rev))?;
        if pos == 0 || hash.is_empty() {
            return Err(CoreError::invalid_rev(rev));
        }
        Ok(Self::new(pos, hash))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pos, self.hash)
    }
}

impl FromStr for Revision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Revision {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.to_string()
    }
}

/// Prefix of non-versioned local document ids.
pub const LOCAL_PREFIX: &str = "_local/";

/// Prefix of design document ids.
pub const DESIGN_PREFIX: &str = "_design/";

/// Returns true for `_local/` ids.
#[must_use]
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_PREFIX)
}
