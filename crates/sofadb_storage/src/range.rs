//! Key ranges over ordered byte keys.

use std::ops::Bound;

/// A contiguous range of byte keys.
///
/// Keys compare bytewise. Ranges are used for cursors and bulk fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
}

impl KeyRange {
    /// A range covering every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range containing exactly one key.
    #[must_use]
    pub fn only(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// A range between two keys. `lower_open`/`upper_open` exclude the endpoint.
    #[must_use]
    pub fn between(
        lower: impl Into<Vec<u8>>,
        upper: impl Into<Vec<u8>>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: bound(lower.into(), lower_open),
            upper: bound(upper.into(), upper_open),
        }
    }

    /// Keys greater than (or equal to, unless `open`) `key`.
    #[must_use]
    pub fn lower_bound(key: impl Into<Vec<u8>>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Keys less than (or equal to, unless `open`) `key`.
    #[must_use]
    pub fn upper_bound(key: impl Into<Vec<u8>>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    /// Every key starting with `prefix`.
    #[must_use]
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        let prefix = prefix.into();
        let upper = match prefix_successor(&prefix) {
            Some(next) => Bound::Excluded(next),
            None => Bound::Unbounded,
        };
        Self {
            lower: Bound::Included(prefix),
            upper,
        }
    }

    /// Returns a copy of this range with the lower bound replaced.
    #[must_use]
    pub fn with_lower(&self, key: impl Into<Vec<u8>>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: self.upper.clone(),
        }
    }

    /// Returns a copy of this range with the upper bound replaced.
    #[must_use]
    pub fn with_upper(&self, key: impl Into<Vec<u8>>, open: bool) -> Self {
        Self {
            lower: self.lower.clone(),
            upper: bound(key.into(), open),
        }
    }

    /// Returns true if `key` falls inside the range.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.lower {
            Bound::Included(k) => key >= k.as_slice(),
            Bound::Excluded(k) => key > k.as_slice(),
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(k) => key <= k.as_slice(),
            Bound::Excluded(k) => key < k.as_slice(),
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Returns true if no key can satisfy the range.
    ///
    /// `BTreeMap::range` panics on inverted ranges, so callers check this first.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        }
    }

    /// Borrowed bounds suitable for `BTreeMap::range`.
    pub(crate) fn as_bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        (as_ref(&self.lower), as_ref(&self.upper))
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

fn bound(key: Vec<u8>, open: bool) -> Bound<Vec<u8>> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

fn as_ref(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Smallest key greater than every key with the given prefix.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contains_single_key() {
        let range = KeyRange::only(b"b".to_vec());
        assert!(range.contains(b"b"));
        assert!(!range.contains(b"a"));
        assert!(!range.contains(b"ba"));
    }

    #[test]
    fn prefix_range() {
        let range = KeyRange::prefix(b"ab".to_vec());
        assert!(range.contains(b"ab"));
        assert!(range.contains(b"ab\xff"));
        assert!(!range.contains(b"ac"));
        assert!(!range.contains(b"aa"));
    }

    #[test]
    fn prefix_of_max_bytes_is_unbounded_above() {
        let range = KeyRange::prefix(vec![0xff, 0xff]);
        assert!(range.contains(&[0xff, 0xff, 0x01]));
    }

    #[test]
    fn one_sided_bounds() {
        let below = KeyRange::upper_bound(b"m".to_vec(), true);
        assert!(below.contains(b"a"));
        assert!(!below.contains(b"m"));
        let above = KeyRange::lower_bound(b"m".to_vec(), false);
        assert!(above.contains(b"m"));
        assert!(!above.contains(b"l"));
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(KeyRange::between(b"b".to_vec(), b"a".to_vec(), false, false).is_empty());
        assert!(KeyRange::between(b"a".to_vec(), b"a".to_vec(), true, false).is_empty());
        assert!(!KeyRange::between(b"a".to_vec(), b"a".to_vec(), false, false).is_empty());
    }
}
