//! Compact encoding of fragment index sets.
//!
//! A set of positive integers is encoded as `;`-separated tokens, each either
//! a single integer (`"7"`) or an inclusive range (`"3-9"`), in ascending,
//! non-overlapping order. The leader produces one set per run by querying the
//! catalog; the partitioner then narrows it twice, once per process and once
//! per worker thread.

use std::fmt;
use std::str::FromStr;

use cbf_common::{CbfError, Result};

/// Ordered set of positive fragment indices stored as inclusive runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRangeSet {
    runs: Vec<(u64, u64)>,
}

impl FragmentRangeSet {
    /// The empty set. Encodes as the empty string and has no work to offer.
    pub fn empty() -> Self {
        Self { runs: Vec::new() }
    }

    /// Parse the `;`-separated token encoding.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(CbfError::MalformedSet("empty encoding".to_string()));
        }
        let mut runs: Vec<(u64, u64)> = Vec::new();
        for token in s.split(';') {
            let (lo, hi) = match token.split_once('-') {
                Some((a, b)) => (parse_index(a)?, parse_index(b)?),
                None => {
                    let v = parse_index(token)?;
                    (v, v)
                }
            };
            if hi < lo {
                return Err(CbfError::MalformedSet(format!(
                    "descending range token: {token}"
                )));
            }
            if let Some(&(_, prev_hi)) = runs.last() {
                if lo <= prev_hi {
                    return Err(CbfError::MalformedSet(format!(
                        "token {token} overlaps or reorders the previous run"
                    )));
                }
            }
            runs.push((lo, hi));
        }
        Ok(Self::normalized(runs))
    }

    /// Build the single-token encoding for a gap-free range, used when the
    /// engine synthesizes indices for newly produced output fragments.
    pub fn from_contiguous(a: u64, b: u64) -> Result<Self> {
        if a == 0 || b < a {
            return Err(CbfError::MalformedSet(format!(
                "invalid contiguous range {a}-{b}"
            )));
        }
        Ok(Self { runs: vec![(a, b)] })
    }

    // Merge adjacent runs so the encoding is canonical.
    fn normalized(runs: Vec<(u64, u64)>) -> Self {
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(runs.len());
        for (lo, hi) in runs {
            match merged.last_mut() {
                Some((_, prev_hi)) if lo == *prev_hi + 1 => *prev_hi = hi,
                _ => merged.push((lo, hi)),
            }
        }
        Self { runs: merged }
    }

    /// Number of logical elements in the set.
    pub fn count(&self) -> u64 {
        self.runs.iter().map(|(lo, hi)| hi - lo + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Sub-sequence of `length` elements starting at the `offset`-th element
    /// (0-based), re-encoded with the same token rules.
    pub fn slice(&self, offset: u64, length: u64) -> Result<Self> {
        let count = self.count();
        if offset.checked_add(length).is_none_or(|end| end > count) {
            return Err(CbfError::RangeOutOfBounds {
                offset,
                length,
                count,
            });
        }
        if length == 0 {
            return Ok(Self::empty());
        }
        let mut runs = Vec::new();
        let mut skip = offset;
        let mut take = length;
        for &(lo, hi) in &self.runs {
            let run_len = hi - lo + 1;
            if skip >= run_len {
                skip -= run_len;
                continue;
            }
            let start = lo + skip;
            let available = hi - start + 1;
            let taken = available.min(take);
            runs.push((start, start + taken - 1));
            take -= taken;
            skip = 0;
            if take == 0 {
                break;
            }
        }
        Ok(Self::normalized(runs))
    }

    /// Iterate the logical elements in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.runs.iter().flat_map(|&(lo, hi)| lo..=hi)
    }
}

fn parse_index(s: &str) -> Result<u64> {
    let v = s
        .parse::<u64>()
        .map_err(|_| CbfError::MalformedSet(format!("not an integer token: {s:?}")))?;
    if v == 0 {
        return Err(CbfError::MalformedSet(
            "fragment indices are 1-based".to_string(),
        ));
    }
    Ok(v)
}

impl fmt::Display for FragmentRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (lo, hi)) in self.runs.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for FragmentRangeSet {
    type Err = CbfError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_mixed_singles_and_ranges() {
        let set = FragmentRangeSet::parse("1-3;7-8;10").expect("parse");
        assert_eq!(set.count(), 6);
        assert_eq!(set.to_string(), "1-3;7-8;10");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 3, 7, 8, 10]);
    }

    #[test]
    fn slice_reencodes_logical_subsequence() {
        let set = FragmentRangeSet::parse("1-3;7-8;10").expect("parse");
        let sub = set.slice(2, 3).expect("slice");
        assert_eq!(sub.to_string(), "3;7-8");
        assert_eq!(sub.count(), 3);
    }

    #[test]
    fn slice_count_matches_requested_length() {
        let set = FragmentRangeSet::parse("2-5;9;11-20").expect("parse");
        let count = set.count();
        for offset in 0..count {
            for length in 0..=(count - offset) {
                let sub = set.slice(offset, length).expect("in-bounds slice");
                assert_eq!(sub.count(), length);
            }
        }
    }

    #[test]
    fn slice_past_end_is_out_of_bounds() {
        let set = FragmentRangeSet::parse("1-4").expect("parse");
        let err = set.slice(2, 3).expect_err("out of bounds");
        assert!(matches!(err, CbfError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn adjacent_runs_collapse() {
        let set = FragmentRangeSet::parse("1-3;4-6;7").expect("parse");
        assert_eq!(set.to_string(), "1-7");
    }

    #[test]
    fn rejects_malformed_tokens() {
        for bad in ["", "a", "3-1", "0", "1-2;2-4", "5;3", "1-2-3"] {
            assert!(
                matches!(
                    FragmentRangeSet::parse(bad),
                    Err(CbfError::MalformedSet(_))
                ),
                "expected malformed: {bad:?}"
            );
        }
    }

    #[test]
    fn contiguous_range_builds_single_token() {
        assert_eq!(
            FragmentRangeSet::from_contiguous(4, 9).expect("range").to_string(),
            "4-9"
        );
        assert_eq!(
            FragmentRangeSet::from_contiguous(4, 4).expect("single").to_string(),
            "4"
        );
        assert!(FragmentRangeSet::from_contiguous(5, 4).is_err());
    }

    #[test]
    fn roundtrip_preserves_logical_sequence() {
        for encoded in ["1", "1-100", "1;3;5;7", "2-4;8-9;15"] {
            let set = FragmentRangeSet::parse(encoded).expect("parse");
            let reparsed = FragmentRangeSet::parse(&set.to_string()).expect("reparse");
            assert_eq!(
                set.iter().collect::<Vec<_>>(),
                reparsed.iter().collect::<Vec<_>>()
            );
        }
    }
}
