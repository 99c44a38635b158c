//! Codepoint alphabets for string choices.
//!
//! An `IntervalSet` is a sorted, merged list of inclusive codepoint ranges.
//! Characters are addressed by their position in the set, and a second
//! "shrink order" puts `'0'..='Z'` first so that digits and capitals are
//! considered simpler than punctuation or control characters.

use serde::{Deserialize, Serialize};

const SURROGATES: (u32, u32) = (0xD800, 0xDFFF);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalSet {
    intervals: Vec<(u32, u32)>,
    offsets: Vec<u64>,
    size: u64,
}

impl IntervalSet {
    /// Build a set from arbitrary (possibly overlapping) inclusive ranges.
    /// Surrogate codepoints are always removed.
    pub fn new(ranges: &[(u32, u32)]) -> Self {
        let mut sorted: Vec<(u32, u32)> = ranges
            .iter()
            .filter(|(lo, hi)| lo <= hi)
            .map(|&(lo, hi)| (lo, hi.min(char::MAX as u32)))
            .collect();
        sorted.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(sorted.len());
        for (lo, hi) in sorted {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }

        let mut intervals = Vec::with_capacity(merged.len());
        for (lo, hi) in merged {
            if hi < SURROGATES.0 || lo > SURROGATES.1 {
                intervals.push((lo, hi));
                continue;
            }
            if lo < SURROGATES.0 {
                intervals.push((lo, SURROGATES.0 - 1));
            }
            if hi > SURROGATES.1 {
                intervals.push((SURROGATES.1 + 1, hi));
            }
        }

        let mut offsets = Vec::with_capacity(intervals.len());
        let mut size = 0u64;
        for &(lo, hi) in &intervals {
            offsets.push(size);
            size += (hi - lo) as u64 + 1;
        }

        IntervalSet { intervals, offsets, size }
    }

    /// Every valid unicode scalar value.
    pub fn full() -> Self {
        Self::new(&[(0, char::MAX as u32)])
    }

    pub fn ascii() -> Self {
        Self::new(&[(0, 127)])
    }

    pub fn from_chars(chars: &str) -> Self {
        let ranges: Vec<(u32, u32)> = chars.chars().map(|c| (c as u32, c as u32)).collect();
        Self::new(&ranges)
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn intervals(&self) -> &[(u32, u32)] {
        &self.intervals
    }

    pub fn contains(&self, c: char) -> bool {
        self.index_of(c).is_some()
    }

    /// Position of `c` in the set, if present.
    pub fn index_of(&self, c: char) -> Option<u64> {
        let cp = c as u32;
        let slot = self.intervals.partition_point(|&(_, hi)| hi < cp);
        let &(lo, hi) = self.intervals.get(slot)?;
        if cp < lo || cp > hi {
            return None;
        }
        Some(self.offsets[slot] + (cp - lo) as u64)
    }

    /// Character at position `i`.
    pub fn char_at(&self, i: u64) -> Option<char> {
        if i >= self.size {
            return None;
        }
        let slot = self.offsets.partition_point(|&off| off <= i) - 1;
        let (lo, _) = self.intervals[slot];
        char::from_u32(lo + (i - self.offsets[slot]) as u32)
    }

    /// Position of the smallest member `>= cp`, or `len()` if there is none.
    fn index_above(&self, cp: u32) -> u64 {
        for (slot, &(lo, hi)) in self.intervals.iter().enumerate() {
            if cp <= hi {
                return self.offsets[slot] + cp.saturating_sub(lo) as u64;
            }
        }
        self.size
    }

    fn shrink_anchors(&self) -> (u64, u64) {
        let zero = self.index_above('0' as u32);
        let capital_z = self.index_above('Z' as u32).min(self.size.saturating_sub(1));
        (zero.min(capital_z), capital_z)
    }

    /// Rank of `c` in shrink order: `'0'..='Z'` first, then the characters
    /// below `'0'` in descending order, then everything above `'Z'`.
    pub fn shrink_index_of(&self, c: char) -> Option<u64> {
        let i = self.index_of(c)?;
        let (zero, capital_z) = self.shrink_anchors();
        if i > capital_z {
            return Some(i);
        }
        let span = capital_z - zero;
        if i >= zero {
            Some(i - zero)
        } else {
            Some(span + (zero - i))
        }
    }

    /// Inverse of [`IntervalSet::shrink_index_of`].
    pub fn char_in_shrink_order(&self, k: u64) -> Option<char> {
        if k >= self.size {
            return None;
        }
        let (zero, capital_z) = self.shrink_anchors();
        if k > capital_z {
            return self.char_at(k);
        }
        let span = capital_z - zero;
        let i = if k <= span { zero + k } else { zero - (k - span) };
        self.char_at(i)
    }
}

impl Default for IntervalSet {
    fn default() -> Self {
        Self::full()
    }
}
