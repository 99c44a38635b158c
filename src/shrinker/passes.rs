//! The shrink pass library.
//!
//! Each pass enumerates its steps against the current target at the start
//! of a round, and each step proposes one or a few candidates through
//! `consider`. Steps re-check their indices when they run because earlier
//! steps in the same round may already have changed the target.

use std::collections::HashMap;
use std::fmt;

use super::{find_integer, Shrinker};
use crate::choice::{
    choice_key, choice_permitted, float_to_lex, lex_to_float, simplest_choice, sort_key, ChoiceType, ChoiceValue,
    Constraints, SortKey,
};
use crate::data::ConjectureResult;

/// Furthest apart two integer choices can be for redistribution.
const REDISTRIBUTION_WINDOW: usize = 3;

/// Spans after a choice tried by `LowerAndDelete`.
const LOWER_AND_DELETE_SPANS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShrinkPass {
    /// Delete spans, growing the deletion over following siblings when it works.
    DeleteSpans,
    /// Delete runs of individual choices.
    DeleteChoices,
    /// Replace every choice in a span with its simplest value.
    ZeroSpans,
    /// Replace a span with a smaller descendant span of the same label.
    PassToDescendant,
    /// Binary search each choice towards its simplest value.
    LowerChoices,
    /// Lower all copies of a repeated value together.
    LowerDuplicates,
    /// Move magnitude from one integer to a nearby one, keeping their sum.
    RedistributeNumericPairs,
    /// Sort the child spans of a span into ascending order.
    ReorderSpans,
    /// Swap adjacent choices of the same kind into ascending order.
    SwapAdjacent,
    /// Replace fractional floats with nearby integers.
    ShrinkFloatsToIntegers,
    /// Lower one choice while deleting a later span.
    LowerAndDelete,
}

impl ShrinkPass {
    pub const COARSE: &'static [ShrinkPass] = &[
        ShrinkPass::DeleteSpans,
        ShrinkPass::DeleteChoices,
        ShrinkPass::ZeroSpans,
        ShrinkPass::PassToDescendant,
    ];

    pub const FINE: &'static [ShrinkPass] = &[
        ShrinkPass::LowerChoices,
        ShrinkPass::LowerDuplicates,
        ShrinkPass::RedistributeNumericPairs,
        ShrinkPass::ReorderSpans,
        ShrinkPass::SwapAdjacent,
        ShrinkPass::ShrinkFloatsToIntegers,
    ];

    pub const EMERGENCY: &'static [ShrinkPass] = &[ShrinkPass::LowerAndDelete];
}

impl fmt::Display for ShrinkPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShrinkPass::DeleteSpans => "delete_spans",
            ShrinkPass::DeleteChoices => "delete_choices",
            ShrinkPass::ZeroSpans => "zero_spans",
            ShrinkPass::PassToDescendant => "pass_to_descendant",
            ShrinkPass::LowerChoices => "lower_choices",
            ShrinkPass::LowerDuplicates => "lower_duplicates",
            ShrinkPass::RedistributeNumericPairs => "redistribute_numeric_pairs",
            ShrinkPass::ReorderSpans => "reorder_spans",
            ShrinkPass::SwapAdjacent => "swap_adjacent",
            ShrinkPass::ShrinkFloatsToIntegers => "shrink_floats_to_integers",
            ShrinkPass::LowerAndDelete => "lower_and_delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Step {
    Span(usize),
    Node(usize),
    Pair(usize, usize),
    Group(Vec<usize>),
}

fn integer_at(target: i128, above: bool, distance: u128) -> Option<ChoiceValue> {
    let value = if above { target.checked_add_unsigned(distance)? } else { target.checked_sub_unsigned(distance)? };
    Some(ChoiceValue::Integer(value))
}

fn without_range(base: &[ChoiceValue], start: usize, end: usize) -> Option<Vec<ChoiceValue>> {
    if start >= end || end > base.len() {
        return None;
    }
    let mut values = base[..start].to_vec();
    values.extend_from_slice(&base[end..]);
    Some(values)
}

impl<F> Shrinker<F>
where
    F: FnMut(&[ChoiceValue]) -> ConjectureResult,
{
    pub(super) fn steps(&self, pass: ShrinkPass) -> Vec<Step> {
        let nodes = &self.current.nodes;
        let spans = &self.current.spans;
        match pass {
            ShrinkPass::DeleteSpans => {
                (1..spans.len()).filter(|&s| !spans[s].is_empty()).map(Step::Span).collect()
            }
            ShrinkPass::DeleteChoices => (0..nodes.len()).map(Step::Node).collect(),
            ShrinkPass::ZeroSpans => (1..spans.len())
                .filter(|&s| nodes[spans[s].start..spans[s].end].iter().any(|node| !node.is_trivial()))
                .map(Step::Span)
                .collect(),
            ShrinkPass::PassToDescendant => {
                let mut steps = Vec::new();
                for a in 1..spans.len() {
                    for d in (a + 1)..spans.len() {
                        let (outer, inner) = (&spans[a], &spans[d]);
                        if inner.start >= outer.end {
                            break;
                        }
                        if inner.label == outer.label && inner.end <= outer.end && inner.len() < outer.len() {
                            steps.push(Step::Pair(a, d));
                        }
                    }
                }
                steps
            }
            ShrinkPass::LowerChoices => {
                (0..nodes.len()).filter(|&i| !nodes[i].is_trivial()).map(Step::Node).collect()
            }
            ShrinkPass::LowerDuplicates => {
                let mut groups: HashMap<&ChoiceValue, Vec<usize>> = HashMap::new();
                for (i, node) in nodes.iter().enumerate() {
                    if !node.is_trivial() {
                        groups.entry(&node.value).or_default().push(i);
                    }
                }
                let mut steps: Vec<Vec<usize>> = groups.into_values().filter(|group| group.len() > 1).collect();
                steps.sort();
                steps.into_iter().map(Step::Group).collect()
            }
            ShrinkPass::RedistributeNumericPairs => {
                let integers: Vec<usize> = (0..nodes.len())
                    .filter(|&i| nodes[i].choice_type == ChoiceType::Integer && !nodes[i].was_forced)
                    .collect();
                let mut steps = Vec::new();
                for (k, &i) in integers.iter().enumerate() {
                    if nodes[i].is_trivial() {
                        continue;
                    }
                    for &j in integers[k + 1..].iter().take_while(|&&j| j - i <= REDISTRIBUTION_WINDOW) {
                        steps.push(Step::Pair(i, j));
                    }
                }
                steps
            }
            ShrinkPass::ReorderSpans => (0..spans.len())
                .filter(|&p| spans.iter().filter(|span| span.parent == Some(p) && !span.is_empty()).count() > 1)
                .map(Step::Span)
                .collect(),
            ShrinkPass::SwapAdjacent => (0..nodes.len().saturating_sub(1))
                .filter(|&i| nodes[i].choice_type == nodes[i + 1].choice_type && nodes[i].value != nodes[i + 1].value)
                .map(Step::Node)
                .collect(),
            ShrinkPass::ShrinkFloatsToIntegers => (0..nodes.len())
                .filter(|&i| !nodes[i].was_forced)
                .filter(|&i| matches!(nodes[i].value, ChoiceValue::Float(f) if f.is_finite() && f.fract() != 0.0))
                .map(Step::Node)
                .collect(),
            ShrinkPass::LowerAndDelete => {
                let mut steps = Vec::new();
                for i in (0..nodes.len()).filter(|&i| !nodes[i].is_trivial()) {
                    if !matches!(nodes[i].choice_type, ChoiceType::Integer | ChoiceType::Index | ChoiceType::Boolean) {
                        continue;
                    }
                    let later = (1..spans.len()).filter(|&s| spans[s].start > i && !spans[s].is_empty());
                    steps.extend(later.take(LOWER_AND_DELETE_SPANS).map(|s| Step::Pair(i, s)));
                }
                steps
            }
        }
    }

    pub(super) fn run_step(&mut self, pass: ShrinkPass, step: Step) {
        match (pass, step) {
            (ShrinkPass::DeleteSpans, Step::Span(s)) => self.delete_span(s),
            (ShrinkPass::DeleteChoices, Step::Node(i)) => self.delete_choices(i),
            (ShrinkPass::ZeroSpans, Step::Span(s)) => self.zero_span(s),
            (ShrinkPass::PassToDescendant, Step::Pair(a, d)) => self.pass_to_descendant(a, d),
            (ShrinkPass::LowerChoices, Step::Node(i)) => self.lower_choice(i),
            (ShrinkPass::LowerDuplicates, Step::Group(indices)) => self.lower_duplicates(&indices),
            (ShrinkPass::RedistributeNumericPairs, Step::Pair(i, j)) => self.redistribute(i, j),
            (ShrinkPass::ReorderSpans, Step::Span(p)) => self.reorder_children(p),
            (ShrinkPass::SwapAdjacent, Step::Node(i)) => self.swap_adjacent(i),
            (ShrinkPass::ShrinkFloatsToIntegers, Step::Node(i)) => self.float_to_integer(i),
            (ShrinkPass::LowerAndDelete, Step::Pair(i, s)) => self.lower_and_delete(i, s),
            (pass, step) => debug_assert!(false, "{} cannot run step {:?}", pass, step),
        }
    }

    /// Set the given choices and consider the result. Forced choices and
    /// values their constraints do not permit are refused without a call.
    fn replace(&mut self, changes: &[(usize, ChoiceValue)]) -> bool {
        let nodes = &self.current.nodes;
        let mut values = self.current.values();
        for (i, value) in changes {
            match nodes.get(*i) {
                Some(node) if !node.was_forced && choice_permitted(value, &node.constraints) => {
                    values[*i] = value.clone();
                }
                _ => return false,
            }
        }
        self.consider(values)
    }

    /// Smallest `k` in `lo..=hi` accepted by `attempt`, taking `hi` as
    /// already accepted. Assumes acceptance is roughly monotone in `k`.
    fn find_lowest<G>(&mut self, lo: u128, hi: u128, mut attempt: G) -> u128
    where
        G: FnMut(&mut Self, u128) -> bool,
    {
        if lo >= hi {
            return hi;
        }
        if attempt(self, lo) {
            return lo;
        }
        let (mut lo, mut hi) = (lo, hi);
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if attempt(self, mid) {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        hi
    }

    fn delete_span(&mut self, s: usize) {
        let Some(span) = self.current.spans.get(s).filter(|span| s > 0 && !span.is_empty()) else {
            return;
        };
        let (start, end, parent) = (span.start, span.end, span.parent);
        let mut siblings: Vec<(usize, usize)> = self
            .current
            .inner_spans()
            .filter(|sibling| sibling.parent == parent && !sibling.is_empty())
            .map(|sibling| (sibling.start, sibling.end))
            .collect();
        siblings.sort_unstable();
        let Some(pos) = siblings.iter().position(|&range| range == (start, end)) else {
            return;
        };
        let base = self.current.values();
        let delete = |this: &mut Self, n: usize| -> bool {
            n > 0
                && pos + n <= siblings.len()
                && without_range(&base, siblings[pos].0, siblings[pos + n - 1].1).map_or(false, |v| this.consider(v))
        };
        if delete(self, 1) {
            find_integer(|n| delete(self, n + 1));
        }
    }

    fn delete_choices(&mut self, i: usize) {
        let base = self.current.values();
        let delete = |this: &mut Self, n: usize| -> bool {
            without_range(&base, i, i + n).map_or(false, |v| this.consider(v))
        };
        if delete(self, 1) {
            find_integer(|n| delete(self, n + 1));
        }
    }

    fn zero_span(&mut self, s: usize) {
        let Some(span) = self.current.spans.get(s) else {
            return;
        };
        let (start, end) = (span.start, span.end.min(self.current.len()));
        let mut values = self.current.values();
        for (value, node) in values[start..end].iter_mut().zip(&self.current.nodes[start..end]) {
            if !node.was_forced {
                *value = simplest_choice(&node.constraints);
            }
        }
        self.consider(values);
    }

    fn pass_to_descendant(&mut self, a: usize, d: usize) {
        let spans = &self.current.spans;
        let (Some(outer), Some(inner)) = (spans.get(a), spans.get(d)) else {
            return;
        };
        if outer.label != inner.label || inner.start < outer.start || inner.end > outer.end || inner.len() >= outer.len() {
            return;
        }
        let base = self.current.values();
        let mut values = base[..outer.start].to_vec();
        values.extend_from_slice(&base[inner.start..inner.end]);
        values.extend_from_slice(&base[outer.end..]);
        self.consider(values);
    }

    pub(super) fn lower_choice(&mut self, i: usize) {
        let Some(node) = self.current.nodes.get(i).filter(|node| !node.was_forced).cloned() else {
            return;
        };
        let simplest = simplest_choice(&node.constraints);
        if node.value == simplest || self.replace(&[(i, simplest)]) {
            return;
        }
        match (&node.value, &node.constraints) {
            (ChoiceValue::Integer(value), Constraints::Integer(c)) => self.lower_integer(i, *value, c.shrink_target()),
            (ChoiceValue::Index(value), _) => {
                self.find_lowest(0, *value as u128, |this, k| this.replace(&[(i, ChoiceValue::Index(k as u64))]));
            }
            (ChoiceValue::Float(value), _) => self.lower_float(i, *value),
            (ChoiceValue::Bytes(_), _) => self.lower_bytes(i),
            (ChoiceValue::String(_), _) => self.lower_string(i),
            // The only simpler boolean was tried above.
            _ => {}
        }
    }

    fn lower_integer(&mut self, i: usize, value: i128, target: i128) {
        let distance = value.abs_diff(target);
        let mut above = value >= target;
        if !above && integer_at(target, true, distance).map_or(false, |flipped| self.replace(&[(i, flipped)])) {
            above = true;
        }
        self.find_lowest(0, distance, |this, d| {
            integer_at(target, above, d).map_or(false, |candidate| this.replace(&[(i, candidate)]))
        });
    }

    fn lower_float(&mut self, i: usize, value: f64) {
        if value.is_nan() {
            for candidate in [f64::INFINITY, f64::MAX, 0.0] {
                if self.replace(&[(i, ChoiceValue::Float(candidate))]) {
                    return;
                }
            }
            return;
        }
        let mut sign = 1.0;
        if value.is_sign_negative() && !self.replace(&[(i, ChoiceValue::Float(-value))]) {
            sign = -1.0;
        }
        let magnitude = value.abs();
        if magnitude.is_finite()
            && magnitude.fract() != 0.0
            && self.replace(&[(i, ChoiceValue::Float(sign * magnitude.trunc()))])
        {
            return self.lower_float(i, sign * magnitude.trunc());
        }
        let lex = float_to_lex(magnitude) as u128;
        self.find_lowest(0, lex, |this, k| {
            this.replace(&[(i, ChoiceValue::Float(sign * lex_to_float(k as u64)))])
        });
    }

    fn current_bytes(&self, i: usize) -> Option<(Vec<u8>, usize)> {
        match self.current.nodes.get(i) {
            Some(node) => match (&node.value, &node.constraints) {
                (ChoiceValue::Bytes(bytes), Constraints::Bytes(c)) => Some((bytes.clone(), c.min_size)),
                _ => None,
            },
            None => None,
        }
    }

    fn lower_bytes(&mut self, i: usize) {
        let Some((bytes, min_size)) = self.current_bytes(i) else {
            return;
        };
        self.find_lowest(min_size as u128, bytes.len() as u128, |this, n| {
            this.replace(&[(i, ChoiceValue::Bytes(bytes[..n as usize].to_vec()))])
        });
        for j in 0.. {
            let Some((bytes, _)) = self.current_bytes(i) else {
                return;
            };
            if j >= bytes.len() {
                return;
            }
            if bytes[j] == 0 {
                continue;
            }
            self.find_lowest(0, bytes[j] as u128, |this, k| {
                let mut candidate = bytes.clone();
                candidate[j] = k as u8;
                this.replace(&[(i, ChoiceValue::Bytes(candidate))])
            });
        }
    }

    fn current_chars(&self, i: usize) -> Option<(Vec<char>, Constraints)> {
        let node = self.current.nodes.get(i)?;
        match &node.value {
            ChoiceValue::String(s) => Some((s.chars().collect(), node.constraints.clone())),
            _ => None,
        }
    }

    fn lower_string(&mut self, i: usize) {
        let Some((chars, Constraints::String(c))) = self.current_chars(i) else {
            return;
        };
        self.find_lowest(c.min_size as u128, chars.len() as u128, |this, n| {
            this.replace(&[(i, ChoiceValue::String(chars[..n as usize].iter().collect()))])
        });
        for j in 0.. {
            let Some((chars, _)) = self.current_chars(i) else {
                return;
            };
            if j >= chars.len() {
                return;
            }
            let Some(rank) = c.intervals.shrink_index_of(chars[j]) else {
                continue;
            };
            self.find_lowest(0, rank as u128, |this, k| {
                let Some(replacement) = c.intervals.char_in_shrink_order(k as u64) else {
                    return false;
                };
                let mut candidate = chars.clone();
                candidate[j] = replacement;
                this.replace(&[(i, ChoiceValue::String(candidate.into_iter().collect()))])
            });
        }
    }

    fn lower_duplicates(&mut self, indices: &[usize]) {
        let nodes = &self.current.nodes;
        let Some(first) = indices.first().and_then(|&i| nodes.get(i)) else {
            return;
        };
        let (value, constraints) = (first.value.clone(), first.constraints.clone());
        if indices.iter().any(|&i| nodes.get(i).map_or(true, |node| node.value != value)) {
            return;
        }
        let simplest: Vec<(usize, ChoiceValue)> =
            indices.iter().map(|&i| (i, simplest_choice(&nodes[i].constraints))).collect();
        if self.replace(&simplest) {
            return;
        }
        if let (ChoiceValue::Integer(v), Constraints::Integer(c)) = (&value, &constraints) {
            let target = c.shrink_target();
            let above = *v >= target;
            let indices = indices.to_vec();
            self.find_lowest(0, v.abs_diff(target), |this, d| match integer_at(target, above, d) {
                Some(candidate) => {
                    let changes: Vec<(usize, ChoiceValue)> = indices.iter().map(|&i| (i, candidate.clone())).collect();
                    this.replace(&changes)
                }
                None => false,
            });
        }
    }

    /// Move as much as possible of `i`'s distance from its shrink target
    /// onto `j`, preserving `i + j`.
    fn redistribute(&mut self, i: usize, j: usize) {
        let nodes = &self.current.nodes;
        let (Some(left), Some(right)) = (nodes.get(i), nodes.get(j)) else {
            return;
        };
        let (ChoiceValue::Integer(a), ChoiceValue::Integer(b), Constraints::Integer(c)) =
            (&left.value, &right.value, &left.constraints)
        else {
            return;
        };
        let (a, b, target) = (*a, *b, c.shrink_target());
        if a == target {
            return;
        }
        let distance = a.abs_diff(target);
        let lowering = a > target;
        let moved = |k: u128| -> Option<Vec<(usize, ChoiceValue)>> {
            let (new_a, new_b) = if lowering {
                (a.checked_sub_unsigned(k)?, b.checked_add_unsigned(k)?)
            } else {
                (a.checked_add_unsigned(k)?, b.checked_sub_unsigned(k)?)
            };
            Some(vec![(i, ChoiceValue::Integer(new_a)), (j, ChoiceValue::Integer(new_b))])
        };
        if moved(distance).map_or(false, |changes| self.replace(&changes)) {
            return;
        }
        // Largest k that still fails; k = 0 is the current target.
        let (mut lo, mut hi) = (0u128, distance);
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if moved(mid).map_or(false, |changes| self.replace(&changes)) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
    }

    fn reorder_children(&mut self, p: usize) {
        let mut children: Vec<(usize, usize)> = self
            .current
            .spans
            .iter()
            .filter(|span| span.parent == Some(p) && !span.is_empty())
            .map(|span| (span.start, span.end))
            .collect();
        children.sort_unstable();
        let n = children.len();
        if n < 2 {
            return;
        }
        let base = self.current.values();
        let keys: Vec<SortKey> = children.iter().map(|&(s, e)| sort_key(&self.current.nodes[s..e])).collect();
        let assemble = |order: &[usize]| -> Vec<ChoiceValue> {
            let mut values = base[..children[0].0].to_vec();
            for (slot, &piece) in order.iter().enumerate() {
                let (s, e) = children[piece];
                values.extend_from_slice(&base[s..e]);
                if slot + 1 < n {
                    values.extend_from_slice(&base[children[slot].1..children[slot + 1].0]);
                }
            }
            values.extend_from_slice(&base[children[n - 1].1..]);
            values
        };

        let identity: Vec<usize> = (0..n).collect();
        let mut sorted = identity.clone();
        sorted.sort_by(|&x, &y| keys[x].cmp(&keys[y]));
        if sorted != identity && self.consider(assemble(&sorted)) {
            return;
        }
        for k in 0..n - 1 {
            if keys[k + 1] < keys[k] {
                let mut order = identity.clone();
                order.swap(k, k + 1);
                if self.consider(assemble(&order)) {
                    return;
                }
            }
        }
    }

    fn swap_adjacent(&mut self, i: usize) {
        let nodes = &self.current.nodes;
        let (Some(left), Some(right)) = (nodes.get(i), nodes.get(i + 1)) else {
            return;
        };
        if left.choice_type != right.choice_type || left.was_forced || right.was_forced {
            return;
        }
        if choice_key(&right.value, &right.constraints) >= choice_key(&left.value, &left.constraints) {
            return;
        }
        let changes = [(i, right.value.clone()), (i + 1, left.value.clone())];
        self.replace(&changes);
    }

    fn float_to_integer(&mut self, i: usize) {
        let Some(ChoiceValue::Float(value)) = self.current.nodes.get(i).map(|node| node.value.clone()) else {
            return;
        };
        if !value.is_finite() || value.fract() == 0.0 {
            return;
        }
        let mut candidates = vec![value.trunc(), value.round(), value.floor(), value.ceil()];
        candidates.dedup();
        for candidate in candidates {
            if self.replace(&[(i, ChoiceValue::Float(candidate))]) {
                return;
            }
        }
    }

    fn lower_and_delete(&mut self, i: usize, s: usize) {
        let nodes = &self.current.nodes;
        let (Some(node), Some(span)) = (nodes.get(i), self.current.spans.get(s)) else {
            return;
        };
        if node.was_forced || span.start <= i || span.is_empty() {
            return;
        }
        let lowered = match (&node.value, &node.constraints) {
            (ChoiceValue::Integer(v), Constraints::Integer(c)) => {
                let target = c.shrink_target();
                match v.abs_diff(target) {
                    0 => return,
                    d => integer_at(target, *v >= target, d - 1),
                }
            }
            (ChoiceValue::Index(v), _) if *v > 0 => Some(ChoiceValue::Index(v - 1)),
            (ChoiceValue::Boolean(true), _) => Some(ChoiceValue::Boolean(false)),
            _ => None,
        };
        let Some(lowered) = lowered.filter(|value| choice_permitted(value, &node.constraints)) else {
            return;
        };
        let mut base = self.current.values();
        base[i] = lowered;
        if let Some(values) = without_range(&base, span.start, span.end) {
            self.consider(values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ConjectureData;
    use crate::execution::{execute, TestFailure, TestResult};
    use crate::shrinker::ShrinkConfig;

    fn ints(values: &[i128]) -> Vec<ChoiceValue> {
        values.iter().copied().map(ChoiceValue::Integer).collect()
    }

    /// Run only `pass` against the failure at `start` until it stops
    /// making progress.
    fn shrink_with<T>(mut test: T, start: Vec<ChoiceValue>, pass: ShrinkPass) -> Vec<ChoiceValue>
    where
        T: FnMut(&mut ConjectureData<'_>) -> TestResult,
    {
        let initial = execute(&mut test, ConjectureData::for_choices(&start));
        assert!(initial.status.is_interesting(), "{:?} does not fail: {}", start, initial.status);
        let mut shrinker = Shrinker::new(
            initial,
            |values: &[ChoiceValue]| execute(&mut test, ConjectureData::for_choices(values)),
            ShrinkConfig::default(),
        );
        loop {
            let before = shrinker.current_key.clone();
            for step in shrinker.steps(pass) {
                shrinker.run_step(pass, step);
            }
            if shrinker.current_key == before {
                return shrinker.current.values();
            }
        }
    }

    fn contains_42(data: &mut ConjectureData<'_>) -> TestResult {
        let mut found = false;
        loop {
            let more = data.span("element", |data| {
                if !data.draw_boolean(0.5)? {
                    return Ok(false);
                }
                found |= data.draw_integer(Some(0), Some(100))? == 42;
                Ok(true)
            })?;
            if !more {
                break;
            }
        }
        if found {
            return Err(TestFailure::failed("42"));
        }
        Ok(())
    }

    #[test]
    fn delete_spans_drops_irrelevant_elements() {
        let start = vec![
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(7),
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(42),
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(99),
            ChoiceValue::Boolean(false),
        ];
        let shrunk = shrink_with(contains_42, start, ShrinkPass::DeleteSpans);
        assert_eq!(shrunk, vec![ChoiceValue::Boolean(true), ChoiceValue::Integer(42), ChoiceValue::Boolean(false)]);
    }

    #[test]
    fn delete_choices_works_without_spans() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            let mut found = false;
            loop {
                let value = data.draw_integer(Some(0), Some(100))?;
                if value == 0 {
                    break;
                }
                found |= value == 42;
            }
            if found {
                return Err(TestFailure::failed("42"));
            }
            Ok(())
        };
        assert_eq!(shrink_with(test, ints(&[7, 42, 99, 0]), ShrinkPass::DeleteChoices), ints(&[42, 0]));
    }

    #[test]
    fn zero_spans_simplifies_a_whole_span() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            data.span("pair", |data| {
                data.draw_integer(Some(0), Some(100))?;
                data.draw_integer(Some(0), Some(100))
            })?;
            if data.draw_integer(Some(0), Some(100))? > 10 {
                return Err(TestFailure::failed("large"));
            }
            Ok(())
        };
        assert_eq!(shrink_with(test, ints(&[5, 6, 50]), ShrinkPass::ZeroSpans), ints(&[0, 0, 50]));
    }

    fn tree_node(data: &mut ConjectureData<'_>) -> Result<bool, crate::data::StopTest> {
        data.span("node", |data| {
            if data.draw_boolean(0.5)? {
                let left = tree_node(data)?;
                let right = tree_node(data)?;
                Ok(left || right)
            } else {
                Ok(data.draw_integer(Some(0), Some(100))? == 42)
            }
        })
    }

    #[test]
    fn pass_to_descendant_replaces_a_node_with_its_child() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            if tree_node(data)? {
                return Err(TestFailure::failed("leaf 42"));
            }
            Ok(())
        };
        let start = vec![
            ChoiceValue::Boolean(true),
            ChoiceValue::Boolean(false),
            ChoiceValue::Integer(7),
            ChoiceValue::Boolean(false),
            ChoiceValue::Integer(42),
        ];
        let shrunk = shrink_with(test, start, ShrinkPass::PassToDescendant);
        assert_eq!(shrunk, vec![ChoiceValue::Boolean(false), ChoiceValue::Integer(42)]);
    }

    #[test]
    fn lower_choices_finds_each_boundary() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            let n = data.draw_integer(Some(0), Some(1000))?;
            let index = data.draw_index(10)?;
            if n >= 17 && index >= 3 {
                return Err(TestFailure::failed("both"));
            }
            Ok(())
        };
        let shrunk = shrink_with(test, vec![ChoiceValue::Integer(1000), ChoiceValue::Index(9)], ShrinkPass::LowerChoices);
        assert_eq!(shrunk, vec![ChoiceValue::Integer(17), ChoiceValue::Index(3)]);
    }

    #[test]
    fn lower_duplicates_moves_equal_values_together() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            let a = data.draw_integer(Some(0), Some(100))?;
            let b = data.draw_integer(Some(0), Some(100))?;
            if a == b && a >= 10 {
                return Err(TestFailure::failed("equal"));
            }
            Ok(())
        };
        assert_eq!(shrink_with(test, ints(&[50, 50]), ShrinkPass::LowerDuplicates), ints(&[10, 10]));
    }

    #[test]
    fn redistribute_keeps_the_sum() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            let m = data.draw_integer(Some(0), None)?;
            let n = data.draw_integer(Some(0), None)?;
            if m + n >= 100 {
                return Err(TestFailure::failed("sum"));
            }
            Ok(())
        };
        assert_eq!(shrink_with(test, ints(&[73, 91]), ShrinkPass::RedistributeNumericPairs), ints(&[0, 164]));
    }

    fn unequal(data: &mut ConjectureData<'_>, spans: bool) -> TestResult {
        let draw = |data: &mut ConjectureData<'_>| {
            if spans {
                data.span("item", |data| data.draw_integer(Some(0), Some(100)))
            } else {
                data.draw_integer(Some(0), Some(100))
            }
        };
        let a = draw(data)?;
        let b = draw(data)?;
        if a != b {
            return Err(TestFailure::failed("unequal"));
        }
        Ok(())
    }

    #[test]
    fn reorder_spans_sorts_siblings() {
        let test = |data: &mut ConjectureData<'_>| unequal(data, true);
        assert_eq!(shrink_with(test, ints(&[9, 3]), ShrinkPass::ReorderSpans), ints(&[3, 9]));
    }

    #[test]
    fn swap_adjacent_sorts_neighbouring_choices() {
        let test = |data: &mut ConjectureData<'_>| unequal(data, false);
        assert_eq!(shrink_with(test, ints(&[9, 3]), ShrinkPass::SwapAdjacent), ints(&[3, 9]));
    }

    #[test]
    fn fractional_floats_become_integers() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            if data.draw_float(0.0, 100.0)? >= 2.5 {
                return Err(TestFailure::failed("large"));
            }
            Ok(())
        };
        let shrunk = shrink_with(test, vec![ChoiceValue::Float(7.25)], ShrinkPass::ShrinkFloatsToIntegers);
        assert_eq!(shrunk, vec![ChoiceValue::Float(7.0)]);
    }

    #[test]
    fn lower_and_delete_shortens_a_counted_list() {
        let test = |data: &mut ConjectureData<'_>| -> TestResult {
            let n = data.draw_integer(Some(0), Some(10))?;
            let mut found = false;
            for _ in 0..n {
                found |= data.span("item", |data| data.draw_integer(Some(0), Some(100)))? == 42;
            }
            if found {
                return Err(TestFailure::failed("42"));
            }
            Ok(())
        };
        assert_eq!(shrink_with(test, ints(&[2, 7, 42]), ShrinkPass::LowerAndDelete), ints(&[1, 42]));
    }

    fn idle_shrinker() -> Shrinker<impl FnMut(&[ChoiceValue]) -> ConjectureResult> {
        let mut test = |_: &mut ConjectureData<'_>| -> TestResult { Err(TestFailure::failed("always")) };
        let initial = execute(&mut test, ConjectureData::for_choices(&[]));
        Shrinker::new(
            initial,
            move |values: &[ChoiceValue]| execute(&mut test, ConjectureData::for_choices(values)),
            ShrinkConfig::default(),
        )
    }

    #[test]
    fn find_lowest_boundaries() {
        let mut shrinker = idle_shrinker();
        assert_eq!(shrinker.find_lowest(0, 100, |_, k| k >= 37), 37);
        assert_eq!(shrinker.find_lowest(0, 100, |_, _| true), 0);
        assert_eq!(shrinker.find_lowest(0, 100, |_, k| k >= 100), 100);
        assert_eq!(shrinker.find_lowest(5, 100, |_, k| k >= 5), 5);
        assert_eq!(shrinker.find_lowest(7, 7, |_, _| panic!("nothing to search")), 7);
    }

    #[test]
    fn find_lowest_settles_on_an_accepted_value_when_not_monotone() {
        let mut shrinker = idle_shrinker();
        let accepted = |k: u128| k == 100 || (k >= 30 && k % 10 == 0);
        let found = shrinker.find_lowest(0, 100, |_, k| accepted(k));
        assert!(accepted(found));
        // Binary search only guarantees a local boundary: 30 is missed.
        assert_eq!(found, 50);
    }
}
