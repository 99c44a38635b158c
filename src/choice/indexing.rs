//! The complexity ordering over choices and choice sequences.
//!
//! Each choice maps to a [`ChoiceKey`]: a list of non-negative ranks whose
//! lexicographic order is the choice's simplicity order. The simplest value
//! of every kind has a key starting with `0`, so zero, false and empty sort
//! first. Keys of different kinds at the same position are compared by
//! their ranks and only then by kind.
//!
//! A whole sequence is ranked by [`sort_key`]: shorter is always simpler,
//! and equal lengths fall back to comparing per-choice keys in order.

use std::cmp::Ordering;

use super::floats::float_sort_key;
use super::{ChoiceNode, ChoiceType, ChoiceValue, Constraints};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChoiceKey {
    ranks: Vec<u128>,
    kind: ChoiceType,
}

impl ChoiceKey {
    pub fn ranks(&self) -> &[u128] {
        &self.ranks
    }

    pub fn is_zero(&self) -> bool {
        self.ranks.iter().all(|&r| r == 0)
    }
}

fn integer_rank(value: i128, target: i128) -> Vec<u128> {
    let distance = value.abs_diff(target);
    vec![distance, (value < target) as u128]
}

fn collection_rank<I: Iterator<Item = u128>>(len: usize, items: I) -> Vec<u128> {
    let mut ranks = Vec::with_capacity(len + 1);
    ranks.push(len as u128);
    ranks.extend(items);
    ranks
}

/// Simplicity key for a single choice.
pub fn choice_key(value: &ChoiceValue, constraints: &Constraints) -> ChoiceKey {
    let ranks = match (value, constraints) {
        (ChoiceValue::Boolean(v), Constraints::Boolean(c)) => {
            // With p == 1 the only permitted value is `true`, and it is trivial.
            if c.p >= 1.0 {
                vec![0]
            } else {
                vec![*v as u128]
            }
        }
        (ChoiceValue::Integer(v), Constraints::Integer(c)) => integer_rank(*v, c.shrink_target()),
        (ChoiceValue::Integer(v), _) => integer_rank(*v, 0),
        (ChoiceValue::Boolean(v), _) => vec![*v as u128],
        (ChoiceValue::Float(v), _) => {
            let (magnitude, sign) = float_sort_key(*v);
            vec![magnitude, sign]
        }
        (ChoiceValue::Bytes(v), _) => collection_rank(v.len(), v.iter().map(|&b| b as u128)),
        (ChoiceValue::String(v), Constraints::String(c)) => {
            let len = v.chars().count();
            collection_rank(
                len,
                v.chars()
                    .map(|ch| c.intervals.shrink_index_of(ch).map_or(ch as u128, |i| i as u128)),
            )
        }
        (ChoiceValue::String(v), _) => collection_rank(v.chars().count(), v.chars().map(|ch| ch as u128)),
        (ChoiceValue::Index(v), _) => vec![*v as u128],
    };
    ChoiceKey { ranks, kind: value.choice_type() }
}

/// Complexity rank of a whole choice sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    length: usize,
    keys: Vec<ChoiceKey>,
}

impl SortKey {
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.length.cmp(&other.length).then_with(|| self.keys.cmp(&other.keys))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn sort_key(nodes: &[ChoiceNode]) -> SortKey {
    SortKey {
        length: nodes.len(),
        keys: nodes.iter().map(|node| choice_key(&node.value, &node.constraints)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::*;

    fn int_node(v: i128) -> ChoiceNode {
        ChoiceNode::new(ChoiceValue::Integer(v), Constraints::Integer(IntegerConstraints::default()), false)
    }

    fn str_node(s: &str) -> ChoiceNode {
        ChoiceNode::new(
            ChoiceValue::String(s.to_string()),
            Constraints::String(StringConstraints::default()),
            false,
        )
    }

    #[test]
    fn integers_order_by_distance_then_sign() {
        let c = Constraints::Integer(IntegerConstraints::default());
        let keys: Vec<ChoiceKey> = [0, 1, -1, 2, -2]
            .iter()
            .map(|&v| choice_key(&ChoiceValue::Integer(v), &c))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn integers_rank_from_shrink_target() {
        let c = Constraints::Integer(IntegerConstraints::bounded(10, 20));
        assert!(choice_key(&ChoiceValue::Integer(10), &c).is_zero());
        assert!(choice_key(&ChoiceValue::Integer(11), &c) < choice_key(&ChoiceValue::Integer(12), &c));
    }

    #[test]
    fn shorter_sequences_are_simpler() {
        let long = vec![int_node(0), int_node(0)];
        let short = vec![int_node(1000)];
        assert!(sort_key(&short) < sort_key(&long));
    }

    #[test]
    fn lexicographic_tie_break() {
        assert!(sort_key(&[int_node(0), int_node(5)]) < sort_key(&[int_node(1), int_node(0)]));
    }

    #[test]
    fn empty_string_before_digit_zero() {
        let a = vec![str_node(""), str_node("0")];
        let b = vec![str_node("0"), str_node("")];
        assert!(sort_key(&a) < sort_key(&b));
        assert!(sort_key(&[str_node("0")]) < sort_key(&[str_node("a")]));
        assert!(sort_key(&[str_node("z")]) < sort_key(&[str_node("00")]));
    }

    #[test]
    fn simplest_choice_has_zero_key() {
        for c in [
            Constraints::Integer(IntegerConstraints::bounded(-3, 7).with_shrink_towards(2)),
            Constraints::Boolean(BooleanConstraints::default()),
            Constraints::Boolean(BooleanConstraints::new(1.0)),
            Constraints::Float(FloatConstraints::default()),
            Constraints::Bytes(BytesConstraints::default()),
            Constraints::String(StringConstraints::default()),
            Constraints::Index(IndexConstraints::new(3)),
        ] {
            assert!(choice_key(&simplest_choice(&c), &c).is_zero(), "{:?}", c);
        }
    }

    #[test]
    fn cross_kind_comparison_uses_ranks_first() {
        let zero_int = choice_key(&ChoiceValue::Integer(0), &Constraints::Integer(IntegerConstraints::default()));
        let true_bool = choice_key(&ChoiceValue::Boolean(true), &Constraints::Boolean(BooleanConstraints::default()));
        assert!(zero_int < true_bool);
    }
}
