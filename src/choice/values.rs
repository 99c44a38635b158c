use super::{ChoiceValue, Constraints, FloatConstraints};

/// Are two choices the same choice? Floats compare by bit pattern.
pub fn choice_equal(a: &ChoiceValue, b: &ChoiceValue) -> bool {
    a == b
}

/// Could `value` have been produced by a draw with these constraints?
pub fn choice_permitted(value: &ChoiceValue, constraints: &Constraints) -> bool {
    match (value, constraints) {
        (ChoiceValue::Boolean(v), Constraints::Boolean(c)) => {
            if c.p <= 0.0 {
                !*v
            } else if c.p >= 1.0 {
                *v
            } else {
                true
            }
        }
        (ChoiceValue::Integer(v), Constraints::Integer(c)) => c.permits(*v),
        (ChoiceValue::Float(v), Constraints::Float(c)) => c.permits(*v),
        (ChoiceValue::Bytes(v), Constraints::Bytes(c)) => v.len() >= c.min_size && v.len() <= c.max_size,
        (ChoiceValue::String(v), Constraints::String(c)) => {
            let len = v.chars().count();
            len >= c.min_size && len <= c.max_size && v.chars().all(|ch| c.intervals.contains(ch))
        }
        (ChoiceValue::Index(v), Constraints::Index(c)) => *v < c.n,
        _ => false,
    }
}

fn simplest_float(c: &FloatConstraints) -> f64 {
    let mut candidates = vec![0.0, -0.0];
    if c.min_value > 0.0 {
        candidates.push(c.min_value.ceil());
    }
    if c.max_value < 0.0 {
        candidates.push(c.max_value.floor());
    }
    candidates.push(c.width.narrow(c.min_value));
    candidates.push(c.width.narrow(c.max_value));
    candidates
        .into_iter()
        .find(|&f| c.permits(f))
        .unwrap_or(if c.allow_nan { f64::NAN } else { c.min_value })
}

/// The simplest value these constraints permit.
pub fn simplest_choice(constraints: &Constraints) -> ChoiceValue {
    match constraints {
        Constraints::Boolean(c) => ChoiceValue::Boolean(c.p >= 1.0),
        Constraints::Integer(c) => ChoiceValue::Integer(c.shrink_target()),
        Constraints::Float(c) => ChoiceValue::Float(simplest_float(c)),
        Constraints::Bytes(c) => ChoiceValue::Bytes(vec![0; c.min_size]),
        Constraints::String(c) => {
            let s = match c.intervals.char_in_shrink_order(0) {
                Some(ch) => std::iter::repeat(ch).take(c.min_size).collect(),
                None => String::new(),
            };
            ChoiceValue::String(s)
        }
        Constraints::Index(_) => ChoiceValue::Index(0),
    }
}

fn collection_count(alphabet: u128, min_size: usize, max_size: usize) -> Option<u128> {
    if alphabet == 0 {
        return Some(1);
    }
    let mut total: u128 = 0;
    for len in min_size..=max_size {
        let term = alphabet.checked_pow(u32::try_from(len).ok()?)?;
        total = total.checked_add(term)?;
    }
    Some(total)
}

/// Number of distinct values these constraints permit, when that is
/// known and fits. `None` means "too many to enumerate".
pub fn max_children(constraints: &Constraints) -> Option<u128> {
    match constraints {
        Constraints::Boolean(c) => Some(if c.p <= 0.0 || c.p >= 1.0 { 1 } else { 2 }),
        Constraints::Integer(c) => match (c.min_value, c.max_value) {
            (Some(min), Some(max)) => {
                let width = max.checked_sub(min)?;
                u128::try_from(width).ok()?.checked_add(1)
            }
            _ => None,
        },
        Constraints::Float(c) => {
            if !c.allow_nan && c.min_value.to_bits() == c.max_value.to_bits() {
                Some(1)
            } else {
                None
            }
        }
        Constraints::Bytes(c) => collection_count(256, c.min_size, c.max_size),
        Constraints::String(c) => collection_count(c.intervals.len() as u128, c.min_size, c.max_size),
        Constraints::Index(c) => Some(c.n as u128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::*;

    #[test]
    fn permitted_checks_kind_and_bounds() {
        let ints = Constraints::Integer(IntegerConstraints::bounded(0, 10));
        assert!(choice_permitted(&ChoiceValue::Integer(10), &ints));
        assert!(!choice_permitted(&ChoiceValue::Integer(11), &ints));
        assert!(!choice_permitted(&ChoiceValue::Boolean(false), &ints));

        let never = Constraints::Boolean(BooleanConstraints::new(0.0));
        assert!(choice_permitted(&ChoiceValue::Boolean(false), &never));
        assert!(!choice_permitted(&ChoiceValue::Boolean(true), &never));

        let strings = Constraints::String(StringConstraints::new(IntervalSet::from_chars("ab"), 1, 2));
        assert!(choice_permitted(&ChoiceValue::String("ab".into()), &strings));
        assert!(!choice_permitted(&ChoiceValue::String("".into()), &strings));
        assert!(!choice_permitted(&ChoiceValue::String("ac".into()), &strings));
    }

    #[test]
    fn simplest_values() {
        assert_eq!(
            simplest_choice(&Constraints::Integer(IntegerConstraints::bounded(3, 9))),
            ChoiceValue::Integer(3)
        );
        assert_eq!(
            simplest_choice(&Constraints::Boolean(BooleanConstraints::default())),
            ChoiceValue::Boolean(false)
        );
        assert_eq!(
            simplest_choice(&Constraints::Float(FloatConstraints::new(1.5, 7.0))),
            ChoiceValue::Float(2.0)
        );
        assert_eq!(
            simplest_choice(&Constraints::Float(FloatConstraints::new(-7.0, -2.5))),
            ChoiceValue::Float(-3.0)
        );
        assert_eq!(
            simplest_choice(&Constraints::String(StringConstraints::new(IntervalSet::ascii(), 2, 5))),
            ChoiceValue::String("00".into())
        );
        assert_eq!(
            simplest_choice(&Constraints::Bytes(BytesConstraints::new(1, 3))),
            ChoiceValue::Bytes(vec![0])
        );
    }

    #[test]
    fn simplest_choice_is_permitted() {
        let all = vec![
            Constraints::Boolean(BooleanConstraints::new(1.0)),
            Constraints::Integer(IntegerConstraints::new(Some(-5), None)),
            Constraints::Float(FloatConstraints::new(-0.5, -0.25)),
            Constraints::Float(FloatConstraints::default().with_width(FloatWidth::Width16)),
            Constraints::String(StringConstraints::default()),
            Constraints::Index(IndexConstraints::new(4)),
        ];
        for c in all {
            assert!(choice_permitted(&simplest_choice(&c), &c), "{:?}", c);
        }
    }

    #[test]
    fn child_counts() {
        assert_eq!(max_children(&Constraints::Integer(IntegerConstraints::bounded(0, 9))), Some(10));
        assert_eq!(max_children(&Constraints::Integer(IntegerConstraints::default())), None);
        assert_eq!(max_children(&Constraints::Bytes(BytesConstraints::new(0, 1))), Some(257));
        assert_eq!(max_children(&Constraints::Bytes(BytesConstraints::default())), None);
        assert_eq!(
            max_children(&Constraints::String(StringConstraints::new(IntervalSet::from_chars("ab"), 0, 2))),
            Some(7)
        );
        assert_eq!(max_children(&Constraints::Boolean(BooleanConstraints::new(1.0))), Some(1));
        assert_eq!(
            max_children(&Constraints::Integer(IntegerConstraints::bounded(i128::MIN, i128::MAX))),
            None
        );
    }
}
