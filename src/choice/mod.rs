//! Choice system for the Conjecture engine
//!
//! Every piece of randomness a test consumes flows through a typed choice
//! with associated constraints. The ordered list of choices made by one
//! execution fully determines that execution, so it is the unit that gets
//! generated, compared, shrunk and persisted.

pub mod constraints;
pub mod floats;
pub mod indexing;
pub mod intervals;
pub mod values;

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub use self::constraints::*;
pub use self::floats::{float_to_lex, lex_to_float, FloatWidth};
pub use self::indexing::{choice_key, sort_key, ChoiceKey, SortKey};
pub use self::intervals::IntervalSet;
pub use self::values::{choice_equal, choice_permitted, max_children, simplest_choice};

/// Choice types that can be drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChoiceType {
    Boolean,
    Integer,
    Float,
    Bytes,
    String,
    Index,
}

impl fmt::Display for ChoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceType::Boolean => write!(f, "boolean"),
            ChoiceType::Integer => write!(f, "integer"),
            ChoiceType::Float => write!(f, "float"),
            ChoiceType::Bytes => write!(f, "bytes"),
            ChoiceType::String => write!(f, "string"),
            ChoiceType::Index => write!(f, "index"),
        }
    }
}

/// The concrete outcome of a choice.
///
/// Equality is structural with floats compared by bit pattern, so `0.0` and
/// `-0.0` are different choices and a NaN equals itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChoiceValue {
    Boolean(bool),
    Integer(i128),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    Index(u64),
}

impl ChoiceValue {
    pub fn choice_type(&self) -> ChoiceType {
        match self {
            ChoiceValue::Boolean(_) => ChoiceType::Boolean,
            ChoiceValue::Integer(_) => ChoiceType::Integer,
            ChoiceValue::Float(_) => ChoiceType::Float,
            ChoiceValue::Bytes(_) => ChoiceType::Bytes,
            ChoiceValue::String(_) => ChoiceType::String,
            ChoiceValue::Index(_) => ChoiceType::Index,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match self {
            ChoiceValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ChoiceValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ChoiceValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ChoiceValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ChoiceValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_index(&self) -> Option<u64> {
        match self {
            ChoiceValue::Index(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for ChoiceValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ChoiceValue::Boolean(a), ChoiceValue::Boolean(b)) => a == b,
            (ChoiceValue::Integer(a), ChoiceValue::Integer(b)) => a == b,
            (ChoiceValue::Float(a), ChoiceValue::Float(b)) => a.to_bits() == b.to_bits(),
            (ChoiceValue::Bytes(a), ChoiceValue::Bytes(b)) => a == b,
            (ChoiceValue::String(a), ChoiceValue::String(b)) => a == b,
            (ChoiceValue::Index(a), ChoiceValue::Index(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ChoiceValue {}

impl Hash for ChoiceValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ChoiceValue::Boolean(v) => v.hash(state),
            ChoiceValue::Integer(v) => v.hash(state),
            ChoiceValue::Float(v) => v.to_bits().hash(state),
            ChoiceValue::Bytes(v) => v.hash(state),
            ChoiceValue::String(v) => v.hash(state),
            ChoiceValue::Index(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ChoiceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceValue::Boolean(v) => write!(f, "{}", v),
            ChoiceValue::Integer(v) => write!(f, "{}", v),
            ChoiceValue::Float(v) => write!(f, "{:?}", v),
            ChoiceValue::Bytes(v) => write!(f, "b\"{}\"", v.escape_ascii()),
            ChoiceValue::String(v) => write!(f, "{:?}", v),
            ChoiceValue::Index(v) => write!(f, "#{}", v),
        }
    }
}

/// Constraints attached to a choice, one variant per [`ChoiceType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraints {
    Boolean(BooleanConstraints),
    Integer(IntegerConstraints),
    Float(FloatConstraints),
    Bytes(BytesConstraints),
    String(StringConstraints),
    Index(IndexConstraints),
}

impl Constraints {
    pub fn choice_type(&self) -> ChoiceType {
        match self {
            Constraints::Boolean(_) => ChoiceType::Boolean,
            Constraints::Integer(_) => ChoiceType::Integer,
            Constraints::Float(_) => ChoiceType::Float,
            Constraints::Bytes(_) => ChoiceType::Bytes,
            Constraints::String(_) => ChoiceType::String,
            Constraints::Index(_) => ChoiceType::Index,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        match self {
            Constraints::Boolean(c) => c.validate(),
            Constraints::Integer(c) => c.validate(),
            Constraints::Float(c) => c.validate(),
            Constraints::Bytes(c) => c.validate(),
            Constraints::String(c) => c.validate(),
            Constraints::Index(c) => c.validate(),
        }
    }
}

/// One recorded choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceNode {
    pub choice_type: ChoiceType,
    pub value: ChoiceValue,
    pub constraints: Constraints,
    pub was_forced: bool,
}

impl ChoiceNode {
    pub fn new(value: ChoiceValue, constraints: Constraints, was_forced: bool) -> Self {
        debug_assert_eq!(value.choice_type(), constraints.choice_type());
        ChoiceNode { choice_type: constraints.choice_type(), value, constraints, was_forced }
    }

    /// Copy of this node carrying a different value.
    pub fn with_value(&self, value: ChoiceValue) -> Self {
        ChoiceNode { value, was_forced: false, ..self.clone() }
    }

    pub fn is_trivial(&self) -> bool {
        self.was_forced || self.value == simplest_choice(&self.constraints)
    }
}

impl fmt::Display for ChoiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.choice_type, self.value)
    }
}

/// The values of a sequence of nodes.
pub fn values_of(nodes: &[ChoiceNode]) -> Vec<ChoiceValue> {
    nodes.iter().map(|node| node.value.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn float_values_compare_by_bits() {
        assert_ne!(ChoiceValue::Float(0.0), ChoiceValue::Float(-0.0));
        assert_eq!(ChoiceValue::Float(f64::NAN), ChoiceValue::Float(f64::NAN));
        let mut set = HashSet::new();
        set.insert(ChoiceValue::Float(0.0));
        set.insert(ChoiceValue::Float(-0.0));
        set.insert(ChoiceValue::Float(0.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn values_of_different_kinds_differ() {
        assert_ne!(ChoiceValue::Integer(0), ChoiceValue::Index(0));
        assert_ne!(ChoiceValue::Boolean(false), ChoiceValue::Integer(0));
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(ChoiceValue::String("a".into()).to_string(), "\"a\"");
        assert_eq!(ChoiceValue::Bytes(vec![0, 65]).to_string(), "b\"\\x00A\"");
        let node = ChoiceNode::new(ChoiceValue::Integer(3), Constraints::Integer(IntegerConstraints::default()), false);
        assert_eq!(node.to_string(), "integer(3)");
    }
}
