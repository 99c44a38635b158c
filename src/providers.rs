//! Provider system for generation backends
//!
//! A provider produces fresh values for draws that are not served from a
//! replay buffer. Two backends ship with the engine: `random`, which draws
//! close to uniformly within constraints, and `hypothesis`, which biases
//! towards edge cases (bounds, zero, small magnitudes, special floats) and
//! occasionally injects values from a pool of known troublesome constants.
//!
//! Backends are looked up by name in a [`ProviderRegistry`] that is built
//! explicitly by the host and handed to the runner.

use std::fmt;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::choice::{
    choice_permitted, lex_to_float, simplest_choice, BooleanConstraints, BytesConstraints, ChoiceValue,
    Constraints, FloatConstraints, IndexConstraints, IntegerConstraints, InvalidArgument, StringConstraints,
};

/// Probability that the `hypothesis` backend draws from its constant pool.
const CONSTANT_PROBABILITY: f64 = 0.05;

/// Generation backend. Implementations must only return values permitted by
/// the constraints they are given; constraints are validated before any
/// provider sees them.
pub trait PrimitiveProvider: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    fn draw_boolean(&mut self, constraints: &BooleanConstraints) -> bool;

    fn draw_integer(&mut self, constraints: &IntegerConstraints) -> i128;

    fn draw_float(&mut self, constraints: &FloatConstraints) -> f64;

    fn draw_bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8>;

    fn draw_string(&mut self, constraints: &StringConstraints) -> String;

    fn draw_index(&mut self, constraints: &IndexConstraints) -> u64;

    /// Central dispatch over the constraint kind.
    fn draw_choice(&mut self, constraints: &Constraints) -> ChoiceValue {
        match constraints {
            Constraints::Boolean(c) => ChoiceValue::Boolean(self.draw_boolean(c)),
            Constraints::Integer(c) => ChoiceValue::Integer(self.draw_integer(c)),
            Constraints::Float(c) => ChoiceValue::Float(self.draw_float(c)),
            Constraints::Bytes(c) => ChoiceValue::Bytes(self.draw_bytes(c)),
            Constraints::String(c) => ChoiceValue::String(self.draw_string(c)),
            Constraints::Index(c) => ChoiceValue::Index(self.draw_index(c)),
        }
    }

    fn span_start(&mut self, _label: &str) {}

    fn span_end(&mut self, _discard: bool) {}
}

/// Uniform-ish generation with no edge-case bias.
#[derive(Debug)]
pub struct RandomProvider {
    rng: ChaCha8Rng,
}

impl RandomProvider {
    pub fn new(seed: u64) -> Self {
        RandomProvider { rng: ChaCha8Rng::seed_from_u64(seed) }
    }
}

fn weighted_pick(rng: &mut ChaCha8Rng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut r = rng.gen::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        if r < w {
            return i;
        }
        r -= w;
    }
    weights.iter().rposition(|&w| w > 0.0).unwrap_or(0)
}

fn uniform_integer(rng: &mut ChaCha8Rng, constraints: &IntegerConstraints) -> i128 {
    if let Some(weights) = &constraints.weights {
        let r = rng.gen::<f64>();
        let mut cumulative = 0.0;
        for &(value, p) in weights {
            cumulative += p;
            if r < cumulative {
                return value;
            }
        }
    }
    let target = constraints.shrink_target();
    match (constraints.min_value, constraints.max_value) {
        (Some(min), Some(max)) => rng.gen_range(min..=max),
        (Some(min), None) => min.saturating_add(sized_magnitude(rng) as i128),
        (None, Some(max)) => max.saturating_sub(sized_magnitude(rng) as i128),
        (None, None) => {
            let magnitude = sized_magnitude(rng) as i128;
            if rng.gen() {
                target.saturating_sub(magnitude)
            } else {
                target.saturating_add(magnitude)
            }
        }
    }
}

/// A non-negative magnitude whose bit width is biased towards small sizes.
fn sized_magnitude(rng: &mut ChaCha8Rng) -> u128 {
    const BITS: [(u32, f64); 5] = [(8, 4.0), (16, 8.0), (32, 1.0), (64, 1.0), (126, 0.5)];
    let weights: Vec<f64> = BITS.iter().map(|&(_, w)| w).collect();
    let bits = BITS[weighted_pick(rng, &weights)].0;
    let raw = ((rng.next_u64() as u128) << 64) | rng.next_u64() as u128;
    raw >> (128 - bits)
}

fn collection_length(rng: &mut ChaCha8Rng, min_size: usize, max_size: usize) -> usize {
    if min_size == max_size {
        return min_size;
    }
    let average = ((min_size * 2).max(min_size + 5) as f64).min(0.5 * (min_size + max_size) as f64);
    let p_continue = 1.0 - 1.0 / (1.0 + average.max(1.0) - min_size as f64).max(1.0);
    let mut len = min_size;
    while len < max_size && rng.gen::<f64>() < p_continue {
        len += 1;
    }
    len
}

fn float_in_range(rng: &mut ChaCha8Rng, constraints: &FloatConstraints) -> f64 {
    let (min, max) = (constraints.min_value, constraints.max_value);
    if min.is_finite() && max.is_finite() {
        let t = rng.gen::<f64>();
        return constraints.width.narrow(min * (1.0 - t) + max * t);
    }
    let magnitude = if rng.gen() {
        lex_to_float(rng.next_u64() & !(1 << 63) | ((rng.gen::<bool>() as u64) << 63))
    } else {
        rng.gen::<f64>() * 2f64.powi(rng.gen_range(-20..64))
    };
    let value = if rng.gen() { -magnitude } else { magnitude };
    constraints.width.narrow(value)
}

fn ensure_permitted<F: FnMut() -> ChoiceValue>(constraints: &Constraints, mut attempt: F) -> ChoiceValue {
    for _ in 0..10 {
        let value = attempt();
        if choice_permitted(&value, constraints) {
            return value;
        }
    }
    simplest_choice(constraints)
}

fn random_float(rng: &mut ChaCha8Rng, constraints: &FloatConstraints) -> f64 {
    let wrapped = Constraints::Float(constraints.clone());
    let value = ensure_permitted(&wrapped, || ChoiceValue::Float(float_in_range(rng, constraints)));
    value.as_float().unwrap_or(constraints.min_value)
}

fn random_string(rng: &mut ChaCha8Rng, constraints: &StringConstraints, bias_simple: bool) -> String {
    let alphabet = &constraints.intervals;
    if alphabet.is_empty() {
        return String::new();
    }
    let len = collection_length(rng, constraints.min_size, constraints.max_size);
    (0..len)
        .filter_map(|_| {
            if bias_simple && rng.gen_bool(0.5) {
                alphabet.char_in_shrink_order(rng.gen_range(0..alphabet.len().min(256)))
            } else {
                alphabet.char_at(rng.gen_range(0..alphabet.len()))
            }
        })
        .collect()
}

fn random_bytes(rng: &mut ChaCha8Rng, constraints: &BytesConstraints) -> Vec<u8> {
    let len = collection_length(rng, constraints.min_size, constraints.max_size);
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

fn random_index(rng: &mut ChaCha8Rng, constraints: &IndexConstraints) -> u64 {
    match &constraints.weights {
        Some(weights) => weighted_pick(rng, weights) as u64,
        None => rng.gen_range(0..constraints.n),
    }
}

fn random_boolean(rng: &mut ChaCha8Rng, constraints: &BooleanConstraints) -> bool {
    if constraints.p <= 0.0 {
        false
    } else if constraints.p >= 1.0 {
        true
    } else {
        rng.gen::<f64>() < constraints.p
    }
}

impl PrimitiveProvider for RandomProvider {
    fn name(&self) -> &'static str {
        "random"
    }

    fn draw_boolean(&mut self, constraints: &BooleanConstraints) -> bool {
        random_boolean(&mut self.rng, constraints)
    }

    fn draw_integer(&mut self, constraints: &IntegerConstraints) -> i128 {
        uniform_integer(&mut self.rng, constraints)
    }

    fn draw_float(&mut self, constraints: &FloatConstraints) -> f64 {
        random_float(&mut self.rng, constraints)
    }

    fn draw_bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8> {
        random_bytes(&mut self.rng, constraints)
    }

    fn draw_string(&mut self, constraints: &StringConstraints) -> String {
        random_string(&mut self.rng, constraints, false)
    }

    fn draw_index(&mut self, constraints: &IndexConstraints) -> u64 {
        random_index(&mut self.rng, constraints)
    }
}

/// Edge cases that the `hypothesis` backend injects.
#[derive(Debug, Clone)]
pub struct GlobalConstants {
    pub integers: Vec<i128>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub bytes: Vec<Vec<u8>>,
}

impl Default for GlobalConstants {
    fn default() -> Self {
        GlobalConstants {
            integers: vec![
                0, 1, -1, 2, -2, 10, 100, 1000, -10, -100, -1000,
                127, 128, 255, 256, 65535, 65536,
                i8::MIN as i128, i8::MAX as i128,
                i16::MIN as i128, i16::MAX as i128,
                i32::MIN as i128, i32::MAX as i128,
                i64::MIN as i128, i64::MAX as i128,
                u64::MAX as i128,
            ],
            floats: vec![
                0.0, -0.0, 1.0, -1.0, 0.5, -0.5, 1.5,
                f64::NAN, f64::INFINITY, f64::NEG_INFINITY,
                f64::MIN, f64::MAX, f64::MIN_POSITIVE, f64::EPSILON,
                f64::from_bits(1),
                1.0 / 3.0, 1e-5, 1e16, 2f64.powi(53),
            ],
            strings: vec![
                String::new(), " ".into(), "0".into(), "\n".into(), "\r\n".into(), "\"".into(),
                "'".into(), "\\".into(), "\u{0}".into(), "\u{FEFF}".into(), "🦀".into(), "α".into(),
            ],
            bytes: vec![vec![], vec![0], vec![255], vec![0, 255], vec![0; 4], vec![255; 4]],
        }
    }
}

/// Edge-case biased backend.
#[derive(Debug)]
pub struct HypothesisProvider {
    rng: ChaCha8Rng,
    constants: GlobalConstants,
}

impl HypothesisProvider {
    pub fn new(seed: u64) -> Self {
        HypothesisProvider { rng: ChaCha8Rng::seed_from_u64(seed), constants: GlobalConstants::default() }
    }

    fn maybe_constant(&mut self, constraints: &Constraints) -> Option<ChoiceValue> {
        if !self.rng.gen_bool(CONSTANT_PROBABILITY) {
            return None;
        }
        let pool: Vec<ChoiceValue> = match constraints {
            Constraints::Integer(_) => self.constants.integers.iter().map(|&v| ChoiceValue::Integer(v)).collect(),
            Constraints::Float(_) => self.constants.floats.iter().map(|&v| ChoiceValue::Float(v)).collect(),
            Constraints::String(_) => self.constants.strings.iter().cloned().map(ChoiceValue::String).collect(),
            Constraints::Bytes(_) => self.constants.bytes.iter().cloned().map(ChoiceValue::Bytes).collect(),
            _ => return None,
        };
        let permitted: Vec<ChoiceValue> = pool.into_iter().filter(|v| choice_permitted(v, constraints)).collect();
        if permitted.is_empty() {
            return None;
        }
        let i = self.rng.gen_range(0..permitted.len());
        Some(permitted[i].clone())
    }

    fn edge_integer(&mut self, constraints: &IntegerConstraints) -> Option<i128> {
        if !self.rng.gen_bool(0.1) {
            return None;
        }
        let target = constraints.shrink_target();
        let candidates = [
            constraints.min_value,
            constraints.max_value,
            Some(target),
            target.checked_add(1),
            target.checked_sub(1),
        ];
        let options: Vec<i128> = candidates.into_iter().flatten().filter(|&v| constraints.permits(v)).collect();
        if options.is_empty() {
            return None;
        }
        Some(options[self.rng.gen_range(0..options.len())])
    }
}

impl PrimitiveProvider for HypothesisProvider {
    fn name(&self) -> &'static str {
        "hypothesis"
    }

    fn draw_boolean(&mut self, constraints: &BooleanConstraints) -> bool {
        random_boolean(&mut self.rng, constraints)
    }

    fn draw_integer(&mut self, constraints: &IntegerConstraints) -> i128 {
        if let Some(ChoiceValue::Integer(v)) = self.maybe_constant(&Constraints::Integer(constraints.clone())) {
            return v;
        }
        if let Some(v) = self.edge_integer(constraints) {
            return v;
        }
        let (Some(min), Some(max)) = (constraints.min_value, constraints.max_value) else {
            return uniform_integer(&mut self.rng, constraints);
        };
        // Wide bounded ranges: prefer values close to the shrink target.
        if max.abs_diff(min) > 255 && constraints.weights.is_none() && self.rng.gen_bool(0.5) {
            let offset = sized_magnitude(&mut self.rng) as i128;
            let target = constraints.shrink_target();
            let candidate =
                if self.rng.gen() { target.saturating_add(offset) } else { target.saturating_sub(offset) };
            if constraints.permits(candidate) {
                return candidate;
            }
        }
        uniform_integer(&mut self.rng, constraints)
    }

    fn draw_float(&mut self, constraints: &FloatConstraints) -> f64 {
        let wrapped = Constraints::Float(constraints.clone());
        if let Some(ChoiceValue::Float(v)) = self.maybe_constant(&wrapped) {
            return v;
        }
        if self.rng.gen_bool(0.1) {
            let edges = [constraints.min_value, constraints.max_value, 0.0, -0.0, f64::NAN];
            let permitted: Vec<f64> = edges.into_iter().filter(|&f| constraints.permits(f)).collect();
            if !permitted.is_empty() {
                return permitted[self.rng.gen_range(0..permitted.len())];
            }
        }
        random_float(&mut self.rng, constraints)
    }

    fn draw_bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8> {
        if let Some(ChoiceValue::Bytes(v)) = self.maybe_constant(&Constraints::Bytes(constraints.clone())) {
            return v;
        }
        random_bytes(&mut self.rng, constraints)
    }

    fn draw_string(&mut self, constraints: &StringConstraints) -> String {
        if let Some(ChoiceValue::String(v)) = self.maybe_constant(&Constraints::String(constraints.clone())) {
            return v;
        }
        random_string(&mut self.rng, constraints, true)
    }

    fn draw_index(&mut self, constraints: &IndexConstraints) -> u64 {
        random_index(&mut self.rng, constraints)
    }
}

/// Always draws the simplest permitted value. Used to run the base example.
#[derive(Debug, Default)]
pub(crate) struct SimplestProvider;

impl PrimitiveProvider for SimplestProvider {
    fn name(&self) -> &'static str {
        "simplest"
    }

    fn draw_boolean(&mut self, constraints: &BooleanConstraints) -> bool {
        constraints.p >= 1.0
    }

    fn draw_integer(&mut self, constraints: &IntegerConstraints) -> i128 {
        constraints.shrink_target()
    }

    fn draw_float(&mut self, constraints: &FloatConstraints) -> f64 {
        simplest_choice(&Constraints::Float(constraints.clone())).as_float().unwrap_or(constraints.min_value)
    }

    fn draw_bytes(&mut self, constraints: &BytesConstraints) -> Vec<u8> {
        vec![0; constraints.min_size]
    }

    fn draw_string(&mut self, constraints: &StringConstraints) -> String {
        match simplest_choice(&Constraints::String(constraints.clone())) {
            ChoiceValue::String(s) => s,
            _ => String::new(),
        }
    }

    fn draw_index(&mut self, _constraints: &IndexConstraints) -> u64 {
        0
    }

    fn draw_choice(&mut self, constraints: &Constraints) -> ChoiceValue {
        simplest_choice(constraints)
    }
}

pub type ProviderFactory = fn(u64) -> Box<dyn PrimitiveProvider>;

fn hypothesis_factory(seed: u64) -> Box<dyn PrimitiveProvider> {
    Box::new(HypothesisProvider::new(seed))
}

fn random_factory(seed: u64) -> Box<dyn PrimitiveProvider> {
    Box::new(RandomProvider::new(seed))
}

/// Name to factory table for generation backends.
#[derive(Clone)]
pub struct ProviderRegistry {
    entries: Vec<(&'static str, ProviderFactory)>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|(name, _)| name)).finish()
    }
}

impl ProviderRegistry {
    /// Registry containing the built-in backends.
    pub fn builtin() -> Self {
        ProviderRegistry { entries: vec![("hypothesis", hypothesis_factory), ("random", random_factory)] }
    }

    /// Add or replace a backend.
    pub fn register(&mut self, name: &'static str, factory: ProviderFactory) {
        self.entries.retain(|(existing, _)| *existing != name);
        self.entries.push((name, factory));
    }

    pub fn create(&self, name: &str, seed: u64) -> Result<Box<dyn PrimitiveProvider>, InvalidArgument> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, factory)| factory(seed))
            .ok_or_else(|| {
                InvalidArgument::new(format!(
                    "unknown backend {:?}; available: {}",
                    name,
                    self.available_providers().join(", ")
                ))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| *existing == name)
    }

    pub fn available_providers(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::{FloatWidth, IntervalSet};

    fn all_constraints() -> Vec<Constraints> {
        vec![
            Constraints::Boolean(BooleanConstraints::new(0.3)),
            Constraints::Integer(IntegerConstraints::bounded(-5, 5)),
            Constraints::Integer(IntegerConstraints::bounded(0, 1_000_000)),
            Constraints::Integer(IntegerConstraints::new(Some(10), None)),
            Constraints::Integer(IntegerConstraints::new(None, Some(-10))),
            Constraints::Integer(IntegerConstraints::default()),
            Constraints::Integer(IntegerConstraints::bounded(0, 9).with_weights(vec![(3, 0.9)])),
            Constraints::Float(FloatConstraints::new(-1.0, 1.0)),
            Constraints::Float(FloatConstraints::default()),
            Constraints::Float(FloatConstraints::new(0.0, 100.0).with_width(FloatWidth::Width16)),
            Constraints::Bytes(BytesConstraints::new(2, 6)),
            Constraints::String(StringConstraints::new(IntervalSet::from_chars("abc"), 1, 4)),
            Constraints::String(StringConstraints::default()),
            Constraints::Index(IndexConstraints::weighted(vec![0.0, 1.0, 2.0])),
        ]
    }

    #[test]
    fn providers_respect_constraints() {
        let registry = ProviderRegistry::builtin();
        for name in registry.available_providers() {
            let mut provider = registry.create(name, 7).unwrap();
            for constraints in all_constraints() {
                for _ in 0..200 {
                    let value = provider.draw_choice(&constraints);
                    assert!(choice_permitted(&value, &constraints), "{} drew {:?} for {:?}", name, value, constraints);
                }
            }
        }
    }

    #[test]
    fn same_seed_same_values() {
        let c = Constraints::Integer(IntegerConstraints::default());
        let mut a = HypothesisProvider::new(3);
        let mut b = HypothesisProvider::new(3);
        for _ in 0..50 {
            assert_eq!(a.draw_choice(&c), b.draw_choice(&c));
        }
    }

    #[test]
    fn zero_weight_index_is_never_drawn() {
        let mut provider = RandomProvider::new(1);
        let c = IndexConstraints::weighted(vec![0.0, 1.0, 2.0]);
        for _ in 0..500 {
            assert_ne!(provider.draw_index(&c), 0);
        }
    }

    #[test]
    fn unknown_backend_is_invalid_argument() {
        let registry = ProviderRegistry::builtin();
        let err = registry.create("nonexistent", 0).unwrap_err();
        assert!(err.0.contains("nonexistent"));
    }

    #[test]
    fn simplest_provider_draws_simplest() {
        let mut provider = SimplestProvider;
        for constraints in all_constraints() {
            assert_eq!(provider.draw_choice(&constraints), simplest_choice(&constraints));
        }
        assert_eq!(provider.draw_integer(&IntegerConstraints::bounded(5, 9)), 5);
    }

    #[test]
    fn hypothesis_backend_finds_bounds() {
        let mut provider = HypothesisProvider::new(11);
        let c = IntegerConstraints::bounded(-1000, 1000);
        let drawn: Vec<i128> = (0..2000).map(|_| provider.draw_integer(&c)).collect();
        assert!(drawn.contains(&-1000));
        assert!(drawn.contains(&1000));
        assert!(drawn.contains(&0));
    }
}
