//! Hill climbing for the target phase.
//!
//! Starting from the best execution seen for a target label, repeatedly
//! nudge single choices up or down and keep any change that raises the
//! score. When a whole sweep over the choices finds nothing, one choice is
//! redrawn at random to escape the plateau. Finding a failure ends the
//! climb immediately.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::choice::{choice_permitted, ChoiceValue, Constraints};
use crate::data::ConjectureResult;
use crate::providers::{PrimitiveProvider, RandomProvider};
use crate::shrinker::find_integer;

/// Consecutive fruitless sweeps before giving up.
const MAX_FAILURES: usize = 10;

#[derive(Debug, Clone)]
pub struct OptimiseOutcome {
    pub best: ConjectureResult,
    pub score: f64,
    pub calls: usize,
    pub improvements: usize,
    pub found_failure: bool,
}

pub struct Optimiser<F>
where
    F: FnMut(&[ChoiceValue]) -> ConjectureResult,
{
    test: F,
    label: String,
    current: ConjectureResult,
    score: f64,
    calls: usize,
    max_calls: usize,
    improvements: usize,
    found_failure: bool,
    rng: ChaCha8Rng,
}

/// Move `value` by `k` steps up or down, if that makes sense for its kind.
fn nudge(value: &ChoiceValue, k: u64, up: bool) -> Option<ChoiceValue> {
    match value {
        ChoiceValue::Integer(v) => {
            let k = k as i128;
            Some(ChoiceValue::Integer(if up { v.checked_add(k)? } else { v.checked_sub(k)? }))
        }
        ChoiceValue::Index(v) => Some(ChoiceValue::Index(if up { v.checked_add(k)? } else { v.checked_sub(k)? })),
        ChoiceValue::Float(v) if v.is_finite() => {
            let next = if up { v + k as f64 } else { v - k as f64 };
            next.is_finite().then_some(ChoiceValue::Float(next))
        }
        ChoiceValue::Boolean(b) if k == 1 && *b != up => Some(ChoiceValue::Boolean(up)),
        ChoiceValue::Bytes(bytes) if k <= 255 => {
            let mut bytes = bytes.clone();
            let last = bytes.last_mut()?;
            *last = if up { last.checked_add(k as u8)? } else { last.checked_sub(k as u8)? };
            Some(ChoiceValue::Bytes(bytes))
        }
        _ => None,
    }
}

impl<F> Optimiser<F>
where
    F: FnMut(&[ChoiceValue]) -> ConjectureResult,
{
    /// Returns `None` if `initial` has no observation for `label`.
    pub fn new(initial: ConjectureResult, label: &str, test: F, max_calls: usize, seed: u64) -> Option<Self> {
        let score = *initial.target_observations.get(label)?;
        Some(Optimiser {
            test,
            label: label.to_string(),
            current: initial,
            score,
            calls: 0,
            max_calls,
            improvements: 0,
            found_failure: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    fn should_stop(&self) -> bool {
        self.found_failure || self.calls >= self.max_calls
    }

    /// Run `values`, keeping it if it scores strictly better.
    fn consider(&mut self, values: &[ChoiceValue]) -> bool {
        if self.should_stop() {
            return false;
        }
        self.calls += 1;
        let result = (self.test)(values);
        if result.status.is_interesting() {
            log::info!("target phase found a failure: {}", result.status);
            self.found_failure = true;
            return false;
        }
        match result.target_observations.get(&self.label) {
            Some(&score) if score > self.score => {
                log::debug!("target {:?} improved from {} to {}", self.label, self.score, score);
                self.score = score;
                self.current = result;
                self.improvements += 1;
                true
            }
            _ => false,
        }
    }

    fn replace_at(&mut self, base: &[ChoiceValue], i: usize, value: ChoiceValue) -> bool {
        match self.current.nodes.get(i) {
            Some(node) if !node.was_forced && choice_permitted(&value, &node.constraints) => {
                let mut values = base.to_vec();
                values[i] = value;
                self.consider(&values)
            }
            _ => false,
        }
    }

    /// Climb as far as possible by moving choice `i` in one direction.
    fn climb(&mut self, i: usize, up: bool) -> bool {
        let base = self.current.values();
        let Some(original) = base.get(i).cloned() else {
            return false;
        };
        let attempt = |this: &mut Self, k: u64| -> bool {
            match nudge(&original, k, up) {
                Some(value) => this.replace_at(&base, i, value),
                None => false,
            }
        };
        if !attempt(self, 1) {
            return false;
        }
        find_integer(|k| attempt(self, k as u64 + 1));
        true
    }

    /// Redraw one random choice of the current best.
    fn jump(&mut self) {
        let nodes: Vec<(usize, Constraints)> = self
            .current
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.was_forced)
            .map(|(i, node)| (i, node.constraints.clone()))
            .collect();
        if nodes.is_empty() {
            return;
        }
        let (i, constraints) = &nodes[self.rng.gen_range(0..nodes.len())];
        let mut provider = RandomProvider::new(self.rng.gen());
        let value = provider.draw_choice(constraints);
        let base = self.current.values();
        self.replace_at(&base, *i, value);
    }

    pub fn run(mut self) -> OptimiseOutcome {
        let mut failures = 0;
        while !self.should_stop() && failures < MAX_FAILURES {
            let mut improved = false;
            let mut i = 0;
            while i < self.current.len() && !self.should_stop() {
                improved |= self.climb(i, true);
                improved |= self.climb(i, false);
                i += 1;
            }
            if improved {
                failures = 0;
            } else {
                failures += 1;
                self.jump();
            }
        }
        OptimiseOutcome {
            best: self.current,
            score: self.score,
            calls: self.calls,
            improvements: self.improvements,
            found_failure: self.found_failure,
        }
    }
}
