//! Test case reduction.
//!
//! The shrinker holds a shrink target, the smallest known execution that
//! fails with a given [`InterestingOrigin`], and repeatedly proposes
//! candidate choice sequences derived from it. A candidate replaces the
//! target only if it fails with the same origin and is strictly smaller
//! under the sequence ordering, so the target only ever decreases.
//!
//! Candidates come from a library of passes (see [`passes`]). Passes are
//! grouped into tiers that are run to a fixed point one after another:
//! coarse structural passes first, then fine per-choice passes, then
//! expensive emergency passes. Within a round the steps of all passes are
//! shuffled together, and passes that keep failing are set aside until the
//! others stop making progress.

mod passes;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::choice::{simplest_choice, ChoiceValue, SortKey};
use crate::data::{ConjectureResult, InterestingOrigin};

pub use self::passes::ShrinkPass;
use self::passes::Step;

/// Successful shrinks allowed before giving up on reaching a fixed point.
pub const MAX_SHRINKS: usize = 500;

/// Calls without success after which a pass is set aside for the round.
const STALL_WINDOW: usize = 50;

#[derive(Debug, Clone)]
pub struct ShrinkConfig {
    pub max_shrinks: usize,
    pub time_limit: Option<Duration>,
    pub seed: u64,
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        ShrinkConfig { max_shrinks: MAX_SHRINKS, time_limit: Some(Duration::from_secs(300)), seed: 0 }
    }
}

/// Per-pass bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    pub runs: usize,
    pub calls: usize,
    pub shrinks: usize,
    misses_since_success: usize,
}

/// Why shrinking stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkExit {
    /// No pass can improve the target any further.
    FixedPoint,
    MaxShrinks,
    TimeLimit,
}

impl fmt::Display for ShrinkExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShrinkExit::FixedPoint => write!(f, "fixed point"),
            ShrinkExit::MaxShrinks => write!(f, "shrink limit reached"),
            ShrinkExit::TimeLimit => write!(f, "shrink time limit reached"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShrinkOutcome {
    pub result: ConjectureResult,
    pub calls: usize,
    pub shrinks: usize,
    pub exit: ShrinkExit,
    pub pass_stats: BTreeMap<ShrinkPass, PassStats>,
}

impl ShrinkOutcome {
    /// The result may not be minimal because a budget ran out first.
    pub fn possibly_non_minimal(&self) -> bool {
        self.exit != ShrinkExit::FixedPoint
    }
}

pub struct Shrinker<F>
where
    F: FnMut(&[ChoiceValue]) -> ConjectureResult,
{
    test: F,
    origin: InterestingOrigin,
    current: ConjectureResult,
    current_key: SortKey,
    seen: HashSet<Vec<ChoiceValue>>,
    rng: ChaCha8Rng,
    max_shrinks: usize,
    give_up_at: Option<Instant>,
    calls: usize,
    shrinks: usize,
    active_pass: Option<ShrinkPass>,
    stats: BTreeMap<ShrinkPass, PassStats>,
    set_aside: HashSet<ShrinkPass>,
}

impl<F> Shrinker<F>
where
    F: FnMut(&[ChoiceValue]) -> ConjectureResult,
{
    /// `initial` must be interesting; `test` replays a choice sequence.
    pub fn new(initial: ConjectureResult, test: F, config: ShrinkConfig) -> Self {
        let origin = match initial.origin() {
            Some(origin) => origin.clone(),
            None => panic!("cannot shrink an execution with status {}", initial.status),
        };
        let mut seen = HashSet::new();
        seen.insert(initial.values());
        Shrinker {
            test,
            origin,
            current_key: initial.sort_key(),
            current: initial,
            seen,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            max_shrinks: config.max_shrinks,
            give_up_at: config.time_limit.map(|limit| Instant::now() + limit),
            calls: 0,
            shrinks: 0,
            active_pass: None,
            stats: BTreeMap::new(),
            set_aside: HashSet::new(),
        }
    }

    pub fn current(&self) -> &ConjectureResult {
        &self.current
    }

    fn exit_reason(&self) -> Option<ShrinkExit> {
        if self.shrinks >= self.max_shrinks {
            Some(ShrinkExit::MaxShrinks)
        } else if self.give_up_at.map_or(false, |at| Instant::now() >= at) {
            Some(ShrinkExit::TimeLimit)
        } else {
            None
        }
    }

    /// Run `values` and make it the new target if it is a valid shrink.
    fn consider(&mut self, values: Vec<ChoiceValue>) -> bool {
        if self.exit_reason().is_some() || self.seen.contains(&values) {
            return false;
        }
        let result = (self.test)(&values);
        self.seen.insert(values);
        // Outcomes known without running carry no choices of their own.
        if !result.is_empty() {
            self.seen.insert(result.values());
        }
        self.calls += 1;
        if let Some(pass) = self.active_pass {
            let stats = self.stats.entry(pass).or_default();
            stats.calls += 1;
            stats.misses_since_success += 1;
        }

        if result.origin() != Some(&self.origin) {
            return false;
        }
        let key = result.sort_key();
        if key >= self.current_key {
            return false;
        }
        assert!(key < self.current_key, "shrink target must strictly decrease");
        log::debug!(
            "shrink {} via {:?}: {} -> {} choices",
            self.shrinks + 1,
            self.active_pass,
            self.current.len(),
            result.len()
        );
        self.current = result;
        self.current_key = key;
        self.shrinks += 1;
        if let Some(pass) = self.active_pass {
            let stats = self.stats.entry(pass).or_default();
            stats.shrinks += 1;
            stats.misses_since_success = 0;
        }
        true
    }

    pub fn shrink(mut self) -> ShrinkOutcome {
        let exit = self.run();
        log::debug!("shrinking made {} calls, {} of which shrank ({})", self.calls, self.shrinks, exit);
        for (pass, stats) in &self.stats {
            log::debug!("  {} ran {} times: {} calls, {} shrinks", pass, stats.runs, stats.calls, stats.shrinks);
        }
        ShrinkOutcome {
            result: self.current,
            calls: self.calls,
            shrinks: self.shrinks,
            exit,
            pass_stats: self.stats,
        }
    }

    fn run(&mut self) -> ShrinkExit {
        // If the simplest possible version of the target still fails there
        // is nothing more to find.
        let simplest: Vec<ChoiceValue> = self
            .current
            .nodes
            .iter()
            .map(|node| if node.was_forced { node.value.clone() } else { simplest_choice(&node.constraints) })
            .collect();
        if self.current.nodes.iter().all(|node| node.is_trivial()) || self.consider(simplest) {
            return self.exit_reason().unwrap_or(ShrinkExit::FixedPoint);
        }
        self.consider(Vec::new());

        // Each tier adds to the passes of the one before.
        let coarse = ShrinkPass::COARSE.to_vec();
        let fine: Vec<ShrinkPass> = coarse.iter().chain(ShrinkPass::FINE).copied().collect();
        let emergency: Vec<ShrinkPass> = fine.iter().chain(ShrinkPass::EMERGENCY).copied().collect();
        for passes in [coarse, fine, emergency] {
            if let Some(exit) = self.fixate(&passes) {
                return exit;
            }
        }
        ShrinkExit::FixedPoint
    }

    /// Run steps from `passes` until none of them changes the target.
    fn fixate(&mut self, passes: &[ShrinkPass]) -> Option<ShrinkExit> {
        self.set_aside.clear();
        loop {
            let before = self.current_key.clone();
            let mut steps: Vec<(ShrinkPass, Step)> = Vec::new();
            for &pass in passes.iter().filter(|pass| !self.set_aside.contains(pass)) {
                self.stats.entry(pass).or_default().runs += 1;
                steps.extend(self.steps(pass).into_iter().map(|step| (pass, step)));
            }
            steps.shuffle(&mut self.rng);

            let mut can_discard = self.remove_discarded();
            for (pass, step) in steps {
                if let Some(exit) = self.exit_reason() {
                    return Some(exit);
                }
                if self.set_aside.contains(&pass) {
                    continue;
                }
                self.active_pass = Some(pass);
                self.run_step(pass, step);
                self.active_pass = None;
                if can_discard {
                    can_discard = self.remove_discarded();
                }
                let stalled = self.stats.get(&pass).map_or(false, |s| s.misses_since_success >= STALL_WINDOW);
                if stalled {
                    log::debug!("setting aside {} after {} fruitless calls", pass, STALL_WINDOW);
                    self.set_aside.insert(pass);
                    if let Some(stats) = self.stats.get_mut(&pass) {
                        stats.misses_since_success = 0;
                    }
                }
            }

            if let Some(exit) = self.exit_reason() {
                return Some(exit);
            }
            if self.current_key == before {
                if self.set_aside.is_empty() {
                    return None;
                }
                // Give the set-aside passes another chance now that the
                // others have stopped making progress.
                self.set_aside.clear();
            }
        }
    }

    /// Delete every discarded span at once. Returns whether that is worth
    /// trying again: either nothing was discarded or deleting it worked.
    fn remove_discarded(&mut self) -> bool {
        let mut discarded: Vec<(usize, usize)> = self
            .current
            .inner_spans()
            .filter(|span| span.discarded && !span.is_empty())
            .map(|span| (span.start, span.end))
            .collect();
        if discarded.is_empty() {
            return true;
        }
        discarded.sort_unstable();
        let values = self.current.values();
        let mut kept = Vec::with_capacity(values.len());
        let mut cursor = 0;
        for (start, end) in discarded {
            if start >= cursor {
                kept.extend_from_slice(&values[cursor..start]);
            }
            cursor = cursor.max(end);
        }
        kept.extend_from_slice(&values[cursor.min(values.len())..]);
        self.consider(kept)
    }
}

/// Find `n` such that `f(n)` holds and `f(n + 1)` does not, given that
/// `f(0)` holds. Probes small values linearly, then grows exponentially and
/// finishes with a binary search, so it is cheap when the answer is small.
pub(crate) fn find_integer<G: FnMut(usize) -> bool>(mut f: G) -> usize {
    for i in 1..5 {
        if !f(i) {
            return i - 1;
        }
    }
    let mut lo = 4;
    let mut hi = 5;
    while f(hi) {
        lo = hi;
        match hi.checked_mul(2) {
            Some(next) => hi = next,
            None => return lo,
        }
    }
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        if f(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}
