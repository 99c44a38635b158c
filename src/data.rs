//! ConjectureData: the context object passed to every test execution.
//!
//! All generated data is obtained through the `draw_*` methods, which append
//! exactly one [`ChoiceNode`] per call. A draw is served in one of three
//! ways: verbatim from a replay buffer, from a prefix followed by fresh
//! provider output, or purely from the provider.
//!
//! Aborting an execution (failed `assume`, exhausted replay buffer, choice
//! budget exceeded, deadline passed) is signalled with [`StopTest`], which
//! test bodies propagate with `?`. `StopTest` can only be created here, so
//! whenever one is observed the data already knows its final status.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::choice::{
    choice_permitted, simplest_choice, sort_key, values_of, BooleanConstraints, BytesConstraints, ChoiceNode,
    ChoiceValue, Constraints, FloatConstraints, IndexConstraints, IntegerConstraints, IntervalSet,
    InvalidArgument, SortKey, StringConstraints,
};
use crate::datatree::{DataTree, NodeId};
use crate::providers::PrimitiveProvider;

/// How many times a fresh draw is retried when it would re-enter an
/// exhausted part of the novelty index.
const TREE_REJECTION_RETRIES: usize = 10;

/// Identity of a failure, used to tell distinct bugs apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InterestingOrigin {
    /// The test body panicked at this source location.
    Panic { location: String },
    /// The test body returned an explicit failure with this label.
    Failure(String),
    /// The execution ran past the configured per-execution deadline.
    DeadlineExceeded,
}

impl fmt::Display for InterestingOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterestingOrigin::Panic { location } => write!(f, "panic at {}", location),
            InterestingOrigin::Failure(label) => write!(f, "failure {:?}", label),
            InterestingOrigin::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Classification of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Needed more choices than were available.
    Overrun,
    /// A precondition (`assume`) failed.
    Invalid,
    Valid,
    /// The test failed.
    Interesting(InterestingOrigin),
    /// Replaying an identical sequence gave a different result than before.
    Flaky,
}

impl Status {
    pub fn is_interesting(&self) -> bool {
        matches!(self, Status::Interesting(_))
    }

    pub fn origin(&self) -> Option<&InterestingOrigin> {
        match self {
            Status::Interesting(origin) => Some(origin),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Overrun => write!(f, "overrun"),
            Status::Invalid => write!(f, "invalid"),
            Status::Valid => write!(f, "valid"),
            Status::Interesting(origin) => write!(f, "interesting ({})", origin),
            Status::Flaky => write!(f, "flaky"),
        }
    }
}

/// Control-transfer signal that ends the current execution early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("test case stopped early")]
pub struct StopTest(());

/// A labelled, possibly nested, range of choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub label: String,
    pub start: usize,
    pub end: usize,
    pub depth: usize,
    pub parent: Option<usize>,
    pub discarded: bool,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug)]
enum DrawSource {
    /// Every draw comes from the provider.
    Fresh,
    /// Draws come from the prefix, then from the provider.
    Prefix(Vec<ChoiceValue>),
    /// Draws come only from this buffer; running past its end is an overrun.
    Replay(Vec<ChoiceValue>),
}

impl DrawSource {
    fn buffered(&self, index: usize) -> Option<&ChoiceValue> {
        match self {
            DrawSource::Fresh => None,
            DrawSource::Prefix(values) | DrawSource::Replay(values) => values.get(index),
        }
    }
}

pub const ROOT_SPAN_LABEL: &str = "<root>";

pub struct ConjectureData<'a> {
    source: DrawSource,
    provider: Option<Box<dyn PrimitiveProvider>>,
    tree: Option<&'a DataTree>,
    cursor: Option<NodeId>,
    max_choices: usize,
    nodes: Vec<ChoiceNode>,
    spans: Vec<Span>,
    span_stack: Vec<usize>,
    status: Option<Status>,
    target_observations: BTreeMap<String, f64>,
    notes: Vec<String>,
    events: BTreeSet<String>,
    started: Instant,
    deadline: Option<Duration>,
    draw_time: Duration,
    misaligned_at: Option<usize>,
    rejected_by_tree: bool,
    invalid_argument: Option<InvalidArgument>,
}

impl fmt::Debug for ConjectureData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConjectureData")
            .field("source", &self.source)
            .field("nodes", &self.nodes.len())
            .field("status", &self.status)
            .finish()
    }
}

impl<'a> ConjectureData<'a> {
    fn build(source: DrawSource, provider: Option<Box<dyn PrimitiveProvider>>, max_choices: usize) -> Self {
        let root = Span {
            label: ROOT_SPAN_LABEL.to_string(),
            start: 0,
            end: 0,
            depth: 0,
            parent: None,
            discarded: false,
        };
        ConjectureData {
            source,
            provider,
            tree: None,
            cursor: None,
            max_choices,
            nodes: Vec::new(),
            spans: vec![root],
            span_stack: vec![0],
            status: None,
            target_observations: BTreeMap::new(),
            notes: Vec::new(),
            events: BTreeSet::new(),
            started: Instant::now(),
            deadline: None,
            draw_time: Duration::ZERO,
            misaligned_at: None,
            rejected_by_tree: false,
            invalid_argument: None,
        }
    }

    /// Fresh generation from `provider`.
    pub fn new(provider: Box<dyn PrimitiveProvider>, max_choices: usize) -> Self {
        Self::build(DrawSource::Fresh, Some(provider), max_choices)
    }

    /// Serve draws from `prefix` first, then from `provider`.
    pub fn with_prefix(prefix: Vec<ChoiceValue>, provider: Box<dyn PrimitiveProvider>, max_choices: usize) -> Self {
        Self::build(DrawSource::Prefix(prefix), Some(provider), max_choices)
    }

    /// Strict replay of `values`. Needing more choices than supplied is an overrun.
    pub fn for_choices(values: &[ChoiceValue]) -> Self {
        let max_choices = values.len();
        Self::build(DrawSource::Replay(values.to_vec()), None, max_choices)
    }

    pub fn with_max_choices(mut self, max_choices: usize) -> Self {
        self.max_choices = max_choices;
        self
    }

    /// Consult `tree` on fresh draws so that they avoid exhausted subtrees.
    pub fn with_tree(mut self, tree: &'a DataTree) -> Self {
        self.cursor = Some(tree.root());
        self.tree = Some(tree);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    // === DRAW PROTOCOL ===

    /// Draw one choice. This is the only way test code obtains data.
    pub fn draw(&mut self, constraints: Constraints, forced: Option<ChoiceValue>) -> Result<ChoiceValue, StopTest> {
        if self.status.is_some() {
            return Err(StopTest(()));
        }
        if let Err(err) = constraints.validate() {
            return Err(self.reject_argument(err));
        }
        if let Some(value) = &forced {
            if !choice_permitted(value, &constraints) {
                let err = InvalidArgument::new(format!("forced value {} is not permitted by {:?}", value, constraints));
                return Err(self.reject_argument(err));
            }
        }
        if self.nodes.len() >= self.max_choices {
            return Err(self.conclude(Status::Overrun));
        }
        if let Some(deadline) = self.deadline {
            if self.started.elapsed() > deadline {
                return Err(self.conclude(Status::Interesting(InterestingOrigin::DeadlineExceeded)));
            }
        }

        let index = self.nodes.len();
        let was_forced = forced.is_some();
        let value = match forced {
            Some(value) => value,
            None => match self.source.buffered(index) {
                Some(value) if choice_permitted(value, &constraints) => value.clone(),
                Some(_) => {
                    // The test drew something different from what was recorded here.
                    self.misaligned_at.get_or_insert(index);
                    simplest_choice(&constraints)
                }
                None if matches!(self.source, DrawSource::Replay(_)) => {
                    return Err(self.conclude(Status::Overrun));
                }
                None => self.generate(&constraints)?,
            },
        };

        if let (Some(tree), Some(node)) = (self.tree, self.cursor) {
            self.cursor = tree.child(node, &value);
        }
        self.nodes.push(ChoiceNode::new(value.clone(), constraints, was_forced));
        Ok(value)
    }

    fn generate(&mut self, constraints: &Constraints) -> Result<ChoiceValue, StopTest> {
        let Some(provider) = self.provider.as_mut() else {
            return Err(self.conclude(Status::Overrun));
        };
        let started = Instant::now();
        let mut value = provider.draw_choice(constraints);
        if let (Some(tree), Some(node)) = (self.tree, self.cursor) {
            let mut attempts = 0;
            while tree.is_child_exhausted(node, &value) {
                attempts += 1;
                if attempts >= TREE_REJECTION_RETRIES {
                    self.draw_time += started.elapsed();
                    self.rejected_by_tree = true;
                    return Err(self.conclude(Status::Overrun));
                }
                value = provider.draw_choice(constraints);
            }
        }
        self.draw_time += started.elapsed();
        Ok(value)
    }

    fn reject_argument(&mut self, err: InvalidArgument) -> StopTest {
        log::warn!("rejecting draw: {}", err);
        self.invalid_argument = Some(err);
        self.conclude(Status::Invalid)
    }

    pub fn draw_integer(&mut self, min_value: Option<i128>, max_value: Option<i128>) -> Result<i128, StopTest> {
        self.draw_integer_with(IntegerConstraints::new(min_value, max_value))
    }

    pub fn draw_integer_with(&mut self, constraints: IntegerConstraints) -> Result<i128, StopTest> {
        let value = self.draw(Constraints::Integer(constraints), None)?;
        Ok(value.as_integer().unwrap_or_default())
    }

    pub fn draw_boolean(&mut self, p: f64) -> Result<bool, StopTest> {
        let value = self.draw(Constraints::Boolean(BooleanConstraints::new(p)), None)?;
        Ok(value.as_bool().unwrap_or_default())
    }

    pub fn draw_float(&mut self, min_value: f64, max_value: f64) -> Result<f64, StopTest> {
        self.draw_float_with(FloatConstraints::new(min_value, max_value))
    }

    pub fn draw_float_with(&mut self, constraints: FloatConstraints) -> Result<f64, StopTest> {
        let value = self.draw(Constraints::Float(constraints), None)?;
        Ok(value.as_float().unwrap_or_default())
    }

    pub fn draw_bytes(&mut self, min_size: usize, max_size: usize) -> Result<Vec<u8>, StopTest> {
        match self.draw(Constraints::Bytes(BytesConstraints::new(min_size, max_size)), None)? {
            ChoiceValue::Bytes(bytes) => Ok(bytes),
            _ => Ok(Vec::new()),
        }
    }

    pub fn draw_string(&mut self, alphabet: &IntervalSet, min_size: usize, max_size: usize) -> Result<String, StopTest> {
        let constraints = StringConstraints::new(alphabet.clone(), min_size, max_size);
        match self.draw(Constraints::String(constraints), None)? {
            ChoiceValue::String(s) => Ok(s),
            _ => Ok(String::new()),
        }
    }

    /// Pick one of `n` alternatives uniformly.
    pub fn draw_index(&mut self, n: u64) -> Result<u64, StopTest> {
        let value = self.draw(Constraints::Index(IndexConstraints::new(n)), None)?;
        Ok(value.as_index().unwrap_or_default())
    }

    pub fn draw_weighted_index(&mut self, weights: &[f64]) -> Result<u64, StopTest> {
        let value = self.draw(Constraints::Index(IndexConstraints::weighted(weights.to_vec())), None)?;
        Ok(value.as_index().unwrap_or_default())
    }

    /// Record a choice whose value is fixed by the caller. Forced choices are
    /// never modified by the shrinker.
    pub fn draw_forced(&mut self, constraints: Constraints, value: ChoiceValue) -> Result<ChoiceValue, StopTest> {
        self.draw(constraints, Some(value))
    }

    // === SPANS ===

    pub fn start_span(&mut self, label: &str) {
        let index = self.spans.len();
        let parent = self.span_stack.last().copied();
        self.spans.push(Span {
            label: label.to_string(),
            start: self.nodes.len(),
            end: self.nodes.len(),
            depth: self.span_stack.len(),
            parent,
            discarded: false,
        });
        self.span_stack.push(index);
        if let Some(provider) = self.provider.as_mut() {
            provider.span_start(label);
        }
    }

    pub fn stop_span(&mut self, discard: bool) {
        // The root span is closed by `freeze`.
        if self.span_stack.len() <= 1 {
            return;
        }
        if let Some(index) = self.span_stack.pop() {
            let span = &mut self.spans[index];
            span.end = self.nodes.len();
            span.discarded = discard;
        }
        if let Some(provider) = self.provider.as_mut() {
            provider.span_end(discard);
        }
    }

    /// Run `body` inside a span labelled `label`.
    pub fn span<T, F>(&mut self, label: &str, body: F) -> Result<T, StopTest>
    where
        F: FnOnce(&mut Self) -> Result<T, StopTest>,
    {
        self.start_span(label);
        let result = body(self);
        self.stop_span(false);
        result
    }

    // === TEST-FACING CONTROL ===

    /// Abort the execution as invalid unless `condition` holds.
    pub fn assume(&mut self, condition: bool) -> Result<(), StopTest> {
        if condition {
            Ok(())
        } else {
            Err(self.conclude(Status::Invalid))
        }
    }

    pub fn mark_invalid(&mut self) -> StopTest {
        self.conclude(Status::Invalid)
    }

    /// Report a score for targeted search. Higher is better. The last
    /// observation for a label wins.
    pub fn target(&mut self, label: &str, score: f64) {
        if score.is_nan() {
            log::warn!("ignoring NaN target observation for {:?}", label);
            return;
        }
        self.target_observations.insert(label.to_string(), score);
    }

    pub fn note(&mut self, value: impl fmt::Display) {
        self.notes.push(value.to_string());
    }

    pub fn event(&mut self, label: impl Into<String>) {
        self.events.insert(label.into());
    }

    // === INSPECTION ===

    pub fn choice_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[ChoiceNode] {
        &self.nodes
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Set the final status unless one has already been decided.
    pub(crate) fn conclude(&mut self, status: Status) -> StopTest {
        if self.status.is_none() {
            self.status = Some(status);
        }
        StopTest(())
    }

    pub fn freeze(mut self) -> ConjectureResult {
        let len = self.nodes.len();
        while let Some(index) = self.span_stack.pop() {
            self.spans[index].end = len;
        }
        ConjectureResult {
            status: self.status.unwrap_or(Status::Valid),
            nodes: self.nodes,
            spans: self.spans,
            target_observations: self.target_observations,
            notes: self.notes,
            events: self.events,
            runtime: self.started.elapsed(),
            draw_time: self.draw_time,
            misaligned_at: self.misaligned_at,
            rejected_by_tree: self.rejected_by_tree,
            invalid_argument: self.invalid_argument,
        }
    }
}

/// Immutable record of a finished execution.
#[derive(Debug, Clone)]
pub struct ConjectureResult {
    pub status: Status,
    pub nodes: Vec<ChoiceNode>,
    pub spans: Vec<Span>,
    pub target_observations: BTreeMap<String, f64>,
    pub notes: Vec<String>,
    pub events: BTreeSet<String>,
    pub runtime: Duration,
    pub draw_time: Duration,
    pub misaligned_at: Option<usize>,
    pub rejected_by_tree: bool,
    pub invalid_argument: Option<InvalidArgument>,
}

impl ConjectureResult {
    pub fn values(&self) -> Vec<ChoiceValue> {
        values_of(&self.nodes)
    }

    pub fn sort_key(&self) -> SortKey {
        sort_key(&self.nodes)
    }

    pub fn origin(&self) -> Option<&InterestingOrigin> {
        self.status.origin()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Spans other than the root, in start order.
    pub fn inner_spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter().skip(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RandomProvider;

    fn fresh(max_choices: usize) -> ConjectureData<'static> {
        ConjectureData::new(Box::new(RandomProvider::new(0)), max_choices)
    }

    #[test]
    fn replay_serves_values_verbatim() {
        let mut data = ConjectureData::for_choices(&[ChoiceValue::Integer(7), ChoiceValue::Boolean(true)]);
        assert_eq!(data.draw_integer(Some(0), Some(10)), Ok(7));
        assert_eq!(data.draw_boolean(0.5), Ok(true));
        let result = data.freeze();
        assert_eq!(result.status, Status::Valid);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn exhausted_replay_buffer_is_overrun() {
        let mut data = ConjectureData::for_choices(&[ChoiceValue::Integer(1)]);
        assert!(data.draw_integer(None, None).is_ok());
        assert!(data.draw_integer(None, None).is_err());
        assert_eq!(data.freeze().status, Status::Overrun);
    }

    #[test]
    fn misaligned_replay_uses_simplest_value() {
        let mut data = ConjectureData::for_choices(&[ChoiceValue::Integer(50)]);
        assert_eq!(data.draw_integer(Some(5), Some(10)), Ok(5));
        assert_eq!(data.freeze().misaligned_at, Some(0));

        let mut data = ConjectureData::for_choices(&[ChoiceValue::Boolean(true)]);
        assert_eq!(data.draw_integer(Some(3), Some(10)), Ok(3));
    }

    #[test]
    fn prefix_then_random() {
        let provider = Box::new(RandomProvider::new(1));
        let mut data = ConjectureData::with_prefix(vec![ChoiceValue::Integer(3)], provider, 100);
        assert_eq!(data.draw_integer(Some(0), Some(5)), Ok(3));
        let next = data.draw_integer(Some(0), Some(5)).unwrap();
        assert!((0..=5).contains(&next));
    }

    #[test]
    fn choice_budget_is_overrun() {
        let mut data = fresh(3);
        for _ in 0..3 {
            data.draw_boolean(0.5).unwrap();
        }
        assert!(data.draw_boolean(0.5).is_err());
        assert_eq!(data.freeze().status, Status::Overrun);
    }

    #[test]
    fn assume_marks_invalid_and_stops_drawing() {
        let mut data = fresh(100);
        assert!(data.assume(true).is_ok());
        assert!(data.assume(false).is_err());
        assert!(data.draw_boolean(0.5).is_err());
        assert_eq!(data.freeze().status, Status::Invalid);
    }

    #[test]
    fn bad_constraints_are_recorded() {
        let mut data = fresh(100);
        assert!(data.draw_integer(Some(10), Some(0)).is_err());
        let result = data.freeze();
        assert_eq!(result.status, Status::Invalid);
        assert!(result.invalid_argument.is_some());
    }

    #[test]
    fn forced_values_are_flagged() {
        let mut data = fresh(100);
        let c = Constraints::Integer(IntegerConstraints::bounded(0, 10));
        assert_eq!(data.draw_forced(c.clone(), ChoiceValue::Integer(4)), Ok(ChoiceValue::Integer(4)));
        assert!(data.nodes()[0].was_forced);
        assert!(data.draw_forced(c, ChoiceValue::Integer(40)).is_err());
    }

    #[test]
    fn spans_nest() {
        let mut data = fresh(100);
        data.span("outer", |data| {
            data.draw_boolean(0.5)?;
            data.span("inner", |data| data.draw_integer(Some(0), Some(3)))?;
            Ok(())
        })
        .unwrap();
        data.draw_boolean(0.5).unwrap();
        let result = data.freeze();
        let spans: Vec<&Span> = result.inner_spans().collect();
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].end, spans[0].depth), (0, 2, 1));
        assert_eq!((spans[1].start, spans[1].end, spans[1].depth), (1, 2, 2));
        assert_eq!(spans[1].parent, Some(1));
        assert_eq!(result.spans[0].end, 3);
    }

    #[test]
    fn deadline_is_checked_at_draws() {
        let mut data = fresh(100).with_deadline(Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert!(data.draw_boolean(0.5).is_err());
        assert_eq!(data.freeze().status, Status::Interesting(InterestingOrigin::DeadlineExceeded));
    }

    #[test]
    fn targets_and_notes_are_kept() {
        let mut data = fresh(100);
        data.target("size", 3.0);
        data.target("size", 5.0);
        data.target("nan", f64::NAN);
        data.note("hello");
        data.event("branch a");
        let result = data.freeze();
        assert_eq!(result.target_observations.get("size"), Some(&5.0));
        assert!(!result.target_observations.contains_key("nan"));
        assert_eq!(result.notes, vec!["hello".to_string()]);
        assert!(result.events.contains("branch a"));
    }
}
