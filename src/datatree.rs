//! DataTree: the novelty index over explored choice sequences.
//!
//! Every finished execution is recorded as a path from the root, one edge
//! per choice. A node records the constraints of the draw made there and,
//! if an execution ended there, its conclusion. A node is exhausted once
//! nothing new can be found below it: it holds a conclusion, it was capped
//! explicitly, or every possible child exists and is itself exhausted.
//!
//! Nodes live in an arena and refer to each other by index.

use std::collections::HashMap;

use thiserror::Error;

use crate::choice::{
    choice_permitted, max_children, ChoiceNode, ChoiceType, ChoiceValue, Constraints, IndexConstraints,
};
use crate::data::Status;
use crate::providers::PrimitiveProvider;

pub type NodeId = usize;

fn is_enumerable(constraints: &Constraints) -> bool {
    matches!(constraints, Constraints::Boolean(_) | Constraints::Integer(_) | Constraints::Index(_))
}

const ROOT: NodeId = 0;

/// Random draws attempted per node before falling back to enumeration.
const NOVELTY_ATTEMPTS: usize = 10;

/// Children counts up to this size are enumerated directly.
const ENUMERATION_LIMIT: u128 = 256;

/// A replay disagreed with what was previously recorded for the same prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlakyReplay {
    #[error("choice {depth} was a {previous} draw before but is now a {current} draw")]
    KindChanged { depth: usize, previous: ChoiceType, current: ChoiceType },
    #[error("choice {depth} was drawn with different constraints than before")]
    ConstraintsChanged { depth: usize },
    #[error("execution previously finished after {depth} choices ({previous}) but now drew more")]
    ContinuedPastConclusion { depth: usize, previous: Status },
    #[error("execution previously drew more than {depth} choices but now finished with {current}")]
    StoppedEarly { depth: usize, current: Status },
    #[error("same choices gave {previous} before and {current} now")]
    StatusChanged { previous: Status, current: Status },
}

#[derive(Debug, Clone, Default)]
struct TreeNode {
    parent: Option<NodeId>,
    constraints: Option<Constraints>,
    max_children: Option<u128>,
    children: HashMap<ChoiceValue, NodeId>,
    conclusion: Option<Status>,
    exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct DataTree {
    nodes: Vec<TreeNode>,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    pub fn new() -> Self {
        DataTree { nodes: vec![TreeNode::default()] }
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn child(&self, node: NodeId, value: &ChoiceValue) -> Option<NodeId> {
        self.nodes.get(node)?.children.get(value).copied()
    }

    pub fn is_child_exhausted(&self, node: NodeId, value: &ChoiceValue) -> bool {
        self.child(node, value).map_or(false, |child| self.nodes[child].exhausted)
    }

    /// Has every continuation of the root been explored?
    pub fn is_fully_exhausted(&self) -> bool {
        self.nodes[ROOT].exhausted
    }

    fn add_child(&mut self, parent: NodeId, value: ChoiceValue) -> NodeId {
        if let Some(&existing) = self.nodes[parent].children.get(&value) {
            return existing;
        }
        let id = self.nodes.len();
        self.nodes.push(TreeNode { parent: Some(parent), ..TreeNode::default() });
        self.nodes[parent].children.insert(value, id);
        id
    }

    /// Record the path taken by one execution and its outcome.
    ///
    /// Overruns record the path but no conclusion, since the execution did
    /// not get to decide how it would have ended.
    pub fn record(&mut self, nodes: &[ChoiceNode], status: &Status) -> Result<(), FlakyReplay> {
        let mut current = ROOT;
        for (depth, choice) in nodes.iter().enumerate() {
            let node = &mut self.nodes[current];
            if let Some(previous) = &node.conclusion {
                return Err(FlakyReplay::ContinuedPastConclusion { depth, previous: previous.clone() });
            }
            match &node.constraints {
                Some(existing) if existing.choice_type() != choice.choice_type => {
                    return Err(FlakyReplay::KindChanged {
                        depth,
                        previous: existing.choice_type(),
                        current: choice.choice_type,
                    });
                }
                Some(existing) if *existing != choice.constraints => {
                    return Err(FlakyReplay::ConstraintsChanged { depth });
                }
                Some(_) => {}
                None => {
                    node.max_children = if choice.was_forced { Some(1) } else { max_children(&choice.constraints) };
                    node.constraints = Some(choice.constraints.clone());
                }
            }
            current = self.add_child(current, choice.value.clone());
        }

        if matches!(status, Status::Overrun | Status::Flaky) {
            return Ok(());
        }
        let node = &mut self.nodes[current];
        if node.constraints.is_some() {
            return Err(FlakyReplay::StoppedEarly { depth: nodes.len(), current: status.clone() });
        }
        match &node.conclusion {
            Some(previous) if previous != status => {
                return Err(FlakyReplay::StatusChanged { previous: previous.clone(), current: status.clone() });
            }
            Some(_) => return Ok(()),
            None => node.conclusion = Some(status.clone()),
        }
        self.set_exhausted(current);
        Ok(())
    }

    /// Declare that nothing below `prefix` needs to be explored.
    pub fn mark_exhausted(&mut self, prefix: &[ChoiceValue]) {
        let mut current = ROOT;
        for value in prefix {
            if self.nodes[current].exhausted {
                return;
            }
            current = self.add_child(current, value.clone());
        }
        self.set_exhausted(current);
    }

    fn set_exhausted(&mut self, node: NodeId) {
        let mut current = node;
        self.nodes[current].exhausted = true;
        log::debug!("novelty index: node {} exhausted", current);
        while let Some(parent) = self.nodes[current].parent {
            if self.nodes[parent].exhausted || !self.children_exhausted(parent) {
                break;
            }
            self.nodes[parent].exhausted = true;
            current = parent;
        }
    }

    fn children_exhausted(&self, node: NodeId) -> bool {
        let node = &self.nodes[node];
        match node.max_children {
            Some(max) if node.children.len() as u128 >= max => {
                node.children.values().all(|&child| self.nodes[child].exhausted)
            }
            _ => false,
        }
    }

    /// Is `prefix`, or any prefix of it, exhausted?
    pub fn is_exhausted(&self, prefix: &[ChoiceValue]) -> bool {
        let mut current = ROOT;
        if self.nodes[current].exhausted {
            return true;
        }
        for value in prefix {
            match self.child(current, value) {
                Some(child) => current = child,
                None => return false,
            }
            if self.nodes[current].exhausted {
                return true;
            }
        }
        false
    }

    /// Produce a prefix that leads somewhere not yet explored, or `None`
    /// when the whole tree is exhausted.
    ///
    /// The returned prefix either ends at a child that has never been seen
    /// or at a node whose draw has never been observed, so any continuation
    /// of it is a new execution.
    pub fn generate_novel_prefix(&self, provider: &mut dyn PrimitiveProvider) -> Option<Vec<ChoiceValue>> {
        if self.is_fully_exhausted() {
            return None;
        }
        let mut prefix = Vec::new();
        let mut current = ROOT;
        'descend: loop {
            let node = &self.nodes[current];
            let Some(constraints) = &node.constraints else {
                return Some(prefix);
            };

            if node.max_children == Some(1) {
                if let Some((value, &child)) = node.children.iter().next() {
                    if self.nodes[child].exhausted {
                        return Some(prefix);
                    }
                    prefix.push(value.clone());
                    current = child;
                    continue 'descend;
                }
            }

            if is_enumerable(constraints) && node.max_children.map_or(false, |max| max <= ENUMERATION_LIMIT) {
                let options = self.live_options(current, constraints);
                if options.is_empty() {
                    return Some(prefix);
                }
                let pick = provider.draw_index(&IndexConstraints::new(options.len() as u64)) as usize;
                let value = options[pick].clone();
                match node.children.get(&value) {
                    Some(&child) => {
                        prefix.push(value);
                        current = child;
                        continue 'descend;
                    }
                    None => {
                        prefix.push(value);
                        return Some(prefix);
                    }
                }
            }

            for _ in 0..NOVELTY_ATTEMPTS {
                let value = provider.draw_choice(constraints);
                match node.children.get(&value) {
                    None => {
                        prefix.push(value);
                        return Some(prefix);
                    }
                    Some(&child) if !self.nodes[child].exhausted => {
                        prefix.push(value);
                        current = child;
                        continue 'descend;
                    }
                    Some(_) => {}
                }
            }

            let mut live: Vec<(NodeId, &ChoiceValue)> = node
                .children
                .iter()
                .filter(|(_, &child)| !self.nodes[child].exhausted)
                .map(|(value, &child)| (child, value))
                .collect();
            if live.is_empty() {
                return Some(prefix);
            }
            live.sort_by_key(|&(child, _)| child);
            let pick = provider.draw_index(&IndexConstraints::new(live.len() as u64)) as usize;
            let (child, value) = live[pick];
            prefix.push(value.clone());
            current = child;
        }
    }

    /// Every value at an enumerable node that does not lead into an
    /// exhausted subtree, in a deterministic order.
    fn live_options(&self, node: NodeId, constraints: &Constraints) -> Vec<ChoiceValue> {
        let candidates: Vec<ChoiceValue> = match constraints {
            Constraints::Boolean(_) => vec![ChoiceValue::Boolean(false), ChoiceValue::Boolean(true)],
            Constraints::Integer(c) => match (c.min_value, c.max_value) {
                (Some(min), Some(max)) => (min..=max).map(ChoiceValue::Integer).collect(),
                _ => Vec::new(),
            },
            Constraints::Index(c) => (0..c.n).map(ChoiceValue::Index).collect(),
            _ => Vec::new(),
        };
        candidates
            .into_iter()
            .filter(|value| choice_permitted(value, constraints))
            .filter(|value| !self.is_child_exhausted(node, value))
            .collect()
    }

    /// Predict the status of replaying exactly `values`, if the tree already
    /// knows it. `None` means the execution has to actually run.
    pub fn simulate(&self, values: &[ChoiceValue]) -> Option<Status> {
        let mut current = ROOT;
        for value in values {
            let node = &self.nodes[current];
            if node.conclusion.is_some() {
                return None;
            }
            let constraints = node.constraints.as_ref()?;
            if !choice_permitted(value, constraints) {
                return None;
            }
            current = *node.children.get(value)?;
        }
        let node = &self.nodes[current];
        match (&node.conclusion, &node.constraints) {
            (Some(status), _) => Some(status.clone()),
            (None, Some(_)) => Some(Status::Overrun),
            (None, None) => None,
        }
    }
}
