//! The novelty tree driven the way the runner drives it: draw a novel
//! prefix, run the test on it with the tree attached, record the outcome.

use std::collections::HashSet;

use conjecture_engine::execution::execute;
use conjecture_engine::{
    ChoiceValue, ConjectureData, DataTree, HypothesisProvider, RandomProvider, Status, TestFailure, TestResult,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_test(data: &mut ConjectureData<'_>) -> TestResult {
    let n = data.draw_integer(Some(0), Some(3))?;
    for _ in 0..n {
        data.draw_boolean(0.5)?;
    }
    if n == 3 && data.draw_boolean(0.5)? {
        return Err(TestFailure::failed("three"));
    }
    Ok(())
}

/// Run `test` until the tree reports nothing new is left, returning every
/// concluded sequence in the order it was seen.
fn enumerate<T>(mut test: T, seed: u64, limit: usize) -> (DataTree, Vec<(Vec<ChoiceValue>, Status)>)
where
    T: FnMut(&mut ConjectureData<'_>) -> TestResult,
{
    let mut tree = DataTree::new();
    let mut prefixes = RandomProvider::new(seed);
    let mut concluded = Vec::new();
    for round in 0..limit {
        let Some(prefix) = tree.generate_novel_prefix(&mut prefixes) else {
            break;
        };
        let data = ConjectureData::with_prefix(prefix, Box::new(HypothesisProvider::new(seed + round as u64)), 100)
            .with_tree(&tree);
        let result = execute(&mut test, data);
        tree.record(&result.nodes, &result.status).unwrap();
        if result.status != Status::Overrun {
            concluded.push((result.values(), result.status));
        }
    }
    (tree, concluded)
}

#[test]
fn generated_sequences_are_never_repeated() {
    init_logging();
    let (tree, concluded) = enumerate(small_test, 3, 1000);
    assert!(tree.is_fully_exhausted());

    let distinct: HashSet<&Vec<ChoiceValue>> = concluded.iter().map(|(values, _)| values).collect();
    assert_eq!(distinct.len(), concluded.len());
    // 1 + 2 + 4 + 8 * 2 leaves.
    assert_eq!(concluded.len(), 23);
    let failures = concluded.iter().filter(|(_, status)| status.is_interesting()).count();
    assert_eq!(failures, 8);
}

#[test]
fn simulation_agrees_with_execution() {
    init_logging();
    let (tree, concluded) = enumerate(small_test, 11, 1000);
    for (values, status) in &concluded {
        assert_eq!(tree.simulate(values).as_ref(), Some(status));
        let mut test = small_test;
        let replayed = execute(&mut test, ConjectureData::for_choices(values));
        assert_eq!(&replayed.status, status);
    }
    assert_eq!(tree.simulate(&[ChoiceValue::Integer(3)]), Some(Status::Overrun));
}

#[test]
fn unbounded_draws_keep_finding_new_sequences() {
    init_logging();
    let (tree, concluded) = enumerate(
        |data: &mut ConjectureData<'_>| -> TestResult {
            data.draw_integer(None, None)?;
            data.draw_bytes(0, 8)?;
            Ok(())
        },
        5,
        200,
    );
    assert!(!tree.is_fully_exhausted());
    let distinct: HashSet<&Vec<ChoiceValue>> = concluded.iter().map(|(values, _)| values).collect();
    assert_eq!(distinct.len(), concluded.len());
    assert!(concluded.len() > 150);
}
