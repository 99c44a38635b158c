//! Shrinker behaviour on small hand-written tests, driven without a runner.

use conjecture_engine::choice::IntegerConstraints;
use conjecture_engine::execution::execute;
use conjecture_engine::shrinker::ShrinkExit;
use conjecture_engine::{
    ChoiceValue, ConjectureData, ConjectureResult, Constraints, IntervalSet, ShrinkConfig, ShrinkOutcome, Shrinker,
    TestFailure, TestResult,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn run<T>(test: &mut T, values: &[ChoiceValue]) -> ConjectureResult
where
    T: FnMut(&mut ConjectureData<'_>) -> TestResult,
{
    execute(test, ConjectureData::for_choices(values))
}

fn shrink<T>(mut test: T, start: Vec<ChoiceValue>) -> ShrinkOutcome
where
    T: FnMut(&mut ConjectureData<'_>) -> TestResult,
{
    init_logging();
    let initial = run(&mut test, &start);
    assert!(initial.status.is_interesting(), "starting point does not fail: {}", initial.status);
    Shrinker::new(initial, |values: &[ChoiceValue]| run(&mut test, values), ShrinkConfig::default()).shrink()
}

fn strings(values: &[&str]) -> Vec<ChoiceValue> {
    values.iter().map(|s| ChoiceValue::String(s.to_string())).collect()
}

fn ints(values: &[i128]) -> Vec<ChoiceValue> {
    values.iter().copied().map(ChoiceValue::Integer).collect()
}

fn strings_differ(data: &mut ConjectureData<'_>) -> TestResult {
    let alphabet = IntervalSet::ascii();
    let x = data.draw_string(&alphabet, 0, 20)?;
    let y = data.draw_string(&alphabet, 0, 20)?;
    if x != y {
        return Err(TestFailure::failed("differ"));
    }
    Ok(())
}

#[test]
fn unequal_strings_put_the_empty_one_first() {
    for start in [strings(&["hello", "world"]), strings(&["b", ""]), strings(&["zz", "z"])] {
        let outcome = shrink(strings_differ, start);
        assert_eq!(outcome.result.values(), strings(&["", "0"]));
        assert_eq!(outcome.exit, ShrinkExit::FixedPoint);
    }
}

fn sum_bound(data: &mut ConjectureData<'_>) -> TestResult {
    let m = data.draw_integer(Some(0), None)?;
    let n = data.draw_integer(Some(0), None)?;
    if m + n >= 100 {
        return Err(TestFailure::failed("sum"));
    }
    Ok(())
}

#[test]
fn sum_bound_moves_everything_to_the_second_value() {
    for start in [ints(&[73, 91]), ints(&[1000, 0]), ints(&[50, 50])] {
        let outcome = shrink(sum_bound, start);
        assert_eq!(outcome.result.values(), ints(&[0, 100]));
    }
}

#[test]
fn every_accepted_shrink_is_strictly_smaller() {
    let mut test = |data: &mut ConjectureData<'_>| -> TestResult {
        let n = data.draw_integer(Some(0), Some(10))?;
        let mut total = 0;
        for _ in 0..n {
            total += data.span("element", |data| data.draw_integer(Some(0), Some(1000)))?;
        }
        if total > 1500 {
            return Err(TestFailure::failed("total"));
        }
        Ok(())
    };
    let start = ints(&[6, 900, 12, 700, 3, 800, 5]);
    let initial = run(&mut test, &start);
    let mut best = initial.sort_key();
    let outcome = Shrinker::new(
        initial,
        |values: &[ChoiceValue]| {
            let result = run(&mut test, values);
            if result.status.is_interesting() && result.sort_key() < best {
                best = result.sort_key();
            }
            result
        },
        ShrinkConfig::default(),
    )
    .shrink();
    assert!(outcome.shrinks > 0);
    assert!(outcome.result.status.is_interesting());
    assert_eq!(outcome.result.sort_key(), best);
    assert!(outcome.result.len() < start.len());
}

#[test]
fn shrinking_a_minimal_example_changes_nothing() {
    let first = shrink(sum_bound, ints(&[300, 400]));
    let again = shrink(sum_bound, first.result.values());
    assert_eq!(again.result.values(), first.result.values());
    assert_eq!(again.shrinks, 0);
}

#[test]
fn forced_choices_are_left_alone() {
    let outcome = shrink(
        |data: &mut ConjectureData<'_>| -> TestResult {
            data.draw_forced(Constraints::Integer(IntegerConstraints::bounded(0, 100)), ChoiceValue::Integer(50))?;
            let n = data.draw_integer(Some(0), Some(100))?;
            if n > 3 {
                return Err(TestFailure::failed("n"));
            }
            Ok(())
        },
        ints(&[50, 77]),
    );
    assert_eq!(outcome.result.values(), ints(&[50, 4]));
    assert!(outcome.result.nodes[0].was_forced);
}

#[test]
fn irrelevant_spans_are_deleted() {
    let outcome = shrink(
        |data: &mut ConjectureData<'_>| -> TestResult {
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
        },
        vec![
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(7),
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(42),
            ChoiceValue::Boolean(true),
            ChoiceValue::Integer(99),
            ChoiceValue::Boolean(false),
        ],
    );
    assert_eq!(
        outcome.result.values(),
        vec![ChoiceValue::Boolean(true), ChoiceValue::Integer(42), ChoiceValue::Boolean(false)]
    );
}

#[test]
fn shrink_budget_is_reported() {
    let mut test = sum_bound;
    let initial = run(&mut test, &ints(&[5000, 5000]));
    let outcome = Shrinker::new(
        initial,
        |values: &[ChoiceValue]| run(&mut test, values),
        ShrinkConfig { max_shrinks: 1, ..ShrinkConfig::default() },
    )
    .shrink();
    assert_eq!(outcome.exit, ShrinkExit::MaxShrinks);
    assert!(outcome.possibly_non_minimal());
}
