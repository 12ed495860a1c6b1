//! Test assertions for pipeline output.

use crate::errors::PipelineError;
use crate::fault::FaultReport;
use std::fmt::Debug;

/// Returns `items` sorted. Pipeline output order is not defined, so tests
/// compare sorted vectors.
#[must_use]
pub fn sorted<T: Ord>(mut items: Vec<T>) -> Vec<T> {
    items.sort();
    items
}

/// Asserts that two collections hold the same items with the same
/// multiplicities, in any order.
pub fn assert_same_multiset<T: Ord + Debug>(actual: Vec<T>, expected: Vec<T>) {
    let actual = sorted(actual);
    let expected = sorted(expected);
    assert_eq!(
        actual, expected,
        "Expected the same items in any order"
    );
}

/// Asserts that `result` failed with a worker fault whose kind contains
/// `kind_fragment`, and returns the report.
pub fn assert_fault<'a, T: Debug>(
    result: &'a Result<T, PipelineError>,
    kind_fragment: &str,
) -> &'a FaultReport {
    let report = match result {
        Err(err) => err
            .fault_report()
            .unwrap_or_else(|| panic!("Expected a worker fault, got: {err}")),
        Ok(value) => panic!("Expected a worker fault, got Ok({value:?})"),
    };
    assert!(
        report.kind.contains(kind_fragment),
        "Expected fault kind containing '{}', got '{}'",
        kind_fragment,
        report.kind
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PipelineFault;
    use chrono::Utc;

    fn fault(kind: &str) -> PipelineError {
        PipelineFault::new(FaultReport {
            stage: "map-1".to_string(),
            worker_index: 0,
            kind: kind.to_string(),
            message: "bad".to_string(),
            trace: String::new(),
            occurred_at: Utc::now(),
        })
        .into()
    }

    #[test]
    fn test_sorted() {
        assert_eq!(sorted(vec![3, 1, 2]), vec![1, 2, 3]);
    }

    #[test]
    fn test_same_multiset_ignores_order() {
        assert_same_multiset(vec![2, 1, 2], vec![1, 2, 2]);
    }

    #[test]
    #[should_panic(expected = "same items")]
    fn test_same_multiset_checks_multiplicity() {
        assert_same_multiset(vec![1, 2], vec![1, 2, 2]);
    }

    #[test]
    fn test_assert_fault_returns_report() {
        let result: Result<Vec<i32>, PipelineError> = Err(fault("app::ValueError"));
        let report = assert_fault(&result, "ValueError");
        assert_eq!(report.stage, "map-1");
    }

    #[test]
    #[should_panic(expected = "Expected a worker fault")]
    fn test_assert_fault_rejects_ok() {
        let result: Result<Vec<i32>, PipelineError> = Ok(vec![1]);
        assert_fault(&result, "ValueError");
    }
}
