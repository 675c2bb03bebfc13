//! Tests for correlation id issuance.

use super::*;
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn test_first_id_is_one() {
    let generator = CorrelationIdGenerator::new();
    assert_eq!(generator.next_id(), CorrelationId::new(1));
}

/// Verify that ids increase by exactly one per call.
#[test]
fn test_ids_increment_by_one() {
    let generator = CorrelationIdGenerator::new();

    let ids: Vec<u64> = (0..5).map(|_| generator.next_id().value()).collect();

    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(generator.peek().value(), 6);
}

#[test]
fn test_display_is_plain_integer() {
    assert_eq!(CorrelationId::new(42).to_string(), "42");
}

/// Verify that the counter wraps instead of panicking at the integer limit.
#[test]
fn test_wraparound_is_not_guarded() {
    let generator = CorrelationIdGenerator::starting_at(u64::MAX);

    assert_eq!(generator.next_id().value(), u64::MAX);
    assert_eq!(generator.next_id().value(), 0);
}

/// Verify that ids issued from many tasks at once are pairwise distinct.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ids_are_distinct() {
    let generator = Arc::new(CorrelationIdGenerator::new());
    let mut tasks = Vec::new();

    for _ in 0..16 {
        let generator = generator.clone();
        tasks.push(tokio::spawn(async move {
            (0..250).map(|_| generator.next_id()).collect::<Vec<_>>()
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.expect("task should complete") {
            assert!(seen.insert(id), "duplicate correlation id {id}");
        }
    }

    assert_eq!(seen.len(), 16 * 250);
    assert_eq!(generator.peek().value(), 16 * 250 + 1);
}
