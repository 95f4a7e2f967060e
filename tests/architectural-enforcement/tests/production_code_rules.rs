//! Integration Test: Production Code Rules
//!
//! **Policy**: production code in the relay crates waits on I/O instead of
//! sleeping, and propagates errors instead of panicking on them.
//! **Exceptions**: test modules (everything after `#[cfg(test)]`).

use architectural_enforcement::{assert_clean, find_violations, production_sources};

#[test]
fn test_no_sleep_in_production_code() {
    let files = production_sources();
    let violations = find_violations(&files, |code| {
        code.contains("::sleep(") || code.contains(".sleep(")
    });

    assert_clean(
        "Sleep calls found in production code (wait on channels or tokens instead)",
        &violations,
    );
}

#[test]
fn test_no_unwrap_in_production_code() {
    let files = production_sources();
    let violations = find_violations(&files, |code| {
        code.contains(".unwrap()") || code.contains(".expect(")
    });

    assert_clean(
        "unwrap()/expect() found in production code (propagate with ?)",
        &violations,
    );
}

#[test]
fn test_no_blocking_thread_primitives_in_async_code() {
    let files = production_sources();
    let violations = find_violations(&files, |code| {
        code.contains("std::sync::Mutex") || code.contains("std::thread::spawn")
    });

    assert_clean(
        "std blocking primitives found (use parking_lot locks or tokio tasks)",
        &violations,
    );
}
