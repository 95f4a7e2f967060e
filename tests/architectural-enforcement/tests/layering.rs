//! Integration Test: Layering
//!
//! **Policy**:
//! - Sink writes (`write_partial` / `write_final`) are only issued by the
//!   persistence writer, which keeps them ordered with the terminal write last.
//! - The client-side registry only knows the byte transport, never the
//!   server-side driver, the chat service or a provider.

use architectural_enforcement::{assert_clean, find_violations, production_sources};

#[test]
fn test_sink_writes_only_from_writer() {
    let files = production_sources();
    let others: Vec<_> = files
        .iter()
        .filter(|f| !f.is("streaming/writer.rs"))
        .collect();

    let violations = find_violations(others, |code| {
        code.contains(".write_partial(") || code.contains(".write_final(")
    });

    assert_clean(
        "Sink writes outside streaming/writer.rs (enqueue through PersistenceWriter)",
        &violations,
    );
}

#[test]
fn test_driver_never_awaits_partial_writes() {
    let files = production_sources();
    let driver: Vec<_> = files
        .iter()
        .filter(|f| f.is("streaming/driver.rs"))
        .collect();
    assert_eq!(driver.len(), 1, "streaming/driver.rs not found");

    let violations = find_violations(driver, |code| code.contains("write_partial"));
    assert_clean(
        "The driver must hand partials to the writer, not the sink",
        &violations,
    );
}

#[test]
fn test_registry_independent_of_server_side() {
    let files = production_sources();
    let registry: Vec<_> = files
        .iter()
        .filter(|f| f.path.components().any(|c| c.as_os_str() == "registry"))
        .collect();
    assert!(!registry.is_empty(), "registry sources not found");

    let violations = find_violations(registry, |code| {
        code.contains("crate::streaming")
            || code.contains("crate::chat")
            || code.contains("crate::backend")
    });

    assert_clean(
        "Registry depends on server-side modules (it may only use the transport)",
        &violations,
    );
}
