//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. The engine waits on
//! the transport; the idle limit is a `tokio::time::timeout` around that wait.
//! **Exceptions**: test code

use architectural_enforcement::{report, scan_production};

fn is_sleep(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan_production(is_sleep);
    report("Sleep call in production code", &violations);
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep("std::thread::sleep(d);"));
    assert!(!is_sleep("tokio::time::timeout(limit, reader.next_chunk()).await"));
}
