//! Integration Test: Panic Prohibition
//!
//! The engine turns every failure into a terminal snapshot. Production code
//! must therefore never unwind across the public boundary.
//!
//! **Forbidden**: `.unwrap()`, `.expect(`, `panic!(`, `todo!(`, `unimplemented!(`
//! **Exceptions**: test code

use architectural_enforcement::{report, scan_production};

const FORBIDDEN: &[&str] = &[".unwrap()", ".expect(", "panic!(", "todo!(", "unimplemented!("];

fn is_panicking(code: &str) -> bool {
    FORBIDDEN.iter().any(|pattern| code.contains(pattern))
}

#[test]
fn test_no_panics_in_production_code() {
    let violations = scan_production(is_panicking);
    report("Panicking call in production code", &violations);
}

#[test]
fn test_detector_flags_panicking_calls() {
    assert!(is_panicking("let x = y.unwrap();"));
    assert!(is_panicking("let x = y.expect(\"msg\");"));
    assert!(is_panicking("panic!(\"boom\")"));
    assert!(!is_panicking("let x = y.unwrap_or_default();"));
    assert!(!is_panicking("let x = y.unwrap_or_else(|_| z);"));
}
