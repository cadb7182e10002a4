//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: The async pipeline (transport, engine, snapshot publishing)
//! MUST NOT use blocking I/O. Use `tokio::io` and `tokio::fs`.
//! **Exceptions**: configuration loading, which runs before any stream is
//! consumed; test code.

use std::path::Path;

use architectural_enforcement::{check_file, report, workspace_root, Violation};

const ASYNC_MODULES: &[&str] = &[
    "engine/core/src/transport.rs",
    "engine/core/src/engine.rs",
    "engine/core/src/snapshot.rs",
    "engine/replay/src/main.rs",
];

const FORBIDDEN: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::io::stdin",
    "std::io::Read",
    "reqwest::blocking",
];

fn is_blocking(code: &str) -> bool {
    FORBIDDEN.iter().any(|pattern| code.contains(pattern))
}

#[test]
fn test_no_blocking_io_in_async_modules() {
    let root = workspace_root();
    let mut violations: Vec<Violation> = Vec::new();
    for module in ASYNC_MODULES {
        let path = root.join(module);
        assert!(path.exists(), "missing {}", path.display());
        check_file(Path::new(&path), &mut violations, &is_blocking);
    }
    report("Blocking I/O in async code", &violations);
}

#[test]
fn test_blocking_detection() {
    assert!(is_blocking("let s = std::fs::read_to_string(p)?;"));
    assert!(is_blocking("use reqwest::blocking::Client;"));
    assert!(!is_blocking("let f = tokio::fs::File::open(p).await?;"));
}
