//! Compiles the small C programs under `tests/fixtures/` on the fly so the
//! integration tests have real tracees to launch against, rather than
//! checked-in prebuilt binaries. Grounded in spec.md §8's named fixtures
//! (`end_immediately`, `run_endlessly`, `reg_write`, `step`).

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Compiles `tests/fixtures/<name>.c` with debug info into a fresh temp
/// file and returns its path. `-g -O0` keeps DWARF line/function info
/// intact and close to source order, which the DWARF-fixture tests rely
/// on; `-no-pie` keeps addresses simple to reason about without having to
/// resolve the load bias for these throwaway integration tests.
pub fn compile_fixture(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    let src = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(format!("{name}.c"));

    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = std::env::temp_dir();
    out.push(format!("ldb_test_fixture_{name}_{}_{n}", std::process::id()));

    let status = Command::new("cc")
        .arg("-g")
        .arg("-O0")
        .arg("-no-pie")
        .arg("-o")
        .arg(&out)
        .arg(&src)
        .status()
        .expect("failed to invoke cc to build test fixture");
    assert!(status.success(), "cc failed to compile {}", src.display());

    out
}
