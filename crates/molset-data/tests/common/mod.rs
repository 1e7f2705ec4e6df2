// Shared helpers for tests that run part of their work in a child process.
//
// The parent re-executes the current test binary, filtered down to one
// test, with a JSON payload in an environment variable. That test sees the
// variable, does its work in the fresh process, and prints one marker line
// per result for the parent to collect.

#![allow(dead_code)]

use std::process::{Child, Command, Stdio};

use molset_data::HandleId;
use tracing_subscriber::EnvFilter;

/// Environment variable carrying the payload to a child process.
pub const PAYLOAD_VAR: &str = "MOLSET_TEST_PAYLOAD";

const MARKER: &str = "HANDLE_ID ";

/// Route `tracing` output through the test harness (`RUST_LOG=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The payload, if this process was started by [`spawn_child`].
pub fn child_payload() -> Option<String> {
    std::env::var(PAYLOAD_VAR).ok()
}

/// Start this test binary again running only `test_name`.
pub fn spawn_child(test_name: &str, payload: &str) -> Child {
    let exe = std::env::current_exe().expect("current test binary");
    Command::new(exe)
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(PAYLOAD_VAR, payload)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn child test process")
}

/// Print a handle identity where [`collect_handle_ids`] will find it.
pub fn report_handle_id(id: HandleId) {
    println!("{MARKER}{}", serde_json::to_string(&id).unwrap());
}

/// Wait for `child` and return every handle identity it reported.
pub fn collect_handle_ids(child: Child) -> Vec<HandleId> {
    let output = child.wait_with_output().expect("wait for child");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "child failed:\n{stdout}");

    stdout
        .lines()
        .filter_map(|line| line.find(MARKER).map(|at| &line[at + MARKER.len()..]))
        .map(|rest| {
            let json = rest.split_whitespace().next().unwrap_or_default();
            serde_json::from_str(json).expect("handle id json")
        })
        .collect()
}
