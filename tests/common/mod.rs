use assert_cmd::{Command, cargo::cargo_bin_cmd};

pub fn treeop_cmd() -> Command {
    cargo_bin_cmd!("treeop")
}

/// All values printed for `label` in a counter block, in output order.
/// Per-root blocks repeat labels, so order matters: values come back in
/// root order.
#[allow(dead_code)]
pub fn counter_values(stdout: &str, label: &str) -> Vec<u64> {
    let prefix = format!("{label}: ");
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix(&prefix))
        .filter_map(|value| value.trim().parse().ok())
        .collect()
}

// Some integration test crates only assert on a single counter occurrence.
#[allow(dead_code)]
pub fn counter_value(stdout: &str, label: &str) -> u64 {
    let values = counter_values(stdout, label);
    assert_eq!(
        values.len(),
        1,
        "expected exactly one '{label}' counter, got {values:?}"
    );
    values[0]
}

#[allow(dead_code)]
pub fn run_ok(cmd: &mut Command) -> String {
    let output = cmd.output().expect("failed to run treeop");
    assert!(
        output.status.success(),
        "treeop failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("stdout should be UTF-8")
}
