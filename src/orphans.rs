//! Orphaned-package reconciliation.
//!
//! A live-image-derived installation pre-marks nearly every package as a
//! dependency, so `pacman -Qdtq` would list the whole desktop environment
//! as removable right after install. Re-marking the orphan set as
//! explicitly installed keeps later cleanup tooling from pruning the live
//! system.

use anyhow::Result;

use crate::process::Runner;

/// Re-mark all current orphans as explicitly installed.
///
/// One batched `pacman -D --asexplicit` per run; an empty orphan set issues
/// no mutating command at all, so repeat runs are no-ops.
pub fn reconcile(runner: &dyn Runner) -> Result<()> {
    let orphans = query_orphans(runner)?;
    if orphans.is_empty() {
        println!("[postcfg] No orphaned packages to reconcile");
        return Ok(());
    }

    println!(
        "[postcfg] Marking {} orphaned package(s) as explicitly installed",
        orphans.len()
    );
    let mut argv: Vec<&str> = vec!["pacman", "-D", "--asexplicit"];
    argv.extend(orphans.iter().map(String::as_str));
    let mark = runner.run_in_target(&argv)?;
    if !mark.success() {
        anyhow::bail!(
            "pacman -D --asexplicit failed (exit code {}): {}",
            mark.code,
            mark.stderr_trimmed()
        );
    }
    Ok(())
}

/// List packages installed as dependencies with no remaining dependents.
///
/// `pacman -Qdtq` exits 1 with empty output when there are no orphans;
/// that is the empty set, not a failure.
fn query_orphans(runner: &dyn Runner) -> Result<Vec<String>> {
    let query = runner.capture_in_target(&["pacman", "-Qdtq"])?;
    if query.success() {
        return Ok(query.stdout_lines());
    }
    // Exit 1 with no output is pacman's "no orphans" signal; any other
    // nonzero exit (locked database, broken chroot) is a real failure even
    // when stdout is empty.
    if query.code == 1 && query.stdout_trimmed().is_empty() {
        return Ok(Vec::new());
    }
    anyhow::bail!(
        "pacman -Qdtq failed (exit code {}): {}",
        query.code,
        query.stderr_trimmed()
    );
}
