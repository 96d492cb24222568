// crates/muninn-server/src/metrics.rs
// Process-local counters for suppressed background errors.
//
// Background passes swallow adapter errors (a missing table in an older
// schema must not crash the pipeline) but every swallow is counted here so
// an operator can spot chronically failing paths. Counters are advisory:
// they are racy across threads in the narrow read-modify-write sense and
// reset on restart.

use std::collections::HashMap;
use std::sync::Mutex;

static SUPPRESSED: Mutex<Option<HashMap<String, u64>>> = Mutex::new(None);

/// Record a swallowed error under a context key such as "reinforcer.update".
/// Logs the error at debug and bumps the counter.
pub fn count_suppressed(context: &str, err: &dyn std::fmt::Display) {
    tracing::debug!(context, "suppressed: {err}");
    let mut guard = SUPPRESSED.lock().unwrap_or_else(|e| e.into_inner());
    let map = guard.get_or_insert_with(HashMap::new);
    *map.entry(context.to_string()).or_insert(0) += 1;
}

/// Snapshot of all suppressed-error counters, sorted by key.
pub fn suppressed_snapshot() -> Vec<(String, u64)> {
    let guard = SUPPRESSED.lock().unwrap_or_else(|e| e.into_inner());
    let mut entries: Vec<(String, u64)> = guard
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_snapshot() {
        count_suppressed("test.metrics.alpha", &"boom");
        count_suppressed("test.metrics.alpha", &"boom again");
        count_suppressed("test.metrics.beta", &"once");

        let snapshot = suppressed_snapshot();
        let alpha = snapshot
            .iter()
            .find(|(k, _)| k == "test.metrics.alpha")
            .map(|(_, v)| *v)
            .unwrap_or(0);
        let beta = snapshot
            .iter()
            .find(|(k, _)| k == "test.metrics.beta")
            .map(|(_, v)| *v)
            .unwrap_or(0);
        assert!(alpha >= 2);
        assert!(beta >= 1);
    }
}
