// crates/muninn-server/src/learning/outcome.rs
// Session outcome inference from observable signals.
//
// Starting from a neutral 0.5, weighted signals move the score inside
// [0, 1]; the numeric success level {0 failed, 1 partial, 2 success} is the
// canonical outcome field. An explicit client-supplied success always
// overrides inference.

use crate::db::SessionSignals;

/// Normalization caps: small counts saturate quickly.
const CAP_COMMITS: f64 = 3.0;
const CAP_ISSUES: f64 = 3.0;
const CAP_ERRORS: f64 = 5.0;
const CAP_FILE_MODS: f64 = 5.0;

/// Fold the signals into a score in [0, 1].
pub fn outcome_score(signals: &SessionSignals) -> f64 {
    let mut score = 0.5;

    score += 0.2 * (signals.commits as f64 / CAP_COMMITS).min(1.0);

    let tests_total = signals.tests_passed + signals.tests_failed;
    if tests_total > 0 {
        if signals.tests_failed == 0 {
            score += 0.2;
        } else {
            let fail_rate = signals.tests_failed as f64 / tests_total as f64;
            score -= fail_rate.abs() * 0.2;
        }
    }

    score += 0.1 * (signals.issues_resolved as f64 / CAP_ISSUES).min(1.0);
    score -= 0.2 * (signals.error_events as f64 / CAP_ERRORS).min(1.0).abs();

    if signals.reverts > 0 {
        score -= 0.3;
    }

    score += 0.1 * (signals.files_modified as f64 / CAP_FILE_MODS).min(1.0);

    score.clamp(0.0, 1.0)
}

/// Map a score to the success level.
pub fn success_from_score(score: f64) -> i64 {
    if score >= 0.7 {
        2
    } else if score >= 0.4 {
        1
    } else {
        0
    }
}

/// The outcome string stored alongside the numeric level. Descriptive only;
/// consumers read the numeric column.
pub fn outcome_label(success: i64) -> &'static str {
    match success {
        2 => "success",
        1 => "partial",
        _ => "failed",
    }
}

/// Infer the final (score, success), honoring an explicit client value.
pub fn infer_outcome(signals: &SessionSignals, explicit_success: Option<i64>) -> (f64, i64) {
    let score = outcome_score(signals);
    match explicit_success {
        Some(level) => (score, level.clamp(0, 2)),
        None => (score, success_from_score(score)),
    }
}
