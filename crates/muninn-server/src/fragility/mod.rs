// crates/muninn-server/src/fragility/mod.rs
// Composite fragility scoring: seven signals, fixed weights, 1-10 output.
//
// Inputs come from observation tables (call graph, test map, tool calls,
// error events, symbols); the scorer never parses source. A missing backing
// table is non-fatal: the file yields no score and the scan continues.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;

/// Signal weights. Order matches the per-signal scorers below.
const WEIGHT_DEPENDENTS: f64 = 0.25;
const WEIGHT_TESTS: f64 = 0.20;
const WEIGHT_VELOCITY: f64 = 0.15;
const WEIGHT_ERRORS: f64 = 0.15;
const WEIGHT_EXPORTS: f64 = 0.10;
const WEIGHT_COMPLEXITY: f64 = 0.10;
const WEIGHT_OVERRIDE: f64 = 0.05;

/// Raw observations a score is computed from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FragilityInputs {
    pub dependents: i64,
    pub has_tests: bool,
    /// Changes per week over the last 30 days.
    pub velocity_per_week: f64,
    /// Error events in the last 90 days.
    pub errors_90d: i64,
    pub exported_symbols: i64,
    pub total_symbols: i64,
    /// Manually assigned fragility (0 when none).
    pub manual_override: i64,
}

/// Per-signal scores (each 0-10) plus the inputs they came from.
/// Serialized into files.fragility_signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragilitySignals {
    pub inputs: FragilityInputs,
    pub dependent_score: i64,
    pub test_score: i64,
    pub velocity_score: i64,
    pub error_score: i64,
    pub export_score: i64,
    pub complexity_score: i64,
    pub override_score: i64,
}

/// Distinct callers from the call graph.
pub fn dependent_score(dependents: i64) -> i64 {
    match dependents {
        i64::MIN..=0 => 0,
        1..=2 => 3,
        3..=5 => 5,
        6..=10 => 7,
        11..=20 => 8,
        _ => 10,
    }
}

/// Untested files score by how much depends on them.
pub fn test_score(has_tests: bool, dependents: i64) -> i64 {
    if has_tests {
        return 0;
    }
    if dependents >= 5 {
        10
    } else if dependents >= 2 {
        7
    } else if dependents >= 1 {
        5
    } else {
        3
    }
}

/// Changes per week over the last 30 days.
pub fn velocity_score(changes_per_week: f64) -> i64 {
    if changes_per_week <= 0.0 {
        0
    } else if changes_per_week < 3.0 {
        3
    } else if changes_per_week < 6.0 {
        6
    } else {
        9
    }
}

/// Error events in the last 90 days.
pub fn error_score(errors: i64) -> i64 {
    match errors {
        i64::MIN..=0 => 0,
        1..=2 => 4,
        3..=5 => 7,
        _ => 10,
    }
}

/// Exported symbol count.
pub fn export_score(exported: i64) -> i64 {
    match exported {
        i64::MIN..=2 => 0,
        3..=5 => 3,
        6..=10 => 5,
        11..=20 => 7,
        _ => 9,
    }
}

/// Total symbol count as a complexity proxy.
pub fn complexity_score(total_symbols: i64) -> i64 {
    match total_symbols {
        i64::MIN..=5 => 0,
        6..=15 => 3,
        16..=30 => 5,
        31..=50 => 7,
        _ => 9,
    }
}

/// A manually assigned fragility passes straight through.
pub fn override_score(manual: i64) -> i64 {
    manual.clamp(0, 10)
}

impl FragilitySignals {
    pub fn from_inputs(inputs: FragilityInputs) -> Self {
        Self {
            dependent_score: dependent_score(inputs.dependents),
            test_score: test_score(inputs.has_tests, inputs.dependents),
            velocity_score: velocity_score(inputs.velocity_per_week),
            error_score: error_score(inputs.errors_90d),
            export_score: export_score(inputs.exported_symbols),
            complexity_score: complexity_score(inputs.total_symbols),
            override_score: override_score(inputs.manual_override),
            inputs,
        }
    }

    /// Weighted contributions as (label, detail, weighted value).
    fn contributions(&self) -> Vec<(&'static str, String, f64)> {
        vec![
            (
                "dependents",
                format!("{} dependent files", self.inputs.dependents),
                self.dependent_score as f64 * WEIGHT_DEPENDENTS,
            ),
            (
                "tests",
                if self.inputs.has_tests {
                    "covered by tests".to_string()
                } else {
                    "no test coverage".to_string()
                },
                self.test_score as f64 * WEIGHT_TESTS,
            ),
            (
                "velocity",
                format!("{:.1} changes/week", self.inputs.velocity_per_week),
                self.velocity_score as f64 * WEIGHT_VELOCITY,
            ),
            (
                "errors",
                format!("{} errors in 90d", self.inputs.errors_90d),
                self.error_score as f64 * WEIGHT_ERRORS,
            ),
            (
                "exports",
                format!("{} exported symbols", self.inputs.exported_symbols),
                self.export_score as f64 * WEIGHT_EXPORTS,
            ),
            (
                "complexity",
                format!("{} symbols", self.inputs.total_symbols),
                self.complexity_score as f64 * WEIGHT_COMPLEXITY,
            ),
            (
                "override",
                format!("manual fragility {}", self.inputs.manual_override),
                self.override_score as f64 * WEIGHT_OVERRIDE,
            ),
        ]
    }

    /// Weighted composite, rounded and clamped to [1, 10].
    pub fn composite(&self) -> i64 {
        let sum: f64 = self.contributions().iter().map(|(_, _, w)| w).sum();
        (sum.round() as i64).clamp(1, 10)
    }

    /// Human-readable explanation citing the top three weighted contributors.
    pub fn explanation(&self) -> String {
        let mut ranked = self.contributions();
        ranked.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        let top: Vec<String> = ranked
            .iter()
            .take(3)
            .map(|(label, detail, _)| format!("{label}: {detail}"))
            .collect();
        format!("fragility {}: {}", self.composite(), top.join("; "))
    }
}

/// Result of a project scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FragilityScanResult {
    /// Files a score was computed for.
    pub computed: usize,
    /// Files whose stored fragility changed.
    pub updated: usize,
}

/// Gather inputs for one file. Errors here (e.g. a backing table missing in
/// an older schema) are reported to the caller, which skips the file.
fn gather_inputs(
    conn: &Connection,
    project_id: i64,
    file: &db::FileRow,
) -> rusqlite::Result<FragilityInputs> {
    let dependents = db::dependent_count_sync(conn, project_id, &file.path)?;
    let has_tests = db::has_tests_sync(conn, project_id, &file.path)?;
    let velocity = db::weekly_change_rate_sync(conn, project_id, &file.path)?;
    let errors = db::error_count_for_file_sync(conn, project_id, &file.path, 90)?;
    let (total_symbols, exported) = db::symbol_counts_sync(conn, file.id)?;
    let manual_override = if file.fragility_computed_at.is_none() {
        file.fragility
    } else {
        0
    };

    Ok(FragilityInputs {
        dependents,
        has_tests,
        velocity_per_week: velocity,
        errors_90d: errors,
        exported_symbols: exported,
        total_symbols,
        manual_override,
    })
}

/// Score up to `max_files` files of a project, worst-known first, and
/// persist score + signal breakdown. A file whose inputs cannot be gathered
/// yields nothing and the scan continues.
pub fn compute_project_fragility_sync(
    conn: &Connection,
    project_id: i64,
    max_files: usize,
) -> rusqlite::Result<FragilityScanResult> {
    let files = db::files_for_fragility_scan_sync(conn, project_id, max_files)?;
    let mut result = FragilityScanResult::default();

    for file in files {
        let inputs = match gather_inputs(conn, project_id, &file) {
            Ok(inputs) => inputs,
            Err(e) => {
                crate::metrics::count_suppressed("fragility.gather", &e);
                continue;
            }
        };
        let signals = FragilitySignals::from_inputs(inputs);
        let score = signals.composite();
        let signals_json = match serde_json::to_string(&signals) {
            Ok(json) => json,
            Err(e) => {
                crate::metrics::count_suppressed("fragility.serialize", &e);
                continue;
            }
        };

        db::store_fragility_sync(conn, file.id, score, &signals_json)?;
        result.computed += 1;
        if score != file.fragility {
            result.updated += 1;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_project, setup_test_connection};
    use proptest::prelude::*;

    fn scenario_inputs() -> FragilityInputs {
        FragilityInputs {
            dependents: 6,
            has_tests: false,
            velocity_per_week: 3.0,
            errors_90d: 2,
            exported_symbols: 12,
            total_symbols: 35,
            manual_override: 0,
        }
    }

    #[test]
    fn test_scenario_signal_scores() {
        let signals = FragilitySignals::from_inputs(scenario_inputs());
        assert_eq!(signals.dependent_score, 7);
        assert_eq!(signals.test_score, 10);
        assert_eq!(signals.velocity_score, 6);
        assert_eq!(signals.error_score, 4);
        assert_eq!(signals.export_score, 7);
        assert_eq!(signals.complexity_score, 7);
        assert_eq!(signals.override_score, 0);
    }

    #[test]
    fn test_scenario_composite_rounds_to_seven() {
        // 7*.25 + 10*.2 + 6*.15 + 4*.15 + 7*.1 + 7*.1 + 0*.05 = 6.65 -> 7
        let signals = FragilitySignals::from_inputs(scenario_inputs());
        assert_eq!(signals.composite(), 7);
    }

    #[test]
    fn test_scenario_explanation_cites_top_three() {
        let signals = FragilitySignals::from_inputs(scenario_inputs());
        let explanation = signals.explanation();
        assert!(explanation.contains("dependents"));
        assert!(explanation.contains("tests"));
        assert!(explanation.contains("velocity"));
        assert!(!explanation.contains("exports"));
    }

    #[test]
    fn test_bucket_edges() {
        assert_eq!(dependent_score(0), 0);
        assert_eq!(dependent_score(2), 3);
        assert_eq!(dependent_score(21), 10);
        assert_eq!(test_score(true, 100), 0);
        assert_eq!(test_score(false, 0), 3);
        assert_eq!(test_score(false, 5), 10);
        assert_eq!(velocity_score(0.0), 0);
        assert_eq!(velocity_score(6.0), 9);
        assert_eq!(error_score(6), 10);
        assert_eq!(export_score(2), 0);
        assert_eq!(export_score(21), 9);
        assert_eq!(complexity_score(5), 0);
        assert_eq!(complexity_score(51), 9);
        assert_eq!(override_score(12), 10);
    }

    proptest! {
        #[test]
        fn prop_composite_always_clamped(
            dependents in 0i64..100,
            has_tests in any::<bool>(),
            velocity in 0.0f64..50.0,
            errors in 0i64..100,
            exports in 0i64..100,
            symbols in 0i64..500,
            manual in 0i64..=10,
        ) {
            let signals = FragilitySignals::from_inputs(FragilityInputs {
                dependents,
                has_tests,
                velocity_per_week: velocity,
                errors_90d: errors,
                exported_symbols: exports,
                total_symbols: symbols,
                manual_override: manual,
            });
            let score = signals.composite();
            prop_assert!((1..=10).contains(&score));
        }

        #[test]
        fn prop_dependents_monotone(a in 0i64..100, b in 0i64..100) {
            let (lo, hi) = (a.min(b), a.max(b));
            let base = scenario_inputs();
            let score = |deps| FragilitySignals::from_inputs(FragilityInputs {
                dependents: deps, ..base.clone()
            }).composite();
            prop_assert!(score(lo) <= score(hi));
        }

        #[test]
        fn prop_errors_monotone(a in 0i64..100, b in 0i64..100) {
            let (lo, hi) = (a.min(b), a.max(b));
            let base = scenario_inputs();
            let score = |errors| FragilitySignals::from_inputs(FragilityInputs {
                errors_90d: errors, ..base.clone()
            }).composite();
            prop_assert!(score(lo) <= score(hi));
        }

        #[test]
        fn prop_velocity_monotone(a in 0.0f64..50.0, b in 0.0f64..50.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let base = scenario_inputs();
            let score = |v| FragilitySignals::from_inputs(FragilityInputs {
                velocity_per_week: v, ..base.clone()
            }).composite();
            prop_assert!(score(lo) <= score(hi));
        }

        #[test]
        fn prop_exports_and_complexity_monotone(a in 0i64..100, b in 0i64..100) {
            let (lo, hi) = (a.min(b), a.max(b));
            let base = scenario_inputs();
            let exports = |e| FragilitySignals::from_inputs(FragilityInputs {
                exported_symbols: e, ..base.clone()
            }).composite();
            let symbols = |s| FragilitySignals::from_inputs(FragilityInputs {
                total_symbols: s, ..base.clone()
            }).composite();
            prop_assert!(exports(lo) <= exports(hi));
            prop_assert!(symbols(lo) <= symbols(hi));
        }

        #[test]
        fn prop_adding_tests_never_raises_score(
            dependents in 0i64..100,
            velocity in 0.0f64..50.0,
            errors in 0i64..100,
        ) {
            let base = FragilityInputs {
                dependents,
                has_tests: false,
                velocity_per_week: velocity,
                errors_90d: errors,
                ..scenario_inputs()
            };
            let untested = FragilitySignals::from_inputs(base.clone()).composite();
            let tested = FragilitySignals::from_inputs(FragilityInputs {
                has_tests: true, ..base
            }).composite();
            prop_assert!(tested <= untested);
        }
    }

    #[test]
    fn test_scan_persists_scores_and_counts() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        let file_id = crate::db::upsert_file_sync(&conn, project_id, "src/core.rs", None, None)
            .unwrap();
        crate::db::replace_symbols_sync(
            &conn,
            project_id,
            file_id,
            &(0..12)
                .map(|i| (format!("sym{i}"), i < 4))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        crate::db::replace_call_edges_sync(&conn, project_id, "src/a.rs", &["src/core.rs".into()])
            .unwrap();

        let result = compute_project_fragility_sync(&conn, project_id, 500).unwrap();
        assert_eq!(result.computed, 1);
        assert_eq!(result.updated, 1);

        let file = crate::db::get_file_sync(&conn, project_id, "src/core.rs")
            .unwrap()
            .unwrap();
        assert!(file.fragility >= 1);
        assert!(file.fragility_computed_at.is_some());
        let signals: FragilitySignals =
            serde_json::from_str(&file.fragility_signals.unwrap()).unwrap();
        assert_eq!(signals.inputs.dependents, 1);
        assert_eq!(signals.inputs.total_symbols, 12);

        // Second scan with unchanged inputs computes but does not update
        let result = compute_project_fragility_sync(&conn, project_id, 500).unwrap();
        assert_eq!(result.computed, 1);
        assert_eq!(result.updated, 0);
    }

    #[test]
    fn test_manual_override_feeds_signal_until_computed() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        crate::db::upsert_file_sync(&conn, project_id, "src/risky.rs", None, Some(9)).unwrap();
        compute_project_fragility_sync(&conn, project_id, 500).unwrap();

        let file = crate::db::get_file_sync(&conn, project_id, "src/risky.rs")
            .unwrap()
            .unwrap();
        let signals: FragilitySignals =
            serde_json::from_str(&file.fragility_signals.unwrap()).unwrap();
        assert_eq!(signals.override_score, 9);

        // Once computed, the stored value is no longer treated as manual
        compute_project_fragility_sync(&conn, project_id, 500).unwrap();
        let file = crate::db::get_file_sync(&conn, project_id, "src/risky.rs")
            .unwrap()
            .unwrap();
        let signals: FragilitySignals =
            serde_json::from_str(&file.fragility_signals.unwrap()).unwrap();
        assert_eq!(signals.override_score, 0);
    }
}
