// crates/muninn-server/src/learning/experiments.rs
// A/B budget experiments: deterministic arm assignment, metric accounting,
// and conclusion once both arms have enough sessions.

use rusqlite::Connection;

use crate::db::{self, AbTestRow, BudgetConfig};

/// Relative difference below which the arms are considered equivalent.
const SIGNIFICANCE_BAND: f64 = 0.1;

/// Which arm a session belongs to. Deterministic in the session id, so a
/// repeated end observes the same assignment.
pub fn assign_arm(session_id: i64) -> Arm {
    if session_id % 2 == 0 {
        Arm::Control
    } else {
        Arm::Variant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm {
    Control,
    Variant,
}

impl Arm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arm::Control => "control",
            Arm::Variant => "variant",
        }
    }
}

/// The verdict of a concluded test.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    NoSignificantDifference,
    /// Winning arm and its relative improvement over the loser.
    Winner(Arm, f64),
}

impl Verdict {
    pub fn describe(&self) -> String {
        match self {
            Verdict::NoSignificantDifference => "no significant difference".to_string(),
            Verdict::Winner(arm, improvement) => {
                format!("{} wins (+{:.1}%)", arm.as_str(), improvement * 100.0)
            }
        }
    }
}

/// Compare arm means once both cleared min_sessions.
pub fn evaluate(test: &AbTestRow) -> Option<Verdict> {
    if test.control_sessions < test.min_sessions || test.variant_sessions < test.min_sessions {
        return None;
    }
    let control_mean = test.control_metric_sum / test.control_sessions as f64;
    let variant_mean = test.variant_metric_sum / test.variant_sessions as f64;

    let relative = (variant_mean - control_mean).abs() / control_mean.max(0.01);
    if relative < SIGNIFICANCE_BAND {
        return Some(Verdict::NoSignificantDifference);
    }
    if variant_mean > control_mean {
        Some(Verdict::Winner(Arm::Variant, relative))
    } else {
        Some(Verdict::Winner(Arm::Control, relative))
    }
}

/// Session-end accounting: add the metric to the session's arm, then
/// conclude the test if both arms are full. On conclusion the winning
/// config is upserted into budget_recommendations key by key.
pub fn record_session_metric_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    metric_value: f64,
) -> rusqlite::Result<Option<Verdict>> {
    let Some(test) = db::running_ab_test_sync(conn, project_id)? else {
        return Ok(None);
    };

    let arm = assign_arm(session_id);
    db::record_arm_observation_sync(conn, test.id, arm == Arm::Control, metric_value)?;

    let Some(test) = db::running_ab_test_sync(conn, project_id)? else {
        return Ok(None);
    };
    let Some(verdict) = evaluate(&test) else {
        return Ok(None);
    };

    let winning_config: &BudgetConfig = match verdict {
        Verdict::Winner(Arm::Variant, _) => &test.variant_config,
        // Control wins outright; a wash keeps the incumbent config too.
        _ => &test.control_config,
    };
    for (context_type, budget) in &winning_config.budgets {
        db::upsert_budget_recommendation_sync(conn, project_id, context_type, *budget, 0.0)?;
    }
    db::conclude_ab_test_sync(conn, test.id, &verdict.describe())?;

    Ok(Some(verdict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_project, setup_test_connection};

    #[test]
    fn test_arm_assignment_deterministic_and_balanced() {
        for session_id in 0..100 {
            assert_eq!(assign_arm(session_id), assign_arm(session_id));
        }
        let control = (0..1000).filter(|id| assign_arm(*id) == Arm::Control).count();
        let variant = 1000 - control;
        assert!(control.abs_diff(variant) <= 1);
    }

    fn config(pairs: &[(&str, i64)]) -> BudgetConfig {
        let mut c = BudgetConfig::default();
        for (k, v) in pairs {
            c.budgets.insert(k.to_string(), *v);
        }
        c
    }

    /// min_sessions=20; control sessions 0,2,..,38 sum 14 (mean 0.7),
    /// variant sessions 1,3,..,39 sum 16 (mean 0.8):
    /// |0.8-0.7|/0.7 = 0.143 > 0.1 -> variant wins (+14.3%)
    #[test]
    fn test_scenario_variant_wins_and_writes_recommendations() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        db::start_ab_test_sync(
            &conn,
            project_id,
            "decisions-400",
            &config(&[("decisions", 300)]),
            &config(&[("decisions", 400), ("learnings", 350)]),
            "outcome_score",
            20,
        )
        .unwrap()
        .unwrap();

        let mut verdict = None;
        for session_id in 0..40i64 {
            let metric = if session_id % 2 == 0 { 0.7 } else { 0.8 };
            let result =
                record_session_metric_sync(&conn, project_id, session_id, metric).unwrap();
            if result.is_some() {
                verdict = result;
            }
        }

        match verdict.expect("test should conclude") {
            Verdict::Winner(Arm::Variant, improvement) => {
                assert!((improvement - 0.142857).abs() < 1e-3);
            }
            other => panic!("expected variant win, got {other:?}"),
        }

        // Every key of the winning config was upserted
        let recs = db::budget_recommendations_sync(&conn, project_id).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].context_type, "decisions");
        assert_eq!(recs[0].recommended_budget, 400);
        assert_eq!(recs[1].context_type, "learnings");
        assert_eq!(recs[1].recommended_budget, 350);

        // And the test is concluded
        assert!(db::running_ab_test_sync(&conn, project_id).unwrap().is_none());
    }

    #[test]
    fn test_close_means_conclude_as_wash() {
        let test = AbTestRow {
            id: 1,
            project_id: 1,
            test_name: "t".into(),
            control_config: BudgetConfig::default(),
            variant_config: BudgetConfig::default(),
            metric: "outcome_score".into(),
            min_sessions: 10,
            control_sessions: 10,
            variant_sessions: 10,
            control_metric_sum: 7.0,
            variant_metric_sum: 7.3,
            status: "running".into(),
            conclusion: None,
        };
        // |0.73 - 0.70| / 0.70 = 0.043 < 0.1
        assert_eq!(evaluate(&test), Some(Verdict::NoSignificantDifference));
    }

    #[test]
    fn test_underfilled_arms_do_not_conclude() {
        let test = AbTestRow {
            id: 1,
            project_id: 1,
            test_name: "t".into(),
            control_config: BudgetConfig::default(),
            variant_config: BudgetConfig::default(),
            metric: "outcome_score".into(),
            min_sessions: 20,
            control_sessions: 20,
            variant_sessions: 19,
            control_metric_sum: 10.0,
            variant_metric_sum: 19.0,
            status: "running".into(),
            conclusion: None,
        };
        assert_eq!(evaluate(&test), None);
    }

    #[test]
    fn test_no_running_test_is_a_noop() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let verdict = record_session_metric_sync(&conn, project_id, 1, 0.9).unwrap();
        assert!(verdict.is_none());
    }

    #[test]
    fn test_control_win_writes_control_config() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        db::start_ab_test_sync(
            &conn,
            project_id,
            "t",
            &config(&[("strategies", 250)]),
            &config(&[("strategies", 500)]),
            "outcome_score",
            2,
        )
        .unwrap()
        .unwrap();

        for session_id in 0..4i64 {
            let metric = if session_id % 2 == 0 { 0.9 } else { 0.4 };
            record_session_metric_sync(&conn, project_id, session_id, metric).unwrap();
        }

        let recs = db::budget_recommendations_sync(&conn, project_id).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].recommended_budget, 250);
    }
}
