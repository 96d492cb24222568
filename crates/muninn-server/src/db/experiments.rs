// crates/muninn-server/src/db/experiments.rs
// A/B test rows and budget recommendation upserts.
//
// Each project has at most one running test; conclusion writes the winning
// config into budget_recommendations keyed on (project_id, context_type).

use rusqlite::{Connection, OptionalExtension, params};

use super::types::{AbTestRow, BudgetConfig, BudgetRecommendationRow};

const AB_COLUMNS: &str = "id, project_id, test_name, control_config, variant_config, metric, \
                          min_sessions, control_sessions, variant_sessions, control_metric_sum, \
                          variant_metric_sum, status, conclusion";

fn ab_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AbTestRow> {
    let parse_config = |raw: String| -> BudgetConfig {
        serde_json::from_str(&raw).unwrap_or_default()
    };
    Ok(AbTestRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        test_name: row.get(2)?,
        control_config: parse_config(row.get(3)?),
        variant_config: parse_config(row.get(4)?),
        metric: row.get(5)?,
        min_sessions: row.get(6)?,
        control_sessions: row.get(7)?,
        variant_sessions: row.get(8)?,
        control_metric_sum: row.get(9)?,
        variant_metric_sum: row.get(10)?,
        status: row.get(11)?,
        conclusion: row.get(12)?,
    })
}

/// Start a test. Refused (returns None) while another test is running.
pub fn start_ab_test_sync(
    conn: &Connection,
    project_id: i64,
    test_name: &str,
    control: &BudgetConfig,
    variant: &BudgetConfig,
    metric: &str,
    min_sessions: i64,
) -> rusqlite::Result<Option<i64>> {
    if running_ab_test_sync(conn, project_id)?.is_some() {
        return Ok(None);
    }
    conn.execute(
        "INSERT INTO ab_tests
             (project_id, test_name, control_config, variant_config, metric, min_sessions)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            project_id,
            test_name,
            serde_json::to_string(control).unwrap_or_else(|_| "{}".into()),
            serde_json::to_string(variant).unwrap_or_else(|_| "{}".into()),
            metric,
            min_sessions,
        ],
    )?;
    Ok(Some(conn.last_insert_rowid()))
}

/// The project's running test, if any.
pub fn running_ab_test_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<Option<AbTestRow>> {
    conn.query_row(
        &format!(
            "SELECT {AB_COLUMNS} FROM ab_tests
             WHERE project_id = ?1 AND status = 'running'
             ORDER BY id DESC LIMIT 1"
        ),
        [project_id],
        ab_from_row,
    )
    .optional()
}

/// Add one session's metric value to an arm.
pub fn record_arm_observation_sync(
    conn: &Connection,
    test_id: i64,
    is_control: bool,
    metric_value: f64,
) -> rusqlite::Result<()> {
    if is_control {
        conn.execute(
            "UPDATE ab_tests SET control_sessions = control_sessions + 1,
                 control_metric_sum = control_metric_sum + ?1
             WHERE id = ?2 AND status = 'running'",
            params![metric_value, test_id],
        )?;
    } else {
        conn.execute(
            "UPDATE ab_tests SET variant_sessions = variant_sessions + 1,
                 variant_metric_sum = variant_metric_sum + ?1
             WHERE id = ?2 AND status = 'running'",
            params![metric_value, test_id],
        )?;
    }
    Ok(())
}

/// Conclude a test with a verdict string.
pub fn conclude_ab_test_sync(
    conn: &Connection,
    test_id: i64,
    conclusion: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE ab_tests
         SET status = 'concluded', conclusion = ?1, concluded_at = datetime('now')
         WHERE id = ?2 AND status = 'running'",
        params![conclusion, test_id],
    )?;
    Ok(changed > 0)
}

/// Upsert one budget recommendation. The sole key is (project, context_type).
pub fn upsert_budget_recommendation_sync(
    conn: &Connection,
    project_id: i64,
    context_type: &str,
    recommended_budget: i64,
    use_rate: f64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO budget_recommendations (project_id, context_type, recommended_budget, use_rate)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(project_id, context_type) DO UPDATE SET
            recommended_budget = ?3,
            use_rate = ?4,
            updated_at = datetime('now')",
        params![project_id, context_type, recommended_budget, use_rate],
    )?;
    Ok(())
}

/// All recommendations for a project.
pub fn budget_recommendations_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<Vec<BudgetRecommendationRow>> {
    let mut stmt = conn.prepare(
        "SELECT context_type, recommended_budget, use_rate
         FROM budget_recommendations
         WHERE project_id = ?1
         ORDER BY context_type ASC",
    )?;
    let rows = stmt.query_map([project_id], |row| {
        Ok(BudgetRecommendationRow {
            context_type: row.get(0)?,
            recommended_budget: row.get(1)?,
            use_rate: row.get(2)?,
        })
    })?;
    rows.collect()
}
