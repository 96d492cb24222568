// crates/muninn-server/src/context/budget.rs
// Dynamic per-category token budgets.
//
// Start from defaults (or learned overrides), then apply impact, staleness,
// and trajectory adjustments in that order. Every intermediate value is
// clamped to [MIN_BUDGET, MAX_BUDGET].

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;

use super::trajectory::{Trajectory, TrajectoryPattern};
use crate::db;

pub const MIN_BUDGET: i64 = 100;
pub const MAX_BUDGET: i64 = 800;

/// The fixed category vector budgets are computed over.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BudgetCategory {
    Contradictions,
    CriticalWarnings,
    Strategies,
    Decisions,
    Learnings,
    FileContext,
    ErrorFixes,
    Reserve,
}

impl BudgetCategory {
    pub fn default_tokens(&self) -> i64 {
        match self {
            BudgetCategory::Contradictions => 250,
            BudgetCategory::CriticalWarnings => 300,
            BudgetCategory::Strategies => 200,
            BudgetCategory::Decisions => 300,
            BudgetCategory::Learnings => 300,
            BudgetCategory::FileContext => 300,
            BudgetCategory::ErrorFixes => 150,
            BudgetCategory::Reserve => 200,
        }
    }

    /// Map an injection/impact kind to its budget category.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "decision" | "decisions" => Some(BudgetCategory::Decisions),
            "learning" | "learnings" => Some(BudgetCategory::Learnings),
            "file" | "files" => Some(BudgetCategory::FileContext),
            "error_fix" | "error_fixes" => Some(BudgetCategory::ErrorFixes),
            "warning" | "warnings" => Some(BudgetCategory::CriticalWarnings),
            "strategy" | "strategies" => Some(BudgetCategory::Strategies),
            "contradiction" | "contradictions" => Some(BudgetCategory::Contradictions),
            _ => None,
        }
    }
}

/// How injected context of one kind performed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpactStats {
    pub helped: i64,
    pub irrelevant: i64,
    pub total: i64,
}

/// The allocator's inputs beyond the store.
#[derive(Debug, Clone, Default)]
pub struct BudgetSignals {
    /// Per-kind impact stats (kinds as in BudgetCategory::from_kind).
    pub impact: BTreeMap<String, ImpactStats>,
    /// Items the staleness pass flagged for review.
    pub stale_item_ids: Vec<i64>,
    pub trajectory: Option<Trajectory>,
}

/// Final per-category allocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetAllocation {
    pub budgets: BTreeMap<BudgetCategory, i64>,
    /// Pattern that influenced the allocation, when one did.
    pub trajectory: Option<Trajectory>,
    pub stale_item_ids: Vec<i64>,
}

impl BudgetAllocation {
    pub fn tokens_for(&self, category: BudgetCategory) -> i64 {
        self.budgets
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_tokens())
    }

    pub fn total_tokens(&self) -> i64 {
        self.budgets.values().sum()
    }
}

fn clamp(tokens: f64) -> i64 {
    (tokens.round() as i64).clamp(MIN_BUDGET, MAX_BUDGET)
}

fn scale(budgets: &mut BTreeMap<BudgetCategory, i64>, category: BudgetCategory, factor: f64) {
    if let Some(current) = budgets.get(&category).copied() {
        budgets.insert(category, clamp(current as f64 * factor));
    }
}

/// Compute the allocation from starting budgets plus feedback signals.
/// `overrides` replace defaults before any adjustment.
pub fn allocate(
    overrides: &BTreeMap<BudgetCategory, i64>,
    signals: &BudgetSignals,
) -> BudgetAllocation {
    let mut budgets: BTreeMap<BudgetCategory, i64> = BudgetCategory::iter()
        .map(|category| {
            let start = overrides
                .get(&category)
                .copied()
                .unwrap_or_else(|| category.default_tokens());
            (category, clamp(start as f64))
        })
        .collect();

    // 1. Impact-based adjustment.
    for (kind, stats) in &signals.impact {
        let Some(category) = BudgetCategory::from_kind(kind) else {
            continue;
        };
        if stats.total < 5 {
            continue;
        }
        let total = stats.total as f64;
        if stats.irrelevant as f64 / total > 0.5 {
            scale(&mut budgets, category, 0.8);
        } else if stats.helped as f64 / total > 0.6 {
            scale(&mut budgets, category, 1.2);
        }
    }

    // 2. Staleness-based adjustment.
    if signals.stale_item_ids.len() >= 5 {
        scale(&mut budgets, BudgetCategory::Decisions, 0.85);
        scale(&mut budgets, BudgetCategory::Learnings, 0.85);
    }

    // 3. Trajectory-based adjustment.
    let mut applied_trajectory = None;
    if let Some(trajectory) = signals.trajectory
        && trajectory.confidence >= 0.5
    {
        match trajectory.pattern {
            TrajectoryPattern::Exploration => {
                scale(&mut budgets, BudgetCategory::FileContext, 1.4);
                scale(&mut budgets, BudgetCategory::Strategies, 1.2);
            }
            TrajectoryPattern::Failing => {
                scale(&mut budgets, BudgetCategory::ErrorFixes, 1.5);
                scale(&mut budgets, BudgetCategory::CriticalWarnings, 1.3);
            }
            TrajectoryPattern::Stuck => {
                scale(&mut budgets, BudgetCategory::Strategies, 1.5);
                scale(&mut budgets, BudgetCategory::FileContext, 1.3);
            }
            TrajectoryPattern::Confident => {
                scale(&mut budgets, BudgetCategory::Reserve, 0.7);
            }
        }
        applied_trajectory = Some(trajectory);
    }

    BudgetAllocation {
        budgets,
        trajectory: applied_trajectory,
        stale_item_ids: signals.stale_item_ids.clone(),
    }
}

/// Load learned overrides for a project from budget_recommendations.
pub fn load_overrides_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<BTreeMap<BudgetCategory, i64>> {
    let rows = db::budget_recommendations_sync(conn, project_id)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            row.context_type
                .parse::<BudgetCategory>()
                .ok()
                .map(|category| (category, row.recommended_budget))
        })
        .collect())
}

/// Gather the allocator's feedback signals for a session and allocate.
pub fn allocate_for_session_sync(
    conn: &Connection,
    project_id: i64,
    session_id: Option<i64>,
) -> rusqlite::Result<BudgetAllocation> {
    let overrides = load_overrides_sync(conn, project_id)?;

    let impact: BTreeMap<String, ImpactStats> =
        db::injection_stats_by_kind_sync(conn, project_id, 30)?
            .into_iter()
            .map(|(kind, stats)| {
                (
                    kind,
                    ImpactStats {
                        helped: stats.used,
                        irrelevant: stats.total - stats.used,
                        total: stats.total,
                    },
                )
            })
            .collect();

    let stale_item_ids = db::stale_learning_ids_sync(conn, project_id)?;

    let trajectory = match session_id {
        Some(id) => super::trajectory::detect_trajectory_sync(conn, id)?,
        None => None,
    };

    Ok(allocate(
        &overrides,
        &BudgetSignals {
            impact,
            stale_item_ids,
            trajectory,
        },
    ))
}
