// crates/muninn-server/src/learning/reinforcement.rs
// Bayesian confidence reinforcement for learnings.
//
// Each applied signal moves confidence by baseDelta / sqrt(times_applied+1),
// so a well-established learning barely moves while a fresh one adapts
// quickly. Confidence always lands in [0.5, 10.0]. Foundational learnings
// are exempt from decay.

use rusqlite::Connection;

use crate::db::{self, MAX_CONFIDENCE, MIN_CONFIDENCE};

/// What this session said about a learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reinforcement {
    /// Surfaced, used, and the session succeeded.
    Positive,
    /// Surfaced, used, and the session failed.
    Negative,
    /// Surfaced but never used.
    Decay,
}

impl Reinforcement {
    pub fn base_delta(&self) -> f64 {
        match self {
            Reinforcement::Positive => 0.3,
            Reinforcement::Negative => -0.4,
            Reinforcement::Decay => -0.1,
        }
    }
}

/// The diminishing-returns factor: strictly decreasing in times_applied.
pub fn stabilizing_factor(times_applied: i64) -> f64 {
    1.0 / ((times_applied.max(0) + 1) as f64).sqrt()
}

/// One update step.
pub fn updated_confidence(old: f64, times_applied: i64, signal: Reinforcement) -> f64 {
    let delta = signal.base_delta() * stabilizing_factor(times_applied);
    (old + delta).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Apply reinforcement for every learning surfaced in this session.
/// Returns the number of learnings updated.
pub fn reinforce_session_learnings_sync(
    conn: &Connection,
    session_id: i64,
    session_success: i64,
) -> rusqlite::Result<usize> {
    let injections = db::session_injections_sync(conn, session_id)?;
    let mut updated = 0;

    for injection in injections {
        if injection.context_type != "learning" {
            continue;
        }
        let Some(learning_id) = injection.source_id else {
            continue;
        };
        let Some(learning) = db::get_learning_sync(conn, learning_id)? else {
            continue;
        };

        let signal = if injection.was_used {
            if session_success == 2 {
                Reinforcement::Positive
            } else if session_success == 0 {
                Reinforcement::Negative
            } else {
                continue; // partial sessions carry no signal
            }
        } else {
            Reinforcement::Decay
        };

        if signal == Reinforcement::Decay && learning.foundational {
            continue;
        }

        let new_confidence =
            updated_confidence(learning.confidence, learning.times_applied, signal);
        db::update_confidence_sync(conn, learning_id, new_confidence)?;
        updated += 1;
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_learning, seed_project, setup_test_connection};
    use proptest::prelude::*;

    /// confidence=5.0, times_applied=3, positive: 5.0 + 0.3/sqrt(4) = 5.15
    #[test]
    fn test_scenario_positive_update() {
        let new = updated_confidence(5.0, 3, Reinforcement::Positive);
        assert!((new - 5.15).abs() < 1e-9);
    }

    #[test]
    fn test_negative_and_decay_deltas() {
        // times_applied=0: full base delta
        assert!((updated_confidence(5.0, 0, Reinforcement::Negative) - 4.6).abs() < 1e-9);
        assert!((updated_confidence(5.0, 0, Reinforcement::Decay) - 4.9).abs() < 1e-9);
    }

    #[test]
    fn test_stabilizer_strictly_decreasing() {
        let mut last = f64::INFINITY;
        for k in 0..50 {
            let factor = stabilizing_factor(k);
            assert!(factor < last, "factor must shrink at k={k}");
            last = factor;
        }
    }

    proptest! {
        #[test]
        fn prop_confidence_stays_bounded(
            start in 0.5f64..10.0,
            times in 0i64..1000,
            steps in proptest::collection::vec(0usize..3, 0..50),
        ) {
            let mut confidence = start;
            for (i, step) in steps.iter().enumerate() {
                let signal = [
                    Reinforcement::Positive,
                    Reinforcement::Negative,
                    Reinforcement::Decay,
                ][*step];
                confidence = updated_confidence(confidence, times + i as i64, signal);
                prop_assert!((MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&confidence));
            }
        }

        #[test]
        fn prop_diminishing_returns(k in 0i64..10_000) {
            prop_assert!(stabilizing_factor(k + 1) < stabilizing_factor(k));
        }
    }

    fn seed_session_with_learning_injection(
        conn: &rusqlite::Connection,
        project_id: i64,
        confidence: f64,
        was_used: bool,
    ) -> (i64, i64) {
        let learning_id = seed_learning(conn, project_id, "idiom", confidence);
        let session_id = crate::db::start_session_sync(conn, project_id, None).unwrap();
        let injection_id = crate::db::record_injection_sync(
            conn, project_id, session_id, "learning", Some(learning_id), 0.8,
        )
        .unwrap();
        if was_used {
            crate::db::mark_injection_used_sync(conn, injection_id).unwrap();
        }
        (session_id, learning_id)
    }

    #[test]
    fn test_used_learning_reinforced_on_success() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let (session_id, learning_id) =
            seed_session_with_learning_injection(&conn, project_id, 5.0, true);

        let updated = reinforce_session_learnings_sync(&conn, session_id, 2).unwrap();
        assert_eq!(updated, 1);

        let learning = crate::db::get_learning_sync(&conn, learning_id).unwrap().unwrap();
        // times_applied was 0 at update time: 5.0 + 0.3
        assert!((learning.confidence - 5.3).abs() < 1e-9);
        assert_eq!(learning.times_applied, 1);
    }

    #[test]
    fn test_unused_learning_decays() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let (session_id, learning_id) =
            seed_session_with_learning_injection(&conn, project_id, 5.0, false);

        reinforce_session_learnings_sync(&conn, session_id, 2).unwrap();
        let learning = crate::db::get_learning_sync(&conn, learning_id).unwrap().unwrap();
        assert!((learning.confidence - 4.9).abs() < 1e-9);
    }

    #[test]
    fn test_foundational_learning_skips_decay() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let learning_id = crate::db::add_learning_sync(
            &conn,
            project_id,
            crate::db::AddLearningParams {
                title: "bedrock",
                content: "c",
                category: "architecture",
                context: "",
                confidence: 5.0,
                foundational: true,
                review_after: None,
            },
        )
        .unwrap();
        let session_id = crate::db::start_session_sync(&conn, project_id, None).unwrap();
        crate::db::record_injection_sync(&conn, project_id, session_id, "learning", Some(learning_id), 0.8)
            .unwrap();

        let updated = reinforce_session_learnings_sync(&conn, session_id, 2).unwrap();
        assert_eq!(updated, 0);

        let learning = crate::db::get_learning_sync(&conn, learning_id).unwrap().unwrap();
        assert!((learning.confidence - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_session_is_neutral_for_used_learnings() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let (session_id, learning_id) =
            seed_session_with_learning_injection(&conn, project_id, 5.0, true);

        reinforce_session_learnings_sync(&conn, session_id, 1).unwrap();
        let learning = crate::db::get_learning_sync(&conn, learning_id).unwrap().unwrap();
        assert!((learning.confidence - 5.0).abs() < 1e-9);
    }
}
