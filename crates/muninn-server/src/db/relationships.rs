// crates/muninn-server/src/db/relationships.rs
// Typed, directed relationships between entities.

use rusqlite::{Connection, params};

/// A directed edge: (source_type, source_id) -[kind, strength]-> (target_type, target_id).
#[derive(Debug, Clone)]
pub struct RelationshipRow {
    pub id: i64,
    pub source_type: String,
    pub source_id: i64,
    pub target_type: String,
    pub target_id: i64,
    pub kind: String,
    pub strength: f64,
    pub notes: Option<String>,
}

pub struct AddRelationshipParams<'a> {
    pub source_type: &'a str,
    pub source_id: i64,
    pub target_type: &'a str,
    pub target_id: i64,
    pub kind: &'a str,
    pub strength: f64,
    pub notes: Option<&'a str>,
}

pub fn add_relationship_sync(
    conn: &Connection,
    project_id: i64,
    params: AddRelationshipParams<'_>,
) -> rusqlite::Result<i64> {
    let strength = params.strength.clamp(0.0, 10.0);
    conn.execute(
        "INSERT INTO relationships
             (project_id, source_type, source_id, target_type, target_id, kind, strength, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            project_id,
            params.source_type,
            params.source_id,
            params.target_type,
            params.target_id,
            params.kind,
            strength,
            params.notes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Outgoing edges from an entity, strongest first.
pub fn relationships_from_sync(
    conn: &Connection,
    project_id: i64,
    source_type: &str,
    source_id: i64,
) -> rusqlite::Result<Vec<RelationshipRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, source_type, source_id, target_type, target_id, kind, strength, notes
         FROM relationships
         WHERE project_id = ?1 AND source_type = ?2 AND source_id = ?3
         ORDER BY strength DESC, id ASC",
    )?;
    let rows = stmt.query_map(params![project_id, source_type, source_id], |row| {
        Ok(RelationshipRow {
            id: row.get(0)?,
            source_type: row.get(1)?,
            source_id: row.get(2)?,
            target_type: row.get(3)?,
            target_id: row.get(4)?,
            kind: row.get(5)?,
            strength: row.get(6)?,
            notes: row.get(7)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_project, setup_test_connection};

    #[test]
    fn test_add_and_list_ordered_by_strength() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        for (target, strength) in [(10, 2.0), (11, 8.0)] {
            add_relationship_sync(
                &conn,
                project_id,
                AddRelationshipParams {
                    source_type: "decision",
                    source_id: 1,
                    target_type: "file",
                    target_id: target,
                    kind: "affects",
                    strength,
                    notes: None,
                },
            )
            .unwrap();
        }

        let edges = relationships_from_sync(&conn, project_id, "decision", 1).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].target_id, 11);
    }

    #[test]
    fn test_strength_is_clamped() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        add_relationship_sync(
            &conn,
            project_id,
            AddRelationshipParams {
                source_type: "learning",
                source_id: 1,
                target_type: "file",
                target_id: 2,
                kind: "applies_to",
                strength: 99.0,
                notes: None,
            },
        )
        .unwrap();

        let edges = relationships_from_sync(&conn, project_id, "learning", 1).unwrap();
        assert_eq!(edges[0].strength, 10.0);
    }
}
