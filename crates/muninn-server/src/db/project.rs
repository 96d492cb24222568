// crates/muninn-server/src/db/project.rs
// Project upsert and local-mode rename detection.
//
// A per-project store normally holds exactly one project row. When the
// project directory is renamed the stored path goes stale: ensure_project
// then adopts the existing project with the most files instead of creating
// an empty duplicate, and preserves the prior path in the previous_paths
// JSON history. Ties are broken by most recent updated_at, then highest id.

use rusqlite::{Connection, OptionalExtension, params};

use super::types::{ProjectRow, parse_string_array};

/// Upsert a project by path. `detect_renames` is true in local mode only;
/// the remote adapter always creates-or-returns by exact path.
pub fn ensure_project_sync(
    conn: &Connection,
    path: &str,
    name: Option<&str>,
    detect_renames: bool,
) -> rusqlite::Result<ProjectRow> {
    if let Some(existing) = get_project_by_path_sync(conn, path)? {
        conn.execute(
            "UPDATE projects SET updated_at = datetime('now'), name = COALESCE(?1, name)
             WHERE id = ?2",
            params![name, existing.id],
        )?;
        return Ok(existing);
    }

    if detect_renames
        && let Some(renamed) = find_rename_candidate_sync(conn)?
    {
        let mut history = renamed.previous_paths.clone();
        history.push(renamed.path.clone());
        let history_json =
            serde_json::to_string(&history).unwrap_or_else(|_| "[]".to_string());
        tracing::info!(
            "project path changed: {} -> {} (preserving history)",
            renamed.path,
            path
        );
        conn.execute(
            "UPDATE projects
             SET path = ?1, previous_paths = ?2, name = COALESCE(?3, name),
                 updated_at = datetime('now')
             WHERE id = ?4",
            params![path, history_json, name, renamed.id],
        )?;
        return Ok(ProjectRow {
            id: renamed.id,
            path: path.to_string(),
            name: name.map(String::from).or(renamed.name),
            previous_paths: history,
        });
    }

    let default_name = name.map(String::from).or_else(|| {
        std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });
    conn.execute(
        "INSERT INTO projects (path, name) VALUES (?1, ?2)",
        params![path, default_name],
    )?;
    Ok(ProjectRow {
        id: conn.last_insert_rowid(),
        path: path.to_string(),
        name: default_name,
        previous_paths: Vec::new(),
    })
}

/// Look up a project by exact path.
pub fn get_project_by_path_sync(
    conn: &Connection,
    path: &str,
) -> rusqlite::Result<Option<ProjectRow>> {
    conn.query_row(
        "SELECT id, path, name, previous_paths FROM projects WHERE path = ?1",
        [path],
        |row| {
            Ok(ProjectRow {
                id: row.get(0)?,
                path: row.get(1)?,
                name: row.get(2)?,
                previous_paths: parse_string_array(row.get(3)?),
            })
        },
    )
    .optional()
}

/// The project most likely to be a renamed incarnation: most files, then
/// most recently updated, then highest id. Projects with zero files are
/// never adopted; a rename of an empty project is indistinguishable from a
/// genuinely new one, so we create fresh instead.
fn find_rename_candidate_sync(conn: &Connection) -> rusqlite::Result<Option<ProjectRow>> {
    conn.query_row(
        "SELECT p.id, p.path, p.name, p.previous_paths,
                (SELECT COUNT(*) FROM files f WHERE f.project_id = p.id) AS file_count
         FROM projects p
         ORDER BY file_count DESC, p.updated_at DESC, p.id DESC
         LIMIT 1",
        [],
        |row| {
            let file_count: i64 = row.get(4)?;
            Ok((
                ProjectRow {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    name: row.get(2)?,
                    previous_paths: parse_string_array(row.get(3)?),
                },
                file_count,
            ))
        },
    )
    .optional()
    .map(|opt| opt.and_then(|(row, count)| if count > 0 { Some(row) } else { None }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    fn seed_file(conn: &Connection, project_id: i64, path: &str) {
        conn.execute(
            "INSERT INTO files (project_id, path) VALUES (?1, ?2)",
            params![project_id, path],
        )
        .unwrap();
    }

    #[test]
    fn test_ensure_creates_new_project() {
        let conn = setup_test_connection();
        let project = ensure_project_sync(&conn, "/work/app", None, true).unwrap();
        assert!(project.id > 0);
        assert_eq!(project.name.as_deref(), Some("app"));
        assert!(project.previous_paths.is_empty());
    }

    #[test]
    fn test_ensure_returns_existing_by_path() {
        let conn = setup_test_connection();
        let first = ensure_project_sync(&conn, "/work/app", Some("app"), true).unwrap();
        let second = ensure_project_sync(&conn, "/work/app", None, true).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_rename_adopts_project_with_files() {
        let conn = setup_test_connection();
        let original = ensure_project_sync(&conn, "/work/old-name", Some("app"), true).unwrap();
        seed_file(&conn, original.id, "src/main.rs");
        seed_file(&conn, original.id, "src/lib.rs");

        let renamed = ensure_project_sync(&conn, "/work/new-name", None, true).unwrap();
        assert_eq!(renamed.id, original.id);
        assert_eq!(renamed.path, "/work/new-name");
        assert_eq!(renamed.previous_paths, vec!["/work/old-name"]);

        // The old path no longer resolves
        assert!(get_project_by_path_sync(&conn, "/work/old-name")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rename_skips_empty_projects() {
        let conn = setup_test_connection();
        let empty = ensure_project_sync(&conn, "/work/empty", None, true).unwrap();

        let fresh = ensure_project_sync(&conn, "/work/other", None, true).unwrap();
        assert_ne!(fresh.id, empty.id, "empty project must not be adopted");
    }

    #[test]
    fn test_rename_detection_disabled_in_remote_mode() {
        let conn = setup_test_connection();
        let original = ensure_project_sync(&conn, "/work/old", None, false).unwrap();
        seed_file(&conn, original.id, "src/main.rs");

        let fresh = ensure_project_sync(&conn, "/work/new", None, false).unwrap();
        assert_ne!(fresh.id, original.id);
    }

    #[test]
    fn test_rename_history_accumulates() {
        let conn = setup_test_connection();
        let p1 = ensure_project_sync(&conn, "/a", None, true).unwrap();
        seed_file(&conn, p1.id, "f.rs");

        let p2 = ensure_project_sync(&conn, "/b", None, true).unwrap();
        let p3 = ensure_project_sync(&conn, "/c", None, true).unwrap();
        assert_eq!(p2.id, p1.id);
        assert_eq!(p3.id, p1.id);
        assert_eq!(p3.previous_paths, vec!["/a", "/b"]);
    }

    #[test]
    fn test_rename_prefers_most_files() {
        let conn = setup_test_connection();
        let small = ensure_project_sync(&conn, "/small", None, true).unwrap();
        seed_file(&conn, small.id, "one.rs");
        let big = ensure_project_sync(&conn, "/big", None, true).unwrap();
        seed_file(&conn, big.id, "a.rs");
        seed_file(&conn, big.id, "b.rs");

        let adopted = ensure_project_sync(&conn, "/moved", None, true).unwrap();
        assert_eq!(adopted.id, big.id);
    }
}
