// crates/muninn-server/src/db/schema/fts.rs
// FTS5 index tables, mirror triggers, and corruption repair.
//
// Each FTS table mirrors a backing table row-for-row (fts rowid = backing
// id) and is maintained exclusively by triggers. An FTS virtual table cannot
// be ALTERed in place, so when a migration leaves one with the wrong column
// set the only fix is DROP -> CREATE -> backfill -> recreate triggers.

use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use super::super::migration_helpers::{table_columns, table_exists};

/// One FTS mirror: the virtual table, its expected columns, and the backing
/// table the columns are copied from.
struct FtsMirror {
    fts_table: &'static str,
    backing_table: &'static str,
    columns: &'static [&'static str],
}

const MIRRORS: &[FtsMirror] = &[
    FtsMirror {
        fts_table: "decisions_fts",
        backing_table: "decisions",
        columns: &["title", "decision", "reasoning"],
    },
    FtsMirror {
        fts_table: "learnings_fts",
        backing_table: "learnings",
        columns: &["title", "content", "context"],
    },
];

/// Names of all FTS tables the integrity check requires.
pub fn required_fts_tables() -> Vec<&'static str> {
    MIRRORS.iter().map(|m| m.fts_table).collect()
}

/// Create FTS tables and their mirror triggers when absent, repairing any
/// table whose column set no longer matches. Idempotent.
pub fn migrate_fts_tables(conn: &Connection) -> Result<()> {
    for mirror in MIRRORS {
        if needs_repair(conn, mirror) {
            repair(conn, mirror)?;
        } else {
            // Healthy table: still make sure the triggers exist (an older
            // process may have created the table without them).
            create_triggers(conn, mirror)?;
        }
    }
    Ok(())
}

/// Rebuild all FTS tables from their backing tables unconditionally.
pub fn rebuild_fts(conn: &Connection) -> Result<()> {
    for mirror in MIRRORS {
        repair(conn, mirror)?;
    }
    Ok(())
}

fn needs_repair(conn: &Connection, mirror: &FtsMirror) -> bool {
    if !table_exists(conn, mirror.fts_table) {
        return true;
    }
    let found = table_columns(conn, mirror.fts_table);
    let expected: Vec<String> = mirror.columns.iter().map(|c| c.to_string()).collect();
    if found != expected {
        warn!(
            "FTS table {} has columns {:?}, expected {:?}; scheduling repair",
            mirror.fts_table, found, expected
        );
        return true;
    }
    false
}

/// DROP -> CREATE -> backfill from the backing table -> recreate triggers.
fn repair(conn: &Connection, mirror: &FtsMirror) -> Result<()> {
    info!("Rebuilding FTS index {}", mirror.fts_table);
    let cols = mirror.columns.join(", ");

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", mirror.fts_table))?;
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE {} USING fts5({}, tokenize='porter unicode61 remove_diacritics 1')",
        mirror.fts_table, cols
    ))?;

    if table_exists(conn, mirror.backing_table) {
        conn.execute_batch(&format!(
            "INSERT INTO {fts}(rowid, {cols}) SELECT id, {cols} FROM {backing}",
            fts = mirror.fts_table,
            cols = cols,
            backing = mirror.backing_table,
        ))?;
    }

    create_triggers(conn, mirror)?;
    Ok(())
}

/// (Re)create the insert/update/delete mirror triggers on the backing table.
fn create_triggers(conn: &Connection, mirror: &FtsMirror) -> Result<()> {
    let backing = mirror.backing_table;
    let fts = mirror.fts_table;
    let cols = mirror.columns.join(", ");
    let new_cols: Vec<String> = mirror.columns.iter().map(|c| format!("new.{c}")).collect();
    let set_cols: Vec<String> = mirror
        .columns
        .iter()
        .map(|c| format!("{c} = new.{c}"))
        .collect();

    conn.execute_batch(&format!(
        "DROP TRIGGER IF EXISTS {backing}_fts_ai;
         DROP TRIGGER IF EXISTS {backing}_fts_au;
         DROP TRIGGER IF EXISTS {backing}_fts_ad;
         CREATE TRIGGER {backing}_fts_ai AFTER INSERT ON {backing} BEGIN
             INSERT INTO {fts}(rowid, {cols}) VALUES (new.id, {new_vals});
         END;
         CREATE TRIGGER {backing}_fts_au AFTER UPDATE ON {backing} BEGIN
             UPDATE {fts} SET {sets} WHERE rowid = new.id;
         END;
         CREATE TRIGGER {backing}_fts_ad AFTER DELETE ON {backing} BEGIN
             DELETE FROM {fts} WHERE rowid = old.id;
         END;",
        backing = backing,
        fts = fts,
        cols = cols,
        new_vals = new_cols.join(", "),
        sets = set_cols.join(", "),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_all_migrations;

    fn fresh_conn() -> Connection {
        crate::db::pool::ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        conn
    }

    fn seed_decision(conn: &Connection, title: &str) -> i64 {
        conn.execute(
            "INSERT INTO projects (path, name) VALUES ('/p', 'p')
             ON CONFLICT(path) DO NOTHING",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO decisions (project_id, title, decision, reasoning)
             VALUES (1, ?1, 'use sqlite', 'local-first')",
            [title],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn fts_count(conn: &Connection, query: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM decisions_fts WHERE decisions_fts MATCH ?",
            [query],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_trigger_mirrors_rows() {
        let conn = fresh_conn();
        seed_decision(&conn, "storage engine choice");
        assert_eq!(fts_count(&conn, "\"storage\""), 1);
    }

    #[test]
    fn test_update_and_delete_triggers() {
        let conn = fresh_conn();
        let id = seed_decision(&conn, "storage engine choice");

        conn.execute(
            "UPDATE decisions SET title = 'codec selection' WHERE id = ?",
            [id],
        )
        .unwrap();
        assert_eq!(fts_count(&conn, "\"storage\""), 0);
        assert_eq!(fts_count(&conn, "\"codec\""), 1);

        conn.execute("DELETE FROM decisions WHERE id = ?", [id]).unwrap();
        assert_eq!(fts_count(&conn, "\"codec\""), 0);
    }

    #[test]
    fn test_repair_recreates_missing_column_set() {
        let conn = fresh_conn();
        seed_decision(&conn, "storage engine choice");

        // Simulate a mis-created FTS table left behind by a bad migration.
        conn.execute_batch(
            "DROP TABLE decisions_fts;
             CREATE VIRTUAL TABLE decisions_fts USING fts5(title)",
        )
        .unwrap();

        migrate_fts_tables(&conn).unwrap();

        let cols = table_columns(&conn, "decisions_fts");
        assert_eq!(cols, vec!["title", "decision", "reasoning"]);
        // Backfilled from the backing table
        assert_eq!(fts_count(&conn, "\"storage\""), 1);
        // Triggers were recreated too
        seed_decision(&conn, "another choice");
        assert_eq!(fts_count(&conn, "\"another\""), 1);
    }

    #[test]
    fn test_repair_after_full_drop() {
        let conn = fresh_conn();
        seed_decision(&conn, "storage engine choice");
        conn.execute_batch("DROP TABLE decisions_fts").unwrap();

        migrate_fts_tables(&conn).unwrap();
        assert_eq!(fts_count(&conn, "\"storage\""), 1);
    }
}
