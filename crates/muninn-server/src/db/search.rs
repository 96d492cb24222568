// crates/muninn-server/src/db/search.rs
// FTS query escaping and MATCH helpers.
//
// `escape_fts_query` is the single authority for translating user input into
// an FTS5 MATCH expression. Everything routed through MATCH must pass
// through it first.

use rusqlite::{Connection, params};

use super::types::{DecisionRow, LearningRow, parse_string_array};

/// Maximum length of user input accepted into an FTS query.
const MAX_QUERY_LEN: usize = 200;

/// FTS5 operators that must never appear as bare tokens.
const FTS_OPERATORS: [&str; 4] = ["AND", "OR", "NOT", "NEAR"];

/// Escape user input for FTS5 MATCH.
///
/// Strips `"`, `*`, `^`; trims and caps length; drops tokens equal
/// (case-insensitively) to FTS operators; wraps each remaining token in
/// double quotes with internal quotes doubled; joins by space. Empty input
/// yields the empty string. Idempotent: escaping an already-escaped string
/// returns it unchanged.
pub fn escape_fts_query(input: &str) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '"' | '*' | '^'))
        .collect();
    let mut trimmed = stripped.trim().to_string();
    if trimmed.len() > MAX_QUERY_LEN {
        // Cut on a char boundary at or below the cap
        let mut cut = MAX_QUERY_LEN;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        trimmed.truncate(cut);
    }

    let tokens: Vec<String> = trimmed
        .split_whitespace()
        .filter(|token| {
            !FTS_OPERATORS
                .iter()
                .any(|op| token.eq_ignore_ascii_case(op))
        })
        // Internal quotes were stripped above; doubling is still applied so
        // the rule holds even if the strip set ever narrows.
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();

    tokens.join(" ")
}

/// Search decisions by escaped FTS query, best matches first.
pub fn search_decisions_sync(
    conn: &Connection,
    project_id: i64,
    query: &str,
    limit: usize,
) -> rusqlite::Result<Vec<DecisionRow>> {
    let escaped = escape_fts_query(query);
    if escaped.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT d.id, d.title, d.decision, d.reasoning, d.affects, d.status,
                d.outcome_status, d.outcome_notes, d.created_at
         FROM decisions_fts
         JOIN decisions d ON d.id = decisions_fts.rowid
         WHERE decisions_fts MATCH ?1 AND d.project_id = ?2
         ORDER BY bm25(decisions_fts)
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![escaped, project_id, limit as i64], |row| {
        Ok(DecisionRow {
            id: row.get(0)?,
            title: row.get(1)?,
            decision: row.get(2)?,
            reasoning: row.get(3)?,
            affects: parse_string_array(row.get(4)?),
            status: row.get(5)?,
            outcome_status: row.get(6)?,
            outcome_notes: row.get(7)?,
            created_at: row.get(8)?,
        })
    })?;
    rows.collect()
}

/// Search learnings by escaped FTS query, best matches first.
pub fn search_learnings_sync(
    conn: &Connection,
    project_id: i64,
    query: &str,
    limit: usize,
) -> rusqlite::Result<Vec<LearningRow>> {
    let escaped = escape_fts_query(query);
    if escaped.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT l.id, l.title, l.content, l.category, l.context, l.confidence,
                l.times_applied, l.foundational
         FROM learnings_fts
         JOIN learnings l ON l.id = learnings_fts.rowid
         WHERE learnings_fts MATCH ?1 AND l.project_id = ?2
         ORDER BY bm25(learnings_fts)
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![escaped, project_id, limit as i64], |row| {
        Ok(LearningRow {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            category: row.get(3)?,
            context: row.get(4)?,
            confidence: row.get(5)?,
            times_applied: row.get(6)?,
            foundational: row.get::<_, i64>(7)? != 0,
        })
    })?;
    rows.collect()
}

/// Convert an embedding vector to bytes for sqlite-vec queries.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert distance to similarity score (0.0 to 1.0).
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 - distance.clamp(0.0, 1.0)
}

/// A vector-index hit.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub source_kind: String,
    pub source_id: i64,
    pub content: String,
    pub score: f32,
}

/// Store (or replace) the embedding for one item in the vector index.
/// Embedding providers live outside the core; callers hand the vector in.
pub fn store_context_embedding_sync(
    conn: &Connection,
    source_kind: &str,
    source_id: i64,
    content: &str,
    embedding: &[f32],
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM vec_context WHERE source_kind = ?1 AND source_id = ?2",
        params![source_kind, source_id],
    )?;
    conn.execute(
        "INSERT INTO vec_context (embedding, source_kind, source_id, content)
         VALUES (?1, ?2, ?3, ?4)",
        params![embedding_to_bytes(embedding), source_kind, source_id, content],
    )?;
    Ok(())
}

/// Nearest items in the vector index by cosine distance.
pub fn vector_search_sync(
    conn: &Connection,
    embedding: &[f32],
    limit: usize,
) -> rusqlite::Result<Vec<VectorHit>> {
    let mut stmt = conn.prepare(
        "SELECT source_kind, source_id, content,
                vec_distance_cosine(embedding, ?1) AS distance
         FROM vec_context
         ORDER BY distance
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(
        params![embedding_to_bytes(embedding), limit as i64],
        |row| {
            Ok(VectorHit {
                source_kind: row.get(0)?,
                source_id: row.get(1)?,
                content: row.get(2)?,
                score: distance_to_score(row.get::<_, f32>(3)?),
            })
        },
    )?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;
    use proptest::prelude::*;

    #[test]
    fn test_escape_basic_tokens() {
        assert_eq!(escape_fts_query("hello world"), "\"hello\" \"world\"");
    }

    #[test]
    fn test_escape_strips_special_chars() {
        assert_eq!(escape_fts_query("a*b \"c\" d^"), "\"ab\" \"c\" \"d\"");
    }

    #[test]
    fn test_escape_drops_operators_any_case() {
        assert_eq!(escape_fts_query("cats AND dogs"), "\"cats\" \"dogs\"");
        assert_eq!(escape_fts_query("near or not"), "");
        assert_eq!(escape_fts_query("Nearby"), "\"Nearby\"");
    }

    #[test]
    fn test_escape_empty_and_whitespace() {
        assert_eq!(escape_fts_query(""), "");
        assert_eq!(escape_fts_query("   \t "), "");
        assert_eq!(escape_fts_query("\"*^"), "");
    }

    #[test]
    fn test_escape_caps_length() {
        let long = "word ".repeat(100);
        let escaped = escape_fts_query(&long);
        // Raw input capped at 200 chars -> at most 40 five-char words
        assert!(escaped.split_whitespace().count() <= 40);
    }

    #[test]
    fn test_escape_multibyte_boundary() {
        // A long run of multibyte chars must not split inside a char
        let long = "é".repeat(300);
        let escaped = escape_fts_query(&long);
        assert!(!escaped.is_empty());
    }

    proptest! {
        #[test]
        fn prop_escape_idempotent(s in ".{0,300}") {
            let once = escape_fts_query(&s);
            let twice = escape_fts_query(&once);
            prop_assert_eq!(&twice, &once);
        }

        #[test]
        fn prop_escape_no_unquoted_specials(s in ".{0,300}") {
            let escaped = escape_fts_query(&s);
            // Every token is wrapped in quotes and all interior quote chars
            // come from the doubling rule, so stars and carets are gone and
            // quotes appear only as delimiters.
            prop_assert!(!escaped.contains('*'));
            prop_assert!(!escaped.contains('^'));
            for token in escaped.split(' ').filter(|t| !t.is_empty()) {
                prop_assert!(token.starts_with('"') && token.ends_with('"'));
            }
        }

        #[test]
        fn prop_escape_no_bare_operators(s in ".{0,300}") {
            let escaped = escape_fts_query(&s);
            for token in escaped.split(' ') {
                for op in ["AND", "OR", "NOT", "NEAR"] {
                    prop_assert!(!token.eq_ignore_ascii_case(op));
                }
            }
        }
    }

    #[test]
    fn test_search_decisions_via_fts() {
        let conn = setup_test_connection();
        conn.execute("INSERT INTO projects (path) VALUES ('/p')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO decisions (project_id, title, decision) VALUES
             (1, 'storage engine', 'use sqlite with wal'),
             (1, 'http client', 'use reqwest')",
            [],
        )
        .unwrap();

        let hits = search_decisions_sync(&conn, 1, "sqlite", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "storage engine");

        // Hostile input degrades to nothing rather than erroring
        let hits = search_decisions_sync(&conn, 1, "\"*^ AND OR", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_vector_store_and_search() {
        let conn = setup_test_connection();

        let mut near = vec![0.0f32; 1536];
        near[0] = 1.0;
        let mut far = vec![0.0f32; 1536];
        far[1] = 1.0;

        store_context_embedding_sync(&conn, "learning", 1, "retry idiom", &near).unwrap();
        store_context_embedding_sync(&conn, "decision", 2, "storage choice", &far).unwrap();

        let mut query = vec![0.0f32; 1536];
        query[0] = 0.9;
        let hits = vector_search_sync(&conn, &query, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source_kind, "learning");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_vector_store_replaces_existing() {
        let conn = setup_test_connection();
        let embedding = vec![0.5f32; 1536];

        store_context_embedding_sync(&conn, "learning", 1, "v1", &embedding).unwrap();
        store_context_embedding_sync(&conn, "learning", 1, "v2", &embedding).unwrap();

        let hits = vector_search_sync(&conn, &embedding, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "v2");
    }

    #[test]
    fn test_search_learnings_scoped_to_project() {
        let conn = setup_test_connection();
        conn.execute("INSERT INTO projects (path) VALUES ('/p')", [])
            .unwrap();
        conn.execute("INSERT INTO projects (path) VALUES ('/q')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO learnings (project_id, title, content) VALUES
             (1, 'retry idiom', 'use backoff on contention'),
             (2, 'retry idiom', 'other project copy')",
            [],
        )
        .unwrap();

        let hits = search_learnings_sync(&conn, 1, "retry", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }
}
