use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("guidance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tests(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            time_limit REAL,
            category TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            active INTEGER NOT NULL,
            image_url TEXT,
            career_fields TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tests_active ON tests(active)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            test_id TEXT NOT NULL,
            question_text TEXT NOT NULL,
            question_type TEXT NOT NULL,
            options TEXT NOT NULL,
            correct_answer TEXT,
            order_index INTEGER NOT NULL,
            FOREIGN KEY(test_id) REFERENCES tests(id),
            UNIQUE(test_id, order_index)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_test ON questions(test_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_test_order ON questions(test_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS responses(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            completed INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            answers TEXT NOT NULL,
            score REAL,
            results TEXT,
            FOREIGN KEY(test_id) REFERENCES tests(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_user ON responses(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_test ON responses(test_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_user_test ON responses(user_id, test_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS system_events(
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            user_id TEXT,
            entity_id TEXT,
            entity_name TEXT,
            details TEXT,
            status TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_system_events_timestamp ON system_events(timestamp)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_system_events_type ON system_events(type)",
        [],
    )?;

    Ok(conn)
}

/// Append an audit event. Callers treat a failed log write as non-fatal to
/// the operation being logged.
pub fn log_event(
    conn: &Connection,
    event_type: &str,
    user_id: Option<&str>,
    entity_id: Option<&str>,
    entity_name: Option<&str>,
    details: Option<&str>,
) -> anyhow::Result<()> {
    let id = uuid::Uuid::new_v4().to_string();
    let timestamp = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO system_events(id, type, user_id, entity_id, entity_name, details, status, timestamp)
         VALUES(?, ?, ?, ?, ?, ?, 'success', ?)",
        (&id, event_type, user_id, entity_id, entity_name, details, &timestamp),
    )?;
    Ok(())
}
