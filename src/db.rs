use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("recordbook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Roster tables are owned by the enrollment service; the engine only
    // reads them, but creates the shape so a fresh workspace is usable.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade_id TEXT,
            grade_name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            parent_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            max_points REAL NOT NULL,
            assigned_date TEXT NOT NULL,
            due_date TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_by_name TEXT NOT NULL,
            doc_status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_class ON assignments(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_class_status ON assignments(class_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            assignment_title TEXT NOT NULL,
            class_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            points_earned REAL NOT NULL,
            max_points REAL NOT NULL,
            percentage REAL NOT NULL,
            letter_grade TEXT NOT NULL,
            feedback TEXT,
            graded_by TEXT NOT NULL,
            graded_by_name TEXT NOT NULL,
            graded_at TEXT NOT NULL,
            edit_history TEXT NOT NULL DEFAULT '[]',
            doc_status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    // One live grade per (assignment, student); soft-deleted rows stay out of
    // the key space so a re-grade after delete can insert fresh.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_grades_live_cell
         ON grades(assignment_id, student_id) WHERE doc_status = 'active'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_assignment ON grades(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_class_student ON grades(class_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            date TEXT NOT NULL,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            status TEXT NOT NULL,
            arrival_time TEXT,
            notes TEXT,
            recorded_by TEXT NOT NULL,
            recorded_by_name TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            edit_history TEXT NOT NULL DEFAULT '[]',
            doc_status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_attendance_arrival_time(&conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_attendance_live_entry
         ON attendance(class_id, student_id, date) WHERE doc_status = 'active'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(class_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_recorded_by ON attendance(recorded_by)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_cards(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            parent_id TEXT,
            class_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            grade_id TEXT,
            grade_name TEXT,
            term TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            overall_percentage REAL NOT NULL,
            letter_grade TEXT NOT NULL,
            total_points REAL NOT NULL,
            max_points REAL NOT NULL,
            breakdown TEXT NOT NULL,
            attendance TEXT NOT NULL,
            teacher_comments TEXT,
            conduct_grade TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            published_at TEXT,
            generated_by TEXT NOT NULL,
            generated_by_name TEXT NOT NULL,
            doc_status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    ensure_report_cards_conduct_grade(&conn)?;
    // One live card per (student, class, term, year); regeneration updates it
    // in place instead of minting siblings.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_report_cards_live_key
         ON report_cards(student_id, class_id, term, academic_year) WHERE doc_status = 'active'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_report_cards_class ON report_cards(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_report_cards_student ON report_cards(student_id)",
        [],
    )?;

    Ok(conn)
}

// Existing workspaces may predate late-arrival tracking. Add the column if needed.
fn ensure_attendance_arrival_time(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "arrival_time")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendance ADD COLUMN arrival_time TEXT", [])?;
    Ok(())
}

fn ensure_report_cards_conduct_grade(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "report_cards", "conduct_grade")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE report_cards ADD COLUMN conduct_grade TEXT", [])?;
    Ok(())
}

/// Decodes a JSON TEXT column inside a row-mapping closure, surfacing decode
/// failures as conversion errors on the column they came from.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    raw: String,
    idx: usize,
) -> rusqlite::Result<T> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
