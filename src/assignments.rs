use crate::calc::{round_to_tenth, whole_percent};
use crate::error::{Error, Result};
use crate::roster;
use crate::types::{
    canon_iso_date, now_rfc3339, Actor, AssignmentStatus, AssignmentType, DocStatus,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: i64 = 50;

const COLS: &str = "id, class_id, class_name, title, description, kind, status, max_points, \
                    assigned_date, due_date, created_by, created_by_name, doc_status, \
                    created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: AssignmentType,
    pub status: AssignmentStatus,
    pub max_points: f64,
    pub assigned_date: String,
    pub due_date: String,
    pub created_by: String,
    pub created_by_name: String,
    pub doc_status: DocStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    pub class_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: AssignmentType,
    pub max_points: f64,
    pub assigned_date: String,
    pub due_date: String,
    /// Defaults to draft; creating directly as published is allowed.
    pub status: Option<AssignmentStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<AssignmentType>,
    pub max_points: Option<f64>,
    pub assigned_date: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentFilters {
    pub class_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<AssignmentType>,
    pub status: Option<AssignmentStatus>,
    /// Matches rows with `assigned_date >= start_date`.
    pub start_date: Option<String>,
    /// Matches rows with `due_date <= end_date`.
    pub end_date: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPage {
    pub assignments: Vec<Assignment>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentStats {
    pub total_students: i64,
    pub graded_count: i64,
    pub average_score: f64,
    pub average_percentage: i64,
    pub high_score: f64,
    pub low_score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSummary {
    pub assignment: Assignment,
    pub stats: AssignmentStats,
}

fn row_to_assignment(r: &Row) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: r.get(0)?,
        class_id: r.get(1)?,
        class_name: r.get(2)?,
        title: r.get(3)?,
        description: r.get(4)?,
        kind: r.get(5)?,
        status: r.get(6)?,
        max_points: r.get(7)?,
        assigned_date: r.get(8)?,
        due_date: r.get(9)?,
        created_by: r.get(10)?,
        created_by_name: r.get(11)?,
        doc_status: r.get(12)?,
        created_at: r.get(13)?,
        updated_at: r.get(14)?,
    })
}

pub fn create_assignment(
    conn: &Connection,
    input: &NewAssignment,
    actor: &Actor,
) -> Result<Assignment> {
    if input.max_points <= 0.0 {
        return Err(Error::validation(format!(
            "maxPoints must be > 0, got {}",
            input.max_points
        )));
    }
    let assigned_date = canon_iso_date(&input.assigned_date, "assignedDate")?;
    let due_date = canon_iso_date(&input.due_date, "dueDate")?;
    let class = roster::require_class(conn, &input.class_id)?;

    let id = Uuid::new_v4().to_string();
    let status = input.status.unwrap_or(AssignmentStatus::Draft);
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO assignments(
            id, class_id, class_name, title, description, kind, status, max_points,
            assigned_date, due_date, created_by, created_by_name, doc_status, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            class.id,
            class.name,
            input.title,
            input.description,
            input.kind,
            status,
            input.max_points,
            assigned_date,
            due_date,
            actor.uid,
            actor.display_name,
            DocStatus::Active,
            now,
            now
        ],
    )?;

    info!(assignment_id = %id, class_id = %class.id, "assignment created");
    require_assignment(conn, &id)
}

pub fn assignment_by_id(conn: &Connection, id: &str) -> Result<Option<Assignment>> {
    let sql = format!("SELECT {} FROM assignments WHERE id = ? AND doc_status = 'active'", COLS);
    let row = conn.query_row(&sql, [id], row_to_assignment).optional()?;
    Ok(row)
}

pub(crate) fn require_assignment(conn: &Connection, id: &str) -> Result<Assignment> {
    assignment_by_id(conn, id)?.ok_or_else(|| Error::not_found("assignment", id))
}

/// Active assignments for one class, newest due date first, optionally
/// narrowed to a single status.
pub fn assignments_for_class(
    conn: &Connection,
    class_id: &str,
    status: Option<AssignmentStatus>,
) -> Result<Vec<Assignment>> {
    let mut sql = format!(
        "SELECT {} FROM assignments WHERE class_id = ? AND doc_status = 'active'",
        COLS
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(s) = status {
        sql.push_str(" AND status = ?");
        binds.push(Value::Text(s.as_str().to_string()));
    }
    sql.push_str(" ORDER BY due_date DESC, id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), row_to_assignment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_assignments(conn: &Connection, filters: &AssignmentFilters) -> Result<AssignmentPage> {
    let mut where_sql = String::from("doc_status = 'active'");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(class_id) = &filters.class_id {
        where_sql.push_str(" AND class_id = ?");
        binds.push(Value::Text(class_id.clone()));
    }
    if let Some(kind) = filters.kind {
        where_sql.push_str(" AND kind = ?");
        binds.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(status) = filters.status {
        where_sql.push_str(" AND status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(start) = &filters.start_date {
        where_sql.push_str(" AND assigned_date >= ?");
        binds.push(Value::Text(canon_iso_date(start, "startDate")?));
    }
    if let Some(end) = &filters.end_date {
        where_sql.push_str(" AND due_date <= ?");
        binds.push(Value::Text(canon_iso_date(end, "endDate")?));
    }

    let count_sql = format!("SELECT COUNT(*) FROM assignments WHERE {}", where_sql);
    let total: i64 =
        conn.query_row(&count_sql, params_from_iter(binds.clone()), |r| r.get(0))?;

    let limit = filters.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(0);
    let offset = filters.offset.unwrap_or(0).max(0);
    let sql = format!(
        "SELECT {} FROM assignments WHERE {} ORDER BY due_date DESC, id LIMIT ? OFFSET ?",
        COLS, where_sql
    );
    binds.push(Value::Integer(limit));
    binds.push(Value::Integer(offset));

    let mut stmt = conn.prepare(&sql)?;
    let assignments = stmt
        .query_map(params_from_iter(binds), row_to_assignment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(AssignmentPage { assignments, total })
}

pub fn update_assignment(
    conn: &Connection,
    id: &str,
    patch: &AssignmentPatch,
    actor: &Actor,
) -> Result<Assignment> {
    require_assignment(conn, id)?;
    if let Some(max_points) = patch.max_points {
        if max_points <= 0.0 {
            return Err(Error::validation(format!(
                "maxPoints must be > 0, got {}",
                max_points
            )));
        }
    }

    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(title) = &patch.title {
        fields.push("title = ?");
        values.push(Value::Text(title.clone()));
    }
    if let Some(description) = &patch.description {
        fields.push("description = ?");
        values.push(Value::Text(description.clone()));
    }
    if let Some(kind) = patch.kind {
        fields.push("kind = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(max_points) = patch.max_points {
        fields.push("max_points = ?");
        values.push(Value::Real(max_points));
    }
    if let Some(assigned_date) = &patch.assigned_date {
        fields.push("assigned_date = ?");
        values.push(Value::Text(canon_iso_date(assigned_date, "assignedDate")?));
    }
    if let Some(due_date) = &patch.due_date {
        fields.push("due_date = ?");
        values.push(Value::Text(canon_iso_date(due_date, "dueDate")?));
    }

    if !fields.is_empty() {
        fields.push("updated_at = ?");
        values.push(Value::Text(now_rfc3339()));
        let sql = format!(
            "UPDATE assignments SET {} WHERE id = ? AND doc_status = 'active'",
            fields.join(", ")
        );
        values.push(Value::Text(id.to_string()));
        conn.execute(&sql, params_from_iter(values))?;
        info!(assignment_id = %id, editor = %actor.uid, "assignment updated");
    }

    require_assignment(conn, id)
}

/// Draft -> published. Grading and gradebooks only see an assignment from
/// this point on.
pub fn publish_assignment(conn: &Connection, id: &str, actor: &Actor) -> Result<Assignment> {
    transition_status(conn, id, actor, AssignmentStatus::Draft, AssignmentStatus::Published)
}

/// Published -> closed. Closed work stays gradable and keeps counting toward
/// report cards, but disappears from the live gradebook view.
pub fn close_assignment(conn: &Connection, id: &str, actor: &Actor) -> Result<Assignment> {
    transition_status(conn, id, actor, AssignmentStatus::Published, AssignmentStatus::Closed)
}

fn transition_status(
    conn: &Connection,
    id: &str,
    actor: &Actor,
    from: AssignmentStatus,
    to: AssignmentStatus,
) -> Result<Assignment> {
    let assignment = require_assignment(conn, id)?;
    if assignment.status != from {
        return Err(Error::invalid_state(format!(
            "assignment {} is {}, cannot move to {}",
            id,
            assignment.status.as_str(),
            to.as_str()
        )));
    }
    conn.execute(
        "UPDATE assignments SET status = ?, updated_at = ? WHERE id = ? AND doc_status = 'active'",
        params![to, now_rfc3339(), id],
    )?;
    info!(assignment_id = %id, editor = %actor.uid, status = to.as_str(), "assignment status changed");
    require_assignment(conn, id)
}

/// Soft delete: the row keeps its history but every read path stops seeing it.
pub fn delete_assignment(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE assignments SET doc_status = 'deleted', updated_at = ? WHERE id = ? AND doc_status = 'active'",
        params![now_rfc3339(), id],
    )?;
    if changed == 0 {
        return Err(Error::not_found("assignment", id));
    }
    info!(assignment_id = %id, "assignment deleted");
    Ok(())
}

/// Grade statistics for one assignment over its live ledger rows. High and
/// low stay 0 until at least one grade exists.
pub fn assignment_summary(conn: &Connection, id: &str) -> Result<AssignmentSummary> {
    let assignment = require_assignment(conn, id)?;
    let total_students = roster::students_in_class(conn, &assignment.class_id)?.len() as i64;

    let mut stmt = conn.prepare(
        "SELECT points_earned FROM grades WHERE assignment_id = ? AND doc_status = 'active'",
    )?;
    let points = stmt
        .query_map([id], |r| r.get::<_, f64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let graded_count = points.len() as i64;
    let mut stats = AssignmentStats {
        total_students,
        graded_count,
        average_score: 0.0,
        average_percentage: 0,
        high_score: 0.0,
        low_score: 0.0,
    };
    if graded_count > 0 {
        let sum: f64 = points.iter().sum();
        stats.average_score = round_to_tenth(sum / graded_count as f64);
        stats.average_percentage = whole_percent(stats.average_score, assignment.max_points);
        stats.high_score = points.iter().copied().fold(f64::MIN, f64::max);
        stats.low_score = points.iter().copied().fold(f64::MAX, f64::min);
    }

    Ok(AssignmentSummary { assignment, stats })
}
