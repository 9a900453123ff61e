use crate::calc::percentage;
use crate::db::json_column;
use crate::error::{Error, Result};
use crate::history::EditLog;
use crate::roster;
use crate::types::{now_rfc3339, Actor, DocStatus, LetterGrade, Settings};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: i64 = 50;

const COLS: &str = "id, assignment_id, assignment_title, class_id, class_name, student_id, \
                    student_name, points_earned, max_points, percentage, letter_grade, feedback, \
                    graded_by, graded_by_name, graded_at, edit_history, doc_status, created_at, \
                    updated_at";

/// One correction in a grade's history. `reason` is only present on
/// deliberate corrections made through `update_grade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEdit {
    pub previous_points: f64,
    pub new_points: f64,
    pub edited_by: String,
    pub edited_by_name: String,
    pub edited_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub id: String,
    pub assignment_id: String,
    pub assignment_title: String,
    pub class_id: String,
    pub class_name: String,
    pub student_id: String,
    pub student_name: String,
    pub points_earned: f64,
    /// Copied from the assignment at grading time; later changes to the
    /// assignment do not rewrite existing grades.
    pub max_points: f64,
    pub percentage: f64,
    pub letter_grade: LetterGrade,
    pub feedback: Option<String>,
    pub graded_by: String,
    pub graded_by_name: String,
    pub graded_at: String,
    pub edit_history: EditLog<GradeEdit>,
    pub doc_status: DocStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// One student's score for an assignment, as submitted by the caller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub student_id: String,
    pub points_earned: f64,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeChange {
    pub points_earned: Option<f64>,
    pub feedback: Option<String>,
    pub edit_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeFilters {
    pub assignment_id: Option<String>,
    pub student_id: Option<String>,
    pub class_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradePage {
    pub grades: Vec<StudentGrade>,
    pub total: i64,
}

/// Running totals for one student across a class, over everything in the
/// ledger regardless of assignment status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStanding {
    pub percentage: f64,
    pub letter_grade: LetterGrade,
    pub total_points: f64,
    pub max_points: f64,
    pub grade_count: i64,
}

fn row_to_grade(r: &Row) -> rusqlite::Result<StudentGrade> {
    let history_raw: String = r.get(15)?;
    Ok(StudentGrade {
        id: r.get(0)?,
        assignment_id: r.get(1)?,
        assignment_title: r.get(2)?,
        class_id: r.get(3)?,
        class_name: r.get(4)?,
        student_id: r.get(5)?,
        student_name: r.get(6)?,
        points_earned: r.get(7)?,
        max_points: r.get(8)?,
        percentage: r.get(9)?,
        letter_grade: r.get(10)?,
        feedback: r.get(11)?,
        graded_by: r.get(12)?,
        graded_by_name: r.get(13)?,
        graded_at: r.get(14)?,
        edit_history: json_column(history_raw, 15)?,
        doc_status: r.get(16)?,
        created_at: r.get(17)?,
        updated_at: r.get(18)?,
    })
}

/// Records or corrects one student's score for an assignment. There is only
/// ever one live row per (assignment, student): a second call updates that
/// row in place, folding the previous points into the edit history when they
/// actually changed. Re-submitting the identical score leaves the history
/// untouched.
pub fn upsert_grade(
    conn: &Connection,
    assignment_id: &str,
    entry: &GradeEntry,
    actor: &Actor,
    settings: &Settings,
) -> Result<StudentGrade> {
    if entry.points_earned < 0.0 {
        return Err(Error::validation(format!(
            "pointsEarned must be >= 0, got {}",
            entry.points_earned
        )));
    }

    let assignment = crate::assignments::require_assignment(conn, assignment_id)?;
    let class = roster::require_class(conn, &assignment.class_id)?;
    let student = roster::require_student(conn, &entry.student_id)?;

    let pct = percentage(entry.points_earned, assignment.max_points);
    let letter = LetterGrade::from_percentage(pct);
    let now = now_rfc3339();

    let tx = conn.unchecked_transaction()?;
    let existing: Option<(String, f64, String)> = tx
        .query_row(
            "SELECT id, points_earned, edit_history FROM grades
             WHERE assignment_id = ? AND student_id = ? AND doc_status = 'active'",
            (assignment_id, &entry.student_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    let grade_id = match existing {
        Some((id, previous_points, history_raw)) => {
            let mut history: EditLog<GradeEdit> = serde_json::from_str(&history_raw)?;
            if previous_points != entry.points_earned {
                history.record(
                    GradeEdit {
                        previous_points,
                        new_points: entry.points_earned,
                        edited_by: actor.uid.clone(),
                        edited_by_name: actor.display_name.clone(),
                        edited_at: now.clone(),
                        reason: None,
                    },
                    settings.edit_history_cap,
                );
            }
            tx.execute(
                "UPDATE grades SET points_earned = ?, percentage = ?, letter_grade = ?,
                        feedback = ?, graded_by = ?, graded_by_name = ?, graded_at = ?,
                        edit_history = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    entry.points_earned,
                    pct,
                    letter,
                    entry.feedback,
                    actor.uid,
                    actor.display_name,
                    now,
                    serde_json::to_string(&history)?,
                    now,
                    id
                ],
            )?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO grades(
                    id, assignment_id, assignment_title, class_id, class_name, student_id,
                    student_name, points_earned, max_points, percentage, letter_grade, feedback,
                    graded_by, graded_by_name, graded_at, edit_history, doc_status, created_at,
                    updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    assignment.id,
                    assignment.title,
                    class.id,
                    class.name,
                    student.id,
                    student.display_name(),
                    entry.points_earned,
                    assignment.max_points,
                    pct,
                    letter,
                    entry.feedback,
                    actor.uid,
                    actor.display_name,
                    now,
                    "[]",
                    DocStatus::Active,
                    now,
                    now
                ],
            )?;
            id
        }
    };
    tx.commit()?;

    info!(
        grade_id = %grade_id,
        assignment_id = %assignment_id,
        student_id = %entry.student_id,
        "grade recorded"
    );
    require_grade(conn, &grade_id)
}

/// Sequential upserts for one assignment's worth of scores, stopping at the
/// first bad entry. Entries before it stay written; each row was already
/// consistent on its own.
pub fn bulk_upsert_grades(
    conn: &Connection,
    assignment_id: &str,
    entries: &[GradeEntry],
    actor: &Actor,
    settings: &Settings,
) -> Result<Vec<StudentGrade>> {
    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        results.push(upsert_grade(conn, assignment_id, entry, actor, settings)?);
    }
    Ok(results)
}

pub fn grade_by_id(conn: &Connection, id: &str) -> Result<Option<StudentGrade>> {
    let sql = format!("SELECT {} FROM grades WHERE id = ? AND doc_status = 'active'", COLS);
    let row = conn.query_row(&sql, [id], row_to_grade).optional()?;
    Ok(row)
}

fn require_grade(conn: &Connection, id: &str) -> Result<StudentGrade> {
    grade_by_id(conn, id)?.ok_or_else(|| Error::not_found("grade", id))
}

pub fn grades_for_assignment(conn: &Connection, assignment_id: &str) -> Result<Vec<StudentGrade>> {
    let sql = format!(
        "SELECT {} FROM grades WHERE assignment_id = ? AND doc_status = 'active'
         ORDER BY student_name, id",
        COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([assignment_id], row_to_grade)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn grades_for_class(conn: &Connection, class_id: &str) -> Result<Vec<StudentGrade>> {
    let sql = format!(
        "SELECT {} FROM grades WHERE class_id = ? AND doc_status = 'active'
         ORDER BY graded_at DESC, id",
        COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([class_id], row_to_grade)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn grades_for_student(conn: &Connection, student_id: &str) -> Result<Vec<StudentGrade>> {
    let sql = format!(
        "SELECT {} FROM grades WHERE student_id = ? AND doc_status = 'active'
         ORDER BY graded_at DESC, id",
        COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], row_to_grade)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn grades_for_student_in_class(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<Vec<StudentGrade>> {
    let sql = format!(
        "SELECT {} FROM grades WHERE student_id = ? AND class_id = ? AND doc_status = 'active'
         ORDER BY graded_at DESC, id",
        COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((student_id, class_id), row_to_grade)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_grades(conn: &Connection, filters: &GradeFilters) -> Result<GradePage> {
    let mut where_sql = String::from("doc_status = 'active'");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(assignment_id) = &filters.assignment_id {
        where_sql.push_str(" AND assignment_id = ?");
        binds.push(Value::Text(assignment_id.clone()));
    }
    if let Some(student_id) = &filters.student_id {
        where_sql.push_str(" AND student_id = ?");
        binds.push(Value::Text(student_id.clone()));
    }
    if let Some(class_id) = &filters.class_id {
        where_sql.push_str(" AND class_id = ?");
        binds.push(Value::Text(class_id.clone()));
    }

    let count_sql = format!("SELECT COUNT(*) FROM grades WHERE {}", where_sql);
    let total: i64 =
        conn.query_row(&count_sql, params_from_iter(binds.clone()), |r| r.get(0))?;

    let limit = filters.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(0);
    let offset = filters.offset.unwrap_or(0).max(0);
    let sql = format!(
        "SELECT {} FROM grades WHERE {} ORDER BY graded_at DESC, id LIMIT ? OFFSET ?",
        COLS, where_sql
    );
    binds.push(Value::Integer(limit));
    binds.push(Value::Integer(offset));

    let mut stmt = conn.prepare(&sql)?;
    let grades = stmt
        .query_map(params_from_iter(binds), row_to_grade)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(GradePage { grades, total })
}

/// Correction by grade id. New points recompute percentage and letter from
/// the points scale stored on the row, and land in the edit history together
/// with the caller's reason.
pub fn update_grade(
    conn: &Connection,
    id: &str,
    change: &GradeChange,
    actor: &Actor,
    settings: &Settings,
) -> Result<StudentGrade> {
    if let Some(points) = change.points_earned {
        if points < 0.0 {
            return Err(Error::validation(format!(
                "pointsEarned must be >= 0, got {}",
                points
            )));
        }
    }

    let tx = conn.unchecked_transaction()?;
    let sql = format!("SELECT {} FROM grades WHERE id = ? AND doc_status = 'active'", COLS);
    let existing = tx
        .query_row(&sql, [id], row_to_grade)
        .optional()?
        .ok_or_else(|| Error::not_found("grade", id))?;

    let now = now_rfc3339();
    let mut fields: Vec<&str> = vec!["updated_at = ?"];
    let mut values: Vec<Value> = vec![Value::Text(now.clone())];

    if let Some(points) = change.points_earned {
        if points != existing.points_earned {
            let mut history = existing.edit_history.clone();
            history.record(
                GradeEdit {
                    previous_points: existing.points_earned,
                    new_points: points,
                    edited_by: actor.uid.clone(),
                    edited_by_name: actor.display_name.clone(),
                    edited_at: now.clone(),
                    reason: change.edit_reason.clone(),
                },
                settings.edit_history_cap,
            );
            let pct = percentage(points, existing.max_points);
            fields.push("points_earned = ?");
            values.push(Value::Real(points));
            fields.push("percentage = ?");
            values.push(Value::Real(pct));
            fields.push("letter_grade = ?");
            values.push(Value::Text(
                LetterGrade::from_percentage(pct).as_str().to_string(),
            ));
            fields.push("edit_history = ?");
            values.push(Value::Text(serde_json::to_string(&history)?));
        }
    }
    if let Some(feedback) = &change.feedback {
        fields.push("feedback = ?");
        values.push(Value::Text(feedback.clone()));
    }

    let sql = format!("UPDATE grades SET {} WHERE id = ?", fields.join(", "));
    values.push(Value::Text(id.to_string()));
    tx.execute(&sql, params_from_iter(values))?;
    tx.commit()?;

    info!(grade_id = %id, editor = %actor.uid, "grade corrected");
    require_grade(conn, id)
}

/// Soft delete: the row stops being visible but the history stays on disk,
/// and the (assignment, student) slot opens up for a fresh grade.
pub fn delete_grade(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE grades SET doc_status = 'deleted', updated_at = ? WHERE id = ? AND doc_status = 'active'",
        params![now_rfc3339(), id],
    )?;
    if changed == 0 {
        return Err(Error::not_found("grade", id));
    }
    info!(grade_id = %id, "grade deleted");
    Ok(())
}

pub fn student_class_standing(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<ClassStanding> {
    let (total_points, max_points, grade_count): (f64, f64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(points_earned), 0), COALESCE(SUM(max_points), 0), COUNT(*)
         FROM grades
         WHERE student_id = ? AND class_id = ? AND doc_status = 'active'",
        (student_id, class_id),
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;

    let pct = percentage(total_points, max_points);
    Ok(ClassStanding {
        percentage: pct,
        letter_grade: LetterGrade::from_percentage(pct),
        total_points,
        max_points,
        grade_count,
    })
}
