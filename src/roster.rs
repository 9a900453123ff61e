use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Class facts as the engine is allowed to see them. The roster tables are
/// written by the enrollment side of the system; everything here is read-only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
    pub grade_id: Option<String>,
    pub grade_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub parent_id: Option<String>,
}

impl StudentInfo {
    /// The "First Last" form denormalized into grade, attendance and report
    /// rows at write time.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

pub fn class_by_id(conn: &Connection, class_id: &str) -> Result<Option<ClassInfo>> {
    let row = conn
        .query_row(
            "SELECT id, name, grade_id, grade_name FROM classes WHERE id = ?",
            [class_id],
            |r| {
                Ok(ClassInfo {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    grade_id: r.get(2)?,
                    grade_name: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn student_by_id(conn: &Connection, student_id: &str) -> Result<Option<StudentInfo>> {
    let row = conn
        .query_row(
            "SELECT id, first_name, last_name, parent_id FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(StudentInfo {
                    id: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                    parent_id: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Active roster for a class in surname order. Inactive (withdrawn) students
/// stay visible through `student_by_id` but drop out of class-wide sweeps.
pub fn students_in_class(conn: &Connection, class_id: &str) -> Result<Vec<StudentInfo>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, parent_id
         FROM students
         WHERE class_id = ? AND status = 'active'
         ORDER BY last_name, first_name",
    )?;
    let students = stmt
        .query_map([class_id], |r| {
            Ok(StudentInfo {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                parent_id: r.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(students)
}

pub(crate) fn require_class(conn: &Connection, class_id: &str) -> Result<ClassInfo> {
    class_by_id(conn, class_id)?.ok_or_else(|| Error::not_found("class", class_id))
}

pub(crate) fn require_student(conn: &Connection, student_id: &str) -> Result<StudentInfo> {
    student_by_id(conn, student_id)?.ok_or_else(|| Error::not_found("student", student_id))
}
