use crate::assignments;
use crate::calc::{percentage, round_to_tenth};
use crate::error::Result;
use crate::grades::{self, StudentGrade};
use crate::roster;
use crate::types::{AssignmentStatus, AssignmentType, LetterGrade};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Column header in the grid, one per published assignment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookColumn {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: AssignmentType,
    pub max_points: f64,
    pub due_date: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookRow {
    pub student_id: String,
    pub student_name: String,
    /// Keyed by assignment id. `None` marks a published assignment the
    /// student has not been graded on yet; those cells count toward neither
    /// total.
    pub grades: BTreeMap<String, Option<StudentGrade>>,
    pub average_percentage: f64,
    pub letter_grade: LetterGrade,
    pub total_points: f64,
    pub max_points: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookView {
    pub class_id: String,
    pub class_name: String,
    pub assignments: Vec<GradebookColumn>,
    pub students: Vec<GradebookRow>,
    pub class_average: f64,
}

/// Assembles the live grading grid for a class: published assignments as
/// columns, active roster as rows. Draft and closed assignments stay out of
/// the grid, and the class average is taken over students who have at least
/// one graded cell.
pub fn build_gradebook(conn: &Connection, class_id: &str) -> Result<GradebookView> {
    let class = roster::require_class(conn, class_id)?;
    let assignments =
        assignments::assignments_for_class(conn, class_id, Some(AssignmentStatus::Published))?;
    let students = roster::students_in_class(conn, class_id)?;

    let mut by_student: HashMap<String, HashMap<String, StudentGrade>> = HashMap::new();
    for grade in grades::grades_for_class(conn, class_id)? {
        by_student
            .entry(grade.student_id.clone())
            .or_default()
            .insert(grade.assignment_id.clone(), grade);
    }

    let mut rows: Vec<GradebookRow> = Vec::with_capacity(students.len());
    let mut class_total = 0.0;
    let mut class_count = 0usize;

    for student in students {
        let mut student_grades = by_student.remove(&student.id).unwrap_or_default();
        let mut cells: BTreeMap<String, Option<StudentGrade>> = BTreeMap::new();
        let mut total_points = 0.0;
        let mut max_points = 0.0;

        for assignment in &assignments {
            let cell = student_grades.remove(&assignment.id);
            if let Some(grade) = &cell {
                total_points += grade.points_earned;
                max_points += grade.max_points;
            }
            cells.insert(assignment.id.clone(), cell);
        }

        let average_percentage = percentage(total_points, max_points);
        if max_points > 0.0 {
            class_total += average_percentage;
            class_count += 1;
        }

        rows.push(GradebookRow {
            student_id: student.id.clone(),
            student_name: student.display_name(),
            grades: cells,
            average_percentage,
            letter_grade: LetterGrade::from_percentage(average_percentage),
            total_points,
            max_points,
        });
    }

    rows.sort_by(|a, b| {
        a.student_name
            .cmp(&b.student_name)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });

    let class_average = if class_count > 0 {
        round_to_tenth(class_total / class_count as f64)
    } else {
        0.0
    };

    Ok(GradebookView {
        class_id: class.id,
        class_name: class.name,
        assignments: assignments
            .into_iter()
            .map(|a| GradebookColumn {
                id: a.id,
                title: a.title,
                kind: a.kind,
                max_points: a.max_points,
                due_date: a.due_date,
            })
            .collect(),
        students: rows,
        class_average,
    })
}
