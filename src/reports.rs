use crate::assignments;
use crate::attendance;
use crate::calc::{percentage, AttendanceTally};
use crate::db::json_column;
use crate::error::{Error, Result};
use crate::grades;
use crate::roster;
use crate::types::{
    now_rfc3339, Actor, AssignmentStatus, AssignmentType, ConductGrade, DocStatus, LetterGrade,
    ReportStatus, Term,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: i64 = 50;

const COLS: &str = "id, student_id, student_name, parent_id, class_id, class_name, grade_id, \
                    grade_name, term, academic_year, overall_percentage, letter_grade, \
                    total_points, max_points, breakdown, attendance, teacher_comments, \
                    conduct_grade, status, published_at, generated_by, generated_by_name, \
                    doc_status, created_at, updated_at";

/// Accumulated points for one assignment type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeBucket {
    pub points: f64,
    pub max_points: f64,
    pub percentage: f64,
    pub count: i64,
}

/// Per-type subtotals behind a report card's overall number. Every bucket is
/// always present; a type with no graded work sits at all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBreakdown {
    pub homework: TypeBucket,
    pub quiz: TypeBucket,
    pub test: TypeBucket,
    pub project: TypeBucket,
    pub classwork: TypeBucket,
    pub participation: TypeBucket,
}

impl GradeBreakdown {
    fn bucket_mut(&mut self, kind: AssignmentType) -> &mut TypeBucket {
        match kind {
            AssignmentType::Homework => &mut self.homework,
            AssignmentType::Quiz => &mut self.quiz,
            AssignmentType::Test => &mut self.test,
            AssignmentType::Project => &mut self.project,
            AssignmentType::Classwork => &mut self.classwork,
            AssignmentType::Participation => &mut self.participation,
        }
    }

    fn refresh_percentages(&mut self) {
        for kind in AssignmentType::ALL {
            let bucket = self.bucket_mut(kind);
            bucket.percentage = percentage(bucket.points, bucket.max_points);
        }
    }
}

/// Attendance roll-up embedded in a report card, a frozen copy of the live
/// tally at generation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAttendance {
    pub total_days: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub attendance_rate: i64,
}

impl From<AttendanceTally> for ReportAttendance {
    fn from(tally: AttendanceTally) -> Self {
        Self {
            total_days: tally.total(),
            present: tally.present,
            absent: tally.absent,
            late: tally.late,
            excused: tally.excused,
            attendance_rate: tally.rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub parent_id: Option<String>,
    pub class_id: String,
    pub class_name: String,
    pub grade_id: Option<String>,
    pub grade_name: Option<String>,
    pub term: Term,
    pub academic_year: String,
    pub overall_percentage: f64,
    pub letter_grade: LetterGrade,
    pub total_points: f64,
    pub max_points: f64,
    pub grade_breakdown: GradeBreakdown,
    pub attendance: ReportAttendance,
    pub teacher_comments: Option<String>,
    pub conduct_grade: Option<ConductGrade>,
    pub status: ReportStatus,
    pub published_at: Option<String>,
    pub generated_by: String,
    pub generated_by_name: String,
    pub doc_status: DocStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReportCard {
    pub student_id: String,
    pub class_id: String,
    pub term: Term,
    pub academic_year: String,
    pub teacher_comments: Option<String>,
    pub conduct_grade: Option<ConductGrade>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardPatch {
    pub teacher_comments: Option<String>,
    pub conduct_grade: Option<ConductGrade>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardFilters {
    pub class_id: Option<String>,
    pub student_id: Option<String>,
    pub term: Option<Term>,
    pub academic_year: Option<String>,
    pub status: Option<ReportStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCardPage {
    pub report_cards: Vec<ReportCard>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationFailure {
    pub student_id: String,
    pub error: String,
}

/// What a class-wide generation run produced. A student failing does not
/// abort the rest of the class; they land in `failures` instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkGenerateOutcome {
    pub generated: Vec<ReportCard>,
    pub failures: Vec<GenerationFailure>,
}

fn row_to_report(r: &Row) -> rusqlite::Result<ReportCard> {
    let breakdown_raw: String = r.get(14)?;
    let attendance_raw: String = r.get(15)?;
    Ok(ReportCard {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: r.get(2)?,
        parent_id: r.get(3)?,
        class_id: r.get(4)?,
        class_name: r.get(5)?,
        grade_id: r.get(6)?,
        grade_name: r.get(7)?,
        term: r.get(8)?,
        academic_year: r.get(9)?,
        overall_percentage: r.get(10)?,
        letter_grade: r.get(11)?,
        total_points: r.get(12)?,
        max_points: r.get(13)?,
        grade_breakdown: json_column(breakdown_raw, 14)?,
        attendance: json_column(attendance_raw, 15)?,
        teacher_comments: r.get(16)?,
        conduct_grade: r.get(17)?,
        status: r.get(18)?,
        published_at: r.get(19)?,
        generated_by: r.get(20)?,
        generated_by_name: r.get(21)?,
        doc_status: r.get(22)?,
        created_at: r.get(23)?,
        updated_at: r.get(24)?,
    })
}

/// Sums a student's graded work in a class into per-type buckets. Only
/// published and closed assignments count; an assignment the student was
/// never graded on contributes nothing rather than a zero.
fn compute_breakdown(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
) -> Result<(GradeBreakdown, f64, f64, f64)> {
    let assignments = assignments::assignments_for_class(conn, class_id, None)?;
    let mut by_assignment: HashMap<String, grades::StudentGrade> =
        grades::grades_for_student_in_class(conn, student_id, class_id)?
            .into_iter()
            .map(|g| (g.assignment_id.clone(), g))
            .collect();

    let mut breakdown = GradeBreakdown::default();
    let mut total_points = 0.0;
    let mut max_points = 0.0;
    for assignment in assignments {
        if !matches!(
            assignment.status,
            AssignmentStatus::Published | AssignmentStatus::Closed
        ) {
            continue;
        }
        if let Some(grade) = by_assignment.remove(&assignment.id) {
            let bucket = breakdown.bucket_mut(assignment.kind);
            bucket.points += grade.points_earned;
            bucket.max_points += grade.max_points;
            bucket.count += 1;
            total_points += grade.points_earned;
            max_points += grade.max_points;
        }
    }
    breakdown.refresh_percentages();

    let overall = percentage(total_points, max_points);
    Ok((breakdown, overall, total_points, max_points))
}

/// Generates (or regenerates) the card for one (student, class, term, year).
/// There is only ever one live card per key: a second call recomputes the
/// academic and attendance numbers on the existing card, drops it back to
/// draft if it had been published, and re-stamps the generating teacher.
/// Comments and conduct are overwritten only when the caller provides them.
pub fn generate_report_card(
    conn: &Connection,
    input: &NewReportCard,
    actor: &Actor,
) -> Result<ReportCard> {
    let academic_year = input.academic_year.trim();
    if academic_year.is_empty() {
        return Err(Error::validation("academicYear must not be empty"));
    }

    let class = roster::require_class(conn, &input.class_id)?;
    let student = roster::require_student(conn, &input.student_id)?;

    let tx = conn.unchecked_transaction()?;
    let (breakdown, overall, total_points, max_points) =
        compute_breakdown(&tx, &input.student_id, &input.class_id)?;
    let report_attendance = ReportAttendance::from(attendance::student_class_tally(
        &tx,
        &input.class_id,
        &input.student_id,
    )?);
    let letter = LetterGrade::from_percentage(overall);
    let now = now_rfc3339();

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM report_cards
             WHERE student_id = ? AND class_id = ? AND term = ? AND academic_year = ?
               AND doc_status = 'active'",
            (&input.student_id, &input.class_id, input.term, academic_year),
            |r| r.get(0),
        )
        .optional()?;

    let report_id = match existing {
        Some(id) => {
            let mut fields: Vec<&str> = vec![
                "overall_percentage = ?",
                "letter_grade = ?",
                "total_points = ?",
                "max_points = ?",
                "breakdown = ?",
                "attendance = ?",
                "status = 'draft'",
                "published_at = NULL",
                "generated_by = ?",
                "generated_by_name = ?",
                "updated_at = ?",
            ];
            let mut values: Vec<Value> = vec![
                Value::Real(overall),
                Value::Text(letter.as_str().to_string()),
                Value::Real(total_points),
                Value::Real(max_points),
                Value::Text(serde_json::to_string(&breakdown)?),
                Value::Text(serde_json::to_string(&report_attendance)?),
                Value::Text(actor.uid.clone()),
                Value::Text(actor.display_name.clone()),
                Value::Text(now.clone()),
            ];
            if let Some(comments) = &input.teacher_comments {
                fields.push("teacher_comments = ?");
                values.push(Value::Text(comments.clone()));
            }
            if let Some(conduct) = input.conduct_grade {
                fields.push("conduct_grade = ?");
                values.push(Value::Text(conduct.as_str().to_string()));
            }
            let sql = format!("UPDATE report_cards SET {} WHERE id = ?", fields.join(", "));
            values.push(Value::Text(id.clone()));
            tx.execute(&sql, params_from_iter(values))?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO report_cards(
                    id, student_id, student_name, parent_id, class_id, class_name, grade_id,
                    grade_name, term, academic_year, overall_percentage, letter_grade,
                    total_points, max_points, breakdown, attendance, teacher_comments,
                    conduct_grade, status, published_at, generated_by, generated_by_name,
                    doc_status, created_at, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    student.id,
                    student.display_name(),
                    student.parent_id,
                    class.id,
                    class.name,
                    class.grade_id,
                    class.grade_name,
                    input.term,
                    academic_year,
                    overall,
                    letter,
                    total_points,
                    max_points,
                    serde_json::to_string(&breakdown)?,
                    serde_json::to_string(&report_attendance)?,
                    input.teacher_comments,
                    input.conduct_grade,
                    ReportStatus::Draft,
                    Option::<String>::None,
                    actor.uid,
                    actor.display_name,
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
        report_card_id = %report_id,
        student_id = %input.student_id,
        class_id = %input.class_id,
        term = input.term.as_str(),
        "report card generated"
    );
    require_report_card(conn, &report_id)
}

pub fn report_card_by_id(conn: &Connection, id: &str) -> Result<Option<ReportCard>> {
    let sql = format!("SELECT {} FROM report_cards WHERE id = ? AND doc_status = 'active'", COLS);
    let row = conn.query_row(&sql, [id], row_to_report).optional()?;
    Ok(row)
}

fn require_report_card(conn: &Connection, id: &str) -> Result<ReportCard> {
    report_card_by_id(conn, id)?.ok_or_else(|| Error::not_found("report card", id))
}

pub fn report_cards_for_class(
    conn: &Connection,
    class_id: &str,
    term: Option<Term>,
    academic_year: Option<&str>,
) -> Result<Vec<ReportCard>> {
    let mut sql = format!(
        "SELECT {} FROM report_cards WHERE class_id = ? AND doc_status = 'active'",
        COLS
    );
    let mut binds: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(term) = term {
        sql.push_str(" AND term = ?");
        binds.push(Value::Text(term.as_str().to_string()));
    }
    if let Some(year) = academic_year {
        sql.push_str(" AND academic_year = ?");
        binds.push(Value::Text(year.to_string()));
    }
    sql.push_str(" ORDER BY student_name, id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), row_to_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn report_cards_for_student(conn: &Connection, student_id: &str) -> Result<Vec<ReportCard>> {
    let sql = format!(
        "SELECT {} FROM report_cards WHERE student_id = ? AND doc_status = 'active'
         ORDER BY academic_year DESC, term, id",
        COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], row_to_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The family-facing view: published cards only, drafts stay invisible.
pub fn published_report_cards_for_student(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<ReportCard>> {
    let sql = format!(
        "SELECT {} FROM report_cards
         WHERE student_id = ? AND status = 'published' AND doc_status = 'active'
         ORDER BY published_at DESC, id",
        COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], row_to_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_report_cards(conn: &Connection, filters: &ReportCardFilters) -> Result<ReportCardPage> {
    let mut where_sql = String::from("doc_status = 'active'");
    let mut binds: Vec<Value> = Vec::new();
    if let Some(class_id) = &filters.class_id {
        where_sql.push_str(" AND class_id = ?");
        binds.push(Value::Text(class_id.clone()));
    }
    if let Some(student_id) = &filters.student_id {
        where_sql.push_str(" AND student_id = ?");
        binds.push(Value::Text(student_id.clone()));
    }
    if let Some(term) = filters.term {
        where_sql.push_str(" AND term = ?");
        binds.push(Value::Text(term.as_str().to_string()));
    }
    if let Some(year) = &filters.academic_year {
        where_sql.push_str(" AND academic_year = ?");
        binds.push(Value::Text(year.clone()));
    }
    if let Some(status) = filters.status {
        where_sql.push_str(" AND status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }

    let count_sql = format!("SELECT COUNT(*) FROM report_cards WHERE {}", where_sql);
    let total: i64 =
        conn.query_row(&count_sql, params_from_iter(binds.clone()), |r| r.get(0))?;

    let limit = filters.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(0);
    let offset = filters.offset.unwrap_or(0).max(0);
    let sql = format!(
        "SELECT {} FROM report_cards WHERE {} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        COLS, where_sql
    );
    binds.push(Value::Integer(limit));
    binds.push(Value::Integer(offset));

    let mut stmt = conn.prepare(&sql)?;
    let report_cards = stmt
        .query_map(params_from_iter(binds), row_to_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ReportCardPage {
        report_cards,
        total,
    })
}

/// Teacher narrative fields only. Academic numbers never change through this
/// path; regenerate the card instead.
pub fn update_report_card(
    conn: &Connection,
    id: &str,
    patch: &ReportCardPatch,
    actor: &Actor,
) -> Result<ReportCard> {
    require_report_card(conn, id)?;

    let mut fields: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(comments) = &patch.teacher_comments {
        fields.push("teacher_comments = ?");
        values.push(Value::Text(comments.clone()));
    }
    if let Some(conduct) = patch.conduct_grade {
        fields.push("conduct_grade = ?");
        values.push(Value::Text(conduct.as_str().to_string()));
    }

    if !fields.is_empty() {
        fields.push("updated_at = ?");
        values.push(Value::Text(now_rfc3339()));
        let sql = format!(
            "UPDATE report_cards SET {} WHERE id = ? AND doc_status = 'active'",
            fields.join(", ")
        );
        values.push(Value::Text(id.to_string()));
        conn.execute(&sql, params_from_iter(values))?;
        info!(report_card_id = %id, editor = %actor.uid, "report card annotated");
    }

    require_report_card(conn, id)
}

/// Draft -> published, stamping the publication time. Families only see the
/// card from here on. Publishing twice is an error; regeneration is the way
/// back to draft.
pub fn publish_report_card(conn: &Connection, id: &str, actor: &Actor) -> Result<ReportCard> {
    let report = require_report_card(conn, id)?;
    if report.status == ReportStatus::Published {
        return Err(Error::invalid_state(format!(
            "report card {} is already published",
            id
        )));
    }

    let now = now_rfc3339();
    conn.execute(
        "UPDATE report_cards SET status = 'published', published_at = ?, updated_at = ?
         WHERE id = ? AND doc_status = 'active'",
        params![now, now, id],
    )?;
    info!(report_card_id = %id, editor = %actor.uid, "report card published");
    require_report_card(conn, id)
}

/// Generates cards for a whole class in one sweep, either for an explicit
/// subset of students or for everyone active on the roster.
pub fn bulk_generate_report_cards(
    conn: &Connection,
    class_id: &str,
    term: Term,
    academic_year: &str,
    student_ids: Option<&[String]>,
    actor: &Actor,
) -> Result<BulkGenerateOutcome> {
    roster::require_class(conn, class_id)?;
    let targets: Vec<String> = match student_ids {
        Some(ids) if !ids.is_empty() => ids.to_vec(),
        _ => roster::students_in_class(conn, class_id)?
            .into_iter()
            .map(|s| s.id)
            .collect(),
    };

    let mut generated = Vec::with_capacity(targets.len());
    let mut failures = Vec::new();
    for student_id in targets {
        let input = NewReportCard {
            student_id: student_id.clone(),
            class_id: class_id.to_string(),
            term,
            academic_year: academic_year.to_string(),
            teacher_comments: None,
            conduct_grade: None,
        };
        match generate_report_card(conn, &input, actor) {
            Ok(card) => generated.push(card),
            Err(err) => {
                warn!(
                    student_id = %student_id,
                    class_id = %class_id,
                    error = %err,
                    "report card generation failed"
                );
                failures.push(GenerationFailure {
                    student_id,
                    error: err.to_string(),
                });
            }
        }
    }

    info!(
        class_id = %class_id,
        term = term.as_str(),
        generated = generated.len(),
        failed = failures.len(),
        "bulk report card run finished"
    );
    Ok(BulkGenerateOutcome {
        generated,
        failures,
    })
}

/// Soft delete; the (student, class, term, year) key opens up for a fresh
/// generation afterwards.
pub fn delete_report_card(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE report_cards SET doc_status = 'deleted', updated_at = ?
         WHERE id = ? AND doc_status = 'active'",
        params![now_rfc3339(), id],
    )?;
    if changed == 0 {
        return Err(Error::not_found("report card", id));
    }
    info!(report_card_id = %id, "report card deleted");
    Ok(())
}

/// Whether `parent_uid` is the parent on file for the card's student.
pub fn verify_parent_access(
    conn: &Connection,
    report_card_id: &str,
    parent_uid: &str,
) -> Result<bool> {
    match report_card_by_id(conn, report_card_id)? {
        Some(report) => Ok(report.parent_id.as_deref() == Some(parent_uid)),
        None => Ok(false),
    }
}
