use crate::calc::AttendanceTally;
use crate::db::json_column;
use crate::error::{Error, Result};
use crate::history::EditLog;
use crate::roster;
use crate::types::{
    canon_iso_date, now_rfc3339, parse_iso_date, Actor, AttendanceStatus, DocStatus, Settings,
};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: i64 = 50;
const DEFAULT_HISTORY_DAYS: usize = 30;
const DEFAULT_ABSENTEE_THRESHOLD: i64 = 80;

const COLS: &str = "id, class_id, class_name, date, student_id, student_name, status, \
                    arrival_time, notes, recorded_by, recorded_by_name, recorded_at, \
                    edit_history, doc_status, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEdit {
    pub previous_status: AttendanceStatus,
    pub new_status: AttendanceStatus,
    pub edited_by: String,
    pub edited_by_name: String,
    pub edited_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    pub date: String,
    pub student_id: String,
    pub student_name: String,
    pub status: AttendanceStatus,
    pub arrival_time: Option<String>,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub recorded_by_name: String,
    pub recorded_at: String,
    pub edit_history: EditLog<AttendanceEdit>,
    pub doc_status: DocStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// One student's entry when a register is taken.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub arrival_time: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceChange {
    pub status: Option<AttendanceStatus>,
    pub arrival_time: Option<String>,
    pub notes: Option<String>,
    pub edit_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceFilters {
    pub class_id: Option<String>,
    pub student_id: Option<String>,
    pub date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<AttendanceStatus>,
    pub recorded_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePage {
    pub records: Vec<AttendanceRecord>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Per-status counts for one class on one date.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDaySummary {
    pub date: String,
    pub class_id: String,
    pub class_name: String,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub total: i64,
    pub attendance_rate: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceByDate {
    pub date: String,
    pub summary: ClassDaySummary,
    pub records: Vec<AttendanceRecord>,
}

/// A student's standing across every class they appear in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceSummary {
    pub student_id: String,
    pub student_name: String,
    pub total_sessions: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub attendance_rate: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenteeFilters {
    pub start_date: String,
    pub end_date: String,
    pub class_id: Option<String>,
    /// Students strictly below this rate are flagged. Defaults to 80.
    pub threshold: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChronicAbsentee {
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub class_name: String,
    pub total_sessions: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
    pub attendance_rate: i64,
    pub last_attended_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenteePage {
    pub absentees: Vec<ChronicAbsentee>,
    pub total: i64,
}

fn row_to_record(r: &Row) -> rusqlite::Result<AttendanceRecord> {
    let history_raw: String = r.get(12)?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        class_id: r.get(1)?,
        class_name: r.get(2)?,
        date: r.get(3)?,
        student_id: r.get(4)?,
        student_name: r.get(5)?,
        status: r.get(6)?,
        arrival_time: r.get(7)?,
        notes: r.get(8)?,
        recorded_by: r.get(9)?,
        recorded_by_name: r.get(10)?,
        recorded_at: r.get(11)?,
        edit_history: json_column(history_raw, 12)?,
        doc_status: r.get(13)?,
        created_at: r.get(14)?,
        updated_at: r.get(15)?,
    })
}

/// Takes the register for a class on a date: one transaction, all entries or
/// none. A student who already has a live record for that date makes the
/// whole batch fail; corrections go through `edit_attendance` so the paper
/// trail survives, and a full re-take goes through `delete_attendance_for_date`.
pub fn record_bulk_attendance(
    conn: &Connection,
    class_id: &str,
    date: &str,
    entries: &[AttendanceEntry],
    actor: &Actor,
) -> Result<Vec<AttendanceRecord>> {
    let date = canon_iso_date(date, "date")?;
    let class = roster::require_class(conn, class_id)?;
    let now = now_rfc3339();

    let tx = conn.unchecked_transaction()?;
    let mut created = Vec::with_capacity(entries.len());
    {
        let mut exists_stmt = tx.prepare(
            "SELECT 1 FROM attendance
             WHERE class_id = ? AND student_id = ? AND date = ? AND doc_status = 'active'",
        )?;
        let mut insert_stmt = tx.prepare(
            "INSERT INTO attendance(
                id, class_id, class_name, date, student_id, student_name, status, arrival_time,
                notes, recorded_by, recorded_by_name, recorded_at, edit_history, doc_status,
                created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        for entry in entries {
            let student = roster::require_student(&tx, &entry.student_id)?;
            let taken = exists_stmt
                .query_row((class_id, &entry.student_id, &date), |r| r.get::<_, i64>(0))
                .optional()?
                .is_some();
            if taken {
                return Err(Error::invalid_state(format!(
                    "attendance already recorded for student {} in class {} on {}",
                    entry.student_id, class_id, date
                )));
            }

            let id = Uuid::new_v4().to_string();
            let student_name = student.display_name();
            insert_stmt.execute(params![
                id,
                class.id,
                class.name,
                date,
                student.id,
                student_name,
                entry.status,
                entry.arrival_time,
                entry.notes,
                actor.uid,
                actor.display_name,
                now,
                "[]",
                DocStatus::Active,
                now,
                now
            ])?;

            created.push(AttendanceRecord {
                id,
                class_id: class.id.clone(),
                class_name: class.name.clone(),
                date: date.clone(),
                student_id: student.id,
                student_name,
                status: entry.status,
                arrival_time: entry.arrival_time.clone(),
                notes: entry.notes.clone(),
                recorded_by: actor.uid.clone(),
                recorded_by_name: actor.display_name.clone(),
                recorded_at: now.clone(),
                edit_history: EditLog::new(),
                doc_status: DocStatus::Active,
                created_at: now.clone(),
                updated_at: now.clone(),
            });
        }
    }
    tx.commit()?;

    info!(
        class_id = %class_id,
        date = %date,
        count = created.len(),
        "attendance recorded"
    );
    Ok(created)
}

/// Corrects one record within the edit window. Past the window nothing
/// changes; inside it, a status change lands in the bounded edit history and
/// arrival time or notes update in place.
pub fn edit_attendance(
    conn: &Connection,
    id: &str,
    change: &AttendanceChange,
    actor: &Actor,
    settings: &Settings,
) -> Result<AttendanceRecord> {
    let tx = conn.unchecked_transaction()?;
    let sql = format!("SELECT {} FROM attendance WHERE id = ? AND doc_status = 'active'", COLS);
    let existing = tx
        .query_row(&sql, [id], row_to_record)
        .optional()?
        .ok_or_else(|| Error::not_found("attendance record", id))?;

    let record_date = parse_iso_date(&existing.date, "date")?;
    let days_old = (Utc::now().date_naive() - record_date).num_days();
    if days_old > settings.attendance_edit_window_days {
        warn!(
            attendance_id = %id,
            days_old,
            window = settings.attendance_edit_window_days,
            "attendance edit rejected"
        );
        return Err(Error::invalid_state(format!(
            "attendance from {} is outside the {}-day edit window",
            existing.date, settings.attendance_edit_window_days
        )));
    }

    let now = now_rfc3339();
    let mut fields: Vec<&str> = vec!["updated_at = ?"];
    let mut values: Vec<Value> = vec![Value::Text(now.clone())];

    if let Some(status) = change.status {
        if status != existing.status {
            let mut history = existing.edit_history.clone();
            history.record(
                AttendanceEdit {
                    previous_status: existing.status,
                    new_status: status,
                    edited_by: actor.uid.clone(),
                    edited_by_name: actor.display_name.clone(),
                    edited_at: now.clone(),
                    reason: change.edit_reason.clone(),
                },
                settings.edit_history_cap,
            );
            fields.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
            fields.push("edit_history = ?");
            values.push(Value::Text(serde_json::to_string(&history)?));
        }
    }
    if let Some(arrival_time) = &change.arrival_time {
        fields.push("arrival_time = ?");
        values.push(Value::Text(arrival_time.clone()));
    }
    if let Some(notes) = &change.notes {
        fields.push("notes = ?");
        values.push(Value::Text(notes.clone()));
    }

    let sql = format!("UPDATE attendance SET {} WHERE id = ?", fields.join(", "));
    values.push(Value::Text(id.to_string()));
    tx.execute(&sql, params_from_iter(values))?;
    tx.commit()?;

    info!(attendance_id = %id, editor = %actor.uid, "attendance edited");
    require_record(conn, id)
}

pub fn attendance_by_id(conn: &Connection, id: &str) -> Result<Option<AttendanceRecord>> {
    let sql = format!("SELECT {} FROM attendance WHERE id = ? AND doc_status = 'active'", COLS);
    let row = conn.query_row(&sql, [id], row_to_record).optional()?;
    Ok(row)
}

fn require_record(conn: &Connection, id: &str) -> Result<AttendanceRecord> {
    attendance_by_id(conn, id)?.ok_or_else(|| Error::not_found("attendance record", id))
}

pub fn attendance_for_class_date(
    conn: &Connection,
    class_id: &str,
    date: &str,
) -> Result<Vec<AttendanceRecord>> {
    let sql = format!(
        "SELECT {} FROM attendance
         WHERE class_id = ? AND date = ? AND doc_status = 'active'
         ORDER BY student_name, id",
        COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((class_id, date), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_attendance(conn: &Connection, filters: &AttendanceFilters) -> Result<AttendancePage> {
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
    if let Some(date) = &filters.date {
        where_sql.push_str(" AND date = ?");
        binds.push(Value::Text(canon_iso_date(date, "date")?));
    }
    if let Some(start) = &filters.start_date {
        where_sql.push_str(" AND date >= ?");
        binds.push(Value::Text(canon_iso_date(start, "startDate")?));
    }
    if let Some(end) = &filters.end_date {
        where_sql.push_str(" AND date <= ?");
        binds.push(Value::Text(canon_iso_date(end, "endDate")?));
    }
    if let Some(status) = filters.status {
        where_sql.push_str(" AND status = ?");
        binds.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(recorded_by) = &filters.recorded_by {
        where_sql.push_str(" AND recorded_by = ?");
        binds.push(Value::Text(recorded_by.clone()));
    }

    let count_sql = format!("SELECT COUNT(*) FROM attendance WHERE {}", where_sql);
    let total: i64 =
        conn.query_row(&count_sql, params_from_iter(binds.clone()), |r| r.get(0))?;

    let limit = filters.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(0);
    let offset = filters.offset.unwrap_or(0).max(0);
    let sql = format!(
        "SELECT {} FROM attendance WHERE {} ORDER BY date DESC, student_name, id LIMIT ? OFFSET ?",
        COLS, where_sql
    );
    binds.push(Value::Integer(limit));
    binds.push(Value::Integer(offset));

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(binds), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(AttendancePage {
        records,
        total,
        limit,
        offset,
    })
}

fn summarize_rows(
    class: &roster::ClassInfo,
    date: &str,
    records: &[AttendanceRecord],
) -> ClassDaySummary {
    let mut tally = AttendanceTally::default();
    for record in records {
        tally.observe(record.status);
    }
    ClassDaySummary {
        date: date.to_string(),
        class_id: class.id.clone(),
        class_name: class.name.clone(),
        present: tally.present,
        absent: tally.absent,
        late: tally.late,
        excused: tally.excused,
        total: tally.total(),
        attendance_rate: tally.rate(),
    }
}

/// Counts for one class/date. A date with no register yet is a valid all-zero
/// summary, not an error.
pub fn class_day_summary(conn: &Connection, class_id: &str, date: &str) -> Result<ClassDaySummary> {
    let date = canon_iso_date(date, "date")?;
    let class = roster::require_class(conn, class_id)?;
    let records = attendance_for_class_date(conn, class_id, &date)?;
    Ok(summarize_rows(&class, &date, &records))
}

/// Recent register days for a class, newest first, each with its summary and
/// rows. `limit` bounds the number of days, not rows.
pub fn attendance_history(
    conn: &Connection,
    class_id: &str,
    start_date: Option<&str>,
    end_date: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<AttendanceByDate>> {
    let class = roster::require_class(conn, class_id)?;

    let mut where_sql = String::from("class_id = ? AND doc_status = 'active'");
    let mut binds: Vec<Value> = vec![Value::Text(class_id.to_string())];
    if let Some(start) = start_date {
        where_sql.push_str(" AND date >= ?");
        binds.push(Value::Text(canon_iso_date(start, "startDate")?));
    }
    if let Some(end) = end_date {
        where_sql.push_str(" AND date <= ?");
        binds.push(Value::Text(canon_iso_date(end, "endDate")?));
    }

    let sql = format!(
        "SELECT {} FROM attendance WHERE {} ORDER BY date DESC, student_name, id",
        COLS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(binds), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Rows arrive newest date first; fold runs of equal dates into day groups.
    let max_days = limit.unwrap_or(DEFAULT_HISTORY_DAYS);
    let mut days: Vec<(String, Vec<AttendanceRecord>)> = Vec::new();
    for record in records {
        match days.last_mut() {
            Some((date, rows)) if *date == record.date => rows.push(record),
            _ => {
                if days.len() == max_days {
                    break;
                }
                days.push((record.date.clone(), vec![record]));
            }
        }
    }

    Ok(days
        .into_iter()
        .map(|(date, records)| {
            let summary = summarize_rows(&class, &date, &records);
            AttendanceByDate {
                date,
                summary,
                records,
            }
        })
        .collect())
}

/// The per-class tally a report card embeds.
pub(crate) fn student_class_tally(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<AttendanceTally> {
    let mut stmt = conn.prepare(
        "SELECT status FROM attendance
         WHERE class_id = ? AND student_id = ? AND doc_status = 'active'",
    )?;
    let statuses = stmt
        .query_map((class_id, student_id), |r| r.get::<_, AttendanceStatus>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut tally = AttendanceTally::default();
    for status in statuses {
        tally.observe(status);
    }
    Ok(tally)
}

/// A student's record across every class they are registered in.
pub fn student_attendance_summary(
    conn: &Connection,
    student_id: &str,
) -> Result<StudentAttendanceSummary> {
    let student = roster::require_student(conn, student_id)?;

    let mut stmt = conn.prepare(
        "SELECT status FROM attendance WHERE student_id = ? AND doc_status = 'active'",
    )?;
    let statuses = stmt
        .query_map([student_id], |r| r.get::<_, AttendanceStatus>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut tally = AttendanceTally::default();
    for status in statuses {
        tally.observe(status);
    }
    let student_name = student.display_name();
    Ok(StudentAttendanceSummary {
        student_id: student.id,
        student_name,
        total_sessions: tally.total(),
        present: tally.present,
        absent: tally.absent,
        late: tally.late,
        excused: tally.excused,
        attendance_rate: tally.rate(),
    })
}

/// Soft-deletes a class/date register so it can be taken again. Returns how
/// many records were retired.
pub fn delete_attendance_for_date(conn: &Connection, class_id: &str, date: &str) -> Result<i64> {
    let date = canon_iso_date(date, "date")?;
    roster::require_class(conn, class_id)?;
    let changed = conn.execute(
        "UPDATE attendance SET doc_status = 'deleted', updated_at = ?
         WHERE class_id = ? AND date = ? AND doc_status = 'active'",
        params![now_rfc3339(), class_id, date],
    )?;
    if changed > 0 {
        info!(class_id = %class_id, date = %date, count = changed, "attendance register retired");
    }
    Ok(changed as i64)
}

/// Students whose attendance over a date range falls strictly below the
/// threshold, worst rate first. Each entry carries the student's most recent
/// class in the range and the last date they were present or late.
pub fn chronic_absentees(conn: &Connection, filters: &AbsenteeFilters) -> Result<AbsenteePage> {
    let start = canon_iso_date(&filters.start_date, "startDate")?;
    let end = canon_iso_date(&filters.end_date, "endDate")?;
    let threshold = filters.threshold.unwrap_or(DEFAULT_ABSENTEE_THRESHOLD);

    let mut where_sql =
        String::from("doc_status = 'active' AND date >= ? AND date <= ?");
    let mut binds: Vec<Value> = vec![Value::Text(start), Value::Text(end)];
    if let Some(class_id) = &filters.class_id {
        where_sql.push_str(" AND class_id = ?");
        binds.push(Value::Text(class_id.clone()));
    }

    // Newest first, so the first row seen per student carries their latest
    // class and name.
    let sql = format!(
        "SELECT student_id, student_name, class_id, class_name, date, status
         FROM attendance WHERE {} ORDER BY date DESC, id",
        where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, AttendanceStatus>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stats: HashMap<String, (ChronicAbsentee, AttendanceTally)> = HashMap::new();
    for (student_id, student_name, class_id, class_name, date, status) in rows {
        let (entry, tally) = stats.entry(student_id.clone()).or_insert_with(|| {
            let seed = ChronicAbsentee {
                student_id,
                student_name,
                class_id,
                class_name,
                total_sessions: 0,
                present: 0,
                absent: 0,
                late: 0,
                excused: 0,
                attendance_rate: 0,
                last_attended_date: None,
            };
            (seed, AttendanceTally::default())
        });
        let attended = matches!(status, AttendanceStatus::Present | AttendanceStatus::Late);
        if attended && entry.last_attended_date.is_none() {
            entry.last_attended_date = Some(date);
        }
        tally.observe(status);
    }

    let mut absentees: Vec<ChronicAbsentee> = Vec::new();
    for (mut entry, tally) in stats.into_values() {
        entry.present = tally.present;
        entry.absent = tally.absent;
        entry.late = tally.late;
        entry.excused = tally.excused;
        entry.total_sessions = tally.total();
        entry.attendance_rate = tally.rate();
        if entry.attendance_rate < threshold {
            absentees.push(entry);
        }
    }
    absentees.sort_by(|a, b| {
        a.attendance_rate
            .cmp(&b.attendance_rate)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });

    let total = absentees.len() as i64;
    let offset = filters.offset.unwrap_or(0).max(0) as usize;
    let limit = filters.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(0) as usize;
    let absentees = absentees.into_iter().skip(offset).take(limit).collect();

    Ok(AbsenteePage { absentees, total })
}
