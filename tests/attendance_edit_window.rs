use chrono::{Duration, Utc};
use recordbook::attendance::{self, AttendanceChange, AttendanceEntry};
use recordbook::db::open_db;
use recordbook::{Actor, AttendanceStatus, Error, Settings};
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seeded_workspace(prefix: &str) -> Connection {
    let conn = open_db(&temp_dir(prefix)).expect("open workspace db");
    conn.execute("INSERT INTO classes(id, name) VALUES('c-1', 'Math 5A')", [])
        .expect("seed class");
    conn.execute(
        "INSERT INTO students(id, class_id, first_name, last_name) VALUES('s-1', 'c-1', 'Ada', 'Boame')",
        [],
    )
    .expect("seed student");
    conn
}

fn days_ago(days: i64) -> String {
    (Utc::now().date_naive() - Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

fn record_one(conn: &Connection, date: &str, actor: &Actor) -> String {
    let records = attendance::record_bulk_attendance(
        conn,
        "c-1",
        date,
        &[AttendanceEntry {
            student_id: "s-1".to_string(),
            status: AttendanceStatus::Present,
            arrival_time: None,
            notes: None,
        }],
        actor,
    )
    .expect("record attendance");
    records[0].id.clone()
}

#[test]
fn edits_inside_the_window_land_with_history() {
    let conn = seeded_workspace("recordbook-attendance-edit");
    let actor = Actor::new("t-1", "Pat Rivera");
    let settings = Settings::default();
    let id = record_one(&conn, &days_ago(3), &actor);

    let edited = attendance::edit_attendance(
        &conn,
        &id,
        &AttendanceChange {
            status: Some(AttendanceStatus::Late),
            arrival_time: Some("08:25".to_string()),
            notes: None,
            edit_reason: Some("bus delay confirmed".to_string()),
        },
        &actor,
        &settings,
    )
    .expect("edit");
    assert_eq!(edited.status, AttendanceStatus::Late);
    assert_eq!(edited.arrival_time.as_deref(), Some("08:25"));
    assert_eq!(edited.edit_history.len(), 1);
    let entry = edited.edit_history.last().expect("history entry");
    assert_eq!(entry.previous_status, AttendanceStatus::Present);
    assert_eq!(entry.new_status, AttendanceStatus::Late);
    assert_eq!(entry.reason.as_deref(), Some("bus delay confirmed"));

    // Same status again: notes update, history stays put.
    let annotated = attendance::edit_attendance(
        &conn,
        &id,
        &AttendanceChange {
            status: Some(AttendanceStatus::Late),
            arrival_time: None,
            notes: Some("arrived during first period".to_string()),
            edit_reason: None,
        },
        &actor,
        &settings,
    )
    .expect("annotate");
    assert_eq!(annotated.edit_history.len(), 1);
    assert_eq!(
        annotated.notes.as_deref(),
        Some("arrived during first period")
    );
}

#[test]
fn the_last_day_of_the_window_is_still_editable() {
    let conn = seeded_workspace("recordbook-attendance-window-edge");
    let actor = Actor::new("t-1", "Pat Rivera");
    let settings = Settings::default();
    let id = record_one(&conn, &days_ago(settings.attendance_edit_window_days), &actor);

    let edited = attendance::edit_attendance(
        &conn,
        &id,
        &AttendanceChange {
            status: Some(AttendanceStatus::Excused),
            ..Default::default()
        },
        &actor,
        &settings,
    )
    .expect("edit on the boundary day");
    assert_eq!(edited.status, AttendanceStatus::Excused);
}

#[test]
fn stale_records_reject_edits_without_touching_state() {
    let conn = seeded_workspace("recordbook-attendance-window-stale");
    let actor = Actor::new("t-1", "Pat Rivera");
    let settings = Settings::default();
    let id = record_one(
        &conn,
        &days_ago(settings.attendance_edit_window_days + 1),
        &actor,
    );

    let err = attendance::edit_attendance(
        &conn,
        &id,
        &AttendanceChange {
            status: Some(AttendanceStatus::Absent),
            notes: Some("should not stick".to_string()),
            ..Default::default()
        },
        &actor,
        &settings,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "got {:?}", err);

    let unchanged = attendance::attendance_by_id(&conn, &id)
        .expect("lookup")
        .expect("record exists");
    assert_eq!(unchanged.status, AttendanceStatus::Present);
    assert!(unchanged.notes.is_none());
    assert!(unchanged.edit_history.is_empty());
}

#[test]
fn a_longer_configured_window_keeps_old_records_editable() {
    let conn = seeded_workspace("recordbook-attendance-window-config");
    let actor = Actor::new("t-1", "Pat Rivera");
    let settings = Settings {
        attendance_edit_window_days: 30,
        ..Default::default()
    };
    let id = record_one(&conn, &days_ago(20), &actor);

    let edited = attendance::edit_attendance(
        &conn,
        &id,
        &AttendanceChange {
            status: Some(AttendanceStatus::Excused),
            ..Default::default()
        },
        &actor,
        &settings,
    )
    .expect("edit within widened window");
    assert_eq!(edited.status, AttendanceStatus::Excused);
}

#[test]
fn editing_a_ghost_record_is_not_found() {
    let conn = seeded_workspace("recordbook-attendance-edit-ghost");
    let actor = Actor::new("t-1", "Pat Rivera");
    assert!(matches!(
        attendance::edit_attendance(
            &conn,
            "att-ghost",
            &AttendanceChange::default(),
            &actor,
            &Settings::default()
        ),
        Err(Error::NotFound { .. })
    ));
}
