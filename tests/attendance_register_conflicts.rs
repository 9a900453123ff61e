use recordbook::attendance::{self, AttendanceEntry};
use recordbook::db::open_db;
use recordbook::{Actor, AttendanceStatus, Error};
use rusqlite::{params, Connection};
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
    for (id, first, last) in [
        ("s-1", "Ada", "Boame"),
        ("s-2", "Ben", "Cho"),
        ("s-3", "Cal", "Diaz"),
    ] {
        conn.execute(
            "INSERT INTO students(id, class_id, first_name, last_name) VALUES(?, 'c-1', ?, ?)",
            params![id, first, last],
        )
        .expect("seed student");
    }
    conn
}

fn present(student_id: &str) -> AttendanceEntry {
    AttendanceEntry {
        student_id: student_id.to_string(),
        status: AttendanceStatus::Present,
        arrival_time: None,
        notes: None,
    }
}

#[test]
fn taking_the_register_twice_rolls_the_second_batch_back_whole() {
    let conn = seeded_workspace("recordbook-register-conflict");
    let actor = Actor::new("t-1", "Pat Rivera");

    let first = attendance::record_bulk_attendance(
        &conn,
        "c-1",
        "2025-03-03",
        &[present("s-1"), present("s-2")],
        &actor,
    )
    .expect("first register");
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].student_name, "Ada Boame");
    assert_eq!(first[0].recorded_by, "t-1");

    // s-2 already has a live record for the date, so the batch with the new
    // s-3 entry must fail as a unit.
    let err = attendance::record_bulk_attendance(
        &conn,
        "c-1",
        "2025-03-03",
        &[present("s-3"), present("s-2")],
        &actor,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "got {:?}", err);

    let on_date = attendance::attendance_for_class_date(&conn, "c-1", "2025-03-03")
        .expect("records for date");
    assert_eq!(on_date.len(), 2, "conflicting batch left nothing behind");
    assert!(
        on_date.iter().all(|r| r.student_id != "s-3"),
        "s-3 entry from the failed batch must not persist"
    );
}

#[test]
fn duplicate_student_within_one_batch_is_caught() {
    let conn = seeded_workspace("recordbook-register-inbatch-dup");
    let actor = Actor::new("t-1", "Pat Rivera");

    let err = attendance::record_bulk_attendance(
        &conn,
        "c-1",
        "2025-03-03",
        &[present("s-1"), present("s-1")],
        &actor,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    let on_date = attendance::attendance_for_class_date(&conn, "c-1", "2025-03-03")
        .expect("records for date");
    assert!(on_date.is_empty());
}

#[test]
fn unknown_class_or_student_fails_before_anything_lands() {
    let conn = seeded_workspace("recordbook-register-unknown");
    let actor = Actor::new("t-1", "Pat Rivera");

    assert!(matches!(
        attendance::record_bulk_attendance(&conn, "c-ghost", "2025-03-03", &[present("s-1")], &actor),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        attendance::record_bulk_attendance(
            &conn,
            "c-1",
            "2025-03-03",
            &[present("s-1"), present("s-ghost")],
            &actor
        ),
        Err(Error::NotFound { .. })
    ));
    assert!(attendance::attendance_for_class_date(&conn, "c-1", "2025-03-03")
        .expect("records for date")
        .is_empty());

    assert!(matches!(
        attendance::record_bulk_attendance(&conn, "c-1", "March 3rd", &[present("s-1")], &actor),
        Err(Error::Validation(_))
    ));
}

#[test]
fn retiring_a_register_reopens_the_date() {
    let conn = seeded_workspace("recordbook-register-retake");
    let actor = Actor::new("t-1", "Pat Rivera");

    attendance::record_bulk_attendance(
        &conn,
        "c-1",
        "2025-03-03",
        &[present("s-1"), present("s-2")],
        &actor,
    )
    .expect("first register");

    let retired = attendance::delete_attendance_for_date(&conn, "c-1", "2025-03-03")
        .expect("retire register");
    assert_eq!(retired, 2);
    assert!(attendance::attendance_for_class_date(&conn, "c-1", "2025-03-03")
        .expect("records for date")
        .is_empty());

    // Nothing there the second time around.
    assert_eq!(
        attendance::delete_attendance_for_date(&conn, "c-1", "2025-03-03").expect("no-op"),
        0
    );

    let retaken = attendance::record_bulk_attendance(
        &conn,
        "c-1",
        "2025-03-03",
        &[present("s-1"), present("s-2"), present("s-3")],
        &actor,
    )
    .expect("retake register");
    assert_eq!(retaken.len(), 3);
}
