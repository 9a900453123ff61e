use recordbook::assignments::{self, NewAssignment};
use recordbook::attendance::{self, AttendanceEntry};
use recordbook::db::open_db;
use recordbook::grades::{self, GradeEntry};
use recordbook::reports::{self, NewReportCard};
use recordbook::{
    Actor, AssignmentStatus, AssignmentType, AttendanceStatus, ConductGrade, Error, LetterGrade,
    ReportStatus, Settings, Term,
};
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
    conn.execute(
        "INSERT INTO classes(id, name, grade_id, grade_name) VALUES('c-1', 'Math 5A', 'grade-5', 'Grade 5')",
        [],
    )
    .expect("seed class");
    conn.execute(
        "INSERT INTO students(id, class_id, first_name, last_name, parent_id)
         VALUES('s-1', 'c-1', 'Ada', 'Boame', 'parent-77')",
        [],
    )
    .expect("seed student");
    conn
}

fn assignment(
    conn: &Connection,
    title: &str,
    kind: AssignmentType,
    max_points: f64,
    status: AssignmentStatus,
    actor: &Actor,
) -> String {
    assignments::create_assignment(
        conn,
        &NewAssignment {
            class_id: "c-1".to_string(),
            title: title.to_string(),
            description: None,
            kind,
            max_points,
            assigned_date: "2025-03-01".to_string(),
            due_date: "2025-03-07".to_string(),
            status: Some(status),
        },
        actor,
    )
    .expect("create assignment")
    .id
}

fn grade(conn: &Connection, assignment_id: &str, points: f64, actor: &Actor) {
    grades::upsert_grade(
        conn,
        assignment_id,
        &GradeEntry {
            student_id: "s-1".to_string(),
            points_earned: points,
            feedback: None,
        },
        actor,
        &Settings::default(),
    )
    .expect("grade");
}

fn card_input() -> NewReportCard {
    NewReportCard {
        student_id: "s-1".to_string(),
        class_id: "c-1".to_string(),
        term: Term::Semester1,
        academic_year: "2024-2025".to_string(),
        teacher_comments: None,
        conduct_grade: None,
    }
}

#[test]
fn breakdown_covers_published_and_closed_work_by_type() {
    let conn = seeded_workspace("recordbook-report-breakdown");
    let teacher = Actor::new("t-1", "Pat Rivera");

    let hw = assignment(
        &conn,
        "Homework 1",
        AssignmentType::Homework,
        100.0,
        AssignmentStatus::Published,
        &teacher,
    );
    let quiz = assignment(
        &conn,
        "Quiz 1",
        AssignmentType::Quiz,
        50.0,
        AssignmentStatus::Published,
        &teacher,
    );
    let draft = assignment(
        &conn,
        "Draft Essay",
        AssignmentType::Homework,
        20.0,
        AssignmentStatus::Draft,
        &teacher,
    );
    // An ungraded published assignment contributes nothing.
    assignment(
        &conn,
        "Ungraded Test",
        AssignmentType::Test,
        100.0,
        AssignmentStatus::Published,
        &teacher,
    );

    grade(&conn, &hw, 85.0, &teacher);
    grade(&conn, &quiz, 45.0, &teacher);
    grade(&conn, &draft, 20.0, &teacher);
    // Closed work still counts.
    assignments::close_assignment(&conn, &quiz, &teacher).expect("close quiz");

    let card = reports::generate_report_card(&conn, &card_input(), &teacher).expect("generate");

    assert_eq!(card.student_name, "Ada Boame");
    assert_eq!(card.parent_id.as_deref(), Some("parent-77"));
    assert_eq!(card.grade_name.as_deref(), Some("Grade 5"));
    assert_eq!(card.status, ReportStatus::Draft);
    assert!(card.published_at.is_none());
    assert_eq!(card.generated_by, "t-1");

    assert_eq!(card.total_points, 130.0);
    assert_eq!(card.max_points, 150.0);
    assert_eq!(card.overall_percentage, 86.7);
    assert_eq!(card.letter_grade, LetterGrade::B);

    let hw_bucket = &card.grade_breakdown.homework;
    assert_eq!(hw_bucket.count, 1, "draft homework stays out");
    assert_eq!(hw_bucket.points, 85.0);
    assert_eq!(hw_bucket.max_points, 100.0);
    assert_eq!(hw_bucket.percentage, 85.0);

    let quiz_bucket = &card.grade_breakdown.quiz;
    assert_eq!(quiz_bucket.count, 1);
    assert_eq!(quiz_bucket.percentage, 90.0);

    let test_bucket = &card.grade_breakdown.test;
    assert_eq!(test_bucket.count, 0);
    assert_eq!(test_bucket.percentage, 0.0);
}

#[test]
fn attendance_snapshot_rides_along_on_the_card() {
    let conn = seeded_workspace("recordbook-report-attendance");
    let teacher = Actor::new("t-1", "Pat Rivera");

    for (date, status) in [
        ("2025-03-03", AttendanceStatus::Present),
        ("2025-03-04", AttendanceStatus::Present),
        ("2025-03-05", AttendanceStatus::Present),
        ("2025-03-06", AttendanceStatus::Late),
        ("2025-03-07", AttendanceStatus::Absent),
    ] {
        attendance::record_bulk_attendance(
            &conn,
            "c-1",
            date,
            &[AttendanceEntry {
                student_id: "s-1".to_string(),
                status,
                arrival_time: None,
                notes: None,
            }],
            &teacher,
        )
        .expect("register");
    }

    let card = reports::generate_report_card(&conn, &card_input(), &teacher).expect("generate");
    assert_eq!(card.attendance.total_days, 5);
    assert_eq!(card.attendance.present, 3);
    assert_eq!(card.attendance.late, 1);
    assert_eq!(card.attendance.absent, 1);
    assert_eq!(card.attendance.excused, 0);
    // (3 present + 1 late) / 5 = 80%.
    assert_eq!(card.attendance.attendance_rate, 80);
}

#[test]
fn a_card_with_no_graded_work_is_a_zeroed_f() {
    let conn = seeded_workspace("recordbook-report-empty");
    let teacher = Actor::new("t-1", "Pat Rivera");

    let card = reports::generate_report_card(&conn, &card_input(), &teacher).expect("generate");
    assert_eq!(card.overall_percentage, 0.0);
    assert_eq!(card.letter_grade, LetterGrade::F);
    assert_eq!(card.total_points, 0.0);
    assert_eq!(card.max_points, 0.0);
    assert_eq!(card.attendance.total_days, 0);
}

#[test]
fn generation_validates_inputs_and_stamps_narrative_fields() {
    let conn = seeded_workspace("recordbook-report-validate");
    let teacher = Actor::new("t-1", "Pat Rivera");

    let mut ghost_class = card_input();
    ghost_class.class_id = "c-ghost".to_string();
    assert!(matches!(
        reports::generate_report_card(&conn, &ghost_class, &teacher),
        Err(Error::NotFound { .. })
    ));

    let mut ghost_student = card_input();
    ghost_student.student_id = "s-ghost".to_string();
    assert!(matches!(
        reports::generate_report_card(&conn, &ghost_student, &teacher),
        Err(Error::NotFound { .. })
    ));

    let mut blank_year = card_input();
    blank_year.academic_year = "   ".to_string();
    assert!(matches!(
        reports::generate_report_card(&conn, &blank_year, &teacher),
        Err(Error::Validation(_))
    ));

    let mut with_narrative = card_input();
    with_narrative.teacher_comments = Some("Strong start to the year".to_string());
    with_narrative.conduct_grade = Some(ConductGrade::Excellent);
    let card = reports::generate_report_card(&conn, &with_narrative, &teacher).expect("generate");
    assert_eq!(card.teacher_comments.as_deref(), Some("Strong start to the year"));
    assert_eq!(card.conduct_grade, Some(ConductGrade::Excellent));
}
