use recordbook::assignments::{self, NewAssignment};
use recordbook::db::open_db;
use recordbook::gradebook;
use recordbook::grades::{self, GradeEntry};
use recordbook::{Actor, AssignmentStatus, AssignmentType, Error, LetterGrade, Settings};
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

fn assignment(
    conn: &Connection,
    title: &str,
    kind: AssignmentType,
    max_points: f64,
    status: AssignmentStatus,
    due: &str,
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
            due_date: due.to_string(),
            status: Some(status),
        },
        actor,
    )
    .expect("create assignment")
    .id
}

fn grade(conn: &Connection, assignment_id: &str, student: &str, points: f64, actor: &Actor) {
    grades::upsert_grade(
        conn,
        assignment_id,
        &GradeEntry {
            student_id: student.to_string(),
            points_earned: points,
            feedback: None,
        },
        actor,
        &Settings::default(),
    )
    .expect("grade");
}

#[test]
fn grid_shows_published_columns_with_null_ungraded_cells() {
    let conn = seeded_workspace("recordbook-gradebook-grid");
    let teacher = Actor::new("t-1", "Pat Rivera");

    let hw = assignment(
        &conn,
        "Homework 1",
        AssignmentType::Homework,
        100.0,
        AssignmentStatus::Published,
        "2025-03-07",
        &teacher,
    );
    let quiz = assignment(
        &conn,
        "Quiz 1",
        AssignmentType::Quiz,
        50.0,
        AssignmentStatus::Published,
        "2025-03-14",
        &teacher,
    );
    let draft = assignment(
        &conn,
        "Draft Essay",
        AssignmentType::Homework,
        20.0,
        AssignmentStatus::Draft,
        "2025-03-21",
        &teacher,
    );

    grade(&conn, &hw, "s-1", 85.0, &teacher);
    grade(&conn, &quiz, "s-1", 45.0, &teacher);
    grade(&conn, &hw, "s-2", 70.0, &teacher);
    // A grade on a draft assignment exists in the ledger but not in the grid.
    grade(&conn, &draft, "s-1", 20.0, &teacher);

    let view = gradebook::build_gradebook(&conn, "c-1").expect("gradebook");
    assert_eq!(view.class_name, "Math 5A");
    assert_eq!(view.assignments.len(), 2, "draft column stays out");
    // Columns arrive newest due date first.
    assert_eq!(view.assignments[0].title, "Quiz 1");
    assert_eq!(view.assignments[1].title, "Homework 1");

    assert_eq!(view.students.len(), 3);
    let ada = &view.students[0];
    assert_eq!(ada.student_name, "Ada Boame");
    assert_eq!(ada.grades.len(), 2);
    assert!(ada.grades.get(&draft).is_none(), "draft cell absent entirely");
    assert_eq!(ada.total_points, 130.0);
    assert_eq!(ada.max_points, 150.0);
    assert_eq!(ada.average_percentage, 86.7);
    assert_eq!(ada.letter_grade, LetterGrade::B);

    let ben = &view.students[1];
    assert_eq!(ben.average_percentage, 70.0);
    let ben_quiz_cell = ben.grades.get(&quiz).expect("column present for everyone");
    assert!(ben_quiz_cell.is_none(), "ungraded cell is explicit null");

    let cal = &view.students[2];
    assert_eq!(cal.total_points, 0.0);
    assert_eq!(cal.max_points, 0.0);
    assert_eq!(cal.average_percentage, 0.0);
    assert_eq!(cal.letter_grade, LetterGrade::F, "letter always derived");

    // Cal has no graded cells, so the class average is over Ada and Ben:
    // (86.7 + 70.0) / 2 = 78.4 to one decimal.
    assert_eq!(view.class_average, 78.4);
}

#[test]
fn empty_class_produces_an_empty_grid() {
    let conn = seeded_workspace("recordbook-gradebook-empty");
    conn.execute("INSERT INTO classes(id, name) VALUES('c-2', 'Empty Class')", [])
        .expect("seed class");

    let view = gradebook::build_gradebook(&conn, "c-2").expect("gradebook");
    assert!(view.assignments.is_empty());
    assert!(view.students.is_empty());
    assert_eq!(view.class_average, 0.0);

    assert!(matches!(
        gradebook::build_gradebook(&conn, "c-ghost"),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn closing_an_assignment_removes_its_column_but_not_the_ledger() {
    let conn = seeded_workspace("recordbook-gradebook-closed");
    let teacher = Actor::new("t-1", "Pat Rivera");

    let hw = assignment(
        &conn,
        "Homework 1",
        AssignmentType::Homework,
        100.0,
        AssignmentStatus::Published,
        "2025-03-07",
        &teacher,
    );
    grade(&conn, &hw, "s-1", 85.0, &teacher);

    assignments::close_assignment(&conn, &hw, &teacher).expect("close");

    let view = gradebook::build_gradebook(&conn, "c-1").expect("gradebook");
    assert!(view.assignments.is_empty(), "closed column leaves the grid");
    assert_eq!(view.students[0].max_points, 0.0);

    // The grade is still on the books for reports and standing.
    let standing = grades::student_class_standing(&conn, "s-1", "c-1").expect("standing");
    assert_eq!(standing.grade_count, 1);
    assert_eq!(standing.total_points, 85.0);
}

#[test]
fn withdrawn_students_drop_out_of_the_grid() {
    let conn = seeded_workspace("recordbook-gradebook-withdrawn");
    let teacher = Actor::new("t-1", "Pat Rivera");
    let hw = assignment(
        &conn,
        "Homework 1",
        AssignmentType::Homework,
        100.0,
        AssignmentStatus::Published,
        "2025-03-07",
        &teacher,
    );
    grade(&conn, &hw, "s-3", 95.0, &teacher);

    conn.execute("UPDATE students SET status = 'inactive' WHERE id = 's-3'", [])
        .expect("withdraw student");

    let view = gradebook::build_gradebook(&conn, "c-1").expect("gradebook");
    assert_eq!(view.students.len(), 2);
    assert!(view.students.iter().all(|row| row.student_id != "s-3"));
    assert_eq!(view.class_average, 0.0, "no graded rows remain");
}
