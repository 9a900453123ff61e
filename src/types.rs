use crate::error::{Error, Result};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

/// Already-authenticated caller identity, stamped into provenance fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub uid: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
        }
    }
}

/// Engine tunables. Defaults match the limits the system has always shipped
/// with; consumers may deserialize overrides from their own config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Attendance records stay editable for this many days after the
    /// register date.
    pub attendance_edit_window_days: i64,
    /// Oldest edit-history entries are dropped beyond this count.
    pub edit_history_cap: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            attendance_edit_window_days: 7,
            edit_history_cap: 50,
        }
    }
}

macro_rules! impl_sql_text {
    ($ty:ident, $what:literal) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                $ty::parse(s).ok_or_else(|| {
                    FromSqlError::Other(format!(concat!("unknown ", $what, ": {}"), s).into())
                })
            }
        }
    };
}

/// Soft-delete lifecycle tag. Every read path filters on `Active`; a
/// `Deleted` row is indistinguishable from an absent one through the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Active,
    Deleted,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Active => "active",
            DocStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(DocStatus::Active),
            "deleted" => Some(DocStatus::Deleted),
            _ => None,
        }
    }
}

impl_sql_text!(DocStatus, "doc status");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentType {
    Homework,
    Quiz,
    Test,
    Project,
    Classwork,
    Participation,
}

impl AssignmentType {
    pub const ALL: [AssignmentType; 6] = [
        AssignmentType::Homework,
        AssignmentType::Quiz,
        AssignmentType::Test,
        AssignmentType::Project,
        AssignmentType::Classwork,
        AssignmentType::Participation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentType::Homework => "homework",
            AssignmentType::Quiz => "quiz",
            AssignmentType::Test => "test",
            AssignmentType::Project => "project",
            AssignmentType::Classwork => "classwork",
            AssignmentType::Participation => "participation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "homework" => Some(AssignmentType::Homework),
            "quiz" => Some(AssignmentType::Quiz),
            "test" => Some(AssignmentType::Test),
            "project" => Some(AssignmentType::Project),
            "classwork" => Some(AssignmentType::Classwork),
            "participation" => Some(AssignmentType::Participation),
            _ => None,
        }
    }
}

impl_sql_text!(AssignmentType, "assignment type");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Draft,
    Published,
    Closed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Draft => "draft",
            AssignmentStatus::Published => "published",
            AssignmentStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(AssignmentStatus::Draft),
            "published" => Some(AssignmentStatus::Published),
            "closed" => Some(AssignmentStatus::Closed),
            _ => None,
        }
    }
}

impl_sql_text!(AssignmentStatus, "assignment status");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

impl_sql_text!(AttendanceStatus, "attendance status");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Draft,
    Published,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ReportStatus::Draft),
            "published" => Some(ReportStatus::Published),
            _ => None,
        }
    }
}

impl_sql_text!(ReportStatus, "report status");

/// Behavior mark on a report card, separate from the academic letter grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConductGrade {
    Excellent,
    Good,
    Satisfactory,
    #[serde(rename = "Needs Improvement")]
    NeedsImprovement,
}

impl ConductGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConductGrade::Excellent => "Excellent",
            ConductGrade::Good => "Good",
            ConductGrade::Satisfactory => "Satisfactory",
            ConductGrade::NeedsImprovement => "Needs Improvement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Excellent" => Some(ConductGrade::Excellent),
            "Good" => Some(ConductGrade::Good),
            "Satisfactory" => Some(ConductGrade::Satisfactory),
            "Needs Improvement" => Some(ConductGrade::NeedsImprovement),
            _ => None,
        }
    }
}

impl_sql_text!(ConductGrade, "conduct grade");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    Semester1,
    Semester2,
    Annual,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Semester1 => "semester1",
            Term::Semester2 => "semester2",
            Term::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "semester1" => Some(Term::Semester1),
            "semester2" => Some(Term::Semester2),
            "annual" => Some(Term::Annual),
            _ => None,
        }
    }
}

impl_sql_text!(Term, "term");

/// Letter bands: A >= 90, B >= 80, C >= 70, D >= 60, F below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 90.0 {
            LetterGrade::A
        } else if percentage >= 80.0 {
            LetterGrade::B
        } else if percentage >= 70.0 {
            LetterGrade::C
        } else if percentage >= 60.0 {
            LetterGrade::D
        } else {
            LetterGrade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(LetterGrade::A),
            "B" => Some(LetterGrade::B),
            "C" => Some(LetterGrade::C),
            "D" => Some(LetterGrade::D),
            "F" => Some(LetterGrade::F),
            _ => None,
        }
    }
}

impl_sql_text!(LetterGrade, "letter grade");

/// RFC 3339 UTC stamp with millisecond precision, the wire format for all
/// `*_at` fields.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_iso_date(value: &str, field: &'static str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| Error::validation(format!("{} must be YYYY-MM-DD, got '{}'", field, value)))
}

/// Stored calendar dates are zero-padded `YYYY-MM-DD` so string ordering
/// matches date ordering. Every date crossing a write boundary goes through
/// here, which also rejects garbage before it can poison a comparison.
pub(crate) fn canon_iso_date(value: &str, field: &'static str) -> Result<String> {
    let date = parse_iso_date(value, field)?;
    Ok(date.format("%Y-%m-%d").to_string())
}
