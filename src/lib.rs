//! Assessment and reporting engine for a school records backend. Covers the
//! assignment lifecycle, the grade ledger with its edit history, daily
//! attendance registers, gradebook assembly, and term report cards, all over
//! one SQLite workspace file.

pub mod assignments;
pub mod attendance;
mod calc;
pub mod db;
pub mod error;
pub mod gradebook;
pub mod grades;
pub mod history;
pub mod reports;
pub mod roster;
pub mod types;

pub use db::open_db;
pub use error::{Error, Result};
pub use types::{
    Actor, AssignmentStatus, AssignmentType, AttendanceStatus, ConductGrade, DocStatus,
    LetterGrade, ReportStatus, Settings, Term,
};
