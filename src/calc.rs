use crate::types::AttendanceStatus;

/// Half-up 1-decimal rounding used for every percentage the engine stores:
/// `floor(10*x + 0.5) / 10`.
pub fn round_to_tenth(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Score as a percentage of `max_points`, rounded to a tenth. A non-positive
/// denominator yields 0.0 rather than an error; ungraded work is filtered out
/// before this point, so the guard only covers degenerate max-points data.
pub fn percentage(points: f64, max_points: f64) -> f64 {
    if max_points <= 0.0 {
        return 0.0;
    }
    round_to_tenth(100.0 * points / max_points)
}

/// Whole-number percentage, half-up. Attendance rates and summary percentages
/// report integers.
pub fn whole_percent(part: f64, whole: f64) -> i64 {
    if whole <= 0.0 {
        return 0;
    }
    (100.0 * part / whole + 0.5).floor() as i64
}

pub fn whole_rate(attended: i64, total: i64) -> i64 {
    whole_percent(attended as f64, total as f64)
}

/// Per-status counters for a set of attendance records. `rate()` counts
/// present and late as attended; absent and excused both count against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceTally {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
}

impl AttendanceTally {
    pub fn observe(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::Excused => self.excused += 1,
        }
    }

    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late + self.excused
    }

    pub fn rate(&self) -> i64 {
        whole_rate(self.present + self.late, self.total())
    }
}
