use crate::models::{FeeStatus, Performance, RiskLevel, Student, StudentScore};

/// Attendance below this percentage raises the risk flag.
pub const RISK_FLAG_ATTENDANCE: f64 = 75.0;

pub const HIGH_RISK_THRESHOLD: u8 = 70;
pub const MEDIUM_RISK_THRESHOLD: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
}

/// Additive scorecard over attendance, academic score and fee status.
///
/// Each band is independent: attendance contributes up to 40 points, the
/// academic score up to 30 and the fee status up to 30. Non-finite inputs are
/// scored as 0, which lands them in the riskiest band.
pub fn score_risk(attendance: f64, academic_score: f64, fee_status: FeeStatus) -> RiskAssessment {
    let total = attendance_points(attendance) as u16
        + academic_points(academic_score) as u16
        + fee_points(fee_status) as u16;
    let risk_score = total.min(100) as u8;

    RiskAssessment {
        risk_score,
        risk_level: level_for_score(risk_score),
    }
}

pub fn attendance_points(attendance: f64) -> u8 {
    let attendance = finite_or_zero(attendance);
    if attendance < 60.0 {
        40
    } else if attendance < 70.0 {
        30
    } else if attendance < 80.0 {
        20
    } else if attendance < 90.0 {
        10
    } else {
        0
    }
}

pub fn academic_points(score: f64) -> u8 {
    let score = finite_or_zero(score);
    if score < 40.0 {
        30
    } else if score < 50.0 {
        25
    } else if score < 60.0 {
        20
    } else if score < 70.0 {
        15
    } else if score < 80.0 {
        10
    } else if score < 90.0 {
        5
    } else {
        0
    }
}

pub fn fee_points(fee_status: FeeStatus) -> u8 {
    match fee_status {
        FeeStatus::Overdue => 30,
        FeeStatus::Pending => 15,
        FeeStatus::Partial => 10,
        FeeStatus::Paid | FeeStatus::Unrecognized => 0,
    }
}

pub fn level_for_score(risk_score: u8) -> RiskLevel {
    if risk_score >= HIGH_RISK_THRESHOLD {
        RiskLevel::High
    } else if risk_score >= MEDIUM_RISK_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

pub fn risk_flag(attendance: f64) -> bool {
    finite_or_zero(attendance) < RISK_FLAG_ATTENDANCE
}

pub fn normalize_performance(performance: &Performance) -> f64 {
    match performance {
        Performance::Score(value) => finite_or_zero(*value),
        Performance::Label(label) => label_to_score(label),
    }
}

/// Maps Excellent/Good/Average/Poor onto the score scale; anything else is
/// parsed as a number, falling back to 0.
pub fn label_to_score(label: &str) -> f64 {
    let trimmed = label.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "excellent" => 90.0,
        "good" => 80.0,
        "average" => 70.0,
        "poor" => 50.0,
        _ => trimmed
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .unwrap_or(0.0),
    }
}

/// Score used for imported rows that carry no performance column. Floored at
/// 0; negative counts contribute nothing.
pub fn baseline_score(backlogs: i64, attempts: i64) -> f64 {
    let penalty = backlogs
        .max(0)
        .saturating_mul(10)
        .saturating_add(attempts.max(0).saturating_mul(5));
    (100 - penalty.min(100)) as f64
}

pub fn attendance_percent(total_held: i64, total_attend: i64) -> f64 {
    if total_held <= 0 {
        return 0.0;
    }
    let percent = total_attend as f64 / total_held as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Recomputes the scorecard for every student and orders them riskiest
/// first. Stored `risk_level` values are ignored.
pub fn score_students(students: &[Student]) -> Vec<StudentScore> {
    let mut scores: Vec<StudentScore> = students
        .iter()
        .map(|student| {
            let fee_status = student.fee_status();
            let assessment = score_risk(student.attendance, student.score, fee_status);
            StudentScore {
                student_id: student.id,
                name: student.name.clone(),
                email: student.email.clone(),
                attendance: student.attendance,
                score: student.score,
                fee_status,
                risk_score: assessment.risk_score,
                risk_level: assessment.risk_level,
            }
        })
        .collect();

    scores.sort_by(|a, b| {
        b.risk_score.cmp(&a.risk_score).then_with(|| {
            a.attendance
                .partial_cmp(&b.attendance)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    scores
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn perfect_student_scores_zero() {
        let result = score_risk(95.0, 92.0, FeeStatus::Paid);
        assert_eq!(result.risk_score, 0);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn worst_case_caps_at_one_hundred() {
        let result = score_risk(45.0, 35.0, FeeStatus::Overdue);
        assert_eq!(result.risk_score, 100);
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[test]
    fn mid_range_student_is_low() {
        let result = score_risk(85.0, 78.0, FeeStatus::Paid);
        assert_eq!(result.risk_score, 20);
        assert_eq!(result.risk_level, RiskLevel::Low);
    }

    #[test]
    fn attendance_bucket_edges_are_left_open() {
        assert_eq!(attendance_points(60.0), 30);
        assert_eq!(attendance_points(59.999), 40);
        assert_eq!(attendance_points(70.0), 20);
        assert_eq!(attendance_points(80.0), 10);
        assert_eq!(attendance_points(89.99), 10);
        assert_eq!(attendance_points(90.0), 0);
    }

    #[test]
    fn academic_bucket_edges() {
        assert_eq!(academic_points(39.9), 30);
        assert_eq!(academic_points(40.0), 25);
        assert_eq!(academic_points(50.0), 20);
        assert_eq!(academic_points(60.0), 15);
        assert_eq!(academic_points(70.0), 10);
        assert_eq!(academic_points(80.0), 5);
        assert_eq!(academic_points(90.0), 0);
    }

    #[test]
    fn level_boundaries_are_inclusive_upward() {
        assert_eq!(level_for_score(70), RiskLevel::High);
        assert_eq!(level_for_score(69), RiskLevel::Medium);
        assert_eq!(level_for_score(40), RiskLevel::Medium);
        assert_eq!(level_for_score(39), RiskLevel::Low);

        // 30 + 10 + 30
        assert_eq!(score_risk(65.0, 75.0, FeeStatus::Overdue).risk_level, RiskLevel::High);
        // 20 + 5 + 15
        assert_eq!(score_risk(75.0, 85.0, FeeStatus::Pending).risk_level, RiskLevel::Medium);
    }

    #[test]
    fn unrecognized_fee_status_adds_nothing() {
        assert_eq!(fee_points(FeeStatus::from_label("Waived")), 0);
        assert_eq!(fee_points(FeeStatus::from_label("overdue")), 30);
        assert_eq!(fee_points(FeeStatus::Partial), 10);
    }

    #[test]
    fn missing_inputs_score_as_zero() {
        let result = score_risk(f64::NAN, f64::NAN, FeeStatus::Paid);
        assert_eq!(result.risk_score, 70);
        assert!(risk_flag(f64::NAN));
    }

    #[test]
    fn out_of_range_inputs_stay_in_range() {
        assert_eq!(score_risk(-20.0, -5.0, FeeStatus::Overdue).risk_score, 100);
        assert_eq!(score_risk(140.0, 250.0, FeeStatus::Paid).risk_score, 0);
    }

    #[test]
    fn performance_labels_normalize() {
        assert_eq!(label_to_score("Excellent"), 90.0);
        assert_eq!(label_to_score(" good "), 80.0);
        assert_eq!(label_to_score("Average"), 70.0);
        assert_eq!(label_to_score("POOR"), 50.0);
        assert_eq!(label_to_score("64.5"), 64.5);
        assert_eq!(label_to_score("unknown"), 0.0);
        assert_eq!(normalize_performance(&Performance::Score(82.0)), 82.0);
        assert_eq!(
            normalize_performance(&Performance::Label("Excellent".to_string())),
            90.0
        );
    }

    #[test]
    fn risk_flag_uses_seventy_five() {
        assert!(risk_flag(74.99));
        assert!(!risk_flag(75.0));
    }

    #[test]
    fn import_helpers() {
        assert_eq!(baseline_score(2, 1), 75.0);
        assert_eq!(baseline_score(0, 0), 100.0);
        assert_eq!(baseline_score(8, 6), 0.0);
        assert_eq!(baseline_score(i64::MAX, i64::MAX), 0.0);
        assert_eq!(baseline_score(-3, 0), 100.0);
        assert_eq!(attendance_percent(0, 10), 0.0);
        assert_eq!(attendance_percent(3, 2), 66.67);
        assert_eq!(attendance_percent(40, 30), 75.0);
    }

    proptest! {
        #[test]
        fn scoring_is_deterministic(attendance in -50.0f64..150.0, score in -50.0f64..150.0) {
            let first = score_risk(attendance, score, FeeStatus::Pending);
            let second = score_risk(attendance, score, FeeStatus::Pending);
            prop_assert_eq!(first, second);
            prop_assert!(first.risk_score <= 100);
        }

        #[test]
        fn low_attendance_always_forty(attendance in 0.0f64..60.0) {
            prop_assert_eq!(attendance_points(attendance), 40);
        }

        #[test]
        fn strong_paid_students_score_zero(attendance in 90.0f64..=100.0, score in 90.0f64..=100.0) {
            let result = score_risk(attendance, score, FeeStatus::Paid);
            prop_assert_eq!(result.risk_score, 0);
            prop_assert_eq!(result.risk_level, RiskLevel::Low);
        }

        #[test]
        fn numeric_performance_is_unchanged(value in 0.0f64..=100.0) {
            prop_assert_eq!(normalize_performance(&Performance::Score(value)), value);
        }
    }
}
