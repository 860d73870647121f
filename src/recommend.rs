use crate::models::{FeeStatus, RiskLevel};

pub const IMMEDIATE_ACTIONS: &str = "Immediate Actions:";
pub const ACADEMIC_SUPPORT: &str = "Academic Support:";
pub const FINANCIAL_SUPPORT: &str = "Financial & Well-being Support:";

pub const FINANCIAL_AID_REFERRAL: &str = "Connect them with the financial aid office to confidentially discuss an installment plan or potential scholarship opportunities to resolve the fee issue.";
pub const COUNSELOR_REFERRAL: &str = "Suggest a meeting with a mental health counselor to discuss any personal challenges that might be affecting their academic journey and financial well-being.";

const LOW_RISK_GUIDANCE: [&str; 4] = [
    "Status: Low Risk - No Immediate Action Required. Continue to monitor their progress periodically to ensure they remain on track.",
    "Encourage the student to take on advanced academic challenges or participate in student-led projects to further their growth.",
    "Recognize and reward the student's excellent performance to reinforce their positive behavior and serve as an example to their peers.",
    "Provide opportunities for them to mentor other students, which can improve their leadership skills and strengthen their own knowledge.",
];

/// Coarse gate used only for guidance text. Its thresholds intentionally
/// differ from the scorecard in `risk`.
pub fn coarse_risk_level(attendance: f64, backlogs: i64, fee_status: FeeStatus) -> RiskLevel {
    if attendance < 60.0 || backlogs >= 3 || fee_status == FeeStatus::Overdue {
        RiskLevel::High
    } else if attendance < 75.0 || backlogs > 0 || fee_status != FeeStatus::Paid {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Builds ordered, rule-based guidance for a student.
///
/// The first element is always a situation analysis. Section headers are
/// plain list elements followed by the items they introduce; a low-risk
/// student gets a fixed five-line list and no sections.
pub fn generate_recommendations(attendance: f64, backlogs: i64, fee_status: FeeStatus) -> Vec<String> {
    let level = coarse_risk_level(attendance, backlogs, fee_status);
    let mut analysis = format!(
        "Situation Analysis: This student is currently facing a {} risk.",
        level
    );

    if level == RiskLevel::Low {
        analysis.push_str(" The student is performing exceptionally well with strong attendance and no academic backlogs. They are on track for academic success.");
        let mut recommendations = Vec::with_capacity(1 + LOW_RISK_GUIDANCE.len());
        recommendations.push(analysis);
        recommendations.extend(LOW_RISK_GUIDANCE.iter().map(|line| line.to_string()));
        return recommendations;
    }

    let low_attendance = attendance < 75.0;
    let has_backlogs = backlogs > 0;

    if low_attendance {
        analysis.push_str(&format!(
            " This is primarily due to low attendance ({}%) which appears to be directly contributing to academic difficulties, evidenced by {} subject backlogs.",
            attendance, backlogs
        ));
    }
    if has_backlogs {
        analysis.push_str(&format!(
            " They have {} backlogs, which poses a significant academic challenge.",
            backlogs
        ));
    }
    if fee_status == FeeStatus::Overdue {
        analysis.push_str(" The financial status is a serious concern with an overdue fee status.");
    }

    let mut recommendations = vec![analysis, IMMEDIATE_ACTIONS.to_string()];
    if low_attendance {
        recommendations.push(format!(
            "Reach out to the student within 48 hours for a quick check-in to empathetically understand the reasons behind their {}% attendance.",
            attendance
        ));
    }
    if has_backlogs {
        recommendations.push(format!(
            "Offer immediate support by helping them prioritize which of the {} backlog subjects to focus on first, perhaps by connecting them with a relevant course instructor or existing study materials.",
            backlogs
        ));
    }

    recommendations.push(ACADEMIC_SUPPORT.to_string());
    if low_attendance {
        recommendations.push("Collaborate with the student to create a realistic attendance improvement plan, emphasizing how consistent presence directly impacts understanding and reduces the risk of future backlogs.".to_string());
    }
    if has_backlogs {
        recommendations.push("Connect the student with targeted academic resources such as peer tutoring or specialized study groups to effectively tackle their backlogs.".to_string());
    }

    if matches!(
        fee_status,
        FeeStatus::Overdue | FeeStatus::Pending | FeeStatus::Partial
    ) {
        recommendations.push(FINANCIAL_SUPPORT.to_string());
        if matches!(fee_status, FeeStatus::Overdue | FeeStatus::Partial) {
            recommendations.push(FINANCIAL_AID_REFERRAL.to_string());
        }
        recommendations.push(COUNSELOR_REFERRAL.to_string());
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn contains(recs: &[String], needle: &str) -> bool {
        recs.iter().any(|r| r == needle)
    }

    #[test]
    fn low_risk_returns_fixed_five() {
        let recs = generate_recommendations(95.0, 0, FeeStatus::Paid);
        assert_eq!(recs.len(), 5);
        assert!(recs[0].starts_with("Situation Analysis: This student is currently facing a Low risk."));
        assert!(!contains(&recs, IMMEDIATE_ACTIONS));

        let other = generate_recommendations(75.0, 0, FeeStatus::Paid);
        assert_eq!(recs, other);
    }

    #[test]
    fn high_risk_includes_every_section() {
        let recs = generate_recommendations(50.0, 3, FeeStatus::Overdue);
        assert!(recs[0].contains("High risk"));
        assert!(recs[0].contains("low attendance (50%)"));
        assert!(recs[0].contains("They have 3 backlogs"));
        assert!(recs[0].contains("overdue fee status"));

        let immediate = recs.iter().position(|r| r == IMMEDIATE_ACTIONS).unwrap();
        let academic = recs.iter().position(|r| r == ACADEMIC_SUPPORT).unwrap();
        let financial = recs.iter().position(|r| r == FINANCIAL_SUPPORT).unwrap();
        assert!(immediate < academic && academic < financial);

        assert!(contains(&recs, FINANCIAL_AID_REFERRAL));
        assert_eq!(recs.last().map(String::as_str), Some(COUNSELOR_REFERRAL));
        assert_eq!(recs.len(), 10);
    }

    #[test]
    fn pending_fee_skips_installment_referral() {
        let recs = generate_recommendations(90.0, 0, FeeStatus::Pending);
        assert!(recs[0].contains("Medium risk"));
        assert!(contains(&recs, FINANCIAL_SUPPORT));
        assert!(!contains(&recs, FINANCIAL_AID_REFERRAL));
        assert!(contains(&recs, COUNSELOR_REFERRAL));
        // headers still appear even with no items under them
        assert_eq!(recs[1], IMMEDIATE_ACTIONS);
        assert_eq!(recs[2], ACADEMIC_SUPPORT);
    }

    #[test]
    fn unrecognized_fee_is_medium_without_financial_section() {
        assert_eq!(coarse_risk_level(95.0, 0, FeeStatus::Unrecognized), RiskLevel::Medium);
        let recs = generate_recommendations(95.0, 0, FeeStatus::Unrecognized);
        assert!(!contains(&recs, FINANCIAL_SUPPORT));
    }

    #[test]
    fn coarse_gate_thresholds() {
        assert_eq!(coarse_risk_level(74.9, 0, FeeStatus::Paid), RiskLevel::Medium);
        assert_eq!(coarse_risk_level(80.0, 1, FeeStatus::Paid), RiskLevel::Medium);
        assert_eq!(coarse_risk_level(59.9, 0, FeeStatus::Paid), RiskLevel::High);
        assert_eq!(coarse_risk_level(80.0, 3, FeeStatus::Paid), RiskLevel::High);
        assert_eq!(coarse_risk_level(80.0, 0, FeeStatus::Overdue), RiskLevel::High);
        assert_eq!(coarse_risk_level(75.0, 0, FeeStatus::Paid), RiskLevel::Low);
    }

    #[test]
    fn partial_fee_gets_installment_referral() {
        let recs = generate_recommendations(95.0, 0, FeeStatus::Partial);
        assert!(contains(&recs, FINANCIAL_SUPPORT));
        assert!(contains(&recs, FINANCIAL_AID_REFERRAL));
    }

    #[test]
    fn gate_can_disagree_with_scorecard() {
        let scored = crate::risk::score_risk(74.0, 95.0, FeeStatus::Paid);
        assert_eq!(scored.risk_level, RiskLevel::Low);
        assert_eq!(coarse_risk_level(74.0, 0, FeeStatus::Paid), RiskLevel::Medium);
    }

    #[test]
    fn fractional_attendance_is_quoted_verbatim() {
        let recs = generate_recommendations(72.5, 1, FeeStatus::Paid);
        assert!(recs.iter().any(|r| r.contains("their 72.5% attendance")));
        assert!(recs.iter().any(|r| r.contains("which of the 1 backlog subjects")));
    }
}
