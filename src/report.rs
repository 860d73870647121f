use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{RiskLevelSummary, Student};
use crate::{recommend, risk};

/// Groups students by stored risk level. Rows never scored land under
/// "Unscored".
pub fn summarize_by_level(students: &[Student]) -> Vec<RiskLevelSummary> {
    let mut map: HashMap<String, (usize, f64)> = HashMap::new();

    for student in students {
        let level = student
            .risk_level
            .clone()
            .unwrap_or_else(|| "Unscored".to_string());
        let entry = map.entry(level).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += student.attendance;
    }

    let mut summaries: Vec<RiskLevelSummary> = map
        .into_iter()
        .map(|(risk_level, (count, total_attendance))| RiskLevelSummary {
            risk_level,
            count,
            avg_attendance: if count == 0 {
                0.0
            } else {
                total_attendance / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.risk_level.cmp(&b.risk_level)));
    summaries
}

pub fn build_report(scope: Option<&str>, generated_on: NaiveDate, students: &[Student], limit: usize) -> String {
    let summaries = summarize_by_level(students);
    let scores = risk::score_students(students);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Dropout Risk Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students recorded.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} students (avg attendance {:.1}%)",
                summary.risk_level, summary.count, summary.avg_attendance
            );
        }
    }

    let stale = students
        .iter()
        .filter(|student| {
            let current = risk::score_risk(student.attendance, student.score, student.fee_status());
            student.risk_level.as_deref() != Some(current.risk_level.as_str())
        })
        .count();
    if stale > 0 {
        let _ = writeln!(
            output,
            "- {} stored levels differ from the current scorecard",
            stale
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    if scores.is_empty() {
        let _ = writeln!(output, "No students to score.");
    } else {
        for score in scores.iter().take(limit) {
            let _ = writeln!(
                output,
                "- {} ({}) score {} [{}] attendance {:.1}%, academic {:.1}, fee {}",
                score.name,
                score.email.as_deref().unwrap_or("no email"),
                score.risk_score,
                score.risk_level,
                score.attendance,
                score.score,
                score.fee_status.as_str()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Suggested Interventions");

    let by_id: HashMap<i64, &Student> = students.iter().map(|s| (s.id, s)).collect();
    let mut wrote_any = false;
    for score in scores.iter().filter(|s| s.risk_score > 0).take(3) {
        let Some(student) = by_id.get(&score.student_id) else {
            continue;
        };
        let recommendations =
            recommend::generate_recommendations(student.attendance, student.backlogs, student.fee_status());
        let _ = writeln!(output, "### {}", student.name);
        for line in recommendations.iter() {
            let _ = writeln!(output, "- {}", line);
        }
        wrote_any = true;
    }
    if !wrote_any {
        let _ = writeln!(output, "No students need intervention.");
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::tests::sample_student;

    fn student(id: i64, name: &str, attendance: f64, score: f64, fee: &str, level: Option<&str>) -> Student {
        let mut s = sample_student();
        s.id = id;
        s.name = name.to_string();
        s.attendance = attendance;
        s.score = score;
        s.backlogs = 0;
        s.fee_status = Some(fee.to_string());
        s.risk_level = level.map(str::to_string);
        s
    }

    #[test]
    fn summaries_group_by_level() {
        let students = vec![
            student(1, "A", 50.0, 30.0, "Overdue", Some("High")),
            student(2, "B", 70.0, 30.0, "Overdue", Some("High")),
            student(3, "C", 95.0, 95.0, "Paid", Some("Low")),
        ];
        let summaries = summarize_by_level(&students);
        assert_eq!(summaries[0].risk_level, "High");
        assert_eq!(summaries[0].count, 2);
        assert!((summaries[0].avg_attendance - 60.0).abs() < 0.001);
        assert_eq!(summaries[1].risk_level, "Low");
    }

    #[test]
    fn report_lists_riskiest_first_and_flags_stale_levels() {
        let students = vec![
            student(1, "Calm Carla", 95.0, 95.0, "Paid", Some("Low")),
            student(2, "Risky Ravi", 45.0, 35.0, "Overdue", Some("Low")),
        ];
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let report = build_report(Some("Section B"), date, &students, 10);

        assert!(report.starts_with("# Dropout Risk Report\nGenerated for Section B on 2026-03-01"));
        assert!(report.contains("- 1 stored levels differ from the current scorecard"));
        let ravi = report.find("Risky Ravi (").unwrap();
        let carla = report.find("Calm Carla (").unwrap();
        assert!(ravi < carla);
        assert!(report.contains("### Risky Ravi"));
        assert!(!report.contains("### Calm Carla"));
    }

    #[test]
    fn empty_report() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let report = build_report(None, date, &[], 10);
        assert!(report.contains("Generated for all students"));
        assert!(report.contains("No students recorded."));
        assert!(report.contains("No students need intervention."));
    }
}
