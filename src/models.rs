use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "Low" => Some(RiskLevel::Low),
            "Medium" => Some(RiskLevel::Medium),
            "High" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuition payment state. Anything outside the four known labels is kept as
/// `Unrecognized` so scoring can degrade to zero points instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeStatus {
    Paid,
    Pending,
    Partial,
    Overdue,
    Unrecognized,
}

impl FeeStatus {
    pub const VALID_LABELS: [&'static str; 4] = ["Paid", "Pending", "Partial", "Overdue"];

    /// Matches trimmed labels case-insensitively, so imported `overdue` scores
    /// the same as `Overdue`. Exact-case matching is deliberately not used.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "paid" => FeeStatus::Paid,
            "pending" => FeeStatus::Pending,
            "partial" => FeeStatus::Partial,
            "overdue" => FeeStatus::Overdue,
            _ => FeeStatus::Unrecognized,
        }
    }

    /// A missing stored value counts as paid.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some(label) if !label.trim().is_empty() => FeeStatus::from_label(label),
            _ => FeeStatus::Paid,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, FeeStatus::Unrecognized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStatus::Paid => "Paid",
            FeeStatus::Pending => "Pending",
            FeeStatus::Partial => "Partial",
            FeeStatus::Overdue => "Overdue",
            FeeStatus::Unrecognized => "Unrecognized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Mentor,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Mentor => "Mentor",
            Role::Student => "Student",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Admin" => Some(Role::Admin),
            "Mentor" => Some(Role::Mentor),
            "Student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Academic performance as submitted: either a numeric score or a label such
/// as "Good".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Performance {
    Score(f64),
    Label(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub roll_number: Option<String>,
    pub section: Option<String>,
    pub email: Option<String>,
    pub total_held: i64,
    pub total_attend: i64,
    pub attendance: f64,
    pub backlogs: i64,
    pub attempts: i64,
    pub mentor_id: Option<i64>,
    pub performance: f64,
    pub score: f64,
    pub fee_status: Option<String>,
    pub risk_level: Option<String>,
    pub risk_flag: i64,
    pub created_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentor_email: Option<String>,
}

impl Student {
    pub fn fee_status(&self) -> FeeStatus {
        FeeStatus::from_stored(self.fee_status.as_deref())
    }
}

/// Validated write model for a student row. Risk fields are derived from it
/// at insert time.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentDraft {
    pub name: String,
    pub roll_number: Option<String>,
    pub section: Option<String>,
    pub email: Option<String>,
    pub total_held: i64,
    pub total_attend: i64,
    pub attendance: f64,
    pub backlogs: i64,
    pub attempts: i64,
    pub mentor_id: Option<i64>,
    pub performance: f64,
    pub score: f64,
    pub fee_status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub roll_number: Option<String>,
    pub section: Option<String>,
    pub attendance: Option<f64>,
    pub score: Option<f64>,
    pub performance: Option<Performance>,
    #[serde(default)]
    pub backlogs: i64,
    #[serde(default)]
    pub attempts: i64,
    pub fee_status: Option<String>,
    pub mentor_id: Option<i64>,
}

impl NewStudent {
    pub fn into_draft(self) -> Result<StudentDraft, String> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err("name is required".to_string());
        }

        let attendance = self
            .attendance
            .ok_or_else(|| "attendance is required".to_string())?;
        check_attendance(attendance)?;

        let performance = self.performance.as_ref().map(crate::risk::normalize_performance);
        let score = self
            .score
            .or(performance)
            .ok_or_else(|| "score or performance is required".to_string())?;
        check_score(score)?;

        if self.backlogs < 0 || self.attempts < 0 {
            return Err("backlogs and attempts must not be negative".to_string());
        }

        let fee_status = self
            .fee_status
            .ok_or_else(|| "fee_status is required".to_string())?;
        let parsed = FeeStatus::from_label(&fee_status);
        if !parsed.is_recognized() {
            return Err(format!(
                "Fee status must be one of: {}",
                FeeStatus::VALID_LABELS.join(", ")
            ));
        }

        Ok(StudentDraft {
            name,
            roll_number: non_empty(self.roll_number),
            section: non_empty(self.section),
            email: non_empty(self.email),
            total_held: 0,
            total_attend: 0,
            attendance,
            backlogs: self.backlogs,
            attempts: self.attempts,
            mentor_id: self.mentor_id,
            performance: performance.unwrap_or(score),
            score,
            fee_status: parsed.as_str().to_string(),
        })
    }
}

pub fn check_attendance(attendance: f64) -> Result<(), String> {
    if (0.0..=100.0).contains(&attendance) {
        Ok(())
    } else {
        Err("Attendance must be between 0 and 100".to_string())
    }
}

pub fn check_score(score: f64) -> Result<(), String> {
    if (0.0..=100.0).contains(&score) {
        Ok(())
    } else {
        Err("Score must be between 0 and 100".to_string())
    }
}

pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Serialize)]
pub struct Mentor {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub user_id: Option<i64>,
    pub department: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMentor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_data_added: bool,
}

/// A user row together with its bcrypt hash; never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskLevelUpdate {
    pub risk_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskPreviewRequest {
    pub attendance: Option<f64>,
    pub score: Option<f64>,
    pub performance: Option<Performance>,
    pub backlogs: Option<i64>,
    pub fee_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub processed: usize,
    pub inserted: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct RiskLevelSummary {
    pub risk_level: String,
    pub count: usize,
    pub avg_attendance: f64,
}

#[derive(Debug, Clone)]
pub struct StudentScore {
    pub student_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub attendance: f64,
    pub score: f64,
    pub fee_status: FeeStatus,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
}
