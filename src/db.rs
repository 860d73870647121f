use std::io::{Read, Write};
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::auth;
use crate::models::{
    check_attendance, check_score, non_empty, FeeStatus, ImportSummary, Mentor, NewMentor,
    RiskLevel, Role, Student, StudentDraft, User, UserCredentials,
};
use crate::risk;

const STUDENT_SELECT: &str = "SELECT s.id, s.name, s.roll_number, s.section, s.email, \
     s.total_held, s.total_attend, s.attendance, s.backlogs, s.attempts, s.mentor_id, \
     s.performance, s.score, s.fee_status, s.risk_level, s.risk_flag, s.created_at, \
     m.name AS mentor_name, m.email AS mentor_email \
     FROM students s LEFT JOIN mentors m ON m.id = s.mentor_id";

const RISK_ORDER: &str =
    "CASE s.risk_level WHEN 'High' THEN 0 WHEN 'Medium' THEN 1 WHEN 'Low' THEN 2 ELSE 3 END";

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to open SQLite database")?;
    Ok(pool)
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &SqlitePool) -> anyhow::Result<usize> {
    let mentors = vec![
        ("Meera Iyer", "meera.iyer@campus.edu", "Computer Science", "555-0101"),
        ("Daniel Okafor", "daniel.okafor@campus.edu", "Mechanical", "555-0102"),
    ];

    for (name, email, department, phone) in mentors {
        sqlx::query(
            r#"
            INSERT INTO mentors (name, email, department, phone)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (email) DO UPDATE
            SET name = excluded.name, department = excluded.department, phone = excluded.phone
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(department)
        .bind(phone)
        .execute(pool)
        .await?;
    }

    let students = vec![
        ("Avery Lee", "CS-001", "avery.lee@campus.edu", 92.0, 88.0, 0, "Paid", "meera.iyer@campus.edu"),
        ("Jules Moreno", "CS-002", "jules.moreno@campus.edu", 68.5, 55.0, 2, "Pending", "meera.iyer@campus.edu"),
        ("Kiara Patel", "ME-001", "kiara.patel@campus.edu", 45.0, 35.0, 4, "Overdue", "daniel.okafor@campus.edu"),
        ("Tomas Novak", "ME-002", "tomas.novak@campus.edu", 81.0, 72.0, 1, "Partial", "daniel.okafor@campus.edu"),
    ];

    let mut inserted = 0usize;
    for (name, roll, email, attendance, score, backlogs, fee_status, mentor_email) in students {
        let mentor_id = resolve_mentor_id(pool, mentor_email, None).await?;
        let draft = StudentDraft {
            name: name.to_string(),
            roll_number: Some(roll.to_string()),
            section: Some("A".to_string()),
            email: Some(email.to_string()),
            total_held: 0,
            total_attend: 0,
            attendance,
            backlogs,
            attempts: 0,
            mentor_id: Some(mentor_id),
            performance: score,
            score,
            fee_status: fee_status.to_string(),
        };
        if insert_student_row(pool, &draft, true).await?.is_some() {
            inserted += 1;
        }
    }

    Ok(inserted)
}

fn student_from_row(row: &SqliteRow) -> Result<Student, sqlx::Error> {
    Ok(Student {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        roll_number: row.try_get("roll_number")?,
        section: row.try_get("section")?,
        email: row.try_get("email")?,
        total_held: row.try_get("total_held")?,
        total_attend: row.try_get("total_attend")?,
        attendance: row.try_get("attendance")?,
        backlogs: row.try_get("backlogs")?,
        attempts: row.try_get("attempts")?,
        mentor_id: row.try_get("mentor_id")?,
        performance: row.try_get("performance")?,
        score: row.try_get("score")?,
        fee_status: row.try_get("fee_status")?,
        risk_level: row.try_get("risk_level")?,
        risk_flag: row.try_get("risk_flag")?,
        created_at: row.try_get("created_at")?,
        mentor_name: row.try_get("mentor_name")?,
        mentor_email: row.try_get("mentor_email")?,
    })
}

fn students_from_rows(rows: Vec<SqliteRow>) -> anyhow::Result<Vec<Student>> {
    let mut students = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        students.push(student_from_row(row)?);
    }
    Ok(students)
}

/// Inserts a student, deriving `risk_level` and `risk_flag` from the draft.
/// With `skip_existing`, a duplicate roll number is ignored and `None` is
/// returned.
async fn insert_student_row(
    pool: &SqlitePool,
    draft: &StudentDraft,
    skip_existing: bool,
) -> anyhow::Result<Option<i64>> {
    let assessment = risk::score_risk(
        draft.attendance,
        draft.score,
        FeeStatus::from_label(&draft.fee_status),
    );
    let risk_flag = risk::risk_flag(draft.attendance) as i64;

    let conflict = if skip_existing {
        " ON CONFLICT (roll_number) DO NOTHING"
    } else {
        ""
    };
    let query = format!(
        "INSERT INTO students (name, roll_number, section, email, total_held, total_attend, \
         attendance, backlogs, attempts, mentor_id, performance, score, fee_status, risk_level, risk_flag) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){conflict} RETURNING id"
    );

    let row = sqlx::query(&query)
        .bind(&draft.name)
        .bind(&draft.roll_number)
        .bind(&draft.section)
        .bind(&draft.email)
        .bind(draft.total_held)
        .bind(draft.total_attend)
        .bind(draft.attendance)
        .bind(draft.backlogs)
        .bind(draft.attempts)
        .bind(draft.mentor_id)
        .bind(draft.performance)
        .bind(draft.score)
        .bind(&draft.fee_status)
        .bind(assessment.risk_level.as_str())
        .bind(risk_flag)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|row| row.get("id")))
}

pub async fn insert_student(pool: &SqlitePool, draft: &StudentDraft) -> anyhow::Result<Student> {
    let id = insert_student_row(pool, draft, false)
        .await?
        .context("insert returned no id")?;
    get_student(pool, id)
        .await?
        .context("inserted student vanished")
}

pub async fn list_students(pool: &SqlitePool) -> anyhow::Result<Vec<Student>> {
    let query = format!("{STUDENT_SELECT} ORDER BY {RISK_ORDER}, s.name ASC");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    students_from_rows(rows)
}

pub async fn list_students_with_mentor(pool: &SqlitePool) -> anyhow::Result<Vec<Student>> {
    let query = format!("{STUDENT_SELECT} ORDER BY s.name ASC");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    students_from_rows(rows)
}

pub async fn list_by_risk_level(
    pool: &SqlitePool,
    level: RiskLevel,
) -> anyhow::Result<Vec<Student>> {
    let query = format!(
        "{STUDENT_SELECT} WHERE s.risk_level = ? ORDER BY s.attendance ASC, s.score ASC"
    );
    let rows = sqlx::query(&query)
        .bind(level.as_str())
        .fetch_all(pool)
        .await?;
    students_from_rows(rows)
}

pub async fn get_student(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<Student>> {
    let query = format!("{STUDENT_SELECT} WHERE s.id = ?");
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    Ok(row.as_ref().map(student_from_row).transpose()?)
}

pub async fn get_student_by_email(
    pool: &SqlitePool,
    email: &str,
) -> anyhow::Result<Option<Student>> {
    let query = format!("{STUDENT_SELECT} WHERE s.email = ? LIMIT 1");
    let row = sqlx::query(&query).bind(email).fetch_optional(pool).await?;
    Ok(row.as_ref().map(student_from_row).transpose()?)
}

pub async fn list_students_for_mentor(
    pool: &SqlitePool,
    mentor_id: i64,
) -> anyhow::Result<Vec<Student>> {
    let query = format!("{STUDENT_SELECT} WHERE s.mentor_id = ? ORDER BY s.name ASC");
    let rows = sqlx::query(&query).bind(mentor_id).fetch_all(pool).await?;
    students_from_rows(rows)
}

/// Manual override of the stored level. Returns false when no row matched.
pub async fn update_risk_level(
    pool: &SqlitePool,
    id: i64,
    level: RiskLevel,
) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE students SET risk_level = ? WHERE id = ?")
        .bind(level.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn mentor_from_row(row: &SqliteRow) -> Result<Mentor, sqlx::Error> {
    Ok(Mentor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        user_id: row.try_get("user_id")?,
        department: row.try_get("department")?,
        phone: row.try_get("phone")?,
    })
}

/// Fails with a unique violation when the email is already registered.
pub async fn insert_mentor(pool: &SqlitePool, mentor: &NewMentor) -> anyhow::Result<i64> {
    let password_hash = match mentor.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => Some(auth::hash_password(password)?),
        None => None,
    };

    let row = sqlx::query(
        r#"
        INSERT INTO mentors (name, email, department, phone, password)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(mentor.name.trim())
    .bind(mentor.email.trim())
    .bind(&mentor.department)
    .bind(&mentor.phone)
    .bind(password_hash)
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

pub async fn mentor_exists(pool: &SqlitePool, id: i64) -> anyhow::Result<bool> {
    let row = sqlx::query("SELECT 1 AS found FROM mentors WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Looks a mentor profile up by linked user id, falling back to email.
pub async fn find_mentor_for_user(
    pool: &SqlitePool,
    user_id: i64,
    email: &str,
) -> anyhow::Result<Option<Mentor>> {
    let row = sqlx::query(
        "SELECT id, name, email, user_id, department, phone FROM mentors \
         WHERE user_id = ? OR email = ? ORDER BY (user_id = ?) DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(email)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(mentor_from_row).transpose()?)
}

pub async fn find_mentor_by_email(pool: &SqlitePool, email: &str) -> anyhow::Result<Option<Mentor>> {
    let row = sqlx::query(
        "SELECT id, name, email, user_id, department, phone FROM mentors WHERE email = ?",
    )
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(mentor_from_row).transpose()?)
}

/// Returns the mentor id for `email`, creating a bare profile when none
/// exists. The name defaults to the local part of the address.
pub async fn resolve_mentor_id(
    pool: &SqlitePool,
    email: &str,
    name: Option<&str>,
) -> anyhow::Result<i64> {
    let email = email.trim();
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());

    sqlx::query("INSERT INTO mentors (name, email) VALUES (?, ?) ON CONFLICT (email) DO NOTHING")
        .bind(&name)
        .bind(email)
        .execute(pool)
        .await?;

    let id: i64 = sqlx::query("SELECT id FROM mentors WHERE email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?
        .get("id");
    Ok(id)
}

fn user_from_row(row: &SqliteRow) -> anyhow::Result<User> {
    let role: String = row.try_get("role")?;
    let is_data_added: i64 = row.try_get("is_data_added")?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: Role::parse(&role).with_context(|| format!("unknown role {role}"))?,
        is_data_added: is_data_added != 0,
    })
}

/// Creates a user with an already-hashed password. Mentor accounts also get
/// a mentor profile, linked to an existing one with the same email if present.
pub async fn create_user(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
    role: Role,
) -> anyhow::Result<User> {
    let row = sqlx::query(
        r#"
        INSERT INTO users (name, email, password, role, is_data_added)
        VALUES (?, ?, ?, ?, 0)
        RETURNING id, name, email, role, is_data_added
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role.as_str())
    .fetch_one(pool)
    .await?;
    let user = user_from_row(&row)?;

    if role == Role::Mentor {
        let linked = sqlx::query(
            r#"
            INSERT INTO mentors (name, email, user_id)
            VALUES (?, ?, ?)
            ON CONFLICT (email) DO UPDATE SET user_id = excluded.user_id
            "#,
        )
        .bind(name)
        .bind(email)
        .bind(user.id)
        .execute(pool)
        .await;
        if let Err(err) = linked {
            tracing::warn!(user_id = user.id, error = %err, "failed to create mentor profile");
        }
    }

    Ok(user)
}

pub async fn find_user_by_email(
    pool: &SqlitePool,
    email: &str,
) -> anyhow::Result<Option<UserCredentials>> {
    let row = sqlx::query(
        "SELECT id, name, email, role, is_data_added, password FROM users WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(UserCredentials {
            user: user_from_row(&row)?,
            password_hash: row.try_get("password")?,
        })),
        None => Ok(None),
    }
}

pub async fn get_data_added(pool: &SqlitePool, user_id: i64) -> anyhow::Result<Option<bool>> {
    let row = sqlx::query("SELECT is_data_added FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| row.get::<i64, _>("is_data_added") != 0))
}

/// Flips the admin's data-added flag and returns the new value.
pub async fn toggle_data_added(pool: &SqlitePool, user_id: i64) -> anyhow::Result<Option<bool>> {
    let row = sqlx::query(
        "UPDATE users SET is_data_added = 1 - is_data_added WHERE id = ? RETURNING is_data_added",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| row.get::<i64, _>("is_data_added") != 0))
}

#[derive(Debug, Deserialize)]
struct StudentCsvRow {
    #[serde(alias = "NAME", alias = "Name", default)]
    name: String,
    #[serde(alias = "ROLLNO", alias = "Roll", alias = "Roll_Number")]
    roll_number: Option<String>,
    #[serde(alias = "Section")]
    section: Option<String>,
    #[serde(alias = "EMAIL", alias = "Email")]
    email: Option<String>,
    #[serde(alias = "Total-Held")]
    total_held: Option<String>,
    #[serde(alias = "Total-Attend")]
    total_attend: Option<String>,
    #[serde(alias = "Attendance")]
    attendance: Option<String>,
    #[serde(alias = "No.of backlogs", alias = "Backlogs")]
    backlogs: Option<String>,
    #[serde(alias = "No.of attempts", alias = "Attempts")]
    attempts: Option<String>,
    #[serde(alias = "Performance")]
    performance: Option<String>,
    #[serde(alias = "fee-status", alias = "Fee_Status")]
    fee_status: Option<String>,
    #[serde(alias = "Mentor_Email", alias = "MentorEmail", alias = "Mentor")]
    mentor_email: Option<String>,
}

/// Backlog and attempt counts above this are treated as corrupt rows.
const MAX_IMPORT_COUNT: i64 = 100;

/// Lenient integer parsing: blanks and garbage become 0, decimals truncate.
fn parse_count(value: Option<&str>) -> i64 {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return 0;
    };
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i64))
        .unwrap_or(0)
}

fn draft_from_csv(row: StudentCsvRow) -> Result<(StudentDraft, Option<String>), String> {
    let name = row.name.trim().to_string();
    if name.is_empty() {
        return Err("missing name".to_string());
    }

    let total_held = parse_count(row.total_held.as_deref());
    let total_attend = parse_count(row.total_attend.as_deref());
    if total_held < 0 || total_attend < 0 {
        return Err("session counts must not be negative".to_string());
    }
    if total_attend > total_held && total_held > 0 {
        return Err(format!(
            "attended {total_attend} sessions but only {total_held} were held"
        ));
    }
    let attendance = if total_held > 0 {
        risk::attendance_percent(total_held, total_attend)
    } else {
        row.attendance
            .as_deref()
            .map(risk::label_to_score)
            .unwrap_or(0.0)
    };

    let backlogs = parse_count(row.backlogs.as_deref()).max(0);
    let attempts = parse_count(row.attempts.as_deref()).max(0);
    if backlogs > MAX_IMPORT_COUNT || attempts > MAX_IMPORT_COUNT {
        return Err(format!(
            "backlogs and attempts must be at most {MAX_IMPORT_COUNT}"
        ));
    }
    let score = match row.performance.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(performance) => risk::label_to_score(performance),
        None => risk::baseline_score(backlogs, attempts),
    };
    check_attendance(attendance)?;
    check_score(score)?;

    let fee_status = match non_empty(row.fee_status) {
        Some(raw) => {
            let parsed = FeeStatus::from_label(&raw);
            if parsed.is_recognized() {
                parsed.as_str().to_string()
            } else {
                raw
            }
        }
        None => FeeStatus::Paid.as_str().to_string(),
    };

    let draft = StudentDraft {
        name,
        roll_number: non_empty(row.roll_number),
        section: non_empty(row.section),
        email: non_empty(row.email),
        total_held,
        total_attend,
        attendance,
        backlogs,
        attempts,
        mentor_id: None,
        performance: score,
        score,
        fee_status,
    };
    Ok((draft, non_empty(row.mentor_email)))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader)
}

/// Imports students row by row. A bad row is logged and counted, never fatal;
/// only an unreadable header aborts the import.
pub async fn import_students_csv<R: Read>(
    pool: &SqlitePool,
    reader: R,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv_reader(reader);
    reader.headers()?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<StudentCsvRow>().enumerate() {
        summary.processed += 1;
        let line = index + 2;

        let (mut draft, mentor_email) = match result.map_err(|e| e.to_string()).and_then(draft_from_csv) {
            Ok(parsed) => parsed,
            Err(reason) => {
                tracing::warn!(line, %reason, "skipping student row");
                summary.errors += 1;
                continue;
            }
        };

        if let Some(email) = mentor_email.as_deref() {
            match resolve_mentor_id(pool, email, None).await {
                Ok(id) => draft.mentor_id = Some(id),
                Err(err) => {
                    tracing::warn!(line, error = %err, "failed to resolve mentor");
                    summary.errors += 1;
                    continue;
                }
            }
        }

        match insert_student_row(pool, &draft, false).await {
            Ok(_) => summary.inserted += 1,
            Err(err) => {
                tracing::warn!(line, error = %err, "failed to insert student");
                summary.errors += 1;
            }
        }
    }

    tracing::info!(
        processed = summary.processed,
        inserted = summary.inserted,
        errors = summary.errors,
        "student import finished"
    );
    Ok(summary)
}

#[derive(Debug, Deserialize)]
struct MentorCsvRow {
    #[serde(alias = "NAME", alias = "Name", default)]
    name: String,
    #[serde(alias = "EMAIL", alias = "Email", default)]
    email: String,
    #[serde(alias = "DEPARTMENT", alias = "Department")]
    department: Option<String>,
    #[serde(alias = "PHONE", alias = "Phone")]
    phone: Option<String>,
    #[serde(alias = "PASSWORD", alias = "Password")]
    password: Option<String>,
}

/// Imports mentors; rows whose email already exists are counted as processed
/// but not inserted.
pub async fn import_mentors_csv<R: Read>(
    pool: &SqlitePool,
    reader: R,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv_reader(reader);
    reader.headers()?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<MentorCsvRow>().enumerate() {
        summary.processed += 1;
        let line = index + 2;

        let row = match result {
            Ok(row) if !row.name.trim().is_empty() && !row.email.trim().is_empty() => row,
            Ok(_) => {
                tracing::warn!(line, "mentor row missing name or email");
                summary.errors += 1;
                continue;
            }
            Err(err) => {
                tracing::warn!(line, error = %err, "skipping mentor row");
                summary.errors += 1;
                continue;
            }
        };

        match find_mentor_by_email(pool, &row.email).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(line, error = %err, "failed to look up mentor");
                summary.errors += 1;
                continue;
            }
        }

        let mentor = NewMentor {
            name: row.name,
            email: row.email,
            department: non_empty(row.department),
            phone: non_empty(row.phone),
            password: non_empty(row.password),
        };
        match insert_mentor(pool, &mentor).await {
            Ok(_) => summary.inserted += 1,
            Err(err) => {
                tracing::warn!(line, error = %err, "failed to insert mentor");
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: i64,
    name: &'a str,
    roll_number: Option<&'a str>,
    email: Option<&'a str>,
    attendance: f64,
    performance: f64,
    risk_flag: i64,
    risk_level: Option<&'a str>,
    mentor_name: &'a str,
    mentor_email: &'a str,
}

/// Writes every student, ordered by name, as CSV. Returns the row count.
pub async fn export_students_csv<W: Write>(pool: &SqlitePool, writer: W) -> anyhow::Result<usize> {
    let students = list_students_with_mentor(pool).await?;
    let mut writer = csv::Writer::from_writer(writer);

    for student in students.iter() {
        writer.serialize(ExportRow {
            id: student.id,
            name: &student.name,
            roll_number: student.roll_number.as_deref(),
            email: student.email.as_deref(),
            attendance: student.attendance,
            performance: student.performance,
            risk_flag: student.risk_flag,
            risk_level: student.risk_level.as_deref(),
            mentor_name: student.mentor_name.as_deref().unwrap_or(""),
            mentor_email: student.mentor_email.as_deref().unwrap_or(""),
        })?;
    }
    writer.flush()?;

    Ok(students.len())
}
