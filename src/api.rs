use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use axum_extra::extract::WithRejection;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{self, jwt_auth_middleware, AuthSession, JwtService};
use crate::db;
use crate::error::ApiError;
use crate::models::{
    FeeStatus, ImportSummary, LoginRequest, NewMentor, NewStudent, RiskLevel, RiskLevelUpdate,
    RiskPreviewRequest, Role, SignupRequest, Student,
};
use crate::prediction::{self, PredictionClient};
use crate::{recommend, risk};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: JwtService,
    pub predictor: PredictionClient,
}

type ApiResult<T = Response> = Result<T, ApiError>;

const ENDPOINTS: [&str; 21] = [
    "POST /auth/signup",
    "POST /auth/login",
    "POST /risk/preview",
    "POST /students",
    "GET /students",
    "GET /students/high-risk",
    "GET /students/medium-risk",
    "GET /students/low-risk",
    "GET /students/:id",
    "PUT /students/:id/risk-level",
    "GET /admin/students",
    "GET /admin/students/:id",
    "GET /admin/students/:id/predict",
    "POST /admin/students/import",
    "GET /admin/students/export-csv",
    "POST /admin/mentors/add",
    "POST /admin/mentors/import",
    "GET /admin/isdataadded",
    "PUT /admin/toggle-data-added",
    "GET /mentor/students",
    "GET /student/me",
];

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/admin/students", get(admin_list_students))
        .route("/admin/students/import", post(import_students))
        .route("/admin/students/export-csv", get(export_students))
        .route("/admin/students/:id", get(admin_get_student))
        .route("/admin/students/:id/predict", get(predict_student))
        .route("/admin/mentors/add", post(add_mentor))
        .route("/admin/mentors/import", post(import_mentors))
        .route("/admin/isdataadded", get(get_data_added))
        .route("/admin/toggle-data-added", put(toggle_data_added))
        .route("/mentor/students", get(mentor_students))
        .route("/student/me", get(student_me))
        .route_layer(middleware::from_fn_with_state(
            state.jwt.clone(),
            jwt_auth_middleware,
        ));

    Router::new()
        .route("/", get(index))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/risk/preview", post(preview_risk))
        .route("/students", get(list_students).post(create_student))
        .route("/students/high-risk", get(high_risk_students))
        .route("/students/medium-risk", get(medium_risk_students))
        .route("/students/low-risk", get(low_risk_students))
        .route("/students/:id", get(get_student))
        .route("/students/:id/risk-level", put(update_risk_level))
        .merge(protected)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn student_list(message: &str, students: Vec<Student>) -> Response {
    Json(json!({
        "success": true,
        "message": message,
        "count": students.len(),
        "data": students,
    }))
    .into_response()
}

async fn index() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Dropout Prediction API running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": "Endpoint not found",
            "availableEndpoints": ENDPOINTS,
        })),
    )
        .into_response()
}

async fn signup(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<SignupRequest>, ApiError>,
) -> ApiResult {
    let name = body.name.trim();
    let email = body.email.trim();
    if name.is_empty() || email.is_empty() || body.password.is_empty() || body.role.is_empty() {
        return Err(ApiError::validation(
            "name, email, password, role are required",
        ));
    }
    let role = Role::parse(body.role.trim()).ok_or_else(|| ApiError::validation("Invalid role"))?;

    let password_hash = auth::hash_password(&body.password)?;
    let user = db::create_user(&state.pool, name, email, &password_hash, role)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => ApiError::Conflict("Email already registered".to_string()),
            other => other,
        })?;
    let token = state.jwt.issue(&user)?;
    tracing::info!(user_id = user.id, role = role.as_str(), "user signed up");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": { "user": user, "token": token } })),
    )
        .into_response())
}

async fn login(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> ApiResult {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::validation("email and password required"));
    }

    let credentials = db::find_user_by_email(&state.pool, body.email.trim())
        .await?
        .ok_or(ApiError::InvalidCredentials)?;
    if !auth::verify_password(&body.password, &credentials.password_hash) {
        return Err(ApiError::InvalidCredentials);
    }

    let token = state.jwt.issue(&credentials.user)?;
    Ok(Json(json!({
        "success": true,
        "data": { "user": credentials.user, "token": token },
    }))
    .into_response())
}

/// Scores ad-hoc inputs without touching storage so clients never carry their
/// own copy of the thresholds.
async fn preview_risk(
    WithRejection(Json(body), _): WithRejection<Json<RiskPreviewRequest>, ApiError>,
) -> Json<Value> {
    let attendance = body.attendance.unwrap_or(0.0);
    let academic = body
        .score
        .or_else(|| body.performance.as_ref().map(risk::normalize_performance))
        .unwrap_or(0.0);
    let backlogs = body.backlogs.unwrap_or(0).max(0);
    let fee_status = FeeStatus::from_stored(body.fee_status.as_deref());

    let assessment = risk::score_risk(attendance, academic, fee_status);
    let recommendations = recommend::generate_recommendations(attendance, backlogs, fee_status);

    Json(json!({
        "success": true,
        "data": {
            "risk_score": assessment.risk_score,
            "risk_level": assessment.risk_level,
            "risk_flag": risk::risk_flag(attendance),
            "recommendations": recommendations,
        },
    }))
}

async fn create_student(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<NewStudent>, ApiError>,
) -> ApiResult {
    let draft = body.into_draft().map_err(ApiError::Validation)?;
    if let Some(mentor_id) = draft.mentor_id {
        if !db::mentor_exists(&state.pool, mentor_id).await? {
            return Err(ApiError::validation(format!("Mentor {mentor_id} does not exist")));
        }
    }

    let student = db::insert_student(&state.pool, &draft).await?;
    tracing::info!(
        student_id = student.id,
        risk_level = student.risk_level.as_deref().unwrap_or(""),
        "student added"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Student added successfully",
            "data": student,
        })),
    )
        .into_response())
}

async fn list_students(State(state): State<AppState>) -> ApiResult {
    let students = db::list_students(&state.pool).await?;
    Ok(student_list("Students fetched successfully", students))
}

async fn students_at_level(pool: &SqlitePool, level: RiskLevel) -> ApiResult {
    let students = db::list_by_risk_level(pool, level).await?;
    let message = format!("{}-risk students fetched successfully", level);
    Ok(student_list(&message, students))
}

async fn high_risk_students(State(state): State<AppState>) -> ApiResult {
    students_at_level(&state.pool, RiskLevel::High).await
}

async fn medium_risk_students(State(state): State<AppState>) -> ApiResult {
    students_at_level(&state.pool, RiskLevel::Medium).await
}

async fn low_risk_students(State(state): State<AppState>) -> ApiResult {
    students_at_level(&state.pool, RiskLevel::Low).await
}

async fn get_student(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> ApiResult {
    let student = db::get_student(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    Ok(Json(json!({
        "success": true,
        "message": "Student fetched successfully",
        "data": student,
    }))
    .into_response())
}

async fn update_risk_level(
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
    WithRejection(Json(body), _): WithRejection<Json<RiskLevelUpdate>, ApiError>,
) -> ApiResult {
    let raw = body
        .risk_level
        .filter(|level| !level.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Risk level is required"))?;
    let level = RiskLevel::parse(&raw)
        .ok_or_else(|| ApiError::validation("Risk level must be one of: Low, Medium, High"))?;

    if !db::update_risk_level(&state.pool, id, level).await? {
        return Err(ApiError::not_found("Student not found"));
    }

    Ok(Json(json!({
        "success": true,
        "message": "Risk level updated successfully",
        "data": { "id": id, "risk_level": level },
    }))
    .into_response())
}

async fn admin_list_students(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    let students = db::list_students_with_mentor(&state.pool).await?;
    Ok(student_list("Students fetched successfully", students))
}

async fn admin_get_student(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    let student = db::get_student(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;
    Ok(Json(json!({ "success": true, "data": student })).into_response())
}

async fn predict_student(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
    WithRejection(Path(id), _): WithRejection<Path<i64>, ApiError>,
) -> ApiResult {
    session.require_role(&[Role::Admin, Role::Mentor])?;
    let student = db::get_student(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Student not found"))?;

    let data = prediction::predict_or_fallback(&state.predictor, &student).await;
    tracing::debug!(student_id = id, fallback = data.is_fallback(), "prediction served");
    Ok(Json(json!({ "success": true, "data": data })).into_response())
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::validation(err.to_string()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::validation(err.to_string()))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(ApiError::validation("No file uploaded"))
}

fn import_response(summary: ImportSummary, label: &str) -> Response {
    if summary.processed == 0 {
        return Json(json!({ "success": true, "message": "No rows to import", "count": 0 }))
            .into_response();
    }

    if summary.errors > 0 {
        (
            StatusCode::MULTI_STATUS,
            Json(json!({
                "success": false,
                "message": "Import completed with errors",
                "count": summary.processed,
                "data": summary,
            })),
        )
            .into_response()
    } else {
        Json(json!({
            "success": true,
            "message": format!("{label} import completed"),
            "count": summary.processed,
            "data": summary,
        }))
        .into_response()
    }
}

async fn import_students(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    let upload = read_upload(multipart).await?;
    let summary = db::import_students_csv(&state.pool, upload.as_slice()).await?;
    Ok(import_response(summary, "Student"))
}

async fn import_mentors(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    let upload = read_upload(multipart).await?;
    let summary = db::import_mentors_csv(&state.pool, upload.as_slice()).await?;
    Ok(import_response(summary, "Mentor"))
}

async fn export_students(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    let mut buffer = Vec::new();
    db::export_students_csv(&state.pool, &mut buffer).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"students.csv\"",
            ),
        ],
        buffer,
    )
        .into_response())
}

async fn add_mentor(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<NewMentor>, ApiError>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    if body.name.trim().is_empty() || body.email.trim().is_empty() {
        return Err(ApiError::validation("Name and Email are required"));
    }

    let mentor_id = db::insert_mentor(&state.pool, &body)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => {
                ApiError::Conflict("Mentor already exists with this email".to_string())
            }
            other => other,
        })?;

    Ok(Json(json!({
        "success": true,
        "message": "Mentor added successfully",
        "mentor_id": mentor_id,
    }))
    .into_response())
}

async fn get_data_added(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    let flag = db::get_data_added(&state.pool, session.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    Ok(Json(json!({ "success": true, "isdataadded": flag as i64 })).into_response())
}

async fn toggle_data_added(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
) -> ApiResult {
    session.require_role(&[Role::Admin])?;
    let flag = db::toggle_data_added(&state.pool, session.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("isdataadded updated to {}.", flag as i64),
    }))
    .into_response())
}

async fn mentor_students(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
) -> ApiResult {
    session.require_role(&[Role::Mentor])?;
    let mentor = db::find_mentor_for_user(&state.pool, session.user_id, &session.email)
        .await?
        .ok_or_else(|| ApiError::not_found("Mentor profile not found"))?;
    let students = db::list_students_for_mentor(&state.pool, mentor.id).await?;
    Ok(Json(json!({ "success": true, "count": students.len(), "data": students })).into_response())
}

async fn student_me(
    Extension(session): Extension<AuthSession>,
    State(state): State<AppState>,
) -> ApiResult {
    session.require_role(&[Role::Student])?;
    let student = db::get_student_by_email(&state.pool, &session.email)
        .await?
        .ok_or_else(|| ApiError::not_found("Student profile not found"))?;
    Ok(Json(json!({ "success": true, "data": student })).into_response())
}
