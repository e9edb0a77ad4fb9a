use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::{serde_as, DisplayFromStr, NoneAsEmptyString, PickFirst};

use crate::extract::{Json, Path, Query};
use crate::{
    access,
    auth::AuthUser,
    db::is_unique_violation,
    error::{AppError, AppResult},
    models::{Course, Enrollment, Role},
    progress,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(enroll))
        .route("/my-courses", get(my_courses))
        .route("/stats", get(stats))
        .route("/course/:course_id/students", get(course_students))
        .route("/:id/progress", put(update_progress))
}

#[serde_as]
#[derive(Deserialize)]
struct EnrollReq {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    course_id: Option<i32>,
}

#[serde_as]
#[derive(Deserialize)]
struct ProgressReq {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    progress: Option<i32>,
}

#[serde_as]
#[derive(Deserialize, Default)]
struct ListParams {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    course_id: Option<i32>,
}

async fn enroll(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<EnrollReq>,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Student])?;
    let course_id = req
        .course_id
        .ok_or_else(|| AppError::bad_request("Course ID is required"))?;

    let course = sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
        .bind(course_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;
    if !course.is_visible() {
        return Err(AppError::bad_request("Course is not open for enrollment"));
    }

    let enrollment = sqlx::query_as::<_, Enrollment>(
        r#"INSERT INTO enrollments (user_id, course_id)
           VALUES ($1, $2)
           RETURNING *"#,
    )
    .bind(user.id)
    .bind(course.id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::bad_request("Already enrolled in this course")
        } else {
            e.into()
        }
    })?;

    tracing::info!(user_id = user.id, course_id, "enrolled");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Enrolled successfully",
            "enrollment": enrollment,
        })),
    ))
}

#[derive(sqlx::FromRow, Serialize)]
struct EnrollmentRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    enrollment: Enrollment,
    user_name: String,
    user_email: String,
    course_title: String,
}

/// Admins see every enrollment, instructors only those in their own courses.
async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<EnrollmentRow>>> {
    user.require(&[Role::Instructor, Role::Admin])?;

    let rows = sqlx::query_as::<_, EnrollmentRow>(
        r#"SELECT e.*, u.name AS user_name, u.email AS user_email, c.title AS course_title
           FROM enrollments e
           JOIN users u ON e.user_id = u.id
           JOIN courses c ON e.course_id = c.id
           WHERE ($1::int IS NULL OR e.course_id = $1)
             AND ($2 OR c.instructor_id = $3)
           ORDER BY e.enrolled_at DESC"#,
    )
    .bind(params.course_id)
    .bind(user.is_admin())
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

#[derive(sqlx::FromRow, Serialize)]
struct MyCourse {
    #[sqlx(flatten)]
    #[serde(flatten)]
    enrollment: Enrollment,
    course_title: String,
    course_description: String,
    thumbnail: Option<String>,
    price: f64,
    instructor_name: String,
}

async fn my_courses(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Vec<MyCourse>>> {
    let rows = sqlx::query_as::<_, MyCourse>(
        r#"SELECT e.*,
                  c.title AS course_title,
                  c.description AS course_description,
                  c.thumbnail,
                  c.price,
                  u.name AS instructor_name
           FROM enrollments e
           JOIN courses c ON e.course_id = c.id
           JOIN users u ON c.instructor_id = u.id
           WHERE e.user_id = $1
           ORDER BY e.enrolled_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

#[derive(sqlx::FromRow, Serialize)]
struct StudentRow {
    enrollment_id: i32,
    enrolled_at: DateTime<Utc>,
    progress: i32,
    completed_at: Option<DateTime<Utc>>,
    student_id: i32,
    student_name: String,
    student_email: String,
}

async fn course_students(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Instructor, Role::Admin])?;

    let owner = access::course(&state.db, course_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized")?;

    let students = sqlx::query_as::<_, StudentRow>(
        r#"SELECT e.id AS enrollment_id, e.enrolled_at, e.progress, e.completed_at,
                  u.id AS student_id, u.name AS student_name, u.email AS student_email
           FROM enrollments e
           JOIN users u ON e.user_id = u.id
           WHERE e.course_id = $1
           ORDER BY e.enrolled_at DESC"#,
    )
    .bind(course_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Students fetched", "students": students })))
}

async fn update_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(req): Json<ProgressReq>,
) -> AppResult<Json<serde_json::Value>> {
    let value = req
        .progress
        .filter(|p| progress::is_valid_progress(*p))
        .ok_or_else(|| AppError::bad_request("Progress must be between 0 and 100"))?;

    let current = sqlx::query_as::<_, Enrollment>("SELECT * FROM enrollments WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Enrollment not found"))?;

    if current.user_id != user.id && !user.is_admin() {
        return Err(AppError::forbidden("Not authorized to update this enrollment"));
    }

    let enrollment = sqlx::query_as::<_, Enrollment>(
        r#"UPDATE enrollments
           SET progress = $1,
               completed_at = CASE WHEN $1 >= 100 THEN COALESCE(completed_at, now()) ELSE completed_at END
           WHERE id = $2
           RETURNING *"#,
    )
    .bind(value)
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Progress updated", "enrollment": enrollment })))
}

#[derive(sqlx::FromRow, Serialize)]
struct Totals {
    total_enrollments: i64,
    completed_enrollments: i64,
    active_students: i64,
    average_progress: f64,
    enrollments_last_30_days: i64,
}

#[derive(sqlx::FromRow, Serialize)]
struct PopularCourse {
    course_id: i32,
    title: String,
    enrollments: i64,
    average_progress: f64,
}

async fn stats(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let totals = sqlx::query_as::<_, Totals>(
        r#"SELECT COUNT(*) AS total_enrollments,
                  COUNT(*) FILTER (WHERE completed_at IS NOT NULL) AS completed_enrollments,
                  COUNT(DISTINCT user_id) AS active_students,
                  COALESCE(AVG(progress), 0)::float8 AS average_progress,
                  COUNT(*) FILTER (WHERE enrolled_at > now() - INTERVAL '30 days') AS enrollments_last_30_days
           FROM enrollments"#,
    )
    .fetch_one(&state.db)
    .await?;

    let popular = sqlx::query_as::<_, PopularCourse>(
        r#"SELECT c.id AS course_id, c.title,
                  COUNT(e.id) AS enrollments,
                  COALESCE(AVG(e.progress), 0)::float8 AS average_progress
           FROM courses c
           JOIN enrollments e ON e.course_id = c.id
           GROUP BY c.id, c.title
           ORDER BY enrollments DESC, c.id
           LIMIT 5"#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({
        "message": "Enrollment stats fetched",
        "stats": totals,
        "popularCourses": popular,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_id_from_number_or_string() {
        let r: EnrollReq = serde_json::from_str(r#"{"course_id": 5}"#).unwrap();
        assert_eq!(r.course_id, Some(5));
        let r: EnrollReq = serde_json::from_str(r#"{"course_id": "12"}"#).unwrap();
        assert_eq!(r.course_id, Some(12));
        let r: EnrollReq = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(r.course_id, None);
    }

    #[test]
    fn progress_from_number_or_string() {
        let r: ProgressReq = serde_json::from_str(r#"{"progress": "40"}"#).unwrap();
        assert_eq!(r.progress, Some(40));
        let r: ProgressReq = serde_json::from_str(r#"{"progress": 100}"#).unwrap();
        assert_eq!(r.progress, Some(100));
    }
}
