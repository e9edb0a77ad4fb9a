use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::extract::{Json, Path};
use crate::{
    access,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{Assignment, AssignmentStatus, Role, Submission},
    state::AppState,
    uploads::{self, IncomingFile, UploadKind},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lesson/:lesson_id", get(lesson_assignment).post(create))
        .route("/course/:course_id", get(course_assignments))
        .route("/submission/:submission_id/grade", put(grade))
        .route("/:assignment_id", delete(remove))
        .route("/:assignment_id/submit", post(submit))
        .route("/:assignment_id/submissions", get(submissions))
}

#[derive(Deserialize)]
struct AssignmentReq {
    title: Option<String>,
    description: Option<String>,
    deadline: Option<String>,
}

#[serde_as]
#[derive(Deserialize)]
struct GradeReq {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    grade: Option<f64>,
    feedback: Option<String>,
}

/// Accepts RFC 3339, `datetime-local` input values (taken as UTC), or a bare date
/// meaning the end of that day.
pub(crate) fn parse_deadline(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|n| n.and_utc())
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
    Json(req): Json<AssignmentReq>,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Instructor])?;

    let (Some(title), Some(description)) = (non_blank(req.title), non_blank(req.description)) else {
        return Err(AppError::bad_request("Title and description are required"));
    };
    let deadline = match non_blank(req.deadline) {
        Some(raw) => Some(parse_deadline(&raw).ok_or_else(|| AppError::bad_request("Invalid deadline"))?),
        None => None,
    };

    let owner = access::lesson(&state.db, lesson_id).await?;
    owner.ensure_owner(&user, "Not authorized to add assignment to this lesson")?;

    let assignment = sqlx::query_as::<_, Assignment>(
        r#"INSERT INTO assignments (lesson_id, title, description, deadline)
           VALUES ($1, $2, $3, $4)
           ON CONFLICT (lesson_id) DO NOTHING
           RETURNING *"#,
    )
    .bind(lesson_id)
    .bind(&title)
    .bind(&description)
    .bind(deadline)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::bad_request("Assignment already exists for this lesson"))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Assignment created successfully", "assignment": assignment })),
    ))
}

async fn lesson_assignment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let owner = access::lesson(&state.db, lesson_id).await?;

    let assignment = sqlx::query_as::<_, Assignment>("SELECT * FROM assignments WHERE lesson_id = $1")
        .bind(lesson_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("No assignment found for this lesson"))?;

    if !user.is_student() {
        return Ok(Json(json!({ "message": "Assignment fetched", "assignment": assignment })));
    }

    access::ensure_enrolled(&state.db, &user, owner.course_id).await?;
    let submission = sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE assignment_id = $1 AND user_id = $2",
    )
    .bind(assignment.id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;

    Ok(Json(json!({
        "message": "Assignment fetched",
        "assignment": assignment,
        "submission": submission,
    })))
}

/// What a student hands in. At least one part must be present.
#[derive(Debug, Default)]
pub(super) struct Work {
    pub url: Option<String>,
    pub text: Option<String>,
    pub file: Option<IncomingFile>,
}

impl Work {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.text.is_none() && self.file.is_none()
    }
}

/// Creates the caller's single submission for `assignment_id`. The file, if any, is
/// written only after every check passes and is removed again if the insert loses a race.
pub(super) async fn submit_work(
    state: &AppState,
    user: &AuthUser,
    assignment_id: i32,
    work: Work,
) -> AppResult<Submission> {
    let assignment = sqlx::query_as::<_, Assignment>("SELECT * FROM assignments WHERE id = $1")
        .bind(assignment_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Assignment not found"))?;

    if assignment.deadline_passed(Utc::now()) {
        return Err(AppError::bad_request("Assignment deadline has passed"));
    }

    let owner = access::assignment(&state.db, assignment_id).await?;
    access::ensure_enrolled(&state.db, user, owner.course_id).await?;

    let stored = match &work.file {
        Some(f) => Some(state.storage.save(UploadKind::Assignment, f).await?),
        None => None,
    };
    let file_url = stored.as_ref().map(|s| s.url.clone());

    let inserted = sqlx::query_as::<_, Submission>(
        r#"INSERT INTO submissions (assignment_id, user_id, submission_url, submission_text, submission_file_url)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT (assignment_id, user_id) DO NOTHING
           RETURNING *"#,
    )
    .bind(assignment_id)
    .bind(user.id)
    .bind(&work.url)
    .bind(&work.text)
    .bind(&file_url)
    .fetch_optional(&state.db)
    .await;

    match inserted {
        Ok(Some(sub)) => {
            tracing::info!(assignment_id, user_id = user.id, "assignment submitted");
            Ok(sub)
        }
        Ok(None) => {
            if let Some(url) = &file_url {
                state.storage.remove_url(url).await;
            }
            Err(AppError::bad_request("Assignment already submitted"))
        }
        Err(e) => {
            if let Some(url) = &file_url {
                state.storage.remove_url(url).await;
            }
            Err(e.into())
        }
    }
}

async fn submit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<i32>,
    mp: Multipart,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Student])?;

    let form = uploads::read_form(mp, UploadKind::Assignment).await?;
    let work = Work {
        url: form.text("submission_url"),
        text: form.text("submission_text"),
        file: form.file,
    };
    if work.is_empty() {
        return Err(AppError::bad_request("Submission URL, text or file is required"));
    }

    let submission = submit_work(&state, &user, assignment_id, work).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Assignment submitted successfully", "submission": submission })),
    ))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Instructor])?;

    let owner = access::assignment(&state.db, assignment_id).await?;
    owner.ensure_owner(&user, "Not authorized to delete this assignment")?;

    let files: Vec<String> = sqlx::query_scalar(
        "SELECT submission_file_url FROM submissions WHERE assignment_id = $1 AND submission_file_url IS NOT NULL",
    )
    .bind(assignment_id)
    .fetch_all(&state.db)
    .await?;

    sqlx::query("DELETE FROM assignments WHERE id = $1")
        .bind(assignment_id)
        .execute(&state.db)
        .await?;

    for url in &files {
        state.storage.remove_url(url).await;
    }

    Ok(Json(json!({ "message": "Assignment deleted successfully" })))
}

async fn grade(
    State(state): State<AppState>,
    user: AuthUser,
    Path(submission_id): Path<i32>,
    Json(req): Json<GradeReq>,
) -> AppResult<Json<serde_json::Value>> {
    let grade = req
        .grade
        .filter(|g| g.is_finite() && (0.0..=100.0).contains(g))
        .ok_or_else(|| AppError::bad_request("Grade must be between 0 and 100"))?;

    let owner = access::submission(&state.db, submission_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to grade this submission")?;

    let submission = sqlx::query_as::<_, Submission>(
        r#"UPDATE submissions
           SET grade = $1, feedback = $2, graded_at = now()
           WHERE id = $3
           RETURNING *"#,
    )
    .bind(grade)
    .bind(non_blank(req.feedback))
    .bind(submission_id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(submission_id, grade, by = user.id, "submission graded");

    Ok(Json(json!({ "message": "Assignment graded successfully", "submission": submission })))
}

#[derive(sqlx::FromRow, Serialize)]
struct SubmissionRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    submission: Submission,
    student_name: String,
    student_email: String,
}

async fn submissions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let owner = access::assignment(&state.db, assignment_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to view these submissions")?;

    let rows = sqlx::query_as::<_, SubmissionRow>(
        r#"SELECT s.*, u.name AS student_name, u.email AS student_email
           FROM submissions s
           JOIN users u ON s.user_id = u.id
           WHERE s.assignment_id = $1
           ORDER BY s.submitted_at DESC"#,
    )
    .bind(assignment_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "submissions": rows })))
}

async fn course_assignments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let rows = sqlx::query_as::<_, AssignmentStatus>(
        r#"SELECT a.*, l.title AS lesson_title,
                  s.id AS submission_id, s.submitted_at, s.grade, s.feedback
           FROM assignments a
           JOIN lessons l ON a.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           LEFT JOIN submissions s ON s.assignment_id = a.id AND s.user_id = $2
           WHERE m.course_id = $1
           ORDER BY m."order", l."order""#,
    )
    .bind(course_id)
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "assignments": rows })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn deadline_formats() {
        let d = parse_deadline("2025-03-01T12:30:00Z").unwrap();
        assert_eq!((d.month(), d.hour(), d.minute()), (3, 12, 30));

        let d = parse_deadline("2025-03-01T12:30:00+02:00").unwrap();
        assert_eq!(d.hour(), 10);

        let d = parse_deadline("2025-03-01T08:15").unwrap();
        assert_eq!((d.hour(), d.minute()), (8, 15));

        let d = parse_deadline("2025-03-01").unwrap();
        assert_eq!((d.day(), d.hour()), (1, 23));

        assert!(parse_deadline("next friday").is_none());
    }

    #[test]
    fn grade_accepts_string_form() {
        let r: GradeReq = serde_json::from_str(r#"{"grade": "87.5"}"#).unwrap();
        assert_eq!(r.grade, Some(87.5));
        let r: GradeReq = serde_json::from_str(r#"{"grade": 90, "feedback": "ok"}"#).unwrap();
        assert_eq!(r.grade, Some(90.0));
        let r: GradeReq = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(r.grade, None);
    }

    #[test]
    fn empty_work_is_rejected() {
        assert!(Work::default().is_empty());
        let w = Work {
            text: Some("answer".into()),
            ..Default::default()
        };
        assert!(!w.is_empty());
    }
}
