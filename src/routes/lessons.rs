use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::extract::{Json, Path};
use crate::{
    access,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{ContentType, Lesson, Role},
    state::AppState,
};

use super::progress::{complete_lesson, recompute_course};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/module/:module_id", get(list).post(create))
        .route("/:lesson_id", get(detail).put(update).delete(remove))
        .route("/:lesson_id/complete", post(complete))
}

#[derive(Deserialize)]
struct LessonReq {
    title: Option<String>,
    content_type: Option<String>,
    content_url: Option<String>,
    duration: Option<i32>,
    description: Option<String>,
    order: Option<i32>,
}

pub(crate) fn parse_content_type(raw: &str) -> Result<ContentType, AppError> {
    match raw {
        "video" => Ok(ContentType::Video),
        "text" => Ok(ContentType::Text),
        "quiz" => Ok(ContentType::Quiz),
        _ => Err(AppError::bad_request("Invalid content type")),
    }
}

fn check_duration(d: Option<i32>) -> AppResult<()> {
    match d {
        Some(d) if d < 0 => Err(AppError::bad_request("Duration cannot be negative")),
        _ => Ok(()),
    }
}

async fn list(State(state): State<AppState>, Path(module_id): Path<i32>) -> AppResult<Json<serde_json::Value>> {
    let lessons = sqlx::query_as::<_, Lesson>(
        r#"SELECT * FROM lessons WHERE module_id = $1 ORDER BY "order", id"#,
    )
    .bind(module_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Lessons fetched", "lessons": lessons })))
}

#[derive(sqlx::FromRow, Serialize)]
struct LessonWithCourse {
    #[sqlx(flatten)]
    #[serde(flatten)]
    lesson: Lesson,
    course_id: i32,
}

#[derive(sqlx::FromRow, Serialize)]
struct Sibling {
    id: i32,
    title: String,
}

async fn detail(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let lesson = sqlx::query_as::<_, LessonWithCourse>(
        r#"SELECT l.*, m.course_id
           FROM lessons l
           JOIN modules m ON l.module_id = m.id
           WHERE l.id = $1"#,
    )
    .bind(lesson_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Lesson not found"))?;

    if user.is_student() {
        access::ensure_enrolled(&state.db, &user, lesson.course_id).await?;
    }

    let siblings = sqlx::query_as::<_, Sibling>(
        r#"SELECT id, title FROM lessons WHERE module_id = $1 ORDER BY "order", id"#,
    )
    .bind(lesson.lesson.module_id)
    .fetch_all(&state.db)
    .await?;

    let next_lesson_id = siblings
        .iter()
        .position(|s| s.id == lesson.lesson.id)
        .and_then(|idx| siblings.get(idx + 1))
        .map(|s| s.id);

    Ok(Json(json!({
        "message": "Lesson fetched",
        "lesson": lesson,
        "moduleLessons": siblings,
        "nextLessonId": next_lesson_id,
    })))
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Path(module_id): Path<i32>,
    Json(req): Json<LessonReq>,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Instructor])?;

    let title = req.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    let (Some(title), Some(raw_type)) = (title, req.content_type) else {
        return Err(AppError::bad_request("Title and content type are required"));
    };
    let content_type = parse_content_type(&raw_type)?;
    check_duration(req.duration)?;

    let owner = access::module(&state.db, module_id).await?;
    owner.ensure_owner(&user, "Not authorized to add lessons to this module")?;

    let lesson = sqlx::query_as::<_, Lesson>(
        r#"INSERT INTO lessons (module_id, title, content_type, content_url, duration, description, "order")
           VALUES ($1, $2, $3, $4, $5, $6,
                   COALESCE($7, (SELECT COALESCE(MAX("order"), 0) + 1 FROM lessons WHERE module_id = $1)))
           RETURNING *"#,
    )
    .bind(module_id)
    .bind(&title)
    .bind(content_type)
    .bind(req.content_url.filter(|u| !u.trim().is_empty()))
    .bind(req.duration.unwrap_or(0))
    .bind(req.description.filter(|d| !d.trim().is_empty()))
    .bind(req.order.filter(|o| *o > 0))
    .fetch_one(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Lesson created successfully", "lesson": lesson })),
    ))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
    Json(req): Json<LessonReq>,
) -> AppResult<Json<serde_json::Value>> {
    let content_type = req.content_type.as_deref().map(parse_content_type).transpose()?;
    check_duration(req.duration)?;

    let owner = access::lesson(&state.db, lesson_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to update this lesson")?;

    let lesson = sqlx::query_as::<_, Lesson>(
        r#"UPDATE lessons
           SET title = COALESCE($1, title),
               content_type = COALESCE($2, content_type),
               content_url = COALESCE($3, content_url),
               duration = COALESCE($4, duration),
               description = COALESCE($5, description),
               "order" = COALESCE($6, "order")
           WHERE id = $7
           RETURNING *"#,
    )
    .bind(req.title.filter(|t| !t.trim().is_empty()))
    .bind(content_type)
    .bind(req.content_url)
    .bind(req.duration)
    .bind(req.description)
    .bind(req.order)
    .bind(lesson_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Lesson updated successfully", "lesson": lesson })))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let owner = access::lesson(&state.db, lesson_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to delete this lesson")?;

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM lessons WHERE id = $1")
        .bind(lesson_id)
        .execute(&mut *tx)
        .await?;
    recompute_course(&mut tx, owner.course_id).await?;
    tx.commit().await?;

    Ok(Json(json!({ "message": "Lesson deleted successfully" })))
}

async fn complete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Student])?;
    let enrollment = complete_lesson(&state.db, user.id, lesson_id).await?;

    Ok(Json(json!({
        "message": "Lesson marked as complete",
        "progress": enrollment.progress,
        "completed_at": enrollment.completed_at,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(parse_content_type("video").unwrap(), ContentType::Video);
        assert_eq!(parse_content_type("quiz").unwrap(), ContentType::Quiz);
        assert!(parse_content_type("assignment").is_err());
        assert!(parse_content_type("VIDEO").is_err());
    }
}
