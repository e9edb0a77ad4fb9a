use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use sqlx::PgConnection;

use crate::extract::{Json, Path};
use crate::{
    access,
    auth::AuthUser,
    db::Db,
    error::{AppError, AppResult},
    models::{AssignmentStatus, Enrollment, Lesson, Module},
    progress,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/course/:course_id", get(course_progress))
        .route("/module/:module_id", get(module_progress))
        .route("/lesson/:lesson_id", get(lesson_status))
        .route("/lesson/:lesson_id/complete", post(complete))
}

async fn enrollment(db: &Db, user_id: i32, course_id: i32) -> AppResult<Enrollment> {
    sqlx::query_as::<_, Enrollment>("SELECT * FROM enrollments WHERE user_id = $1 AND course_id = $2")
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::forbidden("Not enrolled in this course"))
}

/// Records `lesson_id` as finished for `user_id` and recomputes the enrollment's
/// progress from the completion ledger. Repeating a completion changes nothing.
pub(super) async fn complete_lesson(db: &Db, user_id: i32, lesson_id: i32) -> AppResult<Enrollment> {
    let owner = access::lesson(db, lesson_id).await?;
    let enrolled = enrollment(db, user_id, owner.course_id).await?;

    let mut tx = db.begin().await?;

    sqlx::query(
        "INSERT INTO lesson_completions (user_id, lesson_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(lesson_id)
    .execute(&mut *tx)
    .await?;

    let (total, done): (i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(l.id),
                  COUNT(lc.lesson_id)
           FROM lessons l
           JOIN modules m ON l.module_id = m.id
           LEFT JOIN lesson_completions lc ON lc.lesson_id = l.id AND lc.user_id = $1
           WHERE m.course_id = $2"#,
    )
    .bind(user_id)
    .bind(owner.course_id)
    .fetch_one(&mut *tx)
    .await?;

    let updated = store_progress(&mut tx, enrolled.id, progress::percent(done, total)).await?;

    tx.commit().await?;

    if updated.completed_at.is_some() && enrolled.completed_at.is_none() {
        tracing::info!(user_id, course_id = owner.course_id, "course completed");
    }
    Ok(updated)
}

async fn store_progress(conn: &mut PgConnection, enrollment_id: i32, pct: i32) -> AppResult<Enrollment> {
    let updated = sqlx::query_as::<_, Enrollment>(
        r#"UPDATE enrollments
           SET progress = $1,
               completed_at = CASE WHEN $1 >= 100 THEN COALESCE(completed_at, now()) ELSE completed_at END
           WHERE id = $2
           RETURNING *"#,
    )
    .bind(pct)
    .bind(enrollment_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(updated)
}

/// Recomputes every enrollment of `course_id` from the completion ledger. Run after
/// lessons are removed, inside the same transaction as the delete.
pub(super) async fn recompute_course(conn: &mut PgConnection, course_id: i32) -> AppResult<()> {
    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM lessons l
           JOIN modules m ON l.module_id = m.id
           WHERE m.course_id = $1"#,
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let done: Vec<(i32, i64)> = sqlx::query_as(
        r#"SELECT e.id, COUNT(l.id)
           FROM enrollments e
           LEFT JOIN lesson_completions lc ON lc.user_id = e.user_id
           LEFT JOIN lessons l ON l.id = lc.lesson_id
                AND l.module_id IN (SELECT id FROM modules WHERE course_id = $1)
           WHERE e.course_id = $1
           GROUP BY e.id"#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    for (enrollment_id, completed) in done {
        store_progress(conn, enrollment_id, progress::percent(completed, total)).await?;
    }
    Ok(())
}

async fn complete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let enrollment = complete_lesson(&state.db, user.id, lesson_id).await?;
    Ok(Json(json!({
        "message": "Lesson marked as complete",
        "newProgress": enrollment.progress,
        "enrollment": enrollment,
    })))
}

async fn lesson_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    access::lesson(&state.db, lesson_id).await?;

    let completed_at: Option<chrono::DateTime<chrono::Utc>> = sqlx::query_scalar(
        "SELECT completed_at FROM lesson_completions WHERE user_id = $1 AND lesson_id = $2",
    )
    .bind(user.id)
    .bind(lesson_id)
    .fetch_optional(&state.db)
    .await?;

    Ok(Json(json!({
        "lessonId": lesson_id,
        "completed": completed_at.is_some(),
        "completedAt": completed_at,
    })))
}

#[derive(sqlx::FromRow)]
struct LessonState {
    module_id: i32,
    completed: bool,
}

async fn course_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let enrollment = enrollment(&state.db, user.id, course_id).await?;

    let lessons = sqlx::query_as::<_, LessonState>(
        r#"SELECT l.module_id, (lc.lesson_id IS NOT NULL) AS completed
           FROM lessons l
           JOIN modules m ON l.module_id = m.id
           LEFT JOIN lesson_completions lc ON lc.lesson_id = l.id AND lc.user_id = $1
           WHERE m.course_id = $2"#,
    )
    .bind(user.id)
    .bind(course_id)
    .fetch_all(&state.db)
    .await?;

    let module_ids: Vec<i32> =
        sqlx::query_scalar("SELECT id FROM modules WHERE course_id = $1")
            .bind(course_id)
            .fetch_all(&state.db)
            .await?;

    // a module counts once every lesson in it is done; empty modules never do
    let modules_done = module_ids
        .iter()
        .filter(|id| {
            let mut own = lessons.iter().filter(|l| l.module_id == **id).peekable();
            own.peek().is_some() && own.all(|l| l.completed)
        })
        .count();

    let assignments = sqlx::query_as::<_, AssignmentStatus>(
        r#"SELECT a.*, l.title AS lesson_title,
                  s.id AS submission_id, s.submitted_at, s.grade, s.feedback
           FROM assignments a
           JOIN lessons l ON a.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           LEFT JOIN submissions s ON s.assignment_id = a.id AND s.user_id = $1
           WHERE m.course_id = $2
           ORDER BY m."order", l."order""#,
    )
    .bind(user.id)
    .bind(course_id)
    .fetch_all(&state.db)
    .await?;

    let (quizzes_total, quizzes_taken): (i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(DISTINCT q.lesson_id),
                  COUNT(DISTINCT qa.lesson_id)
           FROM quizzes q
           JOIN lessons l ON q.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           LEFT JOIN quiz_attempts qa ON qa.lesson_id = q.lesson_id AND qa.user_id = $1
           WHERE m.course_id = $2"#,
    )
    .bind(user.id)
    .bind(course_id)
    .fetch_one(&state.db)
    .await?;

    let submitted = assignments.iter().filter(|a| a.submitted_at.is_some()).count();
    let graded = assignments.iter().filter(|a| a.grade.is_some()).count();

    Ok(Json(json!({
        "message": "Course progress fetched",
        "progress": {
            "enrollment": enrollment,
            "modules": { "total": module_ids.len(), "completed": modules_done },
            "lessons": {
                "total": lessons.len(),
                "completed": lessons.iter().filter(|l| l.completed).count(),
            },
            "assignments": {
                "total": assignments.len(),
                "submitted": submitted,
                "graded": graded,
                "details": assignments,
            },
            "quizzes": { "total": quizzes_total, "attempted": quizzes_taken },
        }
    })))
}

#[derive(sqlx::FromRow, Serialize)]
struct ModuleInfo {
    #[sqlx(flatten)]
    #[serde(flatten)]
    module: Module,
    course_title: String,
}

#[derive(sqlx::FromRow, Serialize)]
struct LessonProgress {
    #[sqlx(flatten)]
    #[serde(flatten)]
    lesson: Lesson,
    #[serde(rename = "isCompleted")]
    is_completed: bool,
}

async fn module_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(module_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let module = sqlx::query_as::<_, ModuleInfo>(
        r#"SELECT m.*, c.title AS course_title
           FROM modules m
           JOIN courses c ON m.course_id = c.id
           WHERE m.id = $1"#,
    )
    .bind(module_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Module not found"))?;

    access::ensure_enrolled(&state.db, &user, module.module.course_id).await?;

    let lessons = sqlx::query_as::<_, LessonProgress>(
        r#"SELECT l.*, (lc.lesson_id IS NOT NULL) AS is_completed
           FROM lessons l
           LEFT JOIN lesson_completions lc ON lc.lesson_id = l.id AND lc.user_id = $1
           WHERE l.module_id = $2
           ORDER BY l."order", l.id"#,
    )
    .bind(user.id)
    .bind(module_id)
    .fetch_all(&state.db)
    .await?;

    let done = lessons.iter().filter(|l| l.is_completed).count();

    Ok(Json(json!({
        "message": "Module progress fetched",
        "module": module,
        "progress": {
            "totalLessons": lessons.len(),
            "completedLessons": done,
            "percentage": progress::percent(done as i64, lessons.len() as i64),
            "lessons": lessons,
        }
    })))
}
