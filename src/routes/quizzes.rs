use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::types::Json as JsonColumn;

use crate::extract::{Json, Path};
use crate::{
    access,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{Question, QuestionType, Role},
    quiz::{self, QuestionInput, QuizError, ValidQuestion},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lesson/:lesson_id", get(lesson_quiz).post(create))
        .route("/lesson/:lesson_id/submit", post(submit))
        .route("/lesson/:lesson_id/attempts", get(attempts))
        .route("/question/:question_id", put(update_question).delete(delete_question))
        .route("/course/:course_id", get(course_quizzes))
}

#[derive(Deserialize)]
struct BatchReq {
    questions: Option<Vec<QuestionInput>>,
}

#[derive(Deserialize)]
struct SubmitReq {
    answers: Option<Vec<Value>>,
}

/// A question with the answer key removed, as students receive it.
#[derive(Serialize)]
struct PublicQuestion<'a> {
    id: i32,
    question: &'a str,
    #[serde(rename = "type")]
    kind: QuestionType,
    options: &'a [String],
}

impl<'a> From<&'a Question> for PublicQuestion<'a> {
    fn from(q: &'a Question) -> Self {
        Self {
            id: q.id,
            question: &q.question,
            kind: q.kind,
            options: &q.options.0,
        }
    }
}

async fn questions_for(state: &AppState, lesson_id: i32) -> AppResult<Vec<Question>> {
    let rows = sqlx::query_as::<_, Question>("SELECT * FROM quizzes WHERE lesson_id = $1 ORDER BY id")
        .bind(lesson_id)
        .fetch_all(&state.db)
        .await?;
    Ok(rows)
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
    Json(req): Json<BatchReq>,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Instructor])?;
    let batch = quiz::validate_batch(req.questions.as_deref().unwrap_or_default())?;

    let owner = access::lesson(&state.db, lesson_id).await?;
    owner.ensure_owner(&user, "Not authorized to add questions to this lesson")?;

    let mut tx = state.db.begin().await?;
    let mut inserted = Vec::with_capacity(batch.len());
    for q in &batch {
        let row = sqlx::query_as::<_, Question>(
            r#"INSERT INTO quizzes (lesson_id, question, type, options, correct_answer, answer)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(lesson_id)
        .bind(&q.question)
        .bind(q.kind)
        .bind(JsonColumn(&q.options))
        .bind(q.correct_answer)
        .bind(&q.answer)
        .fetch_one(&mut *tx)
        .await?;
        inserted.push(row);
    }
    tx.commit().await?;

    tracing::info!(lesson_id, count = inserted.len(), "quiz questions added");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Questions added", "quiz": inserted })),
    ))
}

#[derive(sqlx::FromRow, Serialize)]
struct AttemptScore {
    score: i32,
    submitted_at: DateTime<Utc>,
}

async fn lesson_quiz(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let owner = access::lesson(&state.db, lesson_id).await?;
    if user.is_student() {
        access::ensure_enrolled(&state.db, &user, owner.course_id).await?;
    }

    let questions = questions_for(&state, lesson_id).await?;

    if !(owner.is(&user) || user.is_admin()) {
        let public: Vec<PublicQuestion> = questions.iter().map(PublicQuestion::from).collect();

        let attempt = if user.is_student() {
            sqlx::query_as::<_, AttemptScore>(
                "SELECT score, submitted_at FROM quiz_attempts WHERE user_id = $1 AND lesson_id = $2",
            )
            .bind(user.id)
            .bind(lesson_id)
            .fetch_optional(&state.db)
            .await?
        } else {
            None
        };

        return Ok(Json(json!({
            "message": "Quiz fetched",
            "quiz": public,
            "attempt": attempt,
        })));
    }

    Ok(Json(json!({
        "message": "Quiz fetched",
        "quiz": questions,
        "attempt": null,
    })))
}

async fn submit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
    Json(req): Json<SubmitReq>,
) -> AppResult<Json<Value>> {
    user.require(&[Role::Student])?;
    let answers = req.answers.ok_or(QuizError::NoAnswers)?;

    let owner = access::lesson(&state.db, lesson_id).await?;
    access::ensure_enrolled(&state.db, &user, owner.course_id).await?;

    let questions = questions_for(&state, lesson_id).await?;
    if questions.is_empty() {
        return Err(AppError::not_found("No quiz found for this lesson"));
    }

    let graded = quiz::grade(&questions, &answers);

    sqlx::query(
        r#"INSERT INTO quiz_attempts (user_id, lesson_id, score)
           VALUES ($1, $2, $3)
           ON CONFLICT (user_id, lesson_id)
           DO UPDATE SET score = EXCLUDED.score, submitted_at = now()"#,
    )
    .bind(user.id)
    .bind(lesson_id)
    .bind(graded.score)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = user.id, lesson_id, score = graded.score, "quiz submitted");

    let mut body = json!(graded);
    body["message"] = json!("Quiz submitted");
    Ok(Json(body))
}

async fn update_question(
    State(state): State<AppState>,
    user: AuthUser,
    Path(question_id): Path<i32>,
    Json(patch): Json<QuestionInput>,
) -> AppResult<Json<Value>> {
    user.require(&[Role::Instructor, Role::Admin])?;

    let owner = access::question(&state.db, question_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to update this question")?;

    let stored = sqlx::query_as::<_, Question>("SELECT * FROM quizzes WHERE id = $1")
        .bind(question_id)
        .fetch_one(&state.db)
        .await?;
    let ValidQuestion {
        kind,
        question,
        options,
        correct_answer,
        answer,
    } = quiz::merge(&stored, &patch)?;

    let updated = sqlx::query_as::<_, Question>(
        r#"UPDATE quizzes
           SET question = $1, type = $2, options = $3, correct_answer = $4, answer = $5
           WHERE id = $6
           RETURNING *"#,
    )
    .bind(&question)
    .bind(kind)
    .bind(JsonColumn(&options))
    .bind(correct_answer)
    .bind(&answer)
    .bind(question_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Question updated", "question": updated })))
}

async fn delete_question(
    State(state): State<AppState>,
    user: AuthUser,
    Path(question_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require(&[Role::Instructor, Role::Admin])?;

    let owner = access::question(&state.db, question_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to delete this question")?;

    sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(question_id)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({ "message": "Question deleted successfully" })))
}

#[derive(sqlx::FromRow, Serialize)]
struct CourseQuiz {
    lesson_id: i32,
    lesson_title: String,
    question_count: i64,
    score: Option<i32>,
}

async fn course_quizzes(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require(&[Role::Student])?;

    let quizzes = sqlx::query_as::<_, CourseQuiz>(
        r#"SELECT l.id AS lesson_id,
                  l.title AS lesson_title,
                  COUNT(q.id) AS question_count,
                  MAX(a.score) AS score
           FROM lessons l
           JOIN modules m ON l.module_id = m.id
           JOIN quizzes q ON q.lesson_id = l.id
           LEFT JOIN quiz_attempts a ON a.lesson_id = l.id AND a.user_id = $2
           WHERE m.course_id = $1
           GROUP BY l.id, l.title, m."order", l."order"
           ORDER BY m."order", l."order", l.id"#,
    )
    .bind(course_id)
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "quizzes": quizzes })))
}

#[derive(sqlx::FromRow, Serialize)]
struct AttemptRow {
    id: i32,
    user_id: i32,
    name: String,
    score: i32,
    submitted_at: DateTime<Utc>,
}

async fn attempts(
    State(state): State<AppState>,
    user: AuthUser,
    Path(lesson_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require(&[Role::Instructor, Role::Admin])?;

    let owner = access::lesson(&state.db, lesson_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to view these attempts")?;

    let rows = sqlx::query_as::<_, AttemptRow>(
        r#"SELECT qa.id, qa.user_id, u.name, qa.score, qa.submitted_at
           FROM quiz_attempts qa
           JOIN users u ON qa.user_id = u.id
           WHERE qa.lesson_id = $1
           ORDER BY qa.submitted_at DESC"#,
    )
    .bind(lesson_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "attempts": rows })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_question_hides_answer_key() {
        let q = Question {
            id: 3,
            lesson_id: 1,
            question: "2 + 2?".into(),
            kind: QuestionType::MultipleChoice,
            options: JsonColumn(vec!["3".into(), "4".into()]),
            correct_answer: 1,
            answer: None,
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(PublicQuestion::from(&q)).unwrap();
        assert_eq!(v["type"], "multiple_choice");
        assert_eq!(v["options"], json!(["3", "4"]));
        assert!(v.get("correct_answer").is_none());
        assert!(v.get("answer").is_none());
    }
}
