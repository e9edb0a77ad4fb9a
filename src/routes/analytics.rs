use axum::{
    extract::State,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::extract::{Json, Path};
use crate::{
    access,
    auth::AuthUser,
    db::Db,
    error::{AppError, AppResult},
    models::{Course, Enrollment, Role, Submission},
    progress,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/student/:student_id/performance", get(student_performance))
        .route("/course/:course_id/statistics", get(course_statistics))
        .route("/instructor/:instructor_id/courses", get(instructor_courses))
}

/// Runs a single-value COUNT query, binding `id` when given.
async fn count(db: &Db, sql: &str, id: Option<i32>) -> AppResult<i64> {
    let mut q = sqlx::query_scalar::<_, i64>(sql);
    if let Some(id) = id {
        q = q.bind(id);
    }
    Ok(q.fetch_one(db).await?)
}

async fn average(db: &Db, sql: &str, id: i32) -> AppResult<i64> {
    let avg: Option<f64> = sqlx::query_scalar(sql).bind(id).fetch_one(db).await?;
    Ok(avg.unwrap_or(0.0).round() as i64)
}

#[derive(sqlx::FromRow, Serialize)]
struct CourseCount {
    id: i32,
    title: String,
    enrollment_count: i64,
}

#[derive(sqlx::FromRow, Serialize)]
struct RecentActivity {
    course_id: i32,
    title: String,
    progress: i32,
    enrolled_at: DateTime<Utc>,
}

async fn dashboard(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Value>> {
    let db = &state.db;

    let data = match user.role {
        Role::Admin => {
            let popular = sqlx::query_as::<_, CourseCount>(
                r#"SELECT c.id, c.title, COUNT(e.id) AS enrollment_count
                   FROM courses c
                   LEFT JOIN enrollments e ON c.id = e.course_id
                   GROUP BY c.id
                   ORDER BY enrollment_count DESC, c.id
                   LIMIT 5"#,
            )
            .fetch_all(db)
            .await?;

            json!({
                "totalUsers": count(db, "SELECT COUNT(*) FROM users", None).await?,
                "totalCourses": count(db, "SELECT COUNT(*) FROM courses", None).await?,
                "totalEnrollments": count(db, "SELECT COUNT(*) FROM enrollments", None).await?,
                "pendingCourses": count(db, "SELECT COUNT(*) FROM courses WHERE status = 'pending'", None).await?,
                "newUsersLast30Days": count(
                    db,
                    "SELECT COUNT(*) FROM users WHERE created_at >= now() - INTERVAL '30 days'",
                    None,
                )
                .await?,
                "popularCourses": popular,
            })
        }
        Role::Instructor => {
            let courses = sqlx::query_as::<_, CourseCount>(
                r#"SELECT c.id, c.title, COUNT(e.id) AS enrollment_count
                   FROM courses c
                   LEFT JOIN enrollments e ON c.id = e.course_id
                   WHERE c.instructor_id = $1
                   GROUP BY c.id
                   ORDER BY c.created_at DESC"#,
            )
            .bind(user.id)
            .fetch_all(db)
            .await?;

            let students = count(
                db,
                r#"SELECT COUNT(DISTINCT e.user_id)
                   FROM enrollments e
                   JOIN courses c ON e.course_id = c.id
                   WHERE c.instructor_id = $1"#,
                Some(user.id),
            )
            .await?;

            let ungraded = count(
                db,
                r#"SELECT COUNT(*)
                   FROM submissions s
                   JOIN assignments a ON s.assignment_id = a.id
                   JOIN lessons l ON a.lesson_id = l.id
                   JOIN modules m ON l.module_id = m.id
                   JOIN courses c ON m.course_id = c.id
                   WHERE c.instructor_id = $1 AND s.grade IS NULL"#,
                Some(user.id),
            )
            .await?;

            json!({
                "totalCourses": courses.len(),
                "totalStudents": students,
                "pendingAssignments": ungraded,
                "courses": courses,
            })
        }
        Role::Student => {
            let recent = sqlx::query_as::<_, RecentActivity>(
                r#"SELECT c.id AS course_id, c.title, e.progress, e.enrolled_at
                   FROM enrollments e
                   JOIN courses c ON e.course_id = c.id
                   WHERE e.user_id = $1
                   ORDER BY e.enrolled_at DESC
                   LIMIT 5"#,
            )
            .bind(user.id)
            .fetch_all(db)
            .await?;

            json!({
                "enrolledCourses": count(db, "SELECT COUNT(*) FROM enrollments WHERE user_id = $1", Some(user.id)).await?,
                "completedCourses": count(
                    db,
                    "SELECT COUNT(*) FROM enrollments WHERE user_id = $1 AND completed_at IS NOT NULL",
                    Some(user.id),
                )
                .await?,
                "averageProgress": average(
                    db,
                    "SELECT AVG(progress)::float8 FROM enrollments WHERE user_id = $1",
                    user.id,
                )
                .await?,
                "recentActivity": recent,
            })
        }
    };

    Ok(Json(json!({
        "message": "Dashboard data fetched",
        "role": user.role,
        "data": data,
    })))
}

#[derive(sqlx::FromRow, Serialize)]
struct PersonInfo {
    id: i32,
    name: String,
    email: String,
    avatar: Option<String>,
}

#[derive(sqlx::FromRow, Serialize)]
struct StudentEnrollment {
    #[sqlx(flatten)]
    #[serde(flatten)]
    enrollment: Enrollment,
    course_title: String,
    course_description: String,
    instructor_name: String,
}

#[derive(sqlx::FromRow, Serialize)]
struct StudentSubmission {
    #[sqlx(flatten)]
    #[serde(flatten)]
    submission: Submission,
    assignment_title: String,
    course_title: String,
}

#[derive(sqlx::FromRow, Serialize)]
struct StudentQuiz {
    lesson_id: i32,
    lesson_title: String,
    course_title: String,
    score: i32,
    submitted_at: DateTime<Utc>,
}

async fn student_performance(
    State(state): State<AppState>,
    user: AuthUser,
    Path(student_id): Path<i32>,
) -> AppResult<Json<Value>> {
    if user.is_student() && user.id != student_id {
        return Err(AppError::forbidden("Not authorized"));
    }

    let student = sqlx::query_as::<_, PersonInfo>(
        "SELECT id, name, email, avatar FROM users WHERE id = $1 AND role = 'student'",
    )
    .bind(student_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Student not found"))?;

    let enrollments = sqlx::query_as::<_, StudentEnrollment>(
        r#"SELECT e.*, c.title AS course_title, c.description AS course_description,
                  u.name AS instructor_name
           FROM enrollments e
           JOIN courses c ON e.course_id = c.id
           JOIN users u ON c.instructor_id = u.id
           WHERE e.user_id = $1
           ORDER BY e.enrolled_at DESC"#,
    )
    .bind(student_id)
    .fetch_all(&state.db)
    .await?;

    let submissions = sqlx::query_as::<_, StudentSubmission>(
        r#"SELECT s.*, a.title AS assignment_title, c.title AS course_title
           FROM submissions s
           JOIN assignments a ON s.assignment_id = a.id
           JOIN lessons l ON a.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           JOIN courses c ON m.course_id = c.id
           WHERE s.user_id = $1
           ORDER BY s.submitted_at DESC"#,
    )
    .bind(student_id)
    .fetch_all(&state.db)
    .await?;

    let quizzes = sqlx::query_as::<_, StudentQuiz>(
        r#"SELECT qa.lesson_id, l.title AS lesson_title, c.title AS course_title,
                  qa.score, qa.submitted_at
           FROM quiz_attempts qa
           JOIN lessons l ON qa.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           JOIN courses c ON m.course_id = c.id
           WHERE qa.user_id = $1
           ORDER BY qa.submitted_at DESC"#,
    )
    .bind(student_id)
    .fetch_all(&state.db)
    .await?;

    let average_grade = average(
        &state.db,
        "SELECT AVG(grade) FROM submissions WHERE user_id = $1 AND grade IS NOT NULL",
        student_id,
    )
    .await?;
    let average_quiz = average(
        &state.db,
        "SELECT AVG(score)::float8 FROM quiz_attempts WHERE user_id = $1",
        student_id,
    )
    .await?;
    let completed = enrollments
        .iter()
        .filter(|e| e.enrollment.completed_at.is_some())
        .count();

    Ok(Json(json!({
        "message": "Student performance fetched",
        "student": student,
        "performance": {
            "totalCourses": enrollments.len(),
            "completedCourses": completed,
            "averageGrade": average_grade,
            "averageQuizScore": average_quiz,
            "enrollments": enrollments,
            "submissions": submissions,
            "quizAttempts": quizzes,
        }
    })))
}

#[derive(sqlx::FromRow, Serialize)]
struct CourseWithInstructor {
    #[sqlx(flatten)]
    #[serde(flatten)]
    course: Course,
    instructor_name: String,
}

/// Share of `part` in `whole` as a rounded percentage.
fn rate(part: i64, whole: i64) -> i32 {
    progress::percent(part, whole)
}

async fn course_statistics(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let owner = access::course(&state.db, course_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized")?;

    let course = sqlx::query_as::<_, CourseWithInstructor>(
        r#"SELECT c.*, u.name AS instructor_name
           FROM courses c
           JOIN users u ON c.instructor_id = u.id
           WHERE c.id = $1"#,
    )
    .bind(course_id)
    .fetch_one(&state.db)
    .await?;

    let progress_values: Vec<i32> =
        sqlx::query_scalar("SELECT progress FROM enrollments WHERE course_id = $1")
            .bind(course_id)
            .fetch_all(&state.db)
            .await?;
    let total = progress_values.len() as i64;
    let completed = count(
        &state.db,
        "SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND completed_at IS NOT NULL",
        Some(course_id),
    )
    .await?;
    let average_progress = if progress_values.is_empty() {
        0
    } else {
        let sum: i64 = progress_values.iter().map(|p| i64::from(*p)).sum();
        (sum as f64 / total as f64).round() as i64
    };

    let modules = count(&state.db, "SELECT COUNT(*) FROM modules WHERE course_id = $1", Some(course_id)).await?;
    let lessons = count(
        &state.db,
        r#"SELECT COUNT(*) FROM lessons l
           JOIN modules m ON l.module_id = m.id
           WHERE m.course_id = $1"#,
        Some(course_id),
    )
    .await?;

    Ok(Json(json!({
        "message": "Course statistics fetched",
        "course": course,
        "statistics": {
            "totalStudents": total,
            "completedStudents": completed,
            "averageProgress": average_progress,
            "completionRate": rate(completed, total),
            "moduleCount": modules,
            "lessonCount": lessons,
            "progressDistribution": progress::distribution(&progress_values),
        }
    })))
}

#[derive(sqlx::FromRow, Serialize)]
struct InstructorCourse {
    #[sqlx(flatten)]
    #[serde(flatten)]
    course: Course,
    student_count: i64,
    avg_progress: f64,
    module_count: i64,
    lesson_count: i64,
}

async fn instructor_courses(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(instructor_id): Path<i32>,
) -> AppResult<Json<Value>> {
    let instructor = sqlx::query_as::<_, PersonInfo>(
        "SELECT id, name, email, avatar FROM users WHERE id = $1 AND role = 'instructor'",
    )
    .bind(instructor_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Instructor not found"))?;

    let courses = sqlx::query_as::<_, InstructorCourse>(
        r#"SELECT c.*,
                  (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS student_count,
                  (SELECT COALESCE(AVG(e.progress), 0)::float8 FROM enrollments e WHERE e.course_id = c.id) AS avg_progress,
                  (SELECT COUNT(*) FROM modules m WHERE m.course_id = c.id) AS module_count,
                  (SELECT COUNT(*) FROM lessons l JOIN modules m ON l.module_id = m.id
                    WHERE m.course_id = c.id) AS lesson_count
           FROM courses c
           WHERE c.instructor_id = $1
           ORDER BY c.created_at DESC"#,
    )
    .bind(instructor_id)
    .fetch_all(&state.db)
    .await?;

    let students = count(
        &state.db,
        r#"SELECT COUNT(DISTINCT e.user_id)
           FROM enrollments e
           JOIN courses c ON e.course_id = c.id
           WHERE c.instructor_id = $1"#,
        Some(instructor_id),
    )
    .await?;

    Ok(Json(json!({
        "message": "Instructor courses fetched",
        "instructor": instructor,
        "totalCourses": courses.len(),
        "totalStudents": students,
        "courses": courses,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_rate() {
        assert_eq!(rate(0, 0), 0);
        assert_eq!(rate(1, 3), 33);
        assert_eq!(rate(2, 3), 67);
        assert_eq!(rate(4, 4), 100);
    }
}
