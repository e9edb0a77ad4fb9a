// Ownership lookups shared by the per-resource routes. Every content row hangs off a
// course, and authorization is always decided by that course's instructor.

use sqlx::FromRow;

use crate::{
    auth::AuthUser,
    db::Db,
    error::{AppError, AppResult},
};

#[derive(FromRow, Debug, Clone, Copy)]
pub struct Owner {
    pub course_id: i32,
    pub instructor_id: i32,
}

impl Owner {
    pub fn is(&self, user: &AuthUser) -> bool {
        self.instructor_id == user.id
    }

    /// Course instructor only.
    pub fn ensure_owner(&self, user: &AuthUser, msg: &str) -> AppResult<()> {
        if self.is(user) {
            Ok(())
        } else {
            Err(AppError::forbidden(msg))
        }
    }

    /// Course instructor or any admin.
    pub fn ensure_owner_or_admin(&self, user: &AuthUser, msg: &str) -> AppResult<()> {
        if self.is(user) || user.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden(msg))
        }
    }
}

pub async fn course(db: &Db, course_id: i32) -> AppResult<Owner> {
    sqlx::query_as::<_, Owner>("SELECT id AS course_id, instructor_id FROM courses WHERE id = $1")
        .bind(course_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))
}

pub async fn module(db: &Db, module_id: i32) -> AppResult<Owner> {
    sqlx::query_as::<_, Owner>(
        r#"SELECT m.course_id, c.instructor_id
           FROM modules m
           JOIN courses c ON m.course_id = c.id
           WHERE m.id = $1"#,
    )
    .bind(module_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::not_found("Module not found"))
}

pub async fn lesson(db: &Db, lesson_id: i32) -> AppResult<Owner> {
    sqlx::query_as::<_, Owner>(
        r#"SELECT m.course_id, c.instructor_id
           FROM lessons l
           JOIN modules m ON l.module_id = m.id
           JOIN courses c ON m.course_id = c.id
           WHERE l.id = $1"#,
    )
    .bind(lesson_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::not_found("Lesson not found"))
}

pub async fn question(db: &Db, question_id: i32) -> AppResult<Owner> {
    sqlx::query_as::<_, Owner>(
        r#"SELECT m.course_id, c.instructor_id
           FROM quizzes q
           JOIN lessons l ON q.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           JOIN courses c ON m.course_id = c.id
           WHERE q.id = $1"#,
    )
    .bind(question_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::not_found("Question not found"))
}

pub async fn assignment(db: &Db, assignment_id: i32) -> AppResult<Owner> {
    sqlx::query_as::<_, Owner>(
        r#"SELECT m.course_id, c.instructor_id
           FROM assignments a
           JOIN lessons l ON a.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           JOIN courses c ON m.course_id = c.id
           WHERE a.id = $1"#,
    )
    .bind(assignment_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::not_found("Assignment not found"))
}

pub async fn submission(db: &Db, submission_id: i32) -> AppResult<Owner> {
    sqlx::query_as::<_, Owner>(
        r#"SELECT m.course_id, c.instructor_id
           FROM submissions s
           JOIN assignments a ON s.assignment_id = a.id
           JOIN lessons l ON a.lesson_id = l.id
           JOIN modules m ON l.module_id = m.id
           JOIN courses c ON m.course_id = c.id
           WHERE s.id = $1"#,
    )
    .bind(submission_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::not_found("Submission not found"))
}

pub async fn is_enrolled(db: &Db, user_id: i32, course_id: i32) -> AppResult<bool> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM enrollments WHERE user_id = $1 AND course_id = $2)",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(db)
    .await?;
    Ok(found)
}

pub async fn ensure_enrolled(db: &Db, user: &AuthUser, course_id: i32) -> AppResult<()> {
    if is_enrolled(db, user.id, course_id).await? {
        Ok(())
    } else {
        Err(AppError::forbidden("Not enrolled in this course"))
    }
}
