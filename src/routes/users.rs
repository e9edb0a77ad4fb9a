use axum::{
    extract::State,
    routing::{delete, get},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::extract::{Json, Path};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CourseListing, Role, User},
    state::AppState,
};

use super::courses::{LISTING_GROUP, LISTING_SELECT};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/courses", get(all_courses))
        .route("/courses/:id", delete(delete_course))
        .route("/:id", get(detail).patch(update).delete(remove))
}

#[derive(Deserialize)]
struct UserPatch {
    name: Option<String>,
    avatar: Option<String>,
    role: Option<Role>,
    is_active: Option<bool>,
}

async fn list(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<Vec<User>>> {
    user.require(&[Role::Admin])?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(users))
}

async fn detail(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let found = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(json!({ "user": found })))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(req): Json<UserPatch>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;
    if id == user.id && (req.is_active == Some(false) || req.role.is_some_and(|r| r != Role::Admin)) {
        return Err(AppError::bad_request("Admins cannot demote or deactivate themselves"));
    }

    let updated = sqlx::query_as::<_, User>(
        r#"UPDATE users SET
             name = COALESCE($1, name),
             avatar = COALESCE($2, avatar),
             role = COALESCE($3, role),
             is_active = COALESCE($4, is_active),
             updated_at = now()
           WHERE id = $5
           RETURNING *"#,
    )
    .bind(req.name.filter(|n| !n.trim().is_empty()))
    .bind(req.avatar)
    .bind(req.role)
    .bind(req.is_active)
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(json!({ "message": "User updated successfully", "user": updated })))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let target = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if target.role == Role::Admin {
        return Err(AppError::forbidden("Cannot delete admin users"));
    }

    // courses, enrollments and submissions cascade
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    if let Some(url) = &target.avatar {
        state.storage.remove_url(url).await;
    }

    tracing::info!(user_id = id, admin_id = user.id, "user deleted");

    Ok(Json(json!({
        "success": true,
        "message": "User and all related data deleted successfully",
        "deletedUser": target,
    })))
}

async fn all_courses(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let sql = format!("{LISTING_SELECT} {LISTING_GROUP} ORDER BY c.created_at DESC");
    let courses = sqlx::query_as::<_, CourseListing>(&sql)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({ "count": courses.len(), "courses": courses })))
}

async fn delete_course(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let thumbnail: Option<Option<String>> =
        sqlx::query_scalar("DELETE FROM courses WHERE id = $1 RETURNING thumbnail")
            .bind(id)
            .fetch_optional(&state.db)
            .await?;
    let Some(thumbnail) = thumbnail else {
        return Err(AppError::not_found("Course not found"));
    };
    if let Some(url) = thumbnail {
        state.storage.remove_url(&url).await;
    }

    tracing::info!(course_id = id, admin_id = user.id, "course deleted by admin");
    Ok(Json(json!({ "message": "Course deleted successfully" })))
}
