use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::extract::{Json, Path};
use crate::{
    access,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{Module, Role},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/course/:course_id", get(list).post(create))
        .route("/:module_id", put(update).delete(remove))
}

#[derive(Deserialize)]
struct ModuleReq {
    title: Option<String>,
    description: Option<String>,
    order: Option<i32>,
}

#[derive(sqlx::FromRow, Serialize)]
struct ModuleSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    module: Module,
    lessons_count: i64,
    total_duration: i64,
}

async fn list(State(state): State<AppState>, Path(course_id): Path<i32>) -> AppResult<Json<serde_json::Value>> {
    let modules = sqlx::query_as::<_, ModuleSummary>(
        r#"SELECT m.*,
                  COUNT(l.id) AS lessons_count,
                  COALESCE(SUM(l.duration), 0)::bigint AS total_duration
           FROM modules m
           LEFT JOIN lessons l ON m.id = l.module_id
           WHERE m.course_id = $1
           GROUP BY m.id
           ORDER BY m."order", m.id"#,
    )
    .bind(course_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Modules fetched", "modules": modules })))
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
    Json(req): Json<ModuleReq>,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Instructor])?;

    let title = req
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::bad_request("Module title is required"))?;

    let owner = access::course(&state.db, course_id).await?;
    owner.ensure_owner(&user, "Not authorized to add modules to this course")?;

    let module = sqlx::query_as::<_, Module>(
        r#"INSERT INTO modules (course_id, title, description, "order")
           VALUES ($1, $2, $3,
                   COALESCE($4, (SELECT COALESCE(MAX("order"), 0) + 1 FROM modules WHERE course_id = $1)))
           RETURNING *"#,
    )
    .bind(course_id)
    .bind(&title)
    .bind(req.description.filter(|d| !d.trim().is_empty()))
    .bind(req.order.filter(|o| *o > 0))
    .fetch_one(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Module created successfully", "module": module })),
    ))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(module_id): Path<i32>,
    Json(req): Json<ModuleReq>,
) -> AppResult<Json<serde_json::Value>> {
    let owner = access::module(&state.db, module_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to update this module")?;

    let module = sqlx::query_as::<_, Module>(
        r#"UPDATE modules
           SET title = COALESCE($1, title),
               description = COALESCE($2, description),
               "order" = COALESCE($3, "order")
           WHERE id = $4
           RETURNING *"#,
    )
    .bind(req.title.filter(|t| !t.trim().is_empty()))
    .bind(req.description)
    .bind(req.order)
    .bind(module_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Module updated successfully", "module": module })))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(module_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let owner = access::module(&state.db, module_id).await?;
    owner.ensure_owner_or_admin(&user, "Not authorized to delete this module")?;

    // lessons and their completions go with it
    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM modules WHERE id = $1")
        .bind(module_id)
        .execute(&mut *tx)
        .await?;
    super::progress::recompute_course(&mut tx, owner.course_id).await?;
    tx.commit().await?;

    Ok(Json(json!({ "message": "Module deleted successfully" })))
}
