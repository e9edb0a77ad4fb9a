use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::extract::{Json, Path, Query};
use crate::{
    auth::AuthUser,
    db::is_unique_violation,
    error::{AppError, AppResult},
    models::{Category, CourseListing, Role},
    state::AppState,
};

use super::courses::{LISTING_GROUP, LISTING_SELECT};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/search", get(search))
        .route("/:id", get(detail).put(update).delete(remove))
}

#[derive(Deserialize)]
struct CategoryReq {
    name: Option<String>,
    description: Option<String>,
    icon: Option<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(sqlx::FromRow, Serialize)]
struct CategorySummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    category: Category,
    courses_count: i64,
}

fn duplicate(e: sqlx::Error) -> AppError {
    if is_unique_violation(&e) {
        AppError::bad_request("Category already exists")
    } else {
        e.into()
    }
}

async fn list(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let categories = sqlx::query_as::<_, CategorySummary>(
        r#"SELECT c.*, COUNT(co.id) AS courses_count
           FROM categories c
           LEFT JOIN courses co ON co.category_id = c.id
                               AND co.status = 'approved' AND co.is_published
           GROUP BY c.id
           ORDER BY c.name"#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Categories fetched", "categories": categories })))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<serde_json::Value>> {
    let q = params
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::bad_request("Search query is required"))?;

    let categories = sqlx::query_as::<_, CategorySummary>(
        r#"SELECT c.*, COUNT(co.id) AS courses_count
           FROM categories c
           LEFT JOIN courses co ON co.category_id = c.id
                               AND co.status = 'approved' AND co.is_published
           WHERE c.name ILIKE $1 OR c.description ILIKE $1
           GROUP BY c.id
           ORDER BY c.name"#,
    )
    .bind(format!("%{q}%"))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({
        "message": "Search results",
        "count": categories.len(),
        "categories": categories,
    })))
}

async fn detail(State(state): State<AppState>, Path(id): Path<i32>) -> AppResult<Json<serde_json::Value>> {
    let category = sqlx::query_as::<_, Category>("SELECT * FROM categories WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Category not found"))?;

    let sql = format!(
        "{LISTING_SELECT} WHERE c.category_id = $1 AND c.status = 'approved' AND c.is_published {LISTING_GROUP} ORDER BY c.created_at DESC"
    );
    let courses = sqlx::query_as::<_, CourseListing>(&sql)
        .bind(id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({
        "message": "Category details fetched",
        "category": category,
        "courses": courses,
    })))
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CategoryReq>,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Admin])?;
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::bad_request("Category name is required"))?;

    let category = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (name, description, icon) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(&name)
    .bind(req.description.filter(|d| !d.trim().is_empty()))
    .bind(req.icon.filter(|i| !i.trim().is_empty()))
    .fetch_one(&state.db)
    .await
    .map_err(duplicate)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Category created successfully", "category": category })),
    ))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(req): Json<CategoryReq>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let category = sqlx::query_as::<_, Category>(
        r#"UPDATE categories
           SET name = COALESCE($1, name),
               description = COALESCE($2, description),
               icon = COALESCE($3, icon)
           WHERE id = $4
           RETURNING *"#,
    )
    .bind(req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()))
    .bind(req.description)
    .bind(req.icon)
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(duplicate)?
    .ok_or_else(|| AppError::not_found("Category not found"))?;

    Ok(Json(json!({ "message": "Category updated successfully", "category": category })))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses WHERE category_id = $1")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    if in_use > 0 {
        return Err(AppError::bad_request(
            "Cannot delete category with courses. Move or delete courses first.",
        ));
    }

    let category = sqlx::query_as::<_, Category>("DELETE FROM categories WHERE id = $1 RETURNING *")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Category not found"))?;

    Ok(Json(json!({ "message": "Category deleted successfully", "category": category })))
}
