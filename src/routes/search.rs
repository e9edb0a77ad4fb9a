use axum::{
    extract::State,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::{serde_as, NoneAsEmptyString};

use crate::extract::{Json, Query};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CourseListing, Role},
    state::AppState,
};

use super::{
    courses::{LISTING_GROUP, LISTING_SELECT},
    Page, PageParams,
};

const VISIBLE: &str = "c.status = 'approved' AND c.is_published";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/courses", get(search_courses))
        .route("/courses/filter", get(filter_courses))
        .route("/users", get(search_users))
}

fn required_query(q: Option<String>) -> AppResult<String> {
    q.map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::bad_request("Search query is required"))
}

#[serde_as]
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CourseSearch {
    q: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    category: Option<i32>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    instructor: Option<i32>,
    sort_by: Option<String>,
    #[serde(flatten)]
    page: PageParams,
}

/// ORDER BY clause for the `sortBy` values the course search understands.
fn search_order(sort_by: Option<&str>) -> &'static str {
    match sort_by {
        Some("popular") => "students_count DESC, c.id",
        Some("title") => "c.title ASC",
        Some("price") => "c.price ASC, c.id",
        _ => "c.created_at DESC",
    }
}

async fn search_courses(
    State(state): State<AppState>,
    Query(params): Query<CourseSearch>,
) -> AppResult<Json<serde_json::Value>> {
    let q = required_query(params.q)?;
    let page = Page::from(&params.page);
    let pattern = format!("%{q}%");

    let filter = format!(
        "WHERE {VISIBLE}
           AND (c.title ILIKE $1 OR c.description ILIKE $1)
           AND ($2::int IS NULL OR c.category_id = $2)
           AND ($3::int IS NULL OR c.instructor_id = $3)"
    );

    let sql = format!(
        "{LISTING_SELECT} {filter} {LISTING_GROUP} ORDER BY {} LIMIT $4 OFFSET $5",
        search_order(params.sort_by.as_deref())
    );
    let courses = sqlx::query_as::<_, CourseListing>(&sql)
        .bind(&pattern)
        .bind(params.category)
        .bind(params.instructor)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&state.db)
        .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM courses c {filter}"))
        .bind(&pattern)
        .bind(params.category)
        .bind(params.instructor)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(json!({
        "message": "Search results",
        "courses": courses,
        "pagination": page.json_with_total(total),
    })))
}

#[serde_as]
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CourseFilter {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    category: Option<i32>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    min_students: Option<i64>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    max_students: Option<i64>,
    sort_by: Option<String>,
    order: Option<String>,
    #[serde(flatten)]
    page: PageParams,
}

/// Whitelisted sort column and direction; anything else falls back to newest first.
fn filter_order(sort_by: Option<&str>, order: Option<&str>) -> (&'static str, &'static str) {
    let field = match sort_by {
        Some("title") => "c.title",
        Some("student_count") | Some("students_count") => "students_count",
        Some("price") => "c.price",
        _ => "c.created_at",
    };
    let dir = match order {
        Some(o) if o.eq_ignore_ascii_case("asc") => "ASC",
        _ => "DESC",
    };
    (field, dir)
}

async fn filter_courses(
    State(state): State<AppState>,
    Query(params): Query<CourseFilter>,
) -> AppResult<Json<serde_json::Value>> {
    let page = Page::from(&params.page);
    let (field, dir) = filter_order(params.sort_by.as_deref(), params.order.as_deref());

    let sql = format!(
        "{LISTING_SELECT}
         WHERE {VISIBLE} AND ($1::int IS NULL OR c.category_id = $1)
         {LISTING_GROUP}
         HAVING COUNT(DISTINCT e.id) >= $2
            AND ($3::bigint IS NULL OR COUNT(DISTINCT e.id) <= $3)
         ORDER BY {field} {dir}, c.id
         LIMIT $4 OFFSET $5"
    );
    let courses = sqlx::query_as::<_, CourseListing>(&sql)
        .bind(params.category)
        .bind(params.min_students.unwrap_or(0))
        .bind(params.max_students)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({
        "message": "Filtered courses",
        "courses": courses,
        "filters": {
            "category": params.category,
            "minStudents": params.min_students.unwrap_or(0),
            "maxStudents": params.max_students,
        },
        "pagination": page.json(),
    })))
}

#[serde_as]
#[derive(Deserialize, Default)]
struct UserSearch {
    q: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    role: Option<Role>,
    #[serde(flatten)]
    page: PageParams,
}

#[derive(sqlx::FromRow, Serialize)]
struct UserHit {
    id: i32,
    name: String,
    email: String,
    role: Role,
    avatar: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn search_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<UserSearch>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;
    let q = required_query(params.q)?;
    let page = Page::from(&params.page);
    let pattern = format!("%{q}%");

    let users = sqlx::query_as::<_, UserHit>(
        r#"SELECT id, name, email, role, avatar, created_at
           FROM users
           WHERE (name ILIKE $1 OR email ILIKE $1)
             AND ($2::user_role IS NULL OR role = $2)
           ORDER BY created_at DESC
           LIMIT $3 OFFSET $4"#,
    )
    .bind(&pattern)
    .bind(params.role)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    let total: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM users
           WHERE (name ILIKE $1 OR email ILIKE $1)
             AND ($2::user_role IS NULL OR role = $2)"#,
    )
    .bind(&pattern)
    .bind(params.role)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({
        "message": "User search results",
        "users": users,
        "pagination": page.json_with_total(total),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sort_values_fall_back() {
        assert_eq!(search_order(None), "c.created_at DESC");
        assert_eq!(search_order(Some("popular")), "students_count DESC, c.id");
        assert_eq!(search_order(Some("; DROP TABLE users")), "c.created_at DESC");

        assert_eq!(filter_order(Some("title"), Some("asc")), ("c.title", "ASC"));
        assert_eq!(filter_order(Some("id; --"), Some("sideways")), ("c.created_at", "DESC"));
    }

    #[test]
    fn blank_search_query_is_rejected() {
        assert!(required_query(None).is_err());
        assert!(required_query(Some("   ".into())).is_err());
        assert_eq!(required_query(Some(" rust ".into())).unwrap(), "rust");
    }
}
