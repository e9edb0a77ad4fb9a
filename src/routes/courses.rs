use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use serde_with::{serde_as, NoneAsEmptyString, PickFirst};

use crate::extract::{Json, Path};
use crate::{
    access,
    auth::{AuthUser, MaybeAuthUser},
    error::{AppError, AppResult},
    models::{Course, CourseListing, CourseStatus, Lesson, Module, Role},
    state::AppState,
};

const DEFAULT_REJECTION: &str = "Course does not meet quality standards";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(detail).patch(update).delete(remove))
        .route("/:id/approve", put(approve))
        .route("/:id/reject", put(reject))
}

/// Shared select for every course listing; callers append WHERE/GROUP BY.
pub(crate) const LISTING_SELECT: &str = r#"
    SELECT c.*,
           u.name AS instructor_name,
           cat.name AS category_name,
           COUNT(DISTINCT e.id) AS students_count
    FROM courses c
    JOIN users u ON c.instructor_id = u.id
    LEFT JOIN categories cat ON c.category_id = cat.id
    LEFT JOIN enrollments e ON c.id = e.course_id
"#;

pub(crate) const LISTING_GROUP: &str = " GROUP BY c.id, u.name, cat.name ";

#[serde_as]
#[derive(Deserialize)]
struct CourseReq {
    title: Option<String>,
    description: Option<String>,
    #[serde_as(as = "PickFirst<(_, NoneAsEmptyString)>")]
    #[serde(default)]
    category_id: Option<i32>,
    price: Option<f64>,
    thumbnail: Option<String>,
    is_published: Option<bool>,
    status: Option<CourseStatus>,
    rejection_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct RejectReq {
    reason: Option<String>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn ensure_category(state: &AppState, category_id: Option<i32>) -> AppResult<()> {
    let Some(id) = category_id else {
        return Ok(());
    };
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categories WHERE id = $1)")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::bad_request("Invalid category"))
    }
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CourseReq>,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Instructor])?;

    let (Some(title), Some(description)) = (non_blank(req.title), non_blank(req.description)) else {
        return Err(AppError::bad_request("Title and description are required"));
    };
    if req.price.is_some_and(|p| !p.is_finite() || p < 0.0) {
        return Err(AppError::bad_request("Price must be a non-negative number"));
    }
    ensure_category(&state, req.category_id).await?;

    let course = sqlx::query_as::<_, Course>(
        r#"INSERT INTO courses (title, description, instructor_id, category_id, price, thumbnail, status, is_published)
           VALUES ($1, $2, $3, $4, $5, $6, 'pending', FALSE)
           RETURNING *"#,
    )
    .bind(&title)
    .bind(&description)
    .bind(user.id)
    .bind(req.category_id)
    .bind(req.price.unwrap_or(0.0))
    .bind(non_blank(req.thumbnail))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(course_id = course.id, instructor_id = user.id, "course created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Course created successfully", "course": course })),
    ))
}

/// Visible courses for everyone. Admins also see unpublished ones, instructors their own.
async fn list(State(state): State<AppState>, MaybeAuthUser(user): MaybeAuthUser) -> AppResult<Json<serde_json::Value>> {
    let (admin, viewer) = match &user {
        Some(u) => (u.is_admin(), u.id),
        None => (false, 0),
    };

    let sql = format!(
        "{LISTING_SELECT} WHERE $1 OR (c.status = 'approved' AND c.is_published) OR c.instructor_id = $2 {LISTING_GROUP} ORDER BY c.created_at DESC"
    );
    let courses = sqlx::query_as::<_, CourseListing>(&sql)
        .bind(admin)
        .bind(viewer)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(json!({
        "message": "Courses fetched",
        "count": courses.len(),
        "courses": courses,
    })))
}

async fn detail(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let sql = format!("{LISTING_SELECT} WHERE c.id = $1 {LISTING_GROUP}");
    let course = sqlx::query_as::<_, CourseListing>(&sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))?;

    let privileged = user
        .as_ref()
        .is_some_and(|u| u.is_admin() || u.id == course.course.instructor_id);
    if !course.course.is_visible() && !privileged {
        return Err(AppError::not_found("Course not found"));
    }

    let modules = sqlx::query_as::<_, Module>(
        r#"SELECT * FROM modules WHERE course_id = $1 ORDER BY "order", id"#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let lessons = sqlx::query_as::<_, Lesson>(
        r#"SELECT l.* FROM lessons l
           JOIN modules m ON l.module_id = m.id
           WHERE m.course_id = $1
           ORDER BY l."order", l.id"#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let modules: Vec<serde_json::Value> = modules
        .into_iter()
        .map(|m| {
            let own: Vec<serde_json::Value> = lessons
                .iter()
                .filter(|l| l.module_id == m.id)
                .map(|l| {
                    json!({
                        "id": l.id,
                        "title": l.title,
                        "content_type": l.content_type,
                        "duration": l.duration,
                        "order": l.order,
                    })
                })
                .collect();
            let mut v = json!(m);
            v["lessons"] = json!(own);
            v
        })
        .collect();

    let is_enrolled = match &user {
        Some(u) if u.is_student() => access::is_enrolled(&state.db, u.id, id).await?,
        _ => false,
    };

    let mut body = json!(course);
    body["modules"] = json!(modules);
    body["isEnrolled"] = json!(is_enrolled);

    Ok(Json(json!({ "message": "Course details fetched", "course": body })))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    Json(req): Json<CourseReq>,
) -> AppResult<Json<serde_json::Value>> {
    if req.status.is_some() && !user.is_admin() {
        return Err(AppError::forbidden("Only admins can change course status"));
    }
    if req.price.is_some_and(|p| !p.is_finite() || p < 0.0) {
        return Err(AppError::bad_request("Price must be a non-negative number"));
    }

    let owner = access::course(&state.db, id).await?;
    owner.ensure_owner_or_admin(&user, "Access denied. Not allowed.")?;
    ensure_category(&state, req.category_id).await?;

    let course = sqlx::query_as::<_, Course>(
        r#"UPDATE courses SET
             title            = COALESCE($1, title),
             description      = COALESCE($2, description),
             category_id      = COALESCE($3, category_id),
             price            = COALESCE($4, price),
             thumbnail        = COALESCE($5, thumbnail),
             is_published     = COALESCE($6, is_published),
             status           = COALESCE($7, status),
             rejection_reason = COALESCE($8, rejection_reason),
             updated_at       = now()
           WHERE id = $9
           RETURNING *"#,
    )
    .bind(non_blank(req.title))
    .bind(non_blank(req.description))
    .bind(req.category_id)
    .bind(req.price)
    .bind(non_blank(req.thumbnail))
    .bind(req.is_published)
    .bind(req.status)
    .bind(non_blank(req.rejection_reason))
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Course updated", "course": course })))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let owner = access::course(&state.db, id).await?;
    owner.ensure_owner_or_admin(&user, "Access denied. Not allowed.")?;

    let thumbnail: Option<String> =
        sqlx::query_scalar("DELETE FROM courses WHERE id = $1 RETURNING thumbnail")
            .bind(id)
            .fetch_one(&state.db)
            .await?;
    if let Some(url) = thumbnail {
        state.storage.remove_url(&url).await;
    }

    tracing::info!(course_id = id, by = user.id, "course deleted");
    Ok(Json(json!({ "message": "Course deleted" })))
}

async fn approve(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let course = sqlx::query_as::<_, Course>(
        r#"UPDATE courses
           SET status = 'approved', is_published = TRUE, rejection_reason = NULL, updated_at = now()
           WHERE id = $1
           RETURNING *"#,
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Course not found"))?;

    tracing::info!(course_id = id, admin_id = user.id, "course approved");
    Ok(Json(json!({ "message": "Course approved", "course": course })))
}

async fn reject(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
    body: Option<Json<RejectReq>>,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Admin])?;

    let reason = body
        .and_then(|Json(r)| non_blank(r.reason))
        .unwrap_or_else(|| DEFAULT_REJECTION.to_string());

    let course = sqlx::query_as::<_, Course>(
        r#"UPDATE courses
           SET status = 'rejected', is_published = FALSE, rejection_reason = $1, updated_at = now()
           WHERE id = $2
           RETURNING *"#,
    )
    .bind(&reason)
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Course not found"))?;

    tracing::info!(course_id = id, admin_id = user.id, %reason, "course rejected");
    Ok(Json(json!({
        "success": true,
        "message": "Course rejected successfully",
        "course": course,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_id_accepts_blank_string() {
        let r: CourseReq = serde_json::from_str(r#"{"category_id": ""}"#).unwrap();
        assert_eq!(r.category_id, None);
        let r: CourseReq = serde_json::from_str(r#"{"category_id": "4"}"#).unwrap();
        assert_eq!(r.category_id, Some(4));
        let r: CourseReq = serde_json::from_str(r#"{"category_id": 7}"#).unwrap();
        assert_eq!(r.category_id, Some(7));
        let r: CourseReq = serde_json::from_str(r#"{"title": "x"}"#).unwrap();
        assert_eq!(r.category_id, None);
    }
}
