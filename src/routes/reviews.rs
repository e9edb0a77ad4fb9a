use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::extract::{Json, Path, Query};
use crate::{
    access,
    auth::AuthUser,
    db::is_unique_violation,
    error::{AppError, AppResult},
    models::Review,
    state::AppState,
};

use super::{Page, PageParams};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/course/:course_id", get(course_reviews).post(create))
        .route("/:review_id", put(update).delete(remove))
}

#[serde_as]
#[derive(Deserialize)]
struct ReviewReq {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default)]
    rating: Option<i32>,
    comment: Option<String>,
}

fn valid_rating(r: i32) -> bool {
    (1..=5).contains(&r)
}

fn rating_error() -> AppError {
    AppError::bad_request("Rating must be between 1 and 5")
}

/// Mean rating to one decimal place, 0 when there are no reviews.
pub(crate) fn round1(v: Option<f64>) -> f64 {
    v.map(|x| (x * 10.0).round() / 10.0).unwrap_or(0.0)
}

async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
    Json(req): Json<ReviewReq>,
) -> AppResult<impl IntoResponse> {
    let rating = req.rating.filter(|r| valid_rating(*r)).ok_or_else(rating_error)?;

    if !access::is_enrolled(&state.db, user.id, course_id).await? {
        return Err(AppError::forbidden("Must be enrolled to review"));
    }

    let review = sqlx::query_as::<_, Review>(
        r#"INSERT INTO reviews (course_id, user_id, rating, comment)
           VALUES ($1, $2, $3, $4)
           RETURNING *"#,
    )
    .bind(course_id)
    .bind(user.id)
    .bind(rating)
    .bind(req.comment.filter(|c| !c.trim().is_empty()))
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::bad_request("Already reviewed this course")
        } else {
            e.into()
        }
    })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Review created successfully", "review": review })),
    ))
}

#[derive(sqlx::FromRow, Serialize)]
struct ReviewRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    review: Review,
    user_name: String,
    user_avatar: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ReviewStats {
    total_reviews: i64,
    average_rating: Option<f64>,
    five_stars: i64,
    four_stars: i64,
    three_stars: i64,
    two_stars: i64,
    one_star: i64,
}

async fn course_reviews(
    State(state): State<AppState>,
    Path(course_id): Path<i32>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<serde_json::Value>> {
    let page = Page::from(&params);

    let reviews = sqlx::query_as::<_, ReviewRow>(
        r#"SELECT r.*, u.name AS user_name, u.avatar AS user_avatar
           FROM reviews r
           JOIN users u ON r.user_id = u.id
           WHERE r.course_id = $1
           ORDER BY r.created_at DESC
           LIMIT $2 OFFSET $3"#,
    )
    .bind(course_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&state.db)
    .await?;

    let s = sqlx::query_as::<_, ReviewStats>(
        r#"SELECT COUNT(*) AS total_reviews,
                  AVG(rating)::float8 AS average_rating,
                  COUNT(*) FILTER (WHERE rating = 5) AS five_stars,
                  COUNT(*) FILTER (WHERE rating = 4) AS four_stars,
                  COUNT(*) FILTER (WHERE rating = 3) AS three_stars,
                  COUNT(*) FILTER (WHERE rating = 2) AS two_stars,
                  COUNT(*) FILTER (WHERE rating = 1) AS one_star
           FROM reviews
           WHERE course_id = $1"#,
    )
    .bind(course_id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(json!({
        "message": "Reviews fetched",
        "reviews": reviews,
        "stats": {
            "totalReviews": s.total_reviews,
            "averageRating": round1(s.average_rating),
            "distribution": {
                "5": s.five_stars,
                "4": s.four_stars,
                "3": s.three_stars,
                "2": s.two_stars,
                "1": s.one_star,
            },
        },
        "pagination": page.json_with_total(s.total_reviews),
    })))
}

async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(review_id): Path<i32>,
    Json(req): Json<ReviewReq>,
) -> AppResult<Json<serde_json::Value>> {
    if req.rating.is_some_and(|r| !valid_rating(r)) {
        return Err(rating_error());
    }

    let review = sqlx::query_as::<_, Review>(
        r#"UPDATE reviews
           SET rating = COALESCE($1, rating),
               comment = COALESCE($2, comment),
               updated_at = now()
           WHERE id = $3 AND user_id = $4
           RETURNING *"#,
    )
    .bind(req.rating)
    .bind(req.comment)
    .bind(review_id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("Review not found"))?;

    Ok(Json(json!({ "message": "Review updated successfully", "review": review })))
}

async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(review_id): Path<i32>,
) -> AppResult<Json<serde_json::Value>> {
    let author: i32 = sqlx::query_scalar("SELECT user_id FROM reviews WHERE id = $1")
        .bind(review_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Review not found"))?;

    if author != user.id && !user.is_admin() {
        return Err(AppError::forbidden("Not authorized"));
    }

    sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(review_id)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({ "message": "Review deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_rounds_to_one_decimal() {
        assert_eq!(round1(None), 0.0);
        assert_eq!(round1(Some(4.25)), 4.3);
        assert_eq!(round1(Some(3.0)), 3.0);
        assert_eq!(round1(Some(4.666_666)), 4.7);
    }

    #[test]
    fn rating_from_number_or_string() {
        let r: ReviewReq = serde_json::from_str(r#"{"rating": "5", "comment": "great"}"#).unwrap();
        assert_eq!(r.rating, Some(5));
        let r: ReviewReq = serde_json::from_str(r#"{"rating": 4}"#).unwrap();
        assert_eq!(r.rating, Some(4));
        let r: ReviewReq = serde_json::from_str(r#"{"comment": "edit only"}"#).unwrap();
        assert_eq!(r.rating, None);
    }

    #[test]
    fn rating_bounds() {
        assert!(valid_rating(1));
        assert!(valid_rating(5));
        assert!(!valid_rating(0));
        assert!(!valid_rating(6));
    }
}
