use axum::{extract::State, routing::get, Router};
use serde::Deserialize;
use serde_json::json;
use serde_with::{serde_as, NoneAsEmptyString};
use tower_http::services::ServeDir;

use crate::extract::Json;
use crate::{error::AppResult, state::AppState, uploads::UploadKind};

mod analytics;
mod assignments;
mod auth;
mod categories;
mod courses;
mod enrollments;
mod files;
mod lessons;
mod modules;
mod progress;
mod quizzes;
mod reviews;
mod search;
mod users;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/test", get(db_check))
        .nest("/auth", auth::router())
        .nest("/courses", courses::router())
        .nest("/modules", modules::router())
        .nest("/lessons", lessons::router())
        .nest("/quizzes", quizzes::router())
        .nest("/assignments", assignments::router())
        .nest("/enrollments", enrollments::router())
        .nest("/users", users::router())
        .nest("/categories", categories::router())
        .nest("/reviews", reviews::router())
        .nest("/analytics", analytics::router())
        .nest("/search", search::router())
        .nest("/progress", progress::router())
        .nest("/files", files::router());

    // assignment files stay behind /api/files/download
    let mut app = Router::new().nest("/api", api);
    for kind in [UploadKind::Avatar, UploadKind::Thumbnail, UploadKind::Video] {
        app = app.nest_service(
            &format!("/uploads/{}", kind.dir()),
            ServeDir::new(state.storage.dir(kind)),
        );
    }

    app.with_state(state)
}

async fn db_check(State(state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let now: chrono::DateTime<chrono::Utc> = sqlx::query_scalar("SELECT now()")
        .fetch_one(&state.db)
        .await?;
    Ok(Json(json!({ "message": "API Connected", "time": now })))
}

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
/// Keeps `offset()` within i64 for any accepted limit.
pub const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

/// `?page=&limit=` as sent by list views; blank values fall back to defaults.
#[serde_as]
#[derive(Deserialize, Debug, Default, Clone)]
pub struct PageParams {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub page: Option<i64>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn pages(&self, total: i64) -> i64 {
        (total + self.limit - 1) / self.limit
    }

    pub fn json(&self) -> serde_json::Value {
        json!({ "page": self.page, "limit": self.limit })
    }

    pub fn json_with_total(&self, total: i64) -> serde_json::Value {
        json!({
            "page": self.page,
            "limit": self.limit,
            "total": total,
            "pages": self.pages(total),
        })
    }
}

impl From<&PageParams> for Page {
    fn from(p: &PageParams) -> Self {
        Self {
            page: p.page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: p.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_clamps() {
        let p = Page::from(&PageParams::default());
        assert_eq!(p, Page { page: 1, limit: 10 });
        assert_eq!(p.offset(), 0);

        let p = Page::from(&PageParams {
            page: Some(0),
            limit: Some(1000),
        });
        assert_eq!(p, Page { page: 1, limit: 100 });

        let p = Page::from(&PageParams {
            page: Some(3),
            limit: Some(20),
        });
        assert_eq!(p.offset(), 40);
        assert_eq!(p.pages(41), 3);
        assert_eq!(p.pages(0), 0);

        let p = Page::from(&PageParams {
            page: Some(i64::MAX),
            limit: Some(MAX_LIMIT),
        });
        assert_eq!(p.page, MAX_PAGE);
        assert!(p.offset() > 0);

        let p = Page::from(&PageParams {
            page: Some(i64::MIN),
            limit: Some(-3),
        });
        assert_eq!(p, Page { page: 1, limit: 1 });
    }

    #[test]
    fn blank_query_values_are_ignored() {
        let q: axum::extract::Query<PageParams> =
            axum::extract::Query::try_from_uri(&"/x?page=&limit=5".parse().unwrap()).unwrap();
        assert_eq!(q.page, None);
        assert_eq!(q.limit, Some(5));
    }
}
