use axum::{
    body::Body,
    extract::{Multipart, Request, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use http::{header, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::extract::{Json, Path, Query};
use crate::{
    access,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{Course, Role, User},
    state::AppState,
    uploads::{self, IncomingFile, UploadKind},
};

use super::assignments::{submit_work, Work};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/avatar", post(upload_avatar))
        .route("/lesson/video", post(upload_video))
        .route("/course/:course_id/thumbnail", post(upload_thumbnail))
        .route("/assignment/:assignment_id", post(upload_assignment))
        .route("/download/:filename", get(download))
}

fn require_file(file: Option<IncomingFile>, msg: &'static str) -> AppResult<IncomingFile> {
    file.ok_or_else(|| AppError::bad_request(msg))
}

async fn upload_avatar(
    State(state): State<AppState>,
    user: AuthUser,
    mp: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    let form = uploads::read_form(mp, UploadKind::Avatar).await?;
    let file = require_file(form.file, "No file uploaded")?;

    let old: Option<String> = sqlx::query_scalar("SELECT avatar FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    let stored = state.storage.save(UploadKind::Avatar, &file).await?;
    let updated = sqlx::query_as::<_, User>(
        "UPDATE users SET avatar = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(&stored.url)
    .bind(user.id)
    .fetch_one(&state.db)
    .await;

    let updated = match updated {
        Ok(u) => u,
        Err(e) => {
            state.storage.remove_url(&stored.url).await;
            return Err(e.into());
        }
    };
    if let Some(url) = old {
        state.storage.remove_url(&url).await;
    }

    Ok(Json(json!({ "message": "Avatar uploaded successfully", "user": updated })))
}

async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    mp: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Instructor])?;

    let form = uploads::read_form(mp, UploadKind::Video).await?;
    let file = require_file(form.file, "No video uploaded")?;
    let stored = state.storage.save(UploadKind::Video, &file).await?;

    tracing::info!(user_id = user.id, file = %stored.file_name, "lesson video uploaded");
    Ok(Json(json!({ "message": "Video uploaded", "url": stored.url })))
}

async fn upload_thumbnail(
    State(state): State<AppState>,
    user: AuthUser,
    Path(course_id): Path<i32>,
    mp: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    user.require(&[Role::Instructor])?;

    let owner = access::course(&state.db, course_id).await?;
    owner.ensure_owner(&user, "Not authorized to update this course")?;

    let form = uploads::read_form(mp, UploadKind::Thumbnail).await?;
    let file = require_file(form.file, "No file uploaded")?;

    let old: Option<String> = sqlx::query_scalar("SELECT thumbnail FROM courses WHERE id = $1")
        .bind(course_id)
        .fetch_one(&state.db)
        .await?;

    let stored = state.storage.save(UploadKind::Thumbnail, &file).await?;
    let course = sqlx::query_as::<_, Course>(
        "UPDATE courses SET thumbnail = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(&stored.url)
    .bind(course_id)
    .fetch_one(&state.db)
    .await;

    let course = match course {
        Ok(c) => c,
        Err(e) => {
            state.storage.remove_url(&stored.url).await;
            return Err(e.into());
        }
    };
    if let Some(url) = old {
        state.storage.remove_url(&url).await;
    }

    Ok(Json(json!({ "message": "Course thumbnail uploaded successfully", "course": course })))
}

async fn upload_assignment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(assignment_id): Path<i32>,
    mp: Multipart,
) -> AppResult<impl IntoResponse> {
    user.require(&[Role::Student])?;

    let form = uploads::read_form(mp, UploadKind::Assignment).await?;
    let work = Work {
        url: None,
        text: form.text("submission_text"),
        file: form.file,
    };
    if work.is_empty() {
        return Err(AppError::bad_request("Submission text or file is required"));
    }

    let submission = submit_work(&state, &user, assignment_id, work).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Assignment submitted successfully", "submission": submission })),
    ))
}

#[derive(Deserialize)]
struct DownloadParams {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(sqlx::FromRow)]
struct SubmissionOwner {
    user_id: i32,
    instructor_id: i32,
}

/// `Content-Disposition` value for `name`; quotes and control characters are dropped.
fn attachment(name: &str) -> Option<HeaderValue> {
    let clean: String = name.chars().filter(|c| *c != '"' && !c.is_control()).collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{clean}\"")).ok()
}

async fn download(
    State(state): State<AppState>,
    user: AuthUser,
    Path(filename): Path<String>,
    Query(params): Query<DownloadParams>,
    request: Request,
) -> AppResult<Response> {
    let kind = params
        .kind
        .as_deref()
        .and_then(UploadKind::from_download_type)
        .ok_or_else(|| AppError::bad_request("Invalid file type"))?;

    let path = state
        .storage
        .path_for(kind, &filename)
        .ok_or_else(|| AppError::not_found("File not found"))?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::not_found("File not found"));
    }

    if kind == UploadKind::Assignment {
        let url = format!("/uploads/{}/{}", kind.dir(), filename);
        let owner = sqlx::query_as::<_, SubmissionOwner>(
            r#"SELECT s.user_id, c.instructor_id
               FROM submissions s
               JOIN assignments a ON s.assignment_id = a.id
               JOIN lessons l ON a.lesson_id = l.id
               JOIN modules m ON l.module_id = m.id
               JOIN courses c ON m.course_id = c.id
               WHERE s.submission_file_url = $1 OR s.submission_url = $1
               LIMIT 1"#,
        )
        .bind(&url)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("Submission not found"))?;

        if owner.user_id != user.id && owner.instructor_id != user.id && !user.is_admin() {
            return Err(AppError::forbidden("Not authorized to download this file"));
        }
    }

    let served = match ServeFile::new(&path).oneshot(request).await {
        Ok(res) => res,
        Err(never) => match never {},
    };
    let mut response = served.map(Body::new);
    if let Some(value) = attachment(&filename) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_header_strips_quotes() {
        let v = attachment("re\"port.pdf").unwrap();
        assert_eq!(v.to_str().unwrap(), "attachment; filename=\"report.pdf\"");
        assert!(attachment("notes\n.txt").is_some());
    }
}
