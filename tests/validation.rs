mod test_support;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use lms_server::models::Role;
use serde_json::json;
use test_support::{app, call, get, send_json, token};

#[tokio::test]
async fn register_checks_fields_before_touching_the_store() {
    let (app, _) = app();

    let (status, body) = call(
        &app,
        send_json("POST", "/api/auth/register", None, json!({ "name": "Ann", "email": "ann@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Please provide all required fields");

    let (status, body) = call(
        &app,
        send_json(
            "POST",
            "/api/auth/register",
            None,
            json!({ "name": "Ann", "email": "not-an-email", "password": "secret1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid email format");

    let (status, body) = call(
        &app,
        send_json(
            "POST",
            "/api/auth/register",
            None,
            json!({ "name": "Ann", "email": "ann@example.com", "password": "123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Password must be at least 6 characters");
}

#[tokio::test]
async fn course_needs_title_and_description() {
    let (app, state) = app();
    let instructor = token(&state, 3, Role::Instructor);

    let (status, body) = call(
        &app,
        send_json("POST", "/api/courses", Some(&instructor), json!({ "title": "  ", "description": "d" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Title and description are required");

    let (status, _) = call(
        &app,
        send_json(
            "POST",
            "/api/courses",
            Some(&instructor),
            json!({ "title": "Rust", "description": "d", "price": -5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_quiz_batch_is_rejected() {
    let (app, state) = app();
    let instructor = token(&state, 3, Role::Instructor);

    let (status, body) = call(
        &app,
        send_json("POST", "/api/quizzes/lesson/1", Some(&instructor), json!({ "questions": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = call(
        &app,
        send_json(
            "POST",
            "/api/quizzes/lesson/1",
            Some(&instructor),
            json!({ "questions": [{ "question": "2+2?", "type": "multiple_choice", "options": ["4"], "correct_answer": 0 }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enrollment_needs_a_course_id() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);

    let (status, body) = call(&app, send_json("POST", "/api/enrollments", Some(&student), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Course ID is required");
}

#[tokio::test]
async fn review_rating_is_bounded() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);

    let (status, body) = call(
        &app,
        send_json("POST", "/api/reviews/course/1", Some(&student), json!({ "rating": 6 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Rating must be between 1 and 5");

    let (status, _) = call(
        &app,
        send_json("PUT", "/api/reviews/4", Some(&student), json!({ "rating": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn course_search_requires_a_query() {
    let (app, _) = app();
    let (status, body) = call(&app, get("/api/search/courses?q=", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Search query is required");
}

#[tokio::test]
async fn downloads_check_type_and_name() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);

    let (status, body) = call(&app, get("/api/files/download/a.mp4?type=videos", Some(&student))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid file type");

    let (status, body) = call(&app, get("/api/files/download/missing.png?type=avatars", Some(&student))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "File not found");

    let (status, _) = call(&app, get("/api/files/download/..%2F..%2Fetc%2Fpasswd?type=avatars", Some(&student))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn public_avatars_are_served_from_disk() {
    let (app, state) = app();
    let dir = state.storage.dir(lms_server::uploads::UploadKind::Avatar);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("face.png"), b"png-bytes").unwrap();

    let resp = tower::ServiceExt::oneshot(app, get("/uploads/avatars/face.png", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"png-bytes");
}

fn raw_json(uri: &str, token: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body))
        .expect("request")
}

#[tokio::test]
async fn malformed_bodies_answer_400_with_a_json_error() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);

    for body in [r#"{"rating": 5"#, r#"{"rating": [5]}"#, "not json"] {
        let (status, json) = call(&app, raw_json("/api/reviews/course/1", &student, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert!(json["error"].is_string(), "{body}: {json}");
    }
}

#[tokio::test]
async fn string_ratings_are_parsed_like_numbers() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);

    let (status, body) = call(
        &app,
        send_json("POST", "/api/reviews/course/1", Some(&student), json!({ "rating": "9" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Rating must be between 1 and 5");
}

#[tokio::test]
async fn non_numeric_path_ids_answer_400_with_a_json_error() {
    let (app, _) = app();

    let (status, body) = call(&app, get("/api/courses/abc", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string(), "{body}");
}
