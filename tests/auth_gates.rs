mod test_support;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use lms_server::models::Role;
use serde_json::json;
use test_support::{app, call, get, send_json, token};
use tower::ServiceExt;

#[tokio::test]
async fn health_answers_ok() {
    let (app, _) = app();
    let resp = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let (app, _) = app();
    for uri in ["/api/users", "/api/auth/profile", "/api/enrollments/my-courses", "/api/analytics/dashboard"] {
        let (status, body) = call(&app, get(uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn forged_token_is_rejected() {
    let (app, _) = app();
    let other = lms_server::auth::JwtKeys::new("some-other-secret", 1)
        .issue(1, "admin@example.com", Role::Admin)
        .unwrap();

    let (status, _) = call(&app, get("/api/users", Some(&other))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, get("/api/users", Some("not.a.jwt"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn student_cannot_reach_admin_routes() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);

    for uri in ["/api/users", "/api/users/courses", "/api/enrollments/stats", "/api/search/users?q=ann"] {
        let (status, body) = call(&app, get(uri, Some(&student))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn role_gates_on_writes() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);
    let instructor = token(&state, 3, Role::Instructor);

    let (status, _) = call(
        &app,
        send_json("POST", "/api/courses", Some(&student), json!({ "title": "t", "description": "d" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        send_json("POST", "/api/enrollments", Some(&instructor), json!({ "course_id": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &app,
        send_json("POST", "/api/categories", Some(&instructor), json!({ "name": "Rust" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn students_only_see_their_own_performance() {
    let (app, state) = app();
    let student = token(&state, 7, Role::Student);

    let (status, _) = call(&app, get("/api/analytics/student/8/performance", Some(&student))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn google_login_reports_when_unconfigured() {
    let (app, _) = app();
    let (status, body) = call(&app, get("/api/auth/google", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Google login is not configured");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (app, _) = app();
    let (status, _) = call(&app, get("/api/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_preflight_allows_the_frontend_with_credentials() {
    let (app, _) = app();
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/courses")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-auth-token,content-type")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    let headers = resp.headers();
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );
    let allowed = headers
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .unwrap()
        .to_str()
        .unwrap()
        .to_ascii_lowercase();
    assert!(allowed.contains("x-auth-token"), "{allowed}");
    assert!(allowed.contains("content-type"), "{allowed}");
}
