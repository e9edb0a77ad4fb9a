use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::extract::{Json, Query};
use crate::{
    auth::{AuthError, AuthUser, TOKEN_COOKIE},
    db::is_unique_violation,
    error::{AppError, AppResult},
    models::User,
    oauth,
    password::{hash_password_blocking, verify_password_blocking},
    state::AppState,
};

const OAUTH_STATE_COOKIE: &str = "oauth_state";
const MIN_PASSWORD_LEN: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/profile", get(profile).put(update_profile))
        .route("/session", get(session))
        .route("/google", get(google_start))
        .route("/google/callback", get(google_callback))
}

#[derive(Deserialize)]
struct RegisterReq {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct LoginReq {
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct ProfileReq {
    name: Option<String>,
    avatar: Option<String>,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn public_user(u: &User) -> serde_json::Value {
    json!({
        "id": u.id,
        "name": u.name,
        "email": u.email,
        "role": u.role,
        "avatar": u.avatar,
    })
}

fn token_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> AppResult<impl IntoResponse> {
    let (Some(name), Some(email), Some(password)) =
        (non_blank(req.name), non_blank(req.email), req.password)
    else {
        return Err(AppError::bad_request("Please provide all required fields"));
    };
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("Invalid email format"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request("Password must be at least 6 characters"));
    }

    let password_hash = hash_password_blocking(password).await?;

    let user = sqlx::query_as::<_, User>(
        r#"INSERT INTO users (name, email, password_hash, role, avatar, oauth_provider)
           VALUES ($1, $2, $3, 'student', $4, 'local')
           RETURNING *"#,
    )
    .bind(&name)
    .bind(&email)
    .bind(&password_hash)
    .bind(non_blank(req.avatar))
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::bad_request("Email already registered")
        } else {
            e.into()
        }
    })?;

    let token = state.jwt.issue(user.id, &user.email, user.role)?;
    tracing::info!(user_id = user.id, "registered user");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registered successfully",
            "token": token,
            "user": public_user(&user),
        })),
    ))
}

async fn login(State(state): State<AppState>, Json(req): Json<LoginReq>) -> AppResult<Json<serde_json::Value>> {
    let (Some(email), Some(password)) = (non_blank(req.email), req.password.filter(|p| !p.is_empty())) else {
        return Err(AppError::bad_request("Please provide email and password"));
    };

    let invalid = || AppError::Unauthorized("Invalid email or password".into());

    let user = sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE email = $1 AND oauth_provider = 'local'",
    )
    .bind(&email)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(invalid)?;

    let stored = user.password_hash.clone().ok_or_else(invalid)?;
    if !verify_password_blocking(password, stored).await {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::forbidden("Account is deactivated"));
    }

    let token = state.jwt.issue(user.id, &user.email, user.role)?;

    Ok(Json(json!({
        "message": "Logged in successfully",
        "token": token,
        "user": public_user(&user),
    })))
}

async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build(TOKEN_COOKIE).path("/"));
    (jar, Json(json!({ "message": "Logged out successfully" })))
}

async fn profile(State(state): State<AppState>, user: AuthUser) -> AppResult<Json<serde_json::Value>> {
    let u = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(json!({
        "message": "Profile fetched",
        "user": {
            "id": u.id,
            "name": u.name,
            "email": u.email,
            "role": u.role,
            "avatar": u.avatar,
            "created_at": u.created_at,
        },
    })))
}

async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ProfileReq>,
) -> AppResult<Json<serde_json::Value>> {
    let u = sqlx::query_as::<_, User>(
        r#"UPDATE users
           SET name = COALESCE($1, name),
               avatar = COALESCE($2, avatar),
               updated_at = now()
           WHERE id = $3
           RETURNING *"#,
    )
    .bind(non_blank(req.name))
    .bind(non_blank(req.avatar))
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(json!({ "message": "Profile updated", "user": public_user(&u) })))
}

/// Reports the cookie session left behind by the Google callback.
async fn session(State(state): State<AppState>, jar: CookieJar) -> AppResult<Json<serde_json::Value>> {
    let anonymous = Json(json!({ "authenticated": false, "user": null }));

    let Some(token) = jar.get(TOKEN_COOKIE).map(|c| c.value().to_string()) else {
        return Ok(anonymous);
    };
    let Ok(claims) = state.jwt.verify(&token) else {
        return Ok(anonymous);
    };

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(claims.id)
        .fetch_optional(&state.db)
        .await?;

    Ok(match user {
        Some(u) if u.is_active => Json(json!({
            "authenticated": true,
            "token": token,
            "user": public_user(&u),
        })),
        _ => anonymous,
    })
}

async fn google_start(State(state): State<AppState>, jar: CookieJar) -> AppResult<Response> {
    let cfg = state
        .config
        .google
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("Google login is not configured".into()))?;

    let csrf = Uuid::new_v4().to_string();
    let jar = jar.add(
        Cookie::build((OAUTH_STATE_COOKIE, csrf.clone()))
            .path("/api/auth/google")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build(),
    );

    Ok((jar, Redirect::to(&oauth::authorize_url(cfg, &csrf))).into_response())
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> AppResult<Response> {
    let cfg = state
        .config
        .google
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("Google login is not configured".into()))?;
    let failure = format!("{}/login?googleLogin=failed", state.config.frontend_url);

    let expected = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(OAUTH_STATE_COOKIE).path("/api/auth/google"));

    if let Some(err) = params.error {
        tracing::warn!(error = %err, "google login cancelled");
        return Ok((jar, Redirect::to(&failure)).into_response());
    }
    let code = params.code.ok_or_else(|| AppError::bad_request("Missing authorization code"))?;
    if expected.is_none() || expected != params.state {
        return Err(AuthError::InvalidToken.into());
    }

    let profile = match oauth::fetch_profile(&state.http, cfg, &code).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "google login failed");
            return Ok((jar, Redirect::to(&failure)).into_response());
        }
    };

    // existing accounts keep their role and provider
    let user = sqlx::query_as::<_, User>(
        r#"INSERT INTO users (name, email, role, avatar, oauth_provider, oauth_id)
           VALUES ($1, $2, 'student', $3, 'google', $4)
           ON CONFLICT (email) DO UPDATE SET updated_at = now()
           RETURNING *"#,
    )
    .bind(profile.display_name())
    .bind(&profile.email)
    .bind(&profile.picture)
    .bind(&profile.sub)
    .fetch_one(&state.db)
    .await?;

    if !user.is_active {
        return Ok((jar, Redirect::to(&failure)).into_response());
    }

    let token = state.jwt.issue(user.id, &user.email, user.role)?;
    let secure = state.config.frontend_url.starts_with("https://");
    let jar = jar.add(token_cookie(token, secure));
    tracing::info!(user_id = user.id, "google login");

    let target = format!("{}?googleLogin=success", state.config.frontend_url);
    Ok((jar, Redirect::to(&target)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+c@mail.co.uk"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada example@x.io"));
        assert!(!is_valid_email("@x.io"));
        assert!(!is_valid_email("ada@@x.io"));
        assert!(!is_valid_email("ada"));
    }
}
