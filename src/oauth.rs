//! Google OAuth 2.0 authorization-code flow.

use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;

use crate::config::GoogleConfig;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Deserialize, Debug, Clone)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl GoogleProfile {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.email.split('@').next().unwrap_or_default().to_string())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub fn authorize_url(cfg: &GoogleConfig, state: &str) -> String {
    let params = [
        ("client_id", cfg.client_id.as_str()),
        ("redirect_uri", cfg.callback_url.as_str()),
        ("response_type", "code"),
        ("scope", "openid profile email"),
        ("state", state),
    ];
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, NON_ALPHANUMERIC)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{AUTH_URL}?{query}")
}

/// Trades the callback `code` for an access token and fetches the profile behind it.
pub async fn fetch_profile(http: &reqwest::Client, cfg: &GoogleConfig, code: &str) -> Result<GoogleProfile> {
    let token: TokenResponse = http
        .post(TOKEN_URL)
        .form(&[
            ("code", code),
            ("client_id", cfg.client_id.as_str()),
            ("client_secret", cfg.client_secret.as_str()),
            ("redirect_uri", cfg.callback_url.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .context("google token request")?
        .error_for_status()
        .context("google token exchange rejected")?
        .json()
        .await
        .context("google token response")?;

    let profile = http
        .get(USERINFO_URL)
        .bearer_auth(&token.access_token)
        .send()
        .await
        .context("google userinfo request")?
        .error_for_status()
        .context("google userinfo rejected")?
        .json()
        .await
        .context("google userinfo response")?;

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_encodes_params() {
        let cfg = GoogleConfig {
            client_id: "abc.apps".into(),
            client_secret: "s".into(),
            callback_url: "http://localhost:5000/api/auth/google/callback".into(),
        };
        let url = authorize_url(&cfg, "st4te");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("client_id=abc%2Eapps"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Fapi%2Fauth%2Fgoogle%2Fcallback"));
        assert!(url.contains("scope=openid%20profile%20email"));
        assert!(url.contains("state=st4te"));
    }

    #[test]
    fn display_name_falls_back_to_mailbox() {
        let p: GoogleProfile =
            serde_json::from_str(r#"{"sub":"1","email":"ada@example.com"}"#).unwrap();
        assert_eq!(p.display_name(), "ada");
    }
}
