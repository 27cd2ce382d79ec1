// Authorization-code login and token refresh against the Spotify accounts service

use super::{ProviderError, ProviderResult};
use crate::playback::Credentials;
use anyhow::{anyhow, bail, Result};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, info};

pub const AUTH_URL: &str = "https://accounts.spotify.com/authorize";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const SCOPES: &str = "user-read-playback-state user-library-read user-library-modify user-read-recently-played";

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>, // refresh responses usually omit it
    #[serde(default)]
    pub expires_in: u64,
}

/// Browser URL that starts the login. `state` comes back on the redirect.
pub fn authorize_url(client_id: &str, redirect_uri: &str, state: &str) -> Result<Url> {
    let url = Url::parse_with_params(
        AUTH_URL,
        &[
            ("response_type", "code"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("scope", SCOPES),
            ("state", state),
        ],
    )?;
    Ok(url)
}

/// Pull the authorization code out of the URL the browser was redirected to.
pub fn code_from_redirect(redirected: &str, expected_state: &str) -> Result<String> {
    let url = Url::parse(redirected.trim())?;
    let mut code = None;
    let mut state = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => bail!("Authorization denied: {}", value),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        bail!("State mismatch in redirect, refusing to exchange the code");
    }
    code.ok_or_else(|| anyhow!("No code found in redirect URL"))
}

pub async fn exchange_code(
    http: &Client,
    credentials: &Credentials,
    code: &str,
    redirect_uri: &str,
) -> ProviderResult<TokenSet> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
    ];
    let tokens = request_tokens(http, &params).await?;
    info!("Authorization code exchanged for tokens");
    Ok(tokens)
}

pub async fn refresh_token(
    http: &Client,
    credentials: &Credentials,
    refresh_token: &str,
) -> ProviderResult<TokenSet> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
    ];
    let tokens = request_tokens(http, &params).await?;
    debug!("Access token refreshed, valid for {}s", tokens.expires_in);
    Ok(tokens)
}

async fn request_tokens(http: &Client, params: &[(&str, &str)]) -> ProviderResult<TokenSet> {
    let response = http.post(TOKEN_URL).form(params).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status {
            status: status.as_u16(),
            endpoint: "accounts/api/token".to_string(),
        });
    }

    response
        .json::<TokenSet>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}
