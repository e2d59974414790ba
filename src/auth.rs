//! Google OAuth bootstrap: consent flow, token exchange, and refresh.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

use crate::config::{self, AccountTokens, GoogleConfig};

const REDIRECT_PORT: u16 = 8085;
const REDIRECT_URI: &str = "http://localhost:8085/callback";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/calendar";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
}

/// Start a local HTTP server to receive the OAuth callback.
/// Returns the authorization code.
fn wait_for_callback() -> Result<String> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", REDIRECT_PORT))
        .with_context(|| format!("Failed to bind to port {}", REDIRECT_PORT))?;

    println!("Waiting for OAuth callback on port {}...", REDIRECT_PORT);

    let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Request line looks like: GET /callback?code=xxx&... HTTP/1.1
    let url_part = request_line
        .split_whitespace()
        .nth(1)
        .context("Invalid request")?;

    let url = url::Url::parse(&format!("http://localhost{}", url_part))?;

    let code = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .context("No code in callback")?;

    let response = "HTTP/1.1 200 OK\r\n\
        Content-Type: text/html\r\n\
        Connection: close\r\n\
        \r\n\
        <html><body>\
        <h1>Authentication successful!</h1>\
        <p>You can close this window and return to the terminal.</p>\
        </body></html>";

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(code)
}

fn tokens_from_response(response: TokenResponse, previous_refresh: Option<&str>) -> AccountTokens {
    let expires_at = if response.expires_in > 0 {
        Some(Utc::now() + chrono::Duration::seconds(response.expires_in))
    } else {
        None
    };

    // Google typically doesn't return a new refresh_token on refresh
    let refresh_token = if response.refresh_token.is_empty() {
        previous_refresh.unwrap_or_default().to_string()
    } else {
        response.refresh_token
    };

    AccountTokens {
        access_token: response.access_token,
        refresh_token,
        expires_at,
    }
}

/// Run the full OAuth authentication flow and persist the tokens.
pub async fn authenticate(http: &reqwest::Client, google: &GoogleConfig) -> Result<()> {
    let consent_url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        AUTH_URL,
        google.client_id,
        REDIRECT_URI,
        SCOPE,
    );

    println!("\nOpen this URL in your browser to authenticate:\n");
    println!("{}\n", consent_url);

    if open::that(&consent_url).is_err() {
        println!("(Could not open browser automatically, please copy the URL above)");
    }

    let code = wait_for_callback()?;

    println!("\nReceived authorization code, exchanging for tokens...");

    let response = http
        .post(TOKEN_URL)
        .form(&[
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("code", code.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", REDIRECT_URI),
        ])
        .send()
        .await
        .context("Token exchange request failed")?;

    if !response.status().is_success() {
        anyhow::bail!(
            "Token exchange failed with HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        );
    }

    let tokens = tokens_from_response(
        response.json().await.context("Invalid token response")?,
        None,
    );
    config::save_tokens(&tokens)?;

    println!("Authentication successful!");
    Ok(())
}

/// Return a valid access token, refreshing first when expired or near expiry.
pub async fn ensure_access_token(
    http: &reqwest::Client,
    google: &GoogleConfig,
) -> Result<String> {
    let tokens = config::load_tokens()?
        .context("Not authenticated. Run `feedcal auth` first.")?;

    let expired = tokens
        .expires_at
        .map(|at| at <= Utc::now() + chrono::Duration::seconds(60))
        .unwrap_or(true);

    if !expired {
        return Ok(tokens.access_token);
    }

    println!("Access token expired, refreshing...");

    let response = http
        .post(TOKEN_URL)
        .form(&[
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("refresh_token", tokens.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await
        .context("Token refresh request failed")?;

    if !response.status().is_success() {
        anyhow::bail!(
            "Token refresh failed with HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        );
    }

    let refreshed = tokens_from_response(
        response.json().await.context("Invalid token response")?,
        Some(&tokens.refresh_token),
    );
    config::save_tokens(&refreshed)?;

    Ok(refreshed.access_token)
}
