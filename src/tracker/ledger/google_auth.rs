//! OAuth2 access tokens for a Google service account.

use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::LedgerError;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh a little before Google says the token expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Mints and caches bearer tokens for one service account.
pub struct ServiceAccountAuth {
    client_email: String,
    key: EncodingKey,
    token_uri: String,
    http: reqwest::Client,
    cached: Mutex<Option<(String, Instant)>>,
}

impl ServiceAccountAuth {
    /// Parse the service-account JSON. Fails without touching the network.
    pub fn from_json(credentials_json: &str, http: reqwest::Client) -> Result<Self, LedgerError> {
        let account: ServiceAccountKey = serde_json::from_str(credentials_json)
            .map_err(|e| LedgerError::Credentials(format!("not a service account key: {e}")))?;
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| LedgerError::Credentials(format!("bad private key: {e}")))?;

        Ok(Self {
            client_email: account.client_email,
            key,
            token_uri: account.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            http,
            cached: Mutex::new(None),
        })
    }

    pub async fn token(&self) -> Result<String, LedgerError> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expires_at)) = cached.as_ref()
            && Instant::now() < *expires_at
        {
            return Ok(token.clone());
        }

        let fresh = self.fetch().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some((fresh.access_token.clone(), Instant::now() + lifetime));
        Ok(fresh.access_token)
    }

    async fn fetch(&self) -> Result<TokenResponse, LedgerError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| LedgerError::Credentials(format!("failed to sign assertion: {e}")))?;

        debug!("Requesting access token for {}", self.client_email);
        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Transport(format!("token endpoint {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("bad token response: {e}")))
    }
}
