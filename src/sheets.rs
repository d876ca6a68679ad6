//! # Google Sheets Record Store
//!
//! Appends completed receipts as rows of a Google spreadsheet. Requests are
//! authorized with a service account: a signed JWT assertion is exchanged for
//! an OAuth access token, which is cached until shortly before it expires.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::SheetsConfig;
use crate::conversation_errors::ServiceError;
use crate::record_store::{ReceiptRecord, RecordStore};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime requested for the signed assertion (Google's maximum)
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before their advertised expiry
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service account JSON key used for authorization
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid service account key")
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read service account key {path}"))?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Record store writing one spreadsheet row per receipt
pub struct SheetsRecordStore {
    client: reqwest::Client,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    config: SheetsConfig,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsRecordStore {
    /// Create a store from the configuration, reading the service account key file
    pub fn from_config(config: &SheetsConfig) -> Result<Self> {
        let key = ServiceAccountKey::from_file(&config.credentials_file)?;
        Self::new(config.clone(), key)
    }

    pub fn new(config: SheetsConfig, key: ServiceAccountKey) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Service account private key is not a valid RSA PEM key")?;

        Ok(Self {
            client: reqwest::Client::new(),
            key,
            encoding_key,
            config,
            api_base: SHEETS_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point the store at another Sheets API host
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// URL of the `values.append` call for the configured sheet
    pub fn append_url(&self) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.api_base).context("Invalid Sheets API base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Sheets API base URL cannot have a path"))?
            .extend(["v4", "spreadsheets", self.config.spreadsheet_id.as_str(), "values"])
            .push(&format!("{}:append", self.config.sheet_name));
        Ok(url)
    }

    fn sign_assertion(&self, now: DateTime<Utc>) -> Result<String, ServiceError> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::RecordStore(format!("Failed to sign assertion: {e}")))
    }

    /// Current access token, fetching a new one when the cached token is about to expire
    async fn access_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at > now {
                return Ok(token.value.clone());
            }
        }

        debug!(token_uri = %self.key.token_uri, "Requesting Google access token");
        let assertion = self.sign_assertion(now)?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::RecordStore(format!(
                "Token request failed with HTTP {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        let expires_at =
            now + Duration::seconds((token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    async fn append_row(&self, row: Vec<String>) -> Result<(), ServiceError> {
        let token = self.access_token().await?;
        let url = self
            .append_url()
            .map_err(|e| ServiceError::RecordStore(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "majorDimension": "ROWS", "values": [row] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::RecordStore(format!(
                "Append failed with HTTP {status}: {body}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl RecordStore for SheetsRecordStore {
    async fn append_record(&self, record: &ReceiptRecord) -> Result<()> {
        self.append_row(record.to_row())
            .await
            .with_context(|| format!("Failed to append receipt of chat {}", record.chat_id))?;

        info!(
            chat_id = record.chat_id,
            sheet = %self.config.sheet_name,
            "Receipt appended to spreadsheet"
        );
        Ok(())
    }
}
