//! services/api/src/adapters/astrology.rs
//!
//! This module contains the client for the astrology computation service.
//! One struct implements the three computation ports (`BirthDetailsService`,
//! `ChartRenderService`, `DailyHoroscopeService`) since they share a host,
//! credentials, and an OAuth client-credentials token.

use std::time::Duration;

use astrobot_core::{
    domain::{BirthContext, BirthDetails},
    ports::{
        BirthDetailsService, ChartRenderService, DailyHoroscopeService, PortError, PortResult,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Time budget for the token endpoint, shorter than data requests.
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
/// Time budget for computation requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// A cached token is refreshed this long before its actual expiry.
const TOKEN_EXPIRY_MARGIN_MS: i64 = 15_000;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Client for the astrology computation service.
pub struct AstrologyApiClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at_ms: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// The service wraps every JSON payload in a `data` envelope.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct DailyPayload {
    daily_prediction: DailyPrediction,
}

#[derive(Deserialize)]
struct DailyPrediction {
    prediction: String,
}

impl AstrologyApiClient {
    /// Creates a new `AstrologyApiClient`.
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    /// Returns a valid access token, refreshing through the client-credentials
    /// grant when the cached one is absent or close to expiry.
    async fn access_token(&self) -> PortResult<String> {
        let mut cached = self.token.lock().await;
        let now_ms = Utc::now().timestamp_millis();
        if let Some(token) = cached.as_ref() {
            if now_ms < token.expires_at_ms - TOKEN_EXPIRY_MARGIN_MS {
                return Ok(token.access_token.clone());
            }
        }

        debug!("Refreshing astrology service access token.");
        let resp = self
            .http
            .post(format!("{}/token", self.base_url))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await
            .map_err(map_request_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(PortError::Upstream(format!(
                "Failed to fetch access token: {status} {body}"
            )));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let token = CachedToken {
            access_token: body.access_token,
            expires_at_ms: now_ms + body.expires_in.unwrap_or(3600) * 1000,
        };
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }

    fn birth_query(ctx: &BirthContext) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("ayanamsa", ctx.ayanamsa.code().to_string()),
            ("coordinates", ctx.coordinates.clone()),
            ("datetime", ctx.datetime.clone()),
        ];
        if let Some(lang) = ctx.lang_override {
            query.push(("la", lang.as_str().to_string()));
        }
        query
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> PortResult<reqwest::Response> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(token)
            .query(query)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(map_request_error)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let detail = extract_error(resp).await;
            return Err(PortError::Upstream(
                detail.unwrap_or_else(|| format!("Failed ({status})")),
            ));
        }
        Ok(resp)
    }
}

fn map_request_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout
    } else {
        PortError::Unexpected(e.to_string())
    }
}

/// Best-effort extraction of a server-provided error string from a non-2xx
/// body. A body that is not JSON, or carries no `error` field, yields `None`.
async fn extract_error(resp: reqwest::Response) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    resp.json::<ErrorBody>().await.ok().map(|b| b.error)
}

//=========================================================================================
// Computation Port Implementations
//=========================================================================================

#[async_trait]
impl BirthDetailsService for AstrologyApiClient {
    async fn birth_details(&self, ctx: &BirthContext) -> PortResult<BirthDetails> {
        let resp = self
            .get("/v2/astrology/birth-details", &Self::birth_query(ctx))
            .await?;
        let body: Envelope<BirthDetails> = resp
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(body.data)
    }
}

#[async_trait]
impl ChartRenderService for AstrologyApiClient {
    /// Renders the chart. The body is raw scalable-vector markup, passed
    /// through as text.
    async fn render_chart(&self, ctx: &BirthContext) -> PortResult<String> {
        let resp = self
            .get("/v2/astrology/chart", &Self::birth_query(ctx))
            .await?;
        resp.text()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

#[async_trait]
impl DailyHoroscopeService for AstrologyApiClient {
    async fn daily_prediction(&self, sign: &str, datetime: &str) -> PortResult<String> {
        // The service requires the lowercase sign enum.
        let query = [
            ("sign", sign.to_lowercase()),
            ("datetime", datetime.to_string()),
        ];
        let resp = self.get("/v2/horoscope/daily", &query).await?;
        let body: Envelope<DailyPayload> = resp
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(body.data.daily_prediction.prediction)
    }
}
