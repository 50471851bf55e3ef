//! services/api/src/adapters/waitlist.rs
//!
//! This module contains the adapter for the waitlist signup endpoint.
//! It implements the `WaitlistService` port from the `core` crate.

use std::time::Duration;

use astrobot_core::{
    domain::{Language, WaitlistAck},
    ports::{PortError, PortResult, WaitlistService},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const WAITLIST_TIMEOUT: Duration = Duration::from_secs(15);

/// An adapter that posts waitlist signups over plain HTTP.
#[derive(Clone)]
pub struct HttpWaitlistAdapter {
    http: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct SignupBody<'a> {
    email: &'a str,
    language: &'a str,
    source: &'a str,
}

#[derive(Deserialize)]
struct SignupResponse {
    #[serde(default)]
    duplicate: bool,
}

#[derive(Deserialize)]
struct SignupError {
    error: String,
}

impl HttpWaitlistAdapter {
    /// Creates a new `HttpWaitlistAdapter`.
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl WaitlistService for HttpWaitlistAdapter {
    /// Enrolls an email. An already-enrolled email is a success with
    /// `duplicate` set; the endpoint is idempotent for it.
    async fn join(&self, email: &str, language: Language, source: &str) -> PortResult<WaitlistAck> {
        let resp = self
            .http
            .post(&self.url)
            .json(&SignupBody {
                email,
                language: language.as_str(),
                source,
            })
            .timeout(WAITLIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::Timeout
                } else {
                    PortError::Unexpected(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp
                .json::<SignupError>()
                .await
                .ok()
                .map(|b| b.error)
                .unwrap_or_else(|| format!("waitlist signup failed ({status})"));
            return Err(PortError::Upstream(detail));
        }

        let body: SignupResponse = resp
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(WaitlistAck {
            duplicate: body.duplicate,
        })
    }
}
