//! services/api/src/adapters/identity.rs
//!
//! This module contains the adapter for the identity resolution service.
//! It implements the `IdentityResolver` port from the `core` crate.

use std::time::Duration;

use astrobot_core::ports::{IdentityResolver, PortError, PortResult};
use async_trait::async_trait;
use serde::Deserialize;

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// An adapter that resolves the caller's public IP over plain HTTP.
#[derive(Clone)]
pub struct HttpIdentityResolver {
    http: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct IpResponse {
    ip: String,
}

impl HttpIdentityResolver {
    /// Creates a new `HttpIdentityResolver`.
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    /// Fetches the caller's IP. Any failure here is expected to degrade the
    /// caller to the fixed fallback trial key, so errors carry little detail.
    async fn resolve_ip(&self) -> PortResult<String> {
        let resp = self
            .http
            .get(&self.url)
            .timeout(IDENTITY_TIMEOUT)
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
            return Err(PortError::Upstream(format!(
                "identity resolution failed ({})",
                resp.status()
            )));
        }

        let body: IpResponse = resp
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(body.ip)
    }
}
