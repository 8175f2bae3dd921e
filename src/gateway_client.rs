//! Launcher-side session client (spec.md §4.9): the thin HTTP helper the
//! out-of-scope launcher links against to register and tear down a
//! container's session. Grounded in `src/api/client.rs`'s reqwest-backed
//! daemon client shape.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::session::RepoMode;

/// Errors from a launcher-side gateway call.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (connection refused, timeout, etc.).
    #[error("gateway request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// The gateway responded with a non-success status.
    #[error("gateway returned {status}: {reason}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Reason reported by the gateway's error response.
        reason: String,
    },
}

#[derive(Debug, Serialize)]
struct RegisterBody {
    launcher_secret: String,
    container_id: String,
    container_ip: IpAddr,
    mode: RepoMode,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct DeleteBody {
    launcher_secret: String,
    container_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: String,
}

/// Client the launcher uses to register and delete container sessions
/// against the gateway's control-plane API.
#[derive(Debug, Clone)]
pub struct LauncherClient {
    http: reqwest::Client,
    base_url: String,
    launcher_secret: String,
}

impl LauncherClient {
    /// Construct a client targeting `base_url` (e.g. `http://127.0.0.1:8088`)
    /// with the configured launcher secret.
    #[must_use]
    pub fn new(base_url: impl Into<String>, launcher_secret: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            launcher_secret: launcher_secret.into(),
        }
    }

    /// Register a new session for `container_id`, returning the raw bearer
    /// token the container should present on every subsequent call.
    pub async fn register(
        &self,
        container_id: impl Into<String>,
        container_ip: IpAddr,
        mode: RepoMode,
    ) -> Result<String, ClientError> {
        let body = RegisterBody {
            launcher_secret: self.launcher_secret.clone(),
            container_id: container_id.into(),
            container_ip,
            mode,
        };

        let response = self
            .http
            .post(format!("{}/session/register", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Request)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let parsed: RegisterResponse = response.json().await.map_err(ClientError::Request)?;
        Ok(parsed.token)
    }

    /// Delete the session belonging to `container_id`. Returns `true` if a
    /// session was actually removed.
    pub async fn delete(&self, container_id: impl Into<String>) -> Result<bool, ClientError> {
        let body = DeleteBody {
            launcher_secret: self.launcher_secret.clone(),
            container_id: container_id.into(),
        };

        let response = self
            .http
            .delete(format!("{}/session", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Request)?;

        if response.status().is_success() {
            Ok(true)
        } else if response.status().as_u16() == 404 {
            Ok(false)
        } else {
            Err(Self::rejection(response).await)
        }
    }

    async fn rejection(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();
        let reason = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.reason)
            .unwrap_or_else(|_| "unknown error".to_string());
        ClientError::Rejected { status, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_targets_configured_base_url() {
        let client = LauncherClient::new("http://127.0.0.1:8088", "secret");
        assert_eq!(client.base_url, "http://127.0.0.1:8088");
        assert_eq!(client.launcher_secret, "secret");
    }
}
