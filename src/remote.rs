//! Client for the remote helper API (§6). The panel delegates every
//! authorization decision to this API; the agent only executes.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

#[derive(Clone)]
pub struct RemoteClient {
    base_url: String,
    uuid: String,
    token: String,
    /// Used for admin/permission checks — verifies certificates normally.
    http: reqwest::Client,
    /// Used only for `/verify-sftp` — certificate verification disabled,
    /// per spec §6 ("self-signed allowed" for the SFTP verification channel).
    insecure_http: reqwest::Client,
}

#[derive(Serialize)]
struct FetchPortsRequest<'a> {
    uuid: &'a str,
    token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct FetchPortsResponse {
    pub port: u16,
    pub sftp: u16,
    pub ssl: bool,
}

#[derive(Serialize)]
struct AdminPermissionRequest<'a> {
    token: &'a str,
    #[serde(rename = "userUuid")]
    user_uuid: &'a str,
}

#[derive(Debug, Deserialize)]
struct AdminPermissionResponse {
    #[serde(rename = "isAdmin")]
    is_admin: bool,
}

#[derive(Serialize)]
struct PermissionRequest<'a> {
    token: &'a str,
    #[serde(rename = "userUuid")]
    user_uuid: &'a str,
    #[serde(rename = "serverUuid")]
    server_uuid: &'a str,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: bool,
}

#[derive(Serialize)]
struct VerifySftpRequest<'a> {
    token: &'a str,
    #[serde(rename = "userName")]
    user_name: &'a str,
    password: &'a str,
    #[serde(rename = "serverUuid")]
    server_uuid: &'a str,
}

impl RemoteClient {
    pub fn new(base_url: String, uuid: String, token: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build remote HTTP client")?;

        let insecure_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build insecure remote HTTP client")?;

        Ok(Self {
            base_url,
            uuid,
            token,
            http,
            insecure_http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/nodes/helper{path}", self.base_url.trim_end_matches('/'))
    }

    pub async fn fetch_ports(&self) -> Result<FetchPortsResponse, AgentError> {
        self.http
            .post(self.endpoint("/fetch-ports"))
            .json(&FetchPortsRequest {
                uuid: &self.uuid,
                token: &self.token,
            })
            .send()
            .await
            .map_err(|e| AgentError::RemoteFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AgentError::RemoteFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| AgentError::RemoteFailed(e.to_string()))
    }

    /// Conservative default: any transport/HTTP failure is treated as `false`
    /// (deny), per §7's `RemoteFailed` policy for auth predicates.
    pub async fn admin_permission(&self, user_uuid: &str) -> bool {
        let result = self
            .http
            .post(self.endpoint("/admin-permission"))
            .json(&AdminPermissionRequest {
                token: &self.token,
                user_uuid,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(resp) => resp
                .json::<AdminPermissionResponse>()
                .await
                .map(|b| b.is_admin)
                .unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "admin-permission check failed, denying");
                false
            }
        }
    }

    pub async fn has_permission(&self, user_uuid: &str, server_uuid: &str) -> bool {
        let result = self
            .http
            .post(self.endpoint("/permission"))
            .json(&PermissionRequest {
                token: &self.token,
                user_uuid,
                server_uuid,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(resp) => resp
                .json::<PermissionResponse>()
                .await
                .map(|b| b.permission)
                .unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "permission check failed, denying");
                false
            }
        }
    }

    pub async fn verify_sftp(&self, user_name: &str, password: &str, server_uuid: &str) -> bool {
        let result = self
            .insecure_http
            .post(self.endpoint("/verify-sftp"))
            .json(&VerifySftpRequest {
                token: &self.token,
                user_name,
                password,
                server_uuid,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(resp) => resp
                .json::<PermissionResponse>()
                .await
                .map(|b| b.permission)
                .unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "verify-sftp check failed, denying");
                false
            }
        }
    }
}
