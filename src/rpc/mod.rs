//! Transmission RPC session client.
//!
//! The daemon guards its RPC endpoint with an anti-CSRF session id. Any
//! request carrying a missing or stale id is answered with HTTP 409 and the
//! valid id in the `X-Transmission-Session-Id` header. [`RpcClient::call`]
//! captures that id and replays the request once; every call site gets the
//! same behaviour.

pub mod methods;
#[cfg(test)]
pub(crate) mod fake;

use crate::config::TransmissionConfig;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const SESSION_ID_HEADER: &str = "X-Transmission-Session-Id";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc {method}: transport error: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("rpc {method}: unexpected HTTP status {status}: {body}")]
    Status {
        method: String,
        status: u16,
        body: String,
    },
    #[error("rpc {method}: authentication rejected")]
    Unauthorized { method: String },
    #[error("rpc {method}: session id rejected after renewal")]
    TokenRejected { method: String },
    #[error("rpc {method}: 409 response without X-Transmission-Session-Id header")]
    MissingToken { method: String },
    #[error("rpc {method}: malformed response: {details}")]
    Protocol { method: String, details: String },
    #[error("rpc {method}: daemon returned result {result:?}")]
    Daemon { method: String, result: String },
}

impl RpcError {
    /// Timeouts and refused connections; worth a single replay within one call.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<&'a serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub result: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl RpcResponse {
    pub fn decode<T: DeserializeOwned>(self, method: &str) -> Result<T, RpcError> {
        serde_json::from_value(self.arguments).map_err(|err| RpcError::Protocol {
            method: method.to_string(),
            details: err.to_string(),
        })
    }
}

enum Reply {
    Done(RpcResponse),
    TokenRequired(Option<String>),
}

pub struct RpcClient {
    http: Client,
    url: String,
    credentials: Option<Credentials>,
    timeout: Duration,
    token: RwLock<Option<String>>,
    handshake: Mutex<()>,
}

impl RpcClient {
    pub fn new(
        http: Client,
        url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            credentials,
            timeout,
            token: RwLock::new(None),
            handshake: Mutex::new(()),
        }
    }

    pub fn from_config(http: Client, cfg: &TransmissionConfig) -> Self {
        let credentials = match (&cfg.username, &cfg.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        Self::new(http, cfg.rpc_url(), credentials, cfg.timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[cfg(test)]
    pub async fn session_id(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    #[cfg(test)]
    pub async fn set_session_id(&self, token: &str) {
        *self.token.write().await = Some(token.to_string());
    }

    /// Issues one RPC call. A 409 is answered by one replay with the renewed
    /// session id, and a transient transport failure by one plain replay. Each
    /// budget is spent at most once, so a call makes at most three requests.
    pub async fn call(
        &self,
        method: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<RpcResponse, RpcError> {
        let request = RpcRequest {
            method,
            arguments: arguments.as_ref(),
        };

        let mut token = self.token.read().await.clone();
        // Without a session id the first caller leads the handshake with its own
        // request; everyone else waits and reuses the id it discovers.
        let _handshake = if token.is_none() {
            let guard = self.handshake.lock().await;
            token = self.token.read().await.clone();
            if token.is_none() {
                Some(guard)
            } else {
                None
            }
        } else {
            None
        };

        let mut token_retried = false;
        let mut transport_retried = false;
        loop {
            match self.send(&request, token.as_deref()).await {
                Ok(Reply::Done(response)) => return Ok(response),
                Ok(Reply::TokenRequired(offered)) => {
                    let renewed = self.adopt_token(method, token.as_deref(), offered).await?;
                    if token_retried {
                        return Err(RpcError::TokenRejected {
                            method: method.to_string(),
                        });
                    }
                    debug!(method, "session id renewed, replaying request");
                    token = Some(renewed);
                    token_retried = true;
                }
                Err(err) if err.is_transient() && !transport_retried => {
                    warn!(method, error = %err, "rpc transport error, retrying once");
                    transport_retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send(&self, request: &RpcRequest<'_>, token: Option<&str>) -> Result<Reply, RpcError> {
        let method = request.method;
        let mut req = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(request);
        if let Some(token) = token {
            req = req.header(SESSION_ID_HEADER, token);
        }
        if let Some(creds) = &self.credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }

        let resp = req.send().await.map_err(|source| RpcError::Transport {
            method: method.to_string(),
            source,
        })?;

        let status = resp.status();
        if status == StatusCode::CONFLICT {
            let offered = resp
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Ok(Reply::TokenRequired(offered));
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(RpcError::Unauthorized {
                method: method.to_string(),
            });
        }

        let body = resp.bytes().await.map_err(|source| RpcError::Transport {
            method: method.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(RpcError::Status {
                method: method.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }

        let response: RpcResponse =
            serde_json::from_slice(&body).map_err(|err| RpcError::Protocol {
                method: method.to_string(),
                details: err.to_string(),
            })?;
        if response.result != "success" {
            return Err(RpcError::Daemon {
                method: method.to_string(),
                result: response.result,
            });
        }
        Ok(Reply::Done(response))
    }

    /// Stores the id offered with a 409. If a concurrent caller already replaced
    /// the stale id, its replacement wins and no second renewal happens.
    async fn adopt_token(
        &self,
        method: &str,
        stale: Option<&str>,
        offered: Option<String>,
    ) -> Result<String, RpcError> {
        let mut slot = self.token.write().await;
        if let Some(current) = slot.as_deref() {
            if Some(current) != stale {
                return Ok(current.to_string());
            }
        }
        let offered = offered.ok_or_else(|| RpcError::MissingToken {
            method: method.to_string(),
        })?;
        info!(method, "adopted new rpc session id");
        *slot = Some(offered.clone());
        Ok(offered)
    }
}
