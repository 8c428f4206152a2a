//! OAuth2 token requests for session refresh.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::session::{AuthorizedSession, GrantType};

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// HTTP method used to reach the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMethod {
    Get,
    Post,
}

/// Fully described token request, built from a session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub url: String,
    pub method: TokenMethod,
    pub form: Vec<(&'static str, String)>,
    /// `Authorization` header value, when the grant needs client authentication.
    pub authorization: Option<String>,
    pub accept_json: bool,
}

impl TokenRequest {
    pub fn for_session(session: &AuthorizedSession) -> AuthResult<Self> {
        match session.grant_type {
            GrantType::RefreshToken => {
                let refresh_token = session.refresh_token.clone().ok_or_else(|| {
                    AuthError::invalid_session(&session.id, "refresh-token grant without refresh token")
                })?;
                Ok(Self {
                    url: session.token_url.clone(),
                    method: TokenMethod::Post,
                    form: vec![
                        ("grant_type", GrantType::RefreshToken.as_str().to_string()),
                        ("refresh_token", refresh_token),
                    ],
                    authorization: None,
                    accept_json: false,
                })
            }
            GrantType::ClientCredentials => {
                let secret = session.client_secret.as_deref().ok_or_else(|| {
                    AuthError::invalid_session(&session.id, "client-credentials grant without client secret")
                })?;
                let mut form = vec![
                    ("grant_type", GrantType::ClientCredentials.as_str().to_string()),
                    ("scope", session.scope.clone().unwrap_or_default()),
                ];
                if session.require_aud {
                    tracing::debug!(session_id = %session.id, "Adding aud parameter to token request");
                    form.push(("aud", session.ehr_server_url.clone()));
                }
                Ok(Self {
                    url: session.token_url.clone(),
                    method: if session.user_account_launch {
                        TokenMethod::Get
                    } else {
                        TokenMethod::Post
                    },
                    form,
                    authorization: Some(basic_auth(&session.client_id, secret)),
                    accept_json: true,
                })
            }
        }
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn basic_auth(client_id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{client_id}:{secret}")))
}

/// Something that can answer a [`TokenRequest`].
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn request_token(&self, request: &TokenRequest) -> AuthResult<TokenResponse>;
}

/// Sends token requests to OAuth2 token endpoints.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    pub fn new(timeout: Duration) -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        Ok(Self { http })
    }

    pub async fn send(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let method = match request.method {
            TokenMethod::Get => reqwest::Method::GET,
            TokenMethod::Post => reqwest::Method::POST,
        };
        let mut req = self.http.request(method, &request.url).form(&request.form);
        if let Some(authorization) = &request.authorization {
            req = req.header("Authorization", authorization);
        }
        if request.accept_json {
            req = req.header("Accept", "application/json");
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                message: body.chars().take(512).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|e| AuthError::invalid_token_response(e.to_string()))
    }
}

#[async_trait]
impl TokenEndpoint for TokenClient {
    async fn request_token(&self, request: &TokenRequest) -> AuthResult<TokenResponse> {
        self.send(request).await
    }
}
