//! Authorized session (launch) records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{AuthError, AuthResult};
use crate::schedule::RefreshInterval;
use crate::token::TokenResponse;

/// How the session renews its access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// User-launched session holding a refresh token.
    RefreshToken,
    /// Backend system session using its client secret.
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::RefreshToken => "refresh_token",
            GrantType::ClientCredentials => "client_credentials",
        }
    }
}

/// Launch record for one patient session.
///
/// Token fields are written only by the refresh scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedSession {
    pub id: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub token_url: String,
    pub ehr_server_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Lifetime in seconds of the current access token.
    pub expires_in: u64,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub token_expiry: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub last_updated: Option<OffsetDateTime>,

    pub grant_type: GrantType,
    /// Send `aud` with client-credentials requests.
    #[serde(default)]
    pub require_aud: bool,
    /// Client-credentials token requests use GET for user-account launches.
    #[serde(default)]
    pub user_account_launch: bool,

    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,
}

impl AuthorizedSession {
    pub fn refresh_interval(&self) -> AuthResult<RefreshInterval> {
        RefreshInterval::from_expiry_secs(self.expires_in)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.token_expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Stores a fresh token. A rotated refresh token replaces the old one.
    ///
    /// An `expires_in` that cannot be represented as an expiry instant is
    /// rejected and leaves the record untouched.
    pub fn apply_token(&mut self, token: &TokenResponse, now: OffsetDateTime) -> AuthResult<()> {
        let expiry = i64::try_from(token.expires_in)
            .ok()
            .and_then(|secs| now.checked_add(time::Duration::seconds(secs)))
            .ok_or_else(|| {
                AuthError::invalid_token_response(format!(
                    "expires_in {} is out of range",
                    token.expires_in
                ))
            })?;

        self.access_token = Some(token.access_token.clone());
        self.expires_in = token.expires_in;
        self.token_expiry = Some(expiry);
        self.last_updated = Some(now);
        if let Some(refresh) = &token.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
        if let Some(scope) = &token.scope {
            self.scope = Some(scope.clone());
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_apply_token_updates_expiry() {
        let mut session = fixtures::system_session("https://auth.example/token");
        let now = datetime!(2024-03-01 10:00:00 UTC);
        session.apply_token(
            &TokenResponse {
                access_token: "new-token".into(),
                expires_in: 1800,
                refresh_token: Some("rotated".into()),
                scope: None,
                token_type: Some("Bearer".into()),
            },
            now,
        )
        .unwrap();
        assert_eq!(session.access_token.as_deref(), Some("new-token"));
        assert_eq!(session.expires_in, 1800);
        assert_eq!(session.token_expiry, Some(datetime!(2024-03-01 10:30:00 UTC)));
        assert_eq!(session.last_updated, Some(now));
        assert_eq!(session.refresh_token.as_deref(), Some("rotated"));
        assert_eq!(session.scope.as_deref(), Some("system/*.read"));
        assert!(session.is_expired(datetime!(2024-03-01 10:30:00 UTC)));
    }

    #[test]
    fn test_out_of_range_expiry_rejected_without_changes() {
        let mut session = fixtures::system_session("https://auth.example/token");
        let before = session.clone();
        let now = datetime!(2024-03-01 10:00:00 UTC);

        for expires_in in [1_000_000_000_000, u64::MAX] {
            let err = session
                .apply_token(
                    &TokenResponse {
                        access_token: "new-token".into(),
                        expires_in,
                        refresh_token: Some("rotated".into()),
                        scope: None,
                        token_type: None,
                    },
                    now,
                )
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidTokenResponse(_)));
            assert_eq!(session, before);
        }
    }

    #[test]
    fn test_deserialize_launch_record() {
        let session: AuthorizedSession = serde_json::from_str(
            r#"{
                "id": "s-1",
                "clientId": "c",
                "tokenUrl": "https://auth/token",
                "ehrServerUrl": "https://ehr/fhir",
                "refreshToken": "r",
                "expiresIn": 300,
                "grantType": "refresh_token",
                "patientId": "p-1"
            }"#,
        )
        .unwrap();
        assert_eq!(session.grant_type, GrantType::RefreshToken);
        assert!(!session.require_aud);
        assert_eq!(session.refresh_interval().unwrap().minutes(), 5);
    }
}
