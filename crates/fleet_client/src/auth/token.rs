use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::OAuthConfig;
use crate::error::{Error, Result, TransportError};

/// Tokens are treated as expired slightly early so a request never leaves
/// with a credential that lapses in flight.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// The OAuth token blob as exchanged with the authorization server and
/// written to token files.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl Token {
    /// Expiry, ignoring the zero timestamps some token files carry for
    /// tokens that never expire.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry.filter(|expiry| expiry.timestamp() > 0)
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at() {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) <= Utc::now(),
            None => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    pub fn token_type(&self) -> &str {
        match self.token_type.as_deref() {
            Some(kind) if !kind.is_empty() && !kind.eq_ignore_ascii_case("bearer") => kind,
            _ => "Bearer",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for Token {
    fn from(response: TokenResponse) -> Self {
        let expiry = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + Duration::seconds(secs));
        Token {
            access_token: response.access_token,
            token_type: response.token_type,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            expiry,
        }
    }
}

/// Talks to the token endpoint: authorization-code exchange and refresh.
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    http: reqwest::Client,
    oauth: OAuthConfig,
}

impl TokenExchanger {
    pub fn new(http: reqwest::Client, oauth: OAuthConfig) -> Self {
        TokenExchanger { http, oauth }
    }

    pub async fn exchange(&self, code: &str, verifier: &str) -> Result<Token> {
        debug!("Exchanging authorization code for token");
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", verifier),
            ("client_id", &self.oauth.client_id),
            ("redirect_uri", &self.oauth.redirect_uri),
        ])
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.oauth.client_id),
        ])
        .await
    }

    // The server's error body is passed through untouched.
    async fn request_token(&self, form: &[(&str, &str)]) -> Result<Token> {
        let response = self
            .http
            .post(self.oauth.token_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if status != reqwest::StatusCode::OK {
            return Err(TransportError::Status { status, body }.into());
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        Ok(token.into())
    }
}

/// Supplies the current access token, refreshing it when needed.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<Token>;
}

/// Hands out the same token forever.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: Token,
}

impl StaticTokenSource {
    pub fn new(token: Token) -> Self {
        StaticTokenSource { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<Token> {
        Ok(self.token.clone())
    }
}

/// Keeps a token fresh through the refresh grant.
///
/// The refresh runs while the lock is held, so concurrent callers that find
/// the same expired token queue behind one network refresh and then read its
/// result instead of spending the refresh token twice.
#[derive(Debug)]
pub struct RefreshingTokenSource {
    exchanger: TokenExchanger,
    current: Mutex<Token>,
}

impl RefreshingTokenSource {
    pub fn new(exchanger: TokenExchanger, token: Token) -> Self {
        RefreshingTokenSource {
            exchanger,
            current: Mutex::new(token),
        }
    }
}

#[async_trait]
impl TokenSource for RefreshingTokenSource {
    async fn token(&self) -> Result<Token> {
        let mut current = self.current.lock().await;
        if current.is_valid() {
            return Ok(current.clone());
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::auth("token expired and refresh token is not set"))?;

        info!("Access token expired, refreshing");
        let mut fresh = self.exchanger.refresh(&refresh_token).await?;
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }
        *current = fresh.clone();
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_expiry_never_expires() {
        let token: Token = serde_json::from_str(
            r#"{"access_token":"a","token_type":"Bearer","refresh_token":"r","expiry":"0001-01-01T00:00:00Z"}"#,
        )
        .expect("decode");
        assert!(token.expires_at().is_none());
        assert!(token.is_valid());
    }

    #[test]
    fn expiry_margin_applies() {
        let token = Token {
            access_token: "a".into(),
            expiry: Some(Utc::now() + Duration::seconds(5)),
            ..Default::default()
        };
        assert!(token.is_expired());

        let token = Token {
            access_token: "a".into(),
            expiry: Some(Utc::now() + Duration::seconds(120)),
            ..Default::default()
        };
        assert!(!token.is_expired());
    }

    #[test]
    fn empty_access_token_is_invalid() {
        assert!(!Token::default().is_valid());
    }

    #[test]
    fn token_response_sets_expiry_from_expires_in() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":28800,"token_type":"Bearer","id_token":"x"}"#,
        )
        .expect("decode");
        let token = Token::from(response);
        let expiry = token.expires_at().expect("expiry");
        assert!(expiry > Utc::now() + Duration::hours(7));
        assert_eq!(token.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let token = Token {
            access_token: "secret-access".into(),
            refresh_token: Some("secret-refresh".into()),
            ..Default::default()
        };
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn token_type_defaults_to_bearer() {
        let token = Token {
            access_token: "a".into(),
            token_type: Some("bearer".into()),
            ..Default::default()
        };
        assert_eq!(token.token_type(), "Bearer");
    }

    #[tokio::test]
    async fn expired_without_refresh_token_fails() {
        let exchanger = TokenExchanger::new(reqwest::Client::new(), OAuthConfig::default());
        let source = RefreshingTokenSource::new(
            exchanger,
            Token {
                access_token: "stale".into(),
                expiry: Some(Utc::now() - Duration::hours(1)),
                ..Default::default()
            },
        );
        let err = source.token().await.expect_err("no refresh token");
        assert!(matches!(err, Error::AuthFailed(_)));
    }
}
