//! Interactive login against the authorization server.
//!
//! One [`LoginNegotiator`] drives exactly one attempt:
//!
//! 1. Load the login form (hidden fields, optional captcha)
//! 2. Submit identifier + secret
//! 3. Either receive the code redirect, or enter the MFA branch:
//!    list devices, let the selector pick one and supply a passcode,
//!    verify it, and request the code redirect
//! 4. Hand back the code together with the PKCE verifier for exchange
//!
//! Nothing here retries. A wrong password or passcode ends the attempt and
//! the caller decides whether to start a fresh one.

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::form::LoginForm;
use super::mfa::{validate_passcode, CaptchaSolver, Device, DeviceSelector};
use super::pkce::{self, Pkce};
use crate::config::OAuthConfig;
use crate::error::{Error, Result, TransportError};

const MFA_VERIFY_MARKER: &str = "/authorize/mfa/verify";

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a successful login: the code and the verifier that goes with it.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub code: String,
    pub pkce: Pkce,
}

enum LoginStep {
    Start,
    SubmitCredentials(LoginForm),
    MfaRequired { transaction_id: String },
    SelectDevice {
        transaction_id: String,
        devices: Vec<Device>,
    },
    SubmitPasscode {
        transaction_id: String,
        device: Device,
        passcode: String,
    },
    CodeObtained(String),
}

impl LoginStep {
    fn name(&self) -> &'static str {
        match self {
            LoginStep::Start => "start",
            LoginStep::SubmitCredentials(_) => "submit_credentials",
            LoginStep::MfaRequired { .. } => "mfa_required",
            LoginStep::SelectDevice { .. } => "select_device",
            LoginStep::SubmitPasscode { .. } => "submit_passcode",
            LoginStep::CodeObtained(_) => "code_obtained",
        }
    }
}

enum CredentialOutcome {
    Code(String),
    MfaRequired,
}

#[derive(Debug, Deserialize)]
struct FactorsResponse {
    #[serde(default)]
    data: Vec<Device>,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    transaction_id: &'a str,
    factor_id: &'a str,
    passcode: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    data: Option<VerifyData>,
    #[serde(default)]
    error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
struct VerifyData {
    #[serde(default)]
    valid: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ServerError {
    #[serde(default)]
    message: String,
}

pub struct LoginNegotiator {
    http: reqwest::Client,
    oauth: OAuthConfig,
    selector: Arc<dyn DeviceSelector>,
    captcha: Option<Arc<dyn CaptchaSolver>>,
    pkce: Pkce,
    state: String,
    authorize_url: Url,
}

impl LoginNegotiator {
    /// `http` must have redirects disabled and a cookie store enabled: the
    /// code arrives in a `Location` header and the session lives in cookies.
    pub fn new(
        http: reqwest::Client,
        oauth: OAuthConfig,
        selector: Arc<dyn DeviceSelector>,
        captcha: Option<Arc<dyn CaptchaSolver>>,
    ) -> Result<Self> {
        let pkce = Pkce::generate()?;
        let state = pkce::state()?;
        let authorize_url = authorization_request_url(&oauth, &state, &pkce)?;
        Ok(LoginNegotiator {
            http,
            oauth,
            selector,
            captcha,
            pkce,
            state,
            authorize_url,
        })
    }

    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    /// Runs the login to completion. Consumes the negotiator so a PKCE pair
    /// and state are never reused across attempts.
    pub async fn authorize(self, credentials: &Credentials) -> Result<AuthorizationGrant> {
        let mut step = LoginStep::Start;
        loop {
            let next = match step {
                LoginStep::Start => LoginStep::SubmitCredentials(self.load_form().await?),
                LoginStep::SubmitCredentials(form) => {
                    match self.submit_credentials(&form, credentials).await? {
                        CredentialOutcome::Code(code) => LoginStep::CodeObtained(code),
                        CredentialOutcome::MfaRequired => LoginStep::MfaRequired {
                            transaction_id: form
                                .field("transaction_id")
                                .map(str::to_string)
                                .ok_or_else(|| {
                                    Error::auth("login form did not include a transaction id")
                                })?,
                        },
                    }
                }
                LoginStep::MfaRequired { transaction_id } => {
                    let devices = self.list_devices(&transaction_id).await?;
                    LoginStep::SelectDevice {
                        transaction_id,
                        devices,
                    }
                }
                LoginStep::SelectDevice {
                    transaction_id,
                    devices,
                } => {
                    let (device, passcode) = self
                        .selector
                        .select_device(&devices)
                        .await
                        .map_err(|e| Error::auth(format!("device selection: {e}")))?;
                    validate_passcode(&passcode).map_err(|e| Error::auth(e.to_string()))?;
                    LoginStep::SubmitPasscode {
                        transaction_id,
                        device,
                        passcode,
                    }
                }
                LoginStep::SubmitPasscode {
                    transaction_id,
                    device,
                    passcode,
                } => {
                    self.verify_passcode(&transaction_id, &device, &passcode)
                        .await?;
                    LoginStep::CodeObtained(self.complete_mfa(&transaction_id).await?)
                }
                LoginStep::CodeObtained(code) => {
                    info!("Authorization code obtained");
                    return Ok(AuthorizationGrant {
                        code,
                        pkce: self.pkce,
                    });
                }
            };
            debug!("Login step -> {}", next.name());
            step = next;
        }
    }

    async fn load_form(&self) -> Result<LoginForm> {
        let response = self.http.get(self.authorize_url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(auth_failure(status, &body));
        }
        Ok(LoginForm::parse(&body))
    }

    async fn submit_credentials(
        &self,
        form: &LoginForm,
        credentials: &Credentials,
    ) -> Result<CredentialOutcome> {
        let mut fields = form.hidden.clone();
        fields.push(("identity".to_string(), credentials.username.clone()));
        fields.push(("credential".to_string(), credentials.password.clone()));
        if form.has_captcha {
            fields.push(("captcha".to_string(), self.solve_captcha().await?));
        }

        let response = self
            .http
            .post(self.authorize_url.clone())
            .form(&fields)
            .send()
            .await?;

        if let Some(code) = self.code_from_redirect(&response)? {
            return Ok(CredentialOutcome::Code(code));
        }

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::OK && body.contains(MFA_VERIFY_MARKER) {
            return Ok(CredentialOutcome::MfaRequired);
        }
        Err(auth_failure(status, &body))
    }

    async fn solve_captcha(&self) -> Result<String> {
        let solver = self
            .captcha
            .as_ref()
            .ok_or_else(|| Error::auth("captcha required but no solver is configured"))?;

        let response = self.http.get(self.oauth.captcha_url()).send().await?;
        let status = response.status();
        let image = response.bytes().await?;
        if status != StatusCode::OK {
            return Err(TransportError::Status {
                status,
                body: image,
            }
            .into());
        }

        debug!("Solving captcha ({} bytes)", image.len());
        let text = solver
            .solve(&image)
            .await
            .map_err(|e| Error::auth(format!("captcha: {e}")))?;
        Ok(text.trim().to_string())
    }

    async fn list_devices(&self, transaction_id: &str) -> Result<Vec<Device>> {
        let response = self
            .http
            .get(self.oauth.mfa_factors_url())
            .query(&[("transaction_id", transaction_id)])
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            return Err(TransportError::Status { status, body }.into());
        }

        let factors: FactorsResponse = serde_json::from_slice(&body)?;
        if factors.data.is_empty() {
            return Err(Error::auth("no MFA devices enrolled"));
        }
        debug!("{} MFA device(s) enrolled", factors.data.len());
        Ok(factors.data)
    }

    async fn verify_passcode(
        &self,
        transaction_id: &str,
        device: &Device,
        passcode: &str,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.oauth.mfa_verify_url())
            .header(header::ACCEPT, "application/json")
            .json(&VerifyRequest {
                transaction_id,
                factor_id: &device.id,
                passcode,
            })
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let verdict: VerifyResponse = serde_json::from_str(&body).unwrap_or_default();

        if let Some(error) = verdict.error.filter(|e| !e.message.is_empty()) {
            return Err(Error::auth(error.message));
        }
        if status != StatusCode::OK {
            return Err(auth_failure(status, &body));
        }
        match verdict.data {
            Some(VerifyData { valid: true }) => Ok(()),
            _ => Err(Error::auth("invalid passcode")),
        }
    }

    async fn complete_mfa(&self, transaction_id: &str) -> Result<String> {
        let response = self
            .http
            .post(self.authorize_url.clone())
            .form(&[("transaction_id", transaction_id)])
            .send()
            .await?;
        if let Some(code) = self.code_from_redirect(&response)? {
            return Ok(code);
        }
        let status = response.status();
        let body = response.text().await?;
        Err(auth_failure(status, &body))
    }

    fn code_from_redirect(&self, response: &reqwest::Response) -> Result<Option<String>> {
        if !response.status().is_redirection() {
            return Ok(None);
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::auth("redirect without a location"))?;
        let target = self.authorize_url.join(location)?;

        let mut code = None;
        let mut state = None;
        for (key, value) in target.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }

        let code = code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::auth("redirect without an authorization code"))?;
        if state.as_deref() != Some(self.state.as_str()) {
            warn!("Authorization redirect carried an unexpected state");
            return Err(Error::auth("state mismatch in authorization redirect"));
        }
        Ok(Some(code))
    }
}

pub fn authorization_request_url(oauth: &OAuthConfig, state: &str, pkce: &Pkce) -> Result<Url> {
    let mut url = Url::parse(&oauth.authorize_url())?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &oauth.client_id)
        .append_pair("redirect_uri", &oauth.redirect_uri)
        .append_pair("scope", &oauth.scope())
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", pkce.method);
    Ok(url)
}

fn auth_failure(status: StatusCode, body: &str) -> Error {
    let body = body.trim();
    if body.is_empty() {
        Error::auth(status.to_string())
    } else {
        Error::auth(body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_pkce_and_state() {
        let pkce = Pkce::generate().expect("entropy");
        let url = authorization_request_url(&OAuthConfig::default(), "st4te", &pkce)
            .expect("url");

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/oauth2/v3/authorize");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "ownerapi");
        assert_eq!(pairs["state"], "st4te");
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["scope"], "openid email offline_access");
        assert!(!url.as_str().contains(&pkce.verifier));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("elon", "hunter2"));
        assert!(rendered.contains("elon"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn empty_failure_body_falls_back_to_status() {
        let err = auth_failure(StatusCode::FORBIDDEN, "  ");
        assert_eq!(err.to_string(), "authentication failed: 403 Forbidden");
    }
}
