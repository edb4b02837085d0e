use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info};
use reqwest::{redirect, Client, Proxy, StatusCode};
use reqwest_middleware::{ClientBuilder as MiddlewareBuilder, ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use super::transport::BearerAuth;
use crate::auth::{
    CaptchaSolver, Credentials, DeviceSelector, LoginNegotiator, MfaUnsupported,
    RefreshingTokenSource, Token, TokenExchanger, TokenSource,
};
use crate::config::{Config, StreamConfig};
use crate::error::{Error, Result, TransportError};
use crate::stream::{self, Frame, StreamSession, Subscription, WsSink};

/// Client for the fleet REST API and telemetry stream.
#[derive(Clone)]
pub struct FleetClient {
    base_url: String,
    http: ClientWithMiddleware,
    token_source: Arc<dyn TokenSource>,
    streaming: StreamConfig,
}

impl std::fmt::Debug for FleetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetClient")
            .field("base_url", &self.base_url)
            .field("streaming", &self.streaming)
            .finish()
    }
}

enum CredentialSource {
    Token(Token),
    TokenSource(Arc<dyn TokenSource>),
    Login {
        credentials: Credentials,
        selector: Arc<dyn DeviceSelector>,
        captcha: Option<Arc<dyn CaptchaSolver>>,
    },
}

/// Collects client options. Exactly one credential source must be given:
/// a token, a token source, or credentials for an interactive login.
#[derive(Default)]
pub struct ClientBuilder {
    config: Config,
    token: Option<Token>,
    token_source: Option<Arc<dyn TokenSource>>,
    credentials: Option<Credentials>,
    selector: Option<Arc<dyn DeviceSelector>>,
    captcha: Option<Arc<dyn CaptchaSolver>>,
    http: Option<Client>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_mfa_handler(mut self, selector: Arc<dyn DeviceSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha = Some(solver);
        self
    }

    /// Base HTTP client shared by REST calls and token refreshes.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Self {
        self.config.api_base = url.as_ref().trim_end_matches('/').to_string();
        self
    }

    fn credential_source(&mut self) -> Result<CredentialSource> {
        let interactive =
            self.credentials.is_some() || self.selector.is_some() || self.captcha.is_some();

        match (self.token.take(), self.token_source.take()) {
            (Some(_), Some(_)) => Err(Error::Configuration(
                "both a token and a token source were supplied".to_string(),
            )),
            (Some(_), None) | (None, Some(_)) if interactive => Err(Error::Configuration(
                "a token cannot be combined with interactive login options".to_string(),
            )),
            (Some(token), None) => Ok(CredentialSource::Token(token)),
            (None, Some(source)) => Ok(CredentialSource::TokenSource(source)),
            (None, None) => match self.credentials.take() {
                Some(credentials) => Ok(CredentialSource::Login {
                    credentials,
                    selector: self
                        .selector
                        .take()
                        .unwrap_or_else(|| Arc::new(MfaUnsupported)),
                    captcha: self.captcha.take(),
                }),
                None => Err(Error::Configuration("missing token source".to_string())),
            },
        }
    }

    /// Validates the options, logs in if credentials were given, and wires
    /// the bearer transport. Configuration errors surface before any request.
    pub async fn build(mut self) -> Result<FleetClient> {
        let source = self.credential_source()?;
        let config = self.config;

        let base = match self.http {
            Some(client) => client,
            None => build_http_client(&config, false)?,
        };
        let exchanger = TokenExchanger::new(base.clone(), config.oauth.clone());

        let token_source: Arc<dyn TokenSource> = match source {
            CredentialSource::Token(token) => {
                Arc::new(RefreshingTokenSource::new(exchanger, token))
            }
            CredentialSource::TokenSource(source) => source,
            CredentialSource::Login {
                credentials,
                selector,
                captcha,
            } => {
                let login_http = build_http_client(&config, true)?;
                let negotiator =
                    LoginNegotiator::new(login_http, config.oauth.clone(), selector, captcha)?;
                let grant = negotiator.authorize(&credentials).await?;
                let token = exchanger.exchange(&grant.code, &grant.pkce.verifier).await?;
                info!("Login complete");
                Arc::new(RefreshingTokenSource::new(exchanger, token))
            }
        };

        let http = MiddlewareBuilder::new(base)
            .with(BearerAuth::new(Arc::clone(&token_source)))
            .build();

        Ok(FleetClient {
            base_url: config.api_base,
            http,
            token_source,
            streaming: config.streaming,
        })
    }
}

fn build_http_client(config: &Config, for_login: bool) -> Result<Client> {
    let mut builder = Client::builder().timeout(config.request_timeout());
    if !config.http_proxy.is_empty() {
        builder = builder.proxy(Proxy::http(&config.http_proxy)?);
    }
    if !config.https_proxy.is_empty() {
        builder = builder.proxy(Proxy::https(&config.https_proxy)?);
    }
    if for_login {
        builder = builder
            .cookie_store(true)
            .redirect(redirect::Policy::none());
    }
    Ok(builder.build()?)
}

impl FleetClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Current token, refreshed first if it has expired.
    pub async fn token(&self) -> Result<Token> {
        self.token_source.token().await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Points the client at a regional host, e.g. the `fleet_api_base_url`
    /// returned by [`FleetClient::user_region`].
    pub fn set_base_url(&mut self, url: &str) {
        self.set_api_url(&format!("{}/api/1", url.trim_end_matches('/')));
    }

    /// Sets the full API URL. Callers append `/api/1` themselves.
    pub fn set_api_url(&mut self, url: &str) {
        self.base_url = url.to_string();
    }

    pub fn streaming_config(&self) -> &StreamConfig {
        &self.streaming
    }

    pub async fn get(&self, url: &str) -> Result<Bytes> {
        self.process_request(self.http.get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get(url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn post(&self, url: &str, body: Vec<u8>) -> Result<Bytes> {
        self.process_request(self.http.post(url).body(body)).await
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Bytes> {
        let body = serde_json::to_vec(body)?;
        self.post(url, body).await
    }

    async fn process_request(&self, request: RequestBuilder) -> Result<Bytes> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            debug!("Request failed with {status}");
            return Err(TransportError::Status { status, body }.into());
        }
        Ok(body)
    }

    /// Opens a subscribed stream for `vehicle_id` without waiting on it.
    /// `columns` falls back to the configured default set when empty.
    pub async fn stream_connect(
        &self,
        vehicle_id: u64,
        columns: &[String],
        consumer: mpsc::Sender<Frame>,
    ) -> Result<StreamSession<WsSink>> {
        let columns = if columns.is_empty() {
            &self.streaming.columns[..]
        } else {
            columns
        };
        // Read the token at connect time so a refresh happens before the handshake.
        let token = self.token().await?;
        let subscription = Subscription::new(vehicle_id, columns, token.access_token);
        stream::connect(
            &self.streaming.url,
            &subscription,
            consumer,
            self.streaming.drain_timeout(),
        )
        .await
    }

    /// Streams data updates for one vehicle into `consumer` until the stream
    /// fails or Ctrl-C is pressed. A Ctrl-C shutdown returns `Ok(())`.
    pub async fn stream(&self, vehicle_id: u64, consumer: mpsc::Sender<Frame>) -> Result<()> {
        self.stream_until(vehicle_id, &[], consumer, stream::ctrl_c())
            .await
    }

    pub async fn stream_until<F>(
        &self,
        vehicle_id: u64,
        columns: &[String],
        consumer: mpsc::Sender<Frame>,
        interrupt: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let session = self.stream_connect(vehicle_id, columns, consumer).await?;
        session.run(interrupt).await
    }
}
