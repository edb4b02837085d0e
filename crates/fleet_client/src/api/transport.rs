use std::sync::Arc;

use async_trait::async_trait;
use http::Extensions;
use log::debug;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};

use crate::auth::TokenSource;
use crate::error::Error;

/// Attaches the current bearer token and JSON headers to every request.
///
/// The token is fetched per request, so an expired token is refreshed before
/// the request leaves. If no token can be obtained the request is never sent.
#[derive(Clone)]
pub struct BearerAuth {
    source: Arc<dyn TokenSource>,
}

impl BearerAuth {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        BearerAuth { source }
    }
}

#[async_trait]
impl Middleware for BearerAuth {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let token = self
            .source
            .token()
            .await
            .map_err(|e| reqwest_middleware::Error::Middleware(e.into()))?;

        let mut credential = HeaderValue::from_str(&format!(
            "{} {}",
            token.token_type(),
            token.access_token
        ))
        .map_err(|e| reqwest_middleware::Error::Middleware(Error::from(e).into()))?;
        credential.set_sensitive(true);

        let headers = req.headers_mut();
        headers.insert(AUTHORIZATION, credential);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!("{} {}", req.method(), req.url());
        next.run(req, extensions).await
    }
}
