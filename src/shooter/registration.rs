use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use url::Url;

use crate::arbiter::http::REGISTER_PATH;
use crate::event::{Competitor, RegistrationRequest};

/// Blocking-style client for the arbiter's registration endpoint.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    http: Client,
    endpoint: Url,
}

impl RegistrationClient {
    pub fn new(arbiter_addr: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(arbiter_addr)
            .with_context(|| format!("parse arbiter url {:?}", arbiter_addr))?
            .join(REGISTER_PATH)
            .context("build registration url")?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Any failure here is final: the caller does not get a second chance.
    pub async fn register(&self, request: &RegistrationRequest) -> Result<Competitor> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .context("send registration request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "unexpected registration response code {}: {}",
                status.as_u16(),
                body.trim()
            ));
        }

        resp.json::<Competitor>()
            .await
            .context("decode registration response")
    }
}
