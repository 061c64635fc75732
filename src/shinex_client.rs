use crate::config::DeviceAccess;
use crate::sample::RawSample;
use anyhow::anyhow;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{redirect, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("too many redirects from {url}")]
    TooManyRedirects { url: String },
    #[error("no response from ShineX at {url}: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },
    #[error("ShineX answered with an HTML page, reboot triggered")]
    DeviceFaulted,
    #[error("got no JSON object from ShineX: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// HTTP client for the ShineX stick's `/status` endpoint.
pub struct ShineXClient {
    status_url: Url,
    client: reqwest::Client,
}

impl ShineXClient {
    pub fn new(access: &DeviceAccess) -> Result<Self, anyhow::Error> {
        Self::with_timeout(access, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(access: &DeviceAccess, timeout: Duration) -> Result<Self, anyhow::Error> {
        let status_url = status_url(access)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(Self { status_url, client })
    }

    /// Status URL without credentials, safe to log.
    pub fn display_url(&self) -> String {
        let mut url = self.status_url.clone();
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.to_string()
    }

    /// Reads one sample. Failures are logged once and turned into
    /// [`RawSample::unknown`], so callers always get a sample.
    pub async fn fetch(&self) -> RawSample {
        match self.try_fetch().await {
            Ok(sample) => sample,
            Err(error) => {
                match &error {
                    FetchError::Timeout { url } => warn!(%url, "request timeout"),
                    FetchError::TooManyRedirects { url } => warn!(%url, "too many redirects"),
                    FetchError::Transport { url, source } => {
                        warn!(%url, error = %source, "no response from ShineX")
                    }
                    FetchError::DeviceFaulted => info!("reboot triggered"),
                    FetchError::InvalidJson(source) => {
                        warn!(error = %source, "got no JSON, using unknown sample")
                    }
                }
                RawSample::unknown()
            }
        }
    }

    pub async fn try_fetch(&self) -> Result<RawSample, FetchError> {
        let response = self
            .client
            .get(self.status_url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(|source| self.classify(source))?;

        if response.status() == StatusCode::OK && is_html(response.headers().get(CONTENT_TYPE)) {
            self.trigger_restart().await;
            return Err(FetchError::DeviceFaulted);
        }

        let body = response
            .text()
            .await
            .map_err(|source| self.classify(source))?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Asks the stick to restart itself. The cycle does not depend on the
    /// outcome; a failure is only traced.
    async fn trigger_restart(&self) {
        let mut restart_url = self.status_url.clone();
        restart_url.set_path("/restart");
        match self.client.get(restart_url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => debug!(status = %response.status(), "restart request refused"),
            Err(e) => debug!(error = %e, "restart request failed"),
        }
    }

    fn classify(&self, source: reqwest::Error) -> FetchError {
        let url = self.display_url();
        if source.is_timeout() {
            FetchError::Timeout { url }
        } else if source.is_redirect() {
            FetchError::TooManyRedirects { url }
        } else {
            FetchError::Transport { url, source }
        }
    }
}

/// Builds `http://[user[:password]@]host/status`.
fn status_url(access: &DeviceAccess) -> Result<Url, anyhow::Error> {
    match access {
        DeviceAccess::OnPremise {
            host,
            username,
            password,
        } => {
            let mut url = Url::parse(&format!("http://{host}/status"))?;
            if !username.is_empty() {
                url.set_username(username)
                    .map_err(|_| anyhow!("cannot use username in URL for host {host}"))?;
            }
            if !password.is_empty() {
                url.set_password(Some(password))
                    .map_err(|_| anyhow!("cannot use password in URL for host {host}"))?;
            }
            Ok(url)
        }
    }
}

fn is_html(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("text/html"))
}
