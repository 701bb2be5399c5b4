use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use super::types::NewsEnvelope;
use super::{FetchError, FetchedPage, NewsSource, Selector};
use crate::cancel::CancelToken;
use crate::util::MAX_KEYWORD_LENGTH;

const DEFAULT_MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

/// Endpoint and request settings for [`NewsApiClient`].
#[derive(Debug)]
pub struct ClientOptions {
    pub search_url: String,
    pub headlines_url: String,
    pub language: String,
    pub country: String,
    /// Sent as `X-Api-Key` when present. `SecretString`'s Debug is redacted.
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
    pub max_response_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            search_url: "https://newsapi.org/v2/everything".to_string(),
            headlines_url: "https://newsapi.org/v2/top-headlines".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

/// HTTP client for a NewsAPI-compatible service.
pub struct NewsApiClient {
    http: reqwest::Client,
    options: ClientOptions,
}

impl NewsApiClient {
    /// Build a client. Both endpoints are validated up front.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidRequest`] if an endpoint does not parse or is not
    /// HTTPS (plain HTTP is accepted for loopback hosts only, for testing).
    pub fn new(options: ClientOptions) -> Result<Self, FetchError> {
        check_endpoint(&options.search_url)?;
        check_endpoint(&options.headlines_url)?;

        let http = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(options.timeout)
            .build()?;

        if options.api_key.is_none() {
            tracing::warn!("No news API key configured; requests will likely be rejected");
        }

        Ok(Self { http, options })
    }

    /// Full request URL for a page, query parameters included.
    fn page_url(&self, selector: &Selector, page: u32, page_size: u32) -> Result<Url, FetchError> {
        let (endpoint, params): (&str, Vec<(&str, String)>) = match selector {
            Selector::Search(keyword) => (
                &self.options.search_url,
                vec![
                    ("q", keyword.trim().to_string()),
                    ("language", self.options.language.clone()),
                ],
            ),
            Selector::Category(category) => (
                &self.options.headlines_url,
                vec![
                    ("country", self.options.country.clone()),
                    ("category", category.as_str().to_string()),
                    ("language", self.options.language.clone()),
                ],
            ),
        };

        let mut url = check_endpoint(endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in &params {
                query.append_pair(name, value);
            }
            query.append_pair("page", &page.to_string());
            query.append_pair("pageSize", &page_size.to_string());
        }
        Ok(url)
    }

    async fn fetch_uncancelled(
        &self,
        selector: &Selector,
        page: u32,
        page_size: u32,
    ) -> Result<FetchedPage, FetchError> {
        let url = self.page_url(selector, page, page_size)?;

        let mut request = self.http.get(url);
        if let Some(key) = &self.options.api_key {
            request = request.header("X-Api-Key", key.expose_secret());
        }

        let response = tokio::time::timeout(self.options.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(map_transport_error)?;

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status().as_u16();
            tracing::warn!(selector = %selector, page = page, status = status, "News API returned error status");
            return Err(FetchError::HttpStatus(status));
        }

        let bytes = read_limited_bytes(response, self.options.max_response_size).await?;
        let envelope: NewsEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))?;

        if envelope.status != "ok" {
            return Err(FetchError::Decode(format!(
                "status \"{}\": {}",
                envelope.status,
                envelope.message.as_deref().unwrap_or("no message")
            )));
        }

        let now = chrono::Utc::now();
        let received = envelope.articles.len();
        let articles: Vec<_> = envelope
            .articles
            .into_iter()
            .filter_map(|raw| raw.into_article(now))
            .collect();

        let skipped = received - articles.len();
        if skipped > 0 {
            tracing::warn!(selector = %selector, page = page, skipped = skipped, "Articles without URL or title skipped");
        }

        tracing::debug!(
            selector = %selector,
            page = page,
            articles = articles.len(),
            total = envelope.total_results,
            "Fetched page"
        );

        Ok(FetchedPage {
            articles,
            total_results: usize::try_from(envelope.total_results).unwrap_or(0),
        })
    }
}

#[async_trait]
impl NewsSource for NewsApiClient {
    async fn fetch_page(
        &self,
        selector: &Selector,
        page: u32,
        page_size: u32,
        cancel: &CancelToken,
    ) -> Result<FetchedPage, FetchError> {
        if page == 0 {
            return Err(FetchError::InvalidRequest("page numbers start at 1".into()));
        }
        if page_size == 0 {
            return Err(FetchError::InvalidRequest("page size must be positive".into()));
        }
        if let Selector::Search(keyword) = selector {
            if keyword.trim().is_empty() {
                return Ok(FetchedPage::default());
            }
            if keyword.chars().count() > MAX_KEYWORD_LENGTH {
                return Err(FetchError::InvalidRequest(format!(
                    "search keyword longer than {} characters",
                    MAX_KEYWORD_LENGTH
                )));
            }
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(selector = %selector, page = page, "Fetch cancelled");
                Err(FetchError::Cancelled)
            }
            result = self.fetch_uncancelled(selector, page, page_size) => result,
        }
    }
}

/// Parse an endpoint and refuse to send the API key anywhere but HTTPS.
///
/// Plain HTTP is allowed for localhost/127.0.0.1/::1 so tests can use a mock server.
fn check_endpoint(endpoint: &str) -> Result<Url, FetchError> {
    let url = Url::parse(endpoint)
        .map_err(|e| FetchError::InvalidRequest(format!("bad endpoint '{}': {}", endpoint, e)))?;

    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        _ => {
            tracing::error!(endpoint = %endpoint, "Rejecting non-HTTPS endpoint (HTTPS required except for localhost)");
            Err(FetchError::InvalidRequest(format!(
                "insecure endpoint '{}': HTTPS required",
                endpoint
            )))
        }
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Follow at most 3 redirects, never to another host (the API key header would follow).
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let same_host = attempt
            .previous()
            .first()
            .is_some_and(|origin| origin.host_str() == attempt.url().host_str());
        if !same_host {
            return attempt.error("Refusing cross-host redirect");
        }

        tracing::debug!(
            to = %attempt.url(),
            hop = attempt.previous().len(),
            "Following redirect"
        );
        attempt.follow()
    })
}

fn map_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_transport_error)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
