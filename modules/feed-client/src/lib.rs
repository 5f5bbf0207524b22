pub mod credentials;
pub mod error;
pub mod paging;
pub mod stream;

pub use credentials::{AuthVersion, Credentials};
pub use error::{FeedError, Result};
pub use paging::{next_max_id, page_items, MAX_ID_PARAM};
pub use stream::FeedStream;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

const STREAM_URL: &str = "https://stream.twitter.com/1.1/";
const REST_URL: &str = "https://api.twitter.com/1.1/";
const TOKEN_URL: &str = "https://api.twitter.com/oauth2/token";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Endpoints served from the streaming host. Everything else is paged REST.
const STREAMING_ENDPOINTS: &[&str] = &[
    "statuses/filter",
    "statuses/sample",
    "statuses/firehose",
    "user",
    "site",
];

/// Endpoints that take their parameters in a form body.
const POST_ENDPOINTS: &[&str] = &["statuses/filter"];

pub fn is_streaming_endpoint(endpoint: &str) -> bool {
    STREAMING_ENDPOINTS.contains(&endpoint)
}

/// Base URLs of the feed provider.
#[derive(Debug, Clone)]
pub struct FeedEndpoints {
    pub stream: Url,
    pub rest: Url,
    pub token: Url,
}

impl FeedEndpoints {
    pub fn new(stream: &str, rest: &str, token: &str) -> Result<Self> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|e| FeedError::Parse(format!("invalid url {raw}: {e}")))
        };
        Ok(Self {
            stream: parse(stream)?,
            rest: parse(rest)?,
            token: parse(token)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_type: String,
    access_token: String,
}

pub struct FeedClient {
    client: reqwest::Client,
    credentials: Credentials,
    auth_version: AuthVersion,
    endpoints: FeedEndpoints,
    app_token: OnceCell<String>,
}

impl FeedClient {
    pub fn new(credentials: Credentials, auth_version: AuthVersion) -> Result<Self> {
        credentials.validate(auth_version)?;
        Ok(Self {
            client: reqwest::Client::new(),
            credentials,
            auth_version,
            endpoints: FeedEndpoints::new(STREAM_URL, REST_URL, TOKEN_URL)?,
            app_token: OnceCell::new(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: FeedEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn auth_version(&self) -> AuthVersion {
        self.auth_version
    }

    /// Full URL of an endpoint name such as `statuses/filter`.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        let base = if is_streaming_endpoint(endpoint) {
            &self.endpoints.stream
        } else {
            &self.endpoints.rest
        };
        let path = format!("{}.json", endpoint.trim_matches('/'));
        base.join(&path)
            .map_err(|e| FeedError::Parse(format!("invalid endpoint {endpoint}: {e}")))
    }

    /// Open a long-lived connection to a streaming endpoint.
    pub async fn open_stream(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<FeedStream> {
        let resp = self.send(endpoint, params).await?;
        tracing::info!(endpoint, "Stream connected");
        Ok(FeedStream::from_response(resp))
    }

    /// Fetch one page from a REST endpoint.
    pub async fn fetch_page(&self, endpoint: &str, params: &[(String, String)]) -> Result<Vec<Value>> {
        let resp = self.send(endpoint, params).await?;
        let text = resp.text().await?;
        let body: Value = serde_json::from_str(&text)?;
        let items = page_items(body);
        tracing::debug!(endpoint, count = items.len(), "Fetched page");
        Ok(items)
    }

    async fn send(&self, endpoint: &str, params: &[(String, String)]) -> Result<reqwest::Response> {
        let mut url = self.endpoint_url(endpoint)?;
        let token = self.token().await?;

        let request = if POST_ENDPOINTS.contains(&endpoint) {
            self.client
                .post(url)
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(encode_form(params))
        } else {
            url.query_pairs_mut().extend_pairs(params);
            self.client.get(url)
        };

        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = &self.credentials.bearer_token {
            return Ok(token.clone());
        }
        self.app_token
            .get_or_try_init(|| self.request_app_token())
            .await
            .cloned()
    }

    /// Exchange the consumer key and secret for an application token.
    async fn request_app_token(&self) -> Result<String> {
        let (Some(key), Some(secret)) = (
            &self.credentials.consumer_key,
            &self.credentials.consumer_secret,
        ) else {
            return Err(FeedError::Credentials(
                "consumer_key and consumer_secret are required".to_string(),
            ));
        };

        let resp = self
            .client
            .post(self.endpoints.token.clone())
            .basic_auth(key, Some(secret))
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(encode_form(&[(
                "grant_type".to_string(),
                "client_credentials".to_string(),
            )]))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let text = resp.text().await?;
        let token: TokenResponse = serde_json::from_str(&text)?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            return Err(FeedError::Credentials(format!(
                "unexpected token type {}",
                token.token_type
            )));
        }
        tracing::info!("Obtained application token");
        Ok(token.access_token)
    }
}

fn encode_form(params: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}
