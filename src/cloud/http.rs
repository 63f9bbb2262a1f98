//! Signed HTTP transport for the OCI REST APIs.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Response, Url};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::CloudError;
use super::credentials::{RequestSigner, http_date};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body returned by OCI services.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP client that signs every request with an API key.
#[derive(Clone, Debug)]
pub struct SignedClient {
    client: reqwest::Client,
    signer: Arc<RequestSigner>,
}

impl SignedClient {
    pub fn new(signer: RequestSigner) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CloudError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            signer: Arc::new(signer),
        })
    }

    /// GET `url` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CloudError> {
        let response = self.send(Method::GET, url, None).await?;
        Ok(response.json().await?)
    }

    /// PUT `body` as JSON to `url`, returning the response headers.
    pub async fn put_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<HeaderMap, CloudError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| CloudError::Request(format!("failed to encode body: {}", e)))?;
        let response = self.send(Method::PUT, url, Some(body)).await?;
        Ok(response.headers().clone())
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response, CloudError> {
        let parsed =
            Url::parse(url).map_err(|e| CloudError::Request(format!("invalid URL {url}: {e}")))?;
        let date = http_date(jiff::Timestamp::now())?;
        let headers = self
            .signer
            .sign(&method, &parsed, body.as_deref(), &date)?;

        debug!(method = %method, url = %parsed, "Sending OCI API request");
        let mut request = self.client.request(method, parsed).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let opc_request_id = response
            .headers()
            .get("opc-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_else(|_| ApiErrorBody {
            code: String::new(),
            message: text,
        });
        Err(CloudError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body.message,
            opc_request_id,
        })
    }
}
