//! OCI API key credentials and HTTP request signing.
//!
//! Requests are signed with the `rsa-sha256` HTTP signature scheme. Every
//! request signs `date`, `(request-target)` and `host`; requests with a body
//! additionally sign `content-length`, `content-type` and `x-content-sha256`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::{Digest, Sha256};

use super::CloudError;
use crate::crd::ApiKeySpec;

const X_CONTENT_SHA256: &str = "x-content-sha256";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Identity of an OCI API signing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiKey {
    pub tenancy: String,
    pub user: String,
    pub fingerprint: String,
    pub region: String,
}

impl ApiKey {
    /// `keyId` parameter of the Authorization header.
    pub fn key_id(&self) -> String {
        format!("{}/{}/{}", self.tenancy, self.user, self.fingerprint)
    }
}

impl From<&ApiKeySpec> for ApiKey {
    fn from(spec: &ApiKeySpec) -> Self {
        Self {
            tenancy: spec.tenancy.clone(),
            user: spec.user.clone(),
            fingerprint: spec.fingerprint.clone(),
            region: spec.region.clone(),
        }
    }
}

/// Parse a PEM private key in PKCS#8 or PKCS#1 form.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CloudError> {
    let pem = pem.trim();
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CloudError::InvalidKey(e.to_string()))
}

/// Format a timestamp as an HTTP date (`Tue, 15 Nov 1994 08:12:31 GMT`).
pub fn http_date(timestamp: jiff::Timestamp) -> Result<String, CloudError> {
    jiff::fmt::rfc2822::DateTimePrinter::new()
        .timestamp_to_rfc9110_string(&timestamp)
        .map_err(|e| CloudError::Signing(e.to_string()))
}

/// Signs outgoing OCI API requests.
#[derive(Clone, Debug)]
pub struct RequestSigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl RequestSigner {
    pub fn new(key_id: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self {
            key_id: key_id.into(),
            signing_key: SigningKey::<Sha256>::new(private_key),
        }
    }

    /// Build a signer for `api_key` from a PEM private key.
    pub fn from_pem(api_key: &ApiKey, pem: &str) -> Result<Self, CloudError> {
        Ok(Self::new(api_key.key_id(), parse_private_key(pem)?))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Headers to attach to a request, including `authorization`.
    pub fn sign(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&[u8]>,
        date: &str,
    ) -> Result<HeaderMap, CloudError> {
        let host = host_header(url)?;
        let mut signed: Vec<(&'static str, String)> = vec![
            ("date", date.to_string()),
            ("(request-target)", request_target(method, url)),
            ("host", host),
        ];
        if let Some(body) = body {
            signed.push(("content-length", body.len().to_string()));
            signed.push(("content-type", JSON_CONTENT_TYPE.to_string()));
            signed.push((X_CONTENT_SHA256, STANDARD.encode(Sha256::digest(body))));
        }

        let signing_string = signed
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        let signature = self
            .signing_key
            .try_sign(signing_string.as_bytes())
            .map_err(|e| CloudError::Signing(e.to_string()))?;

        let header_list = signed
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(" ");
        let authorization = format!(
            r#"Signature version="1",keyId="{}",algorithm="rsa-sha256",headers="{}",signature="{}""#,
            self.key_id,
            header_list,
            STANDARD.encode(signature.to_bytes())
        );

        let mut headers = HeaderMap::new();
        for (name, value) in signed {
            let header = match name {
                "(request-target)" => continue,
                "content-length" => CONTENT_LENGTH,
                "content-type" => CONTENT_TYPE,
                other => HeaderName::from_static(other),
            };
            headers.insert(header, header_value(&value)?);
        }
        headers.insert(
            reqwest::header::AUTHORIZATION,
            header_value(&authorization)?,
        );
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, CloudError> {
    HeaderValue::from_str(value).map_err(|e| CloudError::Signing(e.to_string()))
}

/// `(request-target)` pseudo header: lowercase method, path and query.
fn request_target(method: &Method, url: &Url) -> String {
    let mut target = format!("{} {}", method.as_str().to_lowercase(), url.path());
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

fn host_header(url: &Url) -> Result<String, CloudError> {
    let host = url
        .host_str()
        .ok_or_else(|| CloudError::Request(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
