//! HTTP transport shared by the Base and Drive handles

use std::sync::Arc;

use http::header::{HeaderMap, CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Header carrying the project key
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Characters allowed unencoded in a single URI path segment per RFC 3986.
/// Everything else (including `/`, spaces, `#`, `?`, `%`, non-ASCII) gets percent-encoded.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

/// Percent-encode a key, name or id for use as one URI path segment.
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

/// Pooled hyper client shared by every handle created from one `Deta` instance
pub(crate) type Connection = HyperClient<HttpsConnector, Full<Bytes>>;

/// Build the pooled connection. `https://` endpoints use TLS with the
/// webpki root store, `http://` endpoints (local emulators) are plaintext.
pub(crate) fn build_connection() -> Result<Connection> {
    let tls_config = build_tls_config()?;

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Ok(HyperClient::builder(TokioExecutor::new()).build(https_connector))
}

fn build_tls_config() -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Ok(rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Static API-key authentication attached to every request
#[derive(Clone)]
pub struct AuthInfo {
    header_key: &'static str,
    header_value: String,
}

impl AuthInfo {
    /// Authenticate with a project key in the `X-API-Key` header
    pub fn api_key(key: &str) -> Self {
        Self {
            header_key: API_KEY_HEADER,
            header_value: key.to_string(),
        }
    }
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("header_key", &self.header_key)
            .finish_non_exhaustive()
    }
}

/// Body of an outgoing request
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// Serialized JSON document
    Json(Bytes),
    /// Raw bytes, e.g. an upload part
    Raw(Bytes),
}

/// Everything needed to issue one request against a service root
#[derive(Debug, Clone)]
pub struct RequestInput {
    /// Path relative to the service root, starting with `/`
    pub path: String,
    /// HTTP method
    pub method: Method,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Query parameters, encoded in order
    pub query: Vec<(String, String)>,
    /// Request body
    pub body: RequestBody,
    /// Content type; JSON bodies default to `application/json`
    pub content_type: Option<String>,
}

impl RequestInput {
    /// New request without body, headers or query
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: Vec::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
            content_type: None,
        }
    }

    /// Add a query parameter
    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    /// Serialize `body` as JSON
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = RequestBody::Json(Bytes::from(serde_json::to_vec(body)?));
        if self.content_type.is_none() {
            self.content_type = Some("application/json".to_string());
        }
        Ok(self)
    }

    /// Send `body` as-is
    pub fn raw(mut self, body: Bytes) -> Self {
        self.body = RequestBody::Raw(body);
        self
    }

    /// Set the content type
    pub fn content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type.map(str::to_string);
        self
    }

    /// Path plus the encoded query string
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{}", self.path, query)
    }
}

/// Successful (2xx) response. The body is left unread so callers can
/// stream it or collect it.
#[derive(Debug)]
pub struct RequestOutput {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Unread response body
    pub body: Incoming,
}

impl RequestOutput {
    /// Collect the body
    pub async fn bytes(self) -> Result<Bytes> {
        read_body_to_bytes(self.body).await
    }

    /// Collect the body and decode it as JSON
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let body = self.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Read response body to bytes
pub(crate) async fn read_body_to_bytes(body: Incoming) -> Result<Bytes> {
    let collected = body
        .collect()
        .await
        .map_err(|e| Error::Connection(format!("Failed to read body: {}", e)))?;
    Ok(collected.to_bytes())
}

/// JSON error document returned by both services
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// First message of a JSON error body, if any
fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorResponse>(body)
        .ok()
        .and_then(|resp| resp.errors.into_iter().next())
}

/// Map a non-2xx status to its error kind
pub(crate) fn classify(status: StatusCode, message: Option<String>) -> Error {
    match status {
        StatusCode::BAD_REQUEST => Error::BadRequest(message),
        StatusCode::UNAUTHORIZED => Error::Unauthorized,
        StatusCode::NOT_FOUND => Error::NotFound,
        StatusCode::CONFLICT => Error::Conflict(message),
        code => Error::InternalServerError(code.as_u16()),
    }
}

/// Client bound to one service root (`{endpoint}/{project_id}/{name}`)
#[derive(Clone)]
pub struct HttpClient {
    root: Arc<str>,
    auth: Arc<AuthInfo>,
    connection: Connection,
}

impl HttpClient {
    pub(crate) fn new(root: String, auth: AuthInfo, connection: Connection) -> Result<Self> {
        // Validate the root URL early
        let _: Uri = root
            .parse()
            .map_err(|e| Error::InvalidUrl(format!("Invalid endpoint URL: {}", e)))?;

        Ok(Self {
            root: Arc::from(root),
            auth: Arc::new(auth),
            connection,
        })
    }

    /// Root endpoint this client talks to
    pub fn root_endpoint(&self) -> &str {
        &self.root
    }

    /// Send a request and classify the response status.
    ///
    /// Non-2xx responses are read fully and turned into an [`Error`]; 2xx
    /// responses are returned with the body unread.
    pub async fn request(&self, input: RequestInput) -> Result<RequestOutput> {
        let url = format!("{}{}", self.root, input.path_and_query());
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::InvalidUrl(format!("Invalid request URL: {}", e)))?;

        let mut builder = Request::builder().method(input.method.clone()).uri(uri);

        if let Some(content_type) = &input.content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }
        for (key, value) in &input.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder = builder.header(self.auth.header_key, self.auth.header_value.as_str());

        let body = match input.body {
            RequestBody::Empty => Bytes::new(),
            RequestBody::Json(bytes) | RequestBody::Raw(bytes) => bytes,
        };
        let req = builder
            .body(Full::new(body))
            .map_err(|e| Error::InvalidRequest(format!("Failed to build request: {}", e)))?;

        debug!("Sending request: {} {}", input.method, input.path);

        let response = self
            .connection
            .request(req)
            .await
            .map_err(|e| Error::Connection(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let (parts, body) = response.into_parts();
            return Ok(RequestOutput {
                status,
                headers: parts.headers,
                body,
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        let body = read_body_to_bytes(response.into_body()).await?;
        let message = if is_json { error_message(&body) } else { None };

        debug!("Request failed: {} {} -> {}", input.method, input.path, status);
        Err(classify(status, message))
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("root", &self.root)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}
