use crate::error::{SessionError, SessionResult, TransportError};
use crate::redact::redact_secrets;
use crate::settings::Settings;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl From<Method> for reqwest::Method {
  fn from(m: Method) -> Self {
    match m {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// One call to the backend, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  pub bearer: Option<String>,
  pub(crate) retried: bool,
  pub(crate) refreshable: bool,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      method,
      path: path.into(),
      body,
      bearer: None,
      retried: false,
      refreshable: true,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path, None)
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Post, path, Some(body))
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Put, path, Some(body))
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path, None)
  }

  /// A 401 on this request means bad credentials, not an expired token, so it
  /// never triggers a silent refresh.
  pub fn without_refresh(mut self) -> Self {
    self.refreshable = false;
    self
  }

  pub fn was_retried(&self) -> bool {
    self.retried
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
  Success,
  Unauthorized,
  Error,
}

pub fn map_http_status(status_code: u16) -> StatusClass {
  match status_code {
    200..=299 => StatusClass::Success,
    401 => StatusClass::Unauthorized,
    _ => StatusClass::Error,
  }
}

fn error_message(status: u16, body: &Value) -> String {
  let from_body = match body {
    Value::Object(obj) => ["message", "error", "detail"]
      .iter()
      .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_string),
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    _ => None,
  };
  let msg = from_body.unwrap_or_else(|| format!("CampusConnect API error ({status})"));
  redact_secrets(&msg).into_owned()
}

impl ApiResponse {
  pub fn class(&self) -> StatusClass {
    map_http_status(self.status)
  }

  pub fn is_unauthorized(&self) -> bool {
    self.class() == StatusClass::Unauthorized
  }

  pub fn into_result(self) -> SessionResult<Value> {
    match self.class() {
      StatusClass::Success => Ok(self.body),
      StatusClass::Unauthorized => Err(SessionError::AuthorizationRejected(error_message(
        self.status,
        &self.body,
      ))),
      StatusClass::Error => Err(SessionError::Api {
        status: self.status,
        message: error_message(self.status, &self.body),
      }),
    }
  }
}

/// Executes backend calls. The session manager owns credentials; a transport
/// only sends what it is handed.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

fn build_headers(bearer: Option<&str>) -> HeaderMap {
  let mut headers = HeaderMap::new();
  headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
  headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
  if let Some(token) = bearer {
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
      headers.insert(AUTHORIZATION, value);
    }
  }
  headers
}

pub struct HttpTransport {
  http: reqwest::Client,
  settings: Settings,
}

impl HttpTransport {
  pub fn new(settings: Settings) -> Result<Self, TransportError> {
    Ok(Self {
      http: reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()?,
      settings,
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
    let url = self.settings.url(&request.path);
    tracing::debug!(method = ?request.method, %url, "api request");

    let mut builder = self
      .http
      .request(request.method.into(), url)
      .headers(build_headers(request.bearer.as_deref()));
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let res = builder.send().await?;
    let status = res.status().as_u16();
    let text = res.text().await?;

    let body = if text.trim().is_empty() {
      Value::Null
    } else {
      serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))
    };
    Ok(ApiResponse { status, body })
  }
}
