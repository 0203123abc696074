//! Object API gateway
//!
//! Every endpoint takes one JSON POST of `{session_id?, data?}` and answers
//! with one of three shapes, normalized here into [`ResponseEnvelope`].

use std::sync::Arc;

use http::Method;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{HttpRequest, RequestBody, Transport};

/// Normalized reply of an object API call
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    /// `{data: ...}`
    Data(Value),
    /// `{success: true, msg?}`; any other top-level members are kept in `fields`
    Success {
        msg: Option<String>,
        fields: Map<String, Value>,
    },
    /// `{error: ..., msg?}`
    Error { error: Value, msg: Option<String> },
}

impl ResponseEnvelope {
    /// Classify a decoded reply. `data` wins over `success` when both are present.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut object = match value {
            Value::Object(object) => object,
            other => return Err(Error::Protocol(other.to_string())),
        };

        let msg = match object.remove("msg") {
            Some(Value::String(msg)) => Some(msg),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        if let Some(data) = object.remove("data") {
            return Ok(ResponseEnvelope::Data(data));
        }
        if object.remove("success").is_some() {
            return Ok(ResponseEnvelope::Success {
                msg,
                fields: object,
            });
        }
        if let Some(error) = object.remove("error") {
            return Ok(ResponseEnvelope::Error { error, msg });
        }

        if let Some(msg) = msg {
            object.insert("msg".to_string(), Value::String(msg));
        }
        Err(Error::Protocol(Value::Object(object).to_string()))
    }

    /// Payload of a `Data` reply
    pub fn data(&self) -> Option<&Value> {
        match self {
            ResponseEnvelope::Data(data) => Some(data),
            _ => None,
        }
    }

    /// String member of the `data` object
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data()?.get(key)?.as_str()
    }

    /// String member of a `Success` reply besides `msg`
    pub fn success_field(&self, key: &str) -> Option<&str> {
        match self {
            ResponseEnvelope::Success { fields, .. } => fields.get(key)?.as_str(),
            _ => None,
        }
    }

    pub fn msg(&self) -> Option<&str> {
        match self {
            ResponseEnvelope::Success { msg, .. } | ResponseEnvelope::Error { msg, .. } => {
                msg.as_deref()
            }
            ResponseEnvelope::Data(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResponseEnvelope::Error { .. })
    }

    /// Turn an `Error` reply into [`Error::Application`], pass the rest through
    pub fn into_result(self) -> Result<Self> {
        match self {
            ResponseEnvelope::Error { error, msg } => Err(Error::Application { error, msg }),
            other => Ok(other),
        }
    }
}

/// Issues single JSON exchanges against the object API
#[derive(Clone)]
pub struct ApiGateway {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl ApiGateway {
    /// Create a gateway for the API rooted at `base_url`
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build the JSON body; `data` is left out when absent or an empty object
    pub fn request_body(session_id: Option<&str>, data: Option<Value>) -> Value {
        let mut body = Map::new();
        if let Some(session_id) = session_id.filter(|s| !s.is_empty()) {
            body.insert("session_id".to_string(), Value::String(session_id.to_string()));
        }
        match data {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) if map.is_empty() => {}
            Some(data) => {
                body.insert("data".to_string(), data);
            }
        }
        Value::Object(body)
    }

    /// POST one request to `endpoint` and return the decoded reply as is
    pub async fn call_value(
        &self,
        endpoint: &str,
        session_id: Option<&str>,
        data: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let request = HttpRequest::new(Method::POST, url)
            .header("Content-Type", "application/json")
            .body(RequestBody::Json(Self::request_body(session_id, data)));

        let reply = self.transport.send(request).await?;
        debug!(endpoint, status = reply.status.as_u16(), "api call finished");

        serde_json::from_slice(&reply.body)
            .map_err(|_| Error::Protocol(String::from_utf8_lossy(&reply.body).into_owned()))
    }

    /// POST one request to `endpoint` and classify the reply
    pub async fn call(
        &self,
        endpoint: &str,
        session_id: Option<&str>,
        data: Option<Value>,
    ) -> Result<ResponseEnvelope> {
        let value = self.call_value(endpoint, session_id, data).await?;
        ResponseEnvelope::from_value(value)
    }
}
