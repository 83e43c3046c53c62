//! Endpoint-independent request and response values.
//!
//! A logical call is described once as an [`ApiRequest`] and may be sent to
//! several endpoints before one of them answers.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, Result};

/// A Manager REST call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the endpoint base URL, starting with `/`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Create a request with the given method and path.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// A `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A `POST` request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// A `PUT` request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// A `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidResponse` if the body cannot be serialized.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(
            serde_json::to_value(body)
                .map_err(|e| ClientError::InvalidResponse(format!("encoding body: {e}")))?,
        );
        Ok(self)
    }
}

/// A successful Manager response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl ApiResponse {
    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidResponse` if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| ClientError::InvalidResponse(format!("decoding body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_query_and_body() {
        let req = ApiRequest::post("/api/v1/trust-management/certificates")
            .query("action", "import")
            .json(&serde_json::json!({"pem_encoded": "x"}))
            .unwrap();

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.query, vec![("action".to_string(), "import".to_string())]);
        assert_eq!(req.body.unwrap()["pem_encoded"], "x");
    }

    #[test]
    fn response_decode_error_is_reported() {
        let resp = ApiResponse {
            status: 200,
            body: "not json".to_string(),
        };
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }
}
