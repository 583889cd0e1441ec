//! Request descriptors consumed by the executor.

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use thiserror::Error;

/// A header that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid header {name:?}: {reason}")]
pub struct HeaderError {
    /// The header as supplied.
    pub name: String,
    /// Why it was rejected.
    pub reason: String,
}

/// One logical request: URL, method, headers and optional body.
///
/// Header names are case-insensitive. The executor sends headers exactly as
/// given; it never adds or overrides a caller-specified header.
///
/// ```
/// use firmament_net::network::RequestDescriptor;
///
/// let request = RequestDescriptor::post("http://localhost:8000/generate-headings")
///     .json(&serde_json::json!({"filename": "notes.pdf"}))
///     .unwrap();
/// assert_eq!(request.headers()["content-type"], "application/json");
/// ```
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    url: String,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Sets a header, replacing any previous value for the same name.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header from strings.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] if the name or value is not a valid HTTP header.
    pub fn try_header(self, name: &str, value: &str) -> Result<Self, HeaderError> {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| HeaderError {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|e| HeaderError {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.header(header_name, header_value))
    }

    /// Sets a raw body. No content type is implied.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`
    /// unless the caller already chose a content type.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be encoded.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(value)?;
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        self.body = Some(Bytes::from(encoded));
        Ok(self)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let request = RequestDescriptor::get("http://x/")
            .try_header("X-Request-Id", "abc")
            .unwrap();
        assert_eq!(request.headers()["x-request-id"], "abc");
        assert_eq!(request.headers()["X-REQUEST-ID"], "abc");
    }

    #[test]
    fn test_json_keeps_caller_content_type() {
        let request = RequestDescriptor::post("http://x/")
            .try_header("Content-Type", "application/vnd.api+json")
            .unwrap()
            .json(&serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(request.headers()[CONTENT_TYPE], "application/vnd.api+json");
        assert_eq!(request.body_bytes().unwrap().as_ref(), br#"{"a":1}"#);
    }

    #[test]
    fn test_raw_body_sets_no_content_type() {
        let request = RequestDescriptor::post("http://x/upload").body(b"--boundary".to_vec());
        assert!(!request.headers().contains_key(CONTENT_TYPE));
        assert_eq!(request.body_bytes().unwrap().as_ref(), b"--boundary");
    }

    #[test]
    fn test_try_header_rejects_invalid_name() {
        let result = RequestDescriptor::get("http://x/").try_header("bad header", "v");
        let error = result.unwrap_err();
        assert_eq!(error.name, "bad header");
    }

    #[test]
    fn test_try_header_rejects_invalid_value() {
        let result = RequestDescriptor::get("http://x/").try_header("X-Ok", "line\nbreak");
        assert!(result.is_err());
    }

    #[test]
    fn test_method_constructors() {
        assert_eq!(RequestDescriptor::get("u").method(), Method::GET);
        assert_eq!(RequestDescriptor::post("u").method(), Method::POST);
        assert_eq!(RequestDescriptor::put("u").method(), Method::PUT);
        assert_eq!(RequestDescriptor::delete("u").method(), Method::DELETE);
    }
}
