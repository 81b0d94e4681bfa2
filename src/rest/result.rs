//! JSON handler results.

use std::fmt;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_LANGUAGE, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde_json::{Map, Value};

/// Body field holding the human readable reason phrase.
pub const REASON_PHRASE_FIELD: &str = "httpReasonPhrase";

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Work to run after the response has been handed to the transport.
pub type PostResponseAction = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a JSON REST handler.
pub struct JsonHandlerResult {
    status: StatusCode,
    body: Option<Map<String, Value>>,
    content_language: Option<String>,
    post_response_action: Option<PostResponseAction>,
}

impl JsonHandlerResult {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            content_language: None,
            post_response_action: None,
        }
    }

    /// Result whose body carries only a reason phrase.
    pub fn with_reason(status: StatusCode, reason: impl Into<String>) -> Self {
        Self::new(status).field(REASON_PHRASE_FIELD, reason.into())
    }

    /// Adds a body field, creating the JSON object on first use.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn content_language(mut self, language: impl Into<String>) -> Self {
        self.content_language = Some(language.into());
        self
    }

    pub fn post_response(mut self, action: impl FnOnce() + Send + 'static) -> Self {
        self.post_response_action = Some(Box::new(action));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> Option<&Map<String, Value>> {
        self.body.as_ref()
    }

    pub fn reason(&self) -> Option<&str> {
        self.body.as_ref()?.get(REASON_PHRASE_FIELD)?.as_str()
    }

    pub fn has_post_response_action(&self) -> bool {
        self.post_response_action.is_some()
    }

    /// Splits the result into its HTTP response and its post-response action.
    pub fn into_response(self) -> (Response<Full<Bytes>>, Option<PostResponseAction>) {
        let body = self
            .body
            .map(|fields| Value::Object(fields).to_string())
            .unwrap_or_default();
        let mut response = json_response(self.status, body);
        if let Some(language) = self
            .content_language
            .and_then(|l| HeaderValue::from_str(&l).ok())
        {
            response.headers_mut().insert(CONTENT_LANGUAGE, language);
        }
        (response, self.post_response_action)
    }
}

impl fmt::Debug for JsonHandlerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonHandlerResult")
            .field("status", &self.status)
            .field("body", &self.body)
            .field("content_language", &self.content_language)
            .field("post_response_action", &self.post_response_action.is_some())
            .finish()
    }
}

/// Response with a `{"httpReasonPhrase": reason}` body.
pub fn reason_response(status: StatusCode, reason: &str) -> Response<Full<Bytes>> {
    let mut fields = Map::new();
    fields.insert(REASON_PHRASE_FIELD.to_string(), Value::from(reason));
    json_response(status, Value::Object(fields).to_string())
}

/// Marks a response as the last one on its connection.
pub fn closing(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response<Full<Bytes>>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reason_and_fields_share_one_object() {
        let result = JsonHandlerResult::with_reason(StatusCode::OK, "Echo completed")
            .field("response", "hi")
            .content_language("en");
        assert_eq!(result.reason(), Some("Echo completed"));

        let (response, action) = result.into_response();
        assert!(action.is_none());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(response.headers()[CONTENT_LANGUAGE], "en");
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"httpReasonPhrase": "Echo completed", "response": "hi"})
        );
    }

    #[tokio::test]
    async fn empty_result_has_empty_body() {
        let (response, _) = JsonHandlerResult::new(StatusCode::NO_CONTENT).into_response();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }

    #[test]
    fn post_response_action_is_handed_back() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&ran);
        let result = JsonHandlerResult::new(StatusCode::ACCEPTED)
            .post_response(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));
        assert!(result.has_post_response_action());
        let (_, action) = result.into_response();
        action.unwrap()();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn closing_sets_connection_header() {
        let response = closing(reason_response(StatusCode::INTERNAL_SERVER_ERROR, "x"));
        assert_eq!(response.headers()[CONNECTION], "close");
    }
}
