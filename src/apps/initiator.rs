//! Initiator: REST-triggered echoes through the pipelined client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use hyper::StatusCode;

use crate::apps::echo::EchoCodec;
use crate::client::{ClientError, TcpMessage, TcpSequentialClient};
use crate::config::InitiatorConfig;
use crate::rest::{Handler, HandlerContext, JsonHandlerResult, RestError, RestRequest, RestRequestHandler};

pub const ECHO_BINDING: &str = "POST /utf8string/";

/// Pipelined client talking to an echo back end.
pub type EchoClient = TcpSequentialClient<Bytes, EchoCodec>;

/// Sends the single path argument to the echo back end and reports the
/// echoed text.
pub struct EchoUtf8StringHandler {
    client: Arc<EchoClient>,
    response_timeout: Duration,
    validate_response: bool,
}

impl EchoUtf8StringHandler {
    pub fn new(client: Arc<EchoClient>, config: &InitiatorConfig) -> Self {
        Self {
            client,
            response_timeout: config.response_timeout(),
            validate_response: config.validate_response,
        }
    }

    /// The handler registered under [`ECHO_BINDING`].
    pub fn bound(self) -> Result<Handler<JsonHandlerResult>, RestError> {
        let binding: RestRequest = ECHO_BINDING.parse()?;
        Ok(Handler::new(binding, self))
    }
}

impl RestRequestHandler<JsonHandlerResult> for EchoUtf8StringHandler {
    fn handle_request(
        &self,
        _request: RestRequest,
        context: HandlerContext,
    ) -> BoxFuture<'static, Result<JsonHandlerResult, RestError>> {
        let [text] = context.arguments() else {
            return future::ready(Err(RestError::bad_request(format!(
                "Request {}... must specify exactly one argument",
                context.binding()
            ))))
            .boxed();
        };
        let payload = Bytes::copy_from_slice(text.as_bytes());
        let client = Arc::clone(&self.client);
        let timeout = self.response_timeout;
        let validate = self.validate_response;

        async move {
            let outcome = client.send(TcpMessage::new(payload.clone(), timeout)).await.await;
            let response = match outcome {
                Ok(Some(response)) => response,
                Ok(None) => return Err(RestError::Handling("echo back end sent no response".into())),
                Err(e) => return Err(echo_failure(e, timeout)),
            };
            if validate && *response.get() != payload {
                response.abort();
                return Err(RestError::externally_visible(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "echo of {} bytes on {} came back altered",
                        payload.len(),
                        response.connection_id()
                    ),
                    "Echo response is invalid",
                ));
            }
            let echoed = String::from_utf8_lossy(response.get()).into_owned();
            Ok(JsonHandlerResult::with_reason(StatusCode::OK, "Echo completed")
                .field("response", echoed)
                .content_language("en"))
        }
        .boxed()
    }
}

fn echo_failure(error: ClientError, timeout: Duration) -> RestError {
    if error.is_timeout() {
        RestError::timeout(error.to_string(), "Echo response timeout", timeout)
    } else {
        RestError::Handling(error.to_string())
    }
}
