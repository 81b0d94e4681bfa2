//! `PUT /shutdown/` control handler shared by every application.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use hyper::StatusCode;
use serde_json::Value;

use crate::lifecycle::Shutdownable;
use crate::rest::{Handler, HandlerContext, JsonHandlerResult, RestError, RestRequest, RestRequestHandler};

pub const SHUTDOWN_BINDING: &str = "PUT /shutdown/";

/// Shuts the application components down, answers 202, then stops the
/// control server that served the request.
pub struct ShutdownHandler {
    targets: Vec<Arc<dyn Shutdownable>>,
    reason: String,
}

impl ShutdownHandler {
    pub fn new(reason: impl Into<String>, targets: Vec<Arc<dyn Shutdownable>>) -> Self {
        Self {
            targets,
            reason: reason.into(),
        }
    }

    /// The handler registered under [`SHUTDOWN_BINDING`].
    pub fn bound(self) -> Result<Handler<JsonHandlerResult>, RestError> {
        let binding: RestRequest = SHUTDOWN_BINDING.parse()?;
        Ok(Handler::new(binding, self))
    }
}

impl RestRequestHandler<JsonHandlerResult> for ShutdownHandler {
    fn handle_request(
        &self,
        _request: RestRequest,
        context: HandlerContext,
    ) -> BoxFuture<'static, Result<JsonHandlerResult, RestError>> {
        if !context.arguments().is_empty() {
            return future::ready(Err(RestError::bad_request(format!(
                "Request {}... must not specify any arguments",
                context.binding()
            ))))
            .boxed();
        }
        let control = match context.server() {
            Ok(server) => server.clone(),
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let targets = self.targets.clone();
        let reason = self.reason.clone();
        async move {
            let mut stopped = Vec::with_capacity(targets.len());
            for target in &targets {
                target.shutdown().await;
                stopped.push(Value::from(target.describe()));
            }
            tracing::info!(control = %control, "Shutdown accepted, stopping control server after reply");
            Ok(JsonHandlerResult::with_reason(StatusCode::ACCEPTED, reason)
                .field("stopped", Value::Array(stopped))
                .content_language("en")
                .post_response(move || control.stop()))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ServerHandle;
    use crate::rest::RestRequestDispatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted(Arc<AtomicUsize>);

    impl Shutdownable for Counted {
        fn shutdown(&self) -> BoxFuture<'_, ()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            future::ready(()).boxed()
        }

        fn describe(&self) -> String {
            "counted".to_string()
        }
    }

    fn dispatcher(count: &Arc<AtomicUsize>) -> RestRequestDispatcher<JsonHandlerResult> {
        let handler = ShutdownHandler::new("Stopping", vec![Arc::new(Counted(Arc::clone(count)))])
            .bound()
            .unwrap();
        RestRequestDispatcher::new(ServerHandle::new("control"), [handler]).unwrap()
    }

    #[tokio::test]
    async fn stops_targets_then_control_server_after_reply() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(&count);
        let result = dispatcher.dispatch(SHUTDOWN_BINDING.parse().unwrap()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(result.status(), StatusCode::ACCEPTED);
        assert_eq!(result.body().unwrap()["stopped"], serde_json::json!(["counted"]));
        assert!(!dispatcher.server().is_stopped());

        let (_, action) = result.into_response();
        action.unwrap()();
        assert!(dispatcher.server().is_stopped());
    }

    #[tokio::test]
    async fn arguments_are_rejected() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(&count);
        let err = dispatcher.dispatch("PUT /shutdown/now/".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, RestError::BadRequest { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
