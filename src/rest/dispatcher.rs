//! Routes REST requests to handlers by longest binding prefix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::net::ServerHandle;
use crate::rest::binding::{BindingIndex, SortedBindings};
use crate::rest::error::RestError;
use crate::rest::handler::Handler;
use crate::rest::request::RestRequest;

pub struct RestRequestDispatcher<T> {
    server: ServerHandle,
    index: Box<dyn BindingIndex<Arc<Handler<T>>>>,
    active: AtomicBool,
}

impl<T: Send + 'static> RestRequestDispatcher<T> {
    /// Registers `handlers` and associates each of them with `server`.
    ///
    /// Fails on duplicate bindings, in which case no handler is associated.
    pub fn new(
        server: ServerHandle,
        handlers: impl IntoIterator<Item = Handler<T>>,
    ) -> Result<Self, RestError> {
        Self::with_index(server, handlers, SortedBindings::new())
    }

    pub fn with_index<I>(
        server: ServerHandle,
        handlers: impl IntoIterator<Item = Handler<T>>,
        mut index: I,
    ) -> Result<Self, RestError>
    where
        I: BindingIndex<Arc<Handler<T>>> + 'static,
    {
        for handler in handlers {
            let handler = Arc::new(handler);
            index.insert(handler.binding().clone(), handler)?;
        }
        for handler in index.values() {
            handler.associate(server.clone())?;
        }
        tracing::debug!(server = %server, bindings = index.len(), "REST dispatcher ready");
        Ok(Self {
            server,
            index: Box::new(index),
            active: AtomicBool::new(true),
        })
    }

    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Handler whose binding is the longest prefix of `request`.
    pub fn find(&self, request: &RestRequest) -> Option<&Arc<Handler<T>>> {
        self.index.find(request)
    }

    pub fn dispatch(&self, request: RestRequest) -> BoxFuture<'static, Result<T, RestError>> {
        if !self.is_active() {
            return future::ready(Err(RestError::Inactive(format!(
                "dispatcher of {}",
                self.server
            ))))
            .boxed();
        }
        match self.find(&request) {
            Some(handler) => handler.handle(request),
            None => {
                tracing::debug!(request = %request, "No REST binding matches");
                future::ready(Err(RestError::BindingNotFound {
                    request: request.to_string(),
                }))
                .boxed()
            }
        }
    }

    /// Shuts down every registered handler once. Idempotent.
    pub fn shutdown(&self) {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        for handler in self.index.values() {
            handler.shutdown();
        }
        tracing::info!(server = %self.server, "REST dispatcher shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::handler::{HandlerContext, RestRequestHandler};
    use std::sync::atomic::AtomicUsize;

    struct Named {
        name: &'static str,
        shutdowns: Arc<AtomicUsize>,
    }

    impl RestRequestHandler<String> for Named {
        fn handle_request(
            &self,
            _request: RestRequest,
            context: HandlerContext,
        ) -> BoxFuture<'static, Result<String, RestError>> {
            let reply = format!("{}:{}", self.name, context.arguments().join(","));
            future::ready(Ok(reply)).boxed()
        }

        fn shutdown_hook(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handler(binding: &str, name: &'static str, shutdowns: &Arc<AtomicUsize>) -> Handler<String> {
        Handler::new(
            binding.parse().unwrap(),
            Named {
                name,
                shutdowns: Arc::clone(shutdowns),
            },
        )
    }

    fn dispatcher(shutdowns: &Arc<AtomicUsize>) -> RestRequestDispatcher<String> {
        RestRequestDispatcher::new(
            ServerHandle::new("test"),
            [
                handler("GET /b1/", "short", shutdowns),
                handler("GET /b1/b2/", "long", shutdowns),
                handler("POST /b1/", "post", shutdowns),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dispatches_to_longest_prefix_with_arguments() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(&counter);
        let reply = dispatcher.dispatch("GET /b1/b2/p1/p2/".parse().unwrap()).await.unwrap();
        assert_eq!(reply, "long:p1,p2");
        let reply = dispatcher.dispatch("GET /b1/other/".parse().unwrap()).await.unwrap();
        assert_eq!(reply, "short:other");
        let reply = dispatcher.dispatch("POST /b1/b2/".parse().unwrap()).await.unwrap();
        assert_eq!(reply, "post:b2");
    }

    #[tokio::test]
    async fn unknown_request_is_binding_not_found() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(&counter);
        let err = dispatcher.dispatch("GET /b1x/".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, RestError::BindingNotFound { .. }));
    }

    #[test]
    fn handlers_are_associated_with_the_server() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(&counter);
        let found = dispatcher.find(&"GET /b1/b2/".parse().unwrap()).unwrap();
        assert_eq!(found.server().unwrap().name(), "test");
    }

    #[test]
    fn duplicate_bindings_fail_construction() {
        let counter = Arc::new(AtomicUsize::new(0));
        let result = RestRequestDispatcher::new(
            ServerHandle::new("dup"),
            [handler("GET /x/", "a", &counter), handler("GET /x", "b", &counter)],
        );
        assert!(matches!(result, Err(RestError::DuplicateBinding { .. })));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_reaches_every_handler_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(&counter);
        dispatcher.shutdown();
        dispatcher.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        let err = dispatcher.dispatch("GET /b1/".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, RestError::Inactive(_)));
    }
}
