//! REST request handlers.
//!
//! A [`Handler`] wraps application logic with its binding, its association
//! with a dispatcher and an active flag. Panics raised by the logic, whether
//! while building the future or while polling it, surface as
//! [`RestError::Handling`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::net::ServerHandle;
use crate::rest::error::RestError;
use crate::rest::request::RestRequest;

/// Application logic bound to one REST binding.
pub trait RestRequestHandler<T>: Send + Sync + 'static {
    fn handle_request(
        &self,
        request: RestRequest,
        context: HandlerContext,
    ) -> BoxFuture<'static, Result<T, RestError>>;

    /// Runs once when the owning handler shuts down.
    fn shutdown_hook(&self) {}
}

/// Per-request view handed to handler logic.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    binding: RestRequest,
    arguments: Vec<String>,
    server: Option<ServerHandle>,
}

impl HandlerContext {
    pub fn binding(&self) -> &RestRequest {
        &self.binding
    }

    /// Decoded path nodes beyond the binding.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Server of the dispatcher the handler is associated with.
    pub fn server(&self) -> Result<&ServerHandle, RestError> {
        self.server.as_ref().ok_or_else(|| RestError::Unassociated {
            binding: self.binding.to_string(),
        })
    }
}

pub struct Handler<T> {
    binding: RestRequest,
    logic: Box<dyn RestRequestHandler<T>>,
    server: OnceLock<ServerHandle>,
    active: AtomicBool,
}

impl<T: Send + 'static> Handler<T> {
    pub fn new(binding: RestRequest, logic: impl RestRequestHandler<T>) -> Self {
        Self {
            binding,
            logic: Box::new(logic),
            server: OnceLock::new(),
            active: AtomicBool::new(true),
        }
    }

    pub fn binding(&self) -> &RestRequest {
        &self.binding
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_associated(&self) -> bool {
        self.server.get().is_some()
    }

    /// Server reached through the dispatcher association.
    pub fn server(&self) -> Result<&ServerHandle, RestError> {
        self.server.get().ok_or_else(|| RestError::Unassociated {
            binding: self.binding.to_string(),
        })
    }

    /// Links this handler with the server of its dispatcher. Allowed once.
    pub(crate) fn associate(&self, server: ServerHandle) -> Result<(), RestError> {
        if !self.is_active() {
            return Err(RestError::Inactive(format!("handler {}", self.binding)));
        }
        self.server.set(server).map_err(|_| RestError::AlreadyAssociated {
            binding: self.binding.to_string(),
        })
    }

    /// Path nodes of `request` that follow this handler's binding.
    pub fn arguments(&self, request: &RestRequest) -> Vec<String> {
        request.nodes_after(self.binding.depth()).to_vec()
    }

    pub fn handle(&self, request: RestRequest) -> BoxFuture<'static, Result<T, RestError>> {
        if !self.is_active() {
            return future::ready(Err(RestError::Inactive(format!("handler {}", self.binding)))).boxed();
        }
        let context = HandlerContext {
            binding: self.binding.clone(),
            arguments: self.arguments(&request),
            server: self.server.get().cloned(),
        };
        tracing::debug!(binding = %self.binding, request = %request, "Handling REST request");

        let binding = self.binding.clone();
        match catch_unwind(AssertUnwindSafe(|| self.logic.handle_request(request, context))) {
            Ok(handling) => AssertUnwindSafe(handling)
                .catch_unwind()
                .map(move |outcome| outcome.unwrap_or_else(|panic| Err(panicked(&binding, panic))))
                .boxed(),
            Err(panic) => future::ready(Err(panicked(&binding, panic))).boxed(),
        }
    }

    /// Deactivates the handler and runs its shutdown hook. Idempotent.
    pub fn shutdown(&self) {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| self.logic.shutdown_hook())).is_err() {
            tracing::error!(binding = %self.binding, "Handler shutdown hook panicked");
        } else {
            tracing::debug!(binding = %self.binding, "Handler shut down");
        }
    }
}

fn panicked(binding: &RestRequest, panic: Box<dyn Any + Send>) -> RestError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(binding = %binding, panic = %message, "REST handler panicked");
    RestError::Handling(format!("handler for {binding} panicked: {message}"))
}

impl<T> std::fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("binding", &self.binding.to_string())
            .field("associated", &self.server.get().is_some())
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}
