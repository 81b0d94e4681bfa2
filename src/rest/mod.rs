//! REST control plane.
//!
//! ```text
//! socket -> hyper http1 -> RequestAssembler -> RestRequestDispatcher
//!                                                   |
//!                                  longest binding prefix (BindingIndex)
//!                                                   v
//!                                   Handler -> RestRequestHandler logic
//!                                                   |
//!                 JSON response <- JsonHandlerResult | RestError
//! ```

pub mod assembly;
pub mod binding;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod request;
pub mod result;
pub mod server;

pub use assembly::{AssembledRequest, AssemblyAction, AssemblyState, HttpEvent, RequestAssembler, RequestHead};
pub use binding::{BindingIndex, SortedBindings};
pub use dispatcher::RestRequestDispatcher;
pub use error::{RestError, RestResult};
pub use handler::{Handler, HandlerContext, RestRequestHandler};
pub use request::{RestMethod, RestRequest, RestRequestSyntaxError};
pub use result::{JsonHandlerResult, PostResponseAction, REASON_PHRASE_FIELD};
pub use server::{PostResponseExecutor, RestServer};
