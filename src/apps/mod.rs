//! Applications assembled from the platform: echo back end, reverse proxy
//! front and the initiator that drives echoes through the pipelined client.

pub mod echo;
pub mod initiator;
pub mod shutdown;

pub use echo::{EchoCodec, EchoHandler, EchoServer};
pub use initiator::{EchoClient, EchoUtf8StringHandler, ECHO_BINDING};
pub use shutdown::{ShutdownHandler, SHUTDOWN_BINDING};
