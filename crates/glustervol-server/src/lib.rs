//! glustervol server library
//!
//! Docker volume plugin endpoint for GlusterFS: protocol dispatch and the
//! Unix socket listener, served over HTTP/1.1 by hyper.

pub mod constants;
pub mod listener;
pub mod protocol;

pub use listener::PluginServer;
pub use protocol::{Endpoint, PluginResponse, dispatch, handle_request};
