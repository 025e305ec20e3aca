//! Application hooks invoked by the server for every connection.

use std::future::Future;
use std::sync::Arc;

use crate::server::connection::Connection;

/// Application logic plugged into a [`Server`](crate::server::Server).
///
/// `P` is the packet type produced by the server's protocol. One callback
/// instance is shared by every connection, so implementations must be safe
/// to call concurrently for different connections. Calls for a single
/// connection are sequential: `on_connect` first, then `on_message` in
/// arrival order, then `on_close` exactly once.
///
/// Returning `false` from `on_connect` or `on_message` closes the
/// connection.
pub trait Callback<P>: Send + Sync + 'static {
    /// A connection was accepted; `false` rejects it.
    fn on_connect(&self, conn: &Arc<Connection>) -> impl Future<Output = bool> + Send {
        let _ = conn;
        async { true }
    }

    /// One complete packet arrived.
    fn on_message(&self, conn: &Arc<Connection>, packet: P) -> impl Future<Output = bool> + Send;

    /// The connection is closed. Runs once per connection, after the socket
    /// is gone, including for connections `on_connect` rejected.
    fn on_close(&self, conn: &Arc<Connection>) -> impl Future<Output = ()> + Send {
        let _ = conn;
        async {}
    }
}
