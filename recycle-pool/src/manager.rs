use std::future::Future;

/// The driver side of the pool: opens, checks and closes physical connections.
///
/// The pool never runs queries; it only calls these hooks around checkout
/// and checkin.
pub trait Manager: 'static + Send + Sync {
    type Connection: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Best-effort; the pool logs a failure and moves on.
    fn close(
        &self,
        conn: Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            drop(conn);
            Ok(())
        }
    }

    /// Liveness check, only called when `test_on_checkout` is set.
    fn ping(&self, _conn: &mut Self::Connection) -> impl Future<Output = bool> + Send {
        async { true }
    }

    /// Lets the driver flag a connection as broken when it is checked in.
    fn is_broken(&self, _conn: &Self::Connection) -> bool {
        false
    }
}
