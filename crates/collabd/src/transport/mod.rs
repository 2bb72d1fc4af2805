//! Listening socket and the accept loop that feeds the connection manager.
//!
//! The acceptor binds once at startup and then runs on its own thread,
//! handing every accepted stream straight to the manager's intake. Closing
//! the acceptor ends the loop and drops the socket, so later connection
//! attempts are refused.

mod errors;
mod listener;
#[cfg(test)]
mod listener_tests;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub use self::listener::{
    Acceptor, AcceptorExit, AcceptorHandle, ConnectionSource, SocketBinder, TcpSocketBinder,
};
#[cfg(test)]
pub(crate) use self::test_utils::{
    CountingManager, FailingBinder, FailingSource, wait_for_count,
};
