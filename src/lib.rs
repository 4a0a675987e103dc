//! Session and query layer of a namespace-multiplexed MySQL proxy
//!
//! A [`session::QueryContext`] serves one client connection: it binds to a
//! namespace on authentication, runs statements on connections leased from
//! that namespace's [`pool::BackendPool`], and pins a single connection for
//! the duration of a transaction.

pub mod config;
pub mod metrics;
pub mod namespace;
pub mod parser;
pub mod pool;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod testing;
