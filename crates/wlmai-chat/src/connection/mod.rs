//! Connection management: the transport seam and the session-scoped
//! connection lifecycle built on top of it.

pub mod manager;
pub mod transport;

pub use manager::{ConnectionManager, ConnectionTarget, Readiness};
pub use transport::{Connector, Link, LinkPeer, TransportEvent, WsConnector};
