//! Core trait definitions

mod transport;

pub use transport::{DetachedCloser, DuplexTransport, TransportCloser};
