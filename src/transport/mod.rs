//! Byte-stream transports the command channel can run over

pub mod tcp;
pub mod traits;

pub use tcp::{TcpConnector, TcpTransportStream};
pub use traits::{TransportConnector, TransportStream};
