#[cfg(feature = "bluetooth")]
pub mod rfcomm;
pub mod tcp;
pub mod traits;
pub mod websocket;

#[cfg(feature = "bluetooth")]
pub use rfcomm::{RfcommLinkListener, DEFAULT_RFCOMM_CHANNEL};
pub use tcp::{TcpConnector, TcpLinkListener};
pub use traits::{LinkListener, MessageConnector, TransportConnector, TransportStream};
pub use websocket::WsConnector;
