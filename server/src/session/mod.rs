//! Device sessions across both transports
//!
//! This module handles:
//! - The registry binding each device id to its one live connection
//! - Stream connections: handshake, framed read loop, teardown
//! - WebSocket connections for message-oriented devices

mod connection;
mod registry;
mod websocket;

pub use connection::{handle_stream_connection, identify_frame, serve_stream};
pub use registry::{DeviceHandle, TransportKind, TransportRegistry};
pub use websocket::{handle_socket, handle_text, serve_messages};
