mod handler;
mod handshake;

pub use handler::ws_handler;
pub use handshake::{HandshakeError, HandshakeQuery, HandshakeRequest};
