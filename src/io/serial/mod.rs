// src/io/serial/mod.rs
//
// Serial side of the bridge: the analyzer port as a ByteSource and the
// dialect-aware frame reassembler that sits directly on top of it.

pub mod framer;
pub mod port;
pub(crate) mod utils;

pub use framer::FrameReassembler;
pub use port::{available_port_names, SerialByteSource};
pub use utils::{Parity, SerialProfile};
