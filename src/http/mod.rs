//! HTTP framing subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → buffer.rs (bounded byte queue per half-connection)
//!     → parser.rs (incremental head parse, body boundary tracking)
//!     → message.rs (parsed message handed to policy and relay)
//!     → response.rs (synthesized replies on the client half)
//! ```
//!
//! # Design Decisions
//! - The parser never blocks: insufficient bytes yield "need more data",
//!   never a stalled worker
//! - Only framing-relevant header semantics are interpreted; everything else
//!   is relayed untouched

pub mod buffer;
pub mod message;
pub mod parser;
pub mod response;

pub use buffer::{Backpressure, Buffer};
pub use message::{Authority, FramingMode, HeaderList, ParsedMessage, StartLine, Version};
pub use parser::{BodyFramer, MessageKind, MessageParser, ParserLimits, ProtocolError};
pub use response::SynthesizedResponse;
