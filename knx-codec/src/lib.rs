//! Frame codec for KNXnet/IP protocol structures
//!
//! This crate provides pure encode/decode functions between byte sequences
//! and the structured protocol types: header, host address descriptor
//! (HPAI), connection request/response data, cEMI application frames and
//! the `Body` tagged union over all supported services. No I/O, no state.
//!
//! Decoding validates, in order: minimum length, declared structure-length
//! fields against actual slice lengths, and code-range membership. Any
//! violation fails with an error naming the offending field; a partially
//! populated value is never returned. Encoding is the exact inverse and
//! `decode(encode(x)) == x` holds for every valid `x`.

pub mod body;
pub mod cemi;
pub mod connection;
pub mod header;
pub mod hpai;
pub mod service_type;
pub mod status;

pub use body::Body;
pub use cemi::{Cemi, MessageCode};
pub use connection::{
    ConnectionRequestInformation, ConnectionResponseData, ConnectionType, LayerType,
};
pub use header::{Header, HEADER_LENGTH, PROTOCOL_VERSION};
pub use hpai::{HostProtocol, Hpai, HPAI_LENGTH};
pub use service_type::ServiceType;
pub use status::Status;
