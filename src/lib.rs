//! Modbus server implementation in pure Rust.
//!
//! The crate contains the server half of the Modbus TCP protocol: request
//! frames are decoded, routed by function code to a read or a write
//! handler and answered with a response frame, or with an exception frame
//! when the request is malformed or the application rejects it. Process
//! data itself stays with the application, which hands every handler a
//! callback at construction time.
//!
//! # Examples
//!
//! ```
//! use modbus_server::{Header, ReadHandler, Request, Value};
//!
//! let handler = ReadHandler::new(|_uid, _start, quantity| {
//!     Ok(vec![Value(1); quantity as usize])
//! });
//!
//! let request = Request {
//!     header: Header::new(0, 0),
//!     function: 0x01,
//!     payload: vec![0x00, 0x00, 0x00, 0x02],
//! };
//! let mut response = Vec::new();
//! handler.serve(&mut response, &request).unwrap();
//! assert_eq!(response, [0, 0, 0, 0, 0, 4, 0, 0x01, 1, 0x03]);
//! ```

#[macro_use]
extern crate enum_primitive;
#[macro_use]
extern crate log;
extern crate byteorder;
extern crate num;

use std::io;

mod binary;

/// Frame types and the request handlers making up the codec.
pub mod server;

/// The Modbus TCP backend feeds request frames from a socket to the handlers.
pub mod tcp;

pub use server::{dispatch, FunctionCode, Header, ReadHandler, Request, WriteHandler};

pub type Address = u16;
pub type Quantity = u16;

/// A single 16-bit data unit exchanged with the application callbacks.
///
/// Registers use the full width. Coils carry their state in the low bit
/// (`0` = off, `1` = on); write requests hand the raw 16-bit field
/// through unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Value(pub u16);

enum_from_primitive! {
#[derive(Debug, Clone, Copy, PartialEq)]
/// Modbus exception codes returned to the client when a request fails.
pub enum ExceptionCode {
    IllegalFunction         = 0x01,
    IllegalDataAddress      = 0x02,
    IllegalDataValue        = 0x03,
    SlaveOrServerFailure    = 0x04,
    Acknowledge             = 0x05,
    SlaveOrServerBusy       = 0x06,
    NegativeAcknowledge     = 0x07,
    MemoryParity            = 0x08,
    NotDefined              = 0x09,
    GatewayPath             = 0x0a,
    GatewayTarget           = 0x0b
}
}

/// `InvalidData` reasons
#[derive(Debug)]
pub enum Reason {
    UnexpectedRequestSize,
    BytecountNotEven,
    InvalidProtocolId,
}

/// Combination of Modbus, IO and data corruption errors
#[derive(Debug)]
pub enum Error {
    Exception(ExceptionCode),
    Io(io::Error),
    InvalidData(Reason),
    InvalidFunction,
}

impl From<ExceptionCode> for Error {
    fn from(err: ExceptionCode) -> Error {
        Error::Exception(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

/// Result type used to nofify success or failure in communication
pub type Result<T> = std::result::Result<T, Error>;
