use std::io::{Cursor, Write};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num::FromPrimitive;
use binary;
use {Address, Error, ExceptionCode, Quantity, Result, Value};

pub const MODBUS_PROTOCOL_TCP: u16 = 0x0000;
pub const MODBUS_HEADER_SIZE: usize = 7;

enum_from_primitive! {
#[derive(Debug, Clone, Copy, PartialEq)]
/// Function codes this server answers.
///
/// Write multiple registers is carried on `0x0f` in this dialect.
pub enum FunctionCode {
    ReadCoils              = 0x01,
    ReadHoldingRegisters   = 0x03,
    WriteSingleCoil        = 0x05,
    WriteSingleRegister    = 0x06,
    WriteMultipleRegisters = 0x0f
}
}

/// Envelope prepended to every request and response frame.
///
/// `len` counts the unit id, the function code and the payload of the
/// message it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub tid: u16,
    pub pid: u16,
    pub len: u16,
    pub uid: u8,
}

impl Header {
    pub fn new(tid: u16, uid: u8) -> Header {
        Header {
            tid: tid,
            pid: MODBUS_PROTOCOL_TCP,
            len: 0,
            uid: uid,
        }
    }

    // Header for a response to the request this header arrived with.
    fn response(&self, len: u16) -> Header {
        Header {
            tid: self.tid,
            pid: MODBUS_PROTOCOL_TCP,
            len: len,
            uid: self.uid,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buff = Vec::with_capacity(MODBUS_HEADER_SIZE);
        buff.write_u16::<BigEndian>(self.tid)?;
        buff.write_u16::<BigEndian>(self.pid)?;
        buff.write_u16::<BigEndian>(self.len)?;
        buff.write_u8(self.uid)?;
        Ok(buff)
    }

    pub fn decode(raw: &[u8]) -> Result<Header> {
        let mut rdr = Cursor::new(raw);
        Ok(Header {
            tid: rdr.read_u16::<BigEndian>()?,
            pid: rdr.read_u16::<BigEndian>()?,
            len: rdr.read_u16::<BigEndian>()?,
            uid: rdr.read_u8()?,
        })
    }
}

/// One decoded request: envelope, function code and raw payload.
///
/// The codec only reads it; decoding the payload is the job of the
/// handler serving the function code.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub header: Header,
    pub function: u8,
    pub payload: Vec<u8>,
}

/// Default mapping from callback errors to the exception code put on
/// the wire. `Error::Exception` passes its code through, everything
/// else degrades to `IllegalFunction`.
pub fn default_exception(err: &Error) -> ExceptionCode {
    match *err {
        Error::Exception(code) => code,
        _ => ExceptionCode::IllegalFunction,
    }
}

/// Write the exception frame answering `req` with `code`.
pub fn exception_response<W: Write>(w: &mut W, req: &Request, code: ExceptionCode) -> Result<()> {
    let mut buff = req.header.response(3).encode()?;
    buff.write_u8(req.function | 0x80)?;
    buff.write_u8(code as u8)?;
    w.write_all(&buff).map_err(Error::Io)
}

/// Serves the bit and word read functions.
///
/// The callback receives `(unit id, start address, quantity)` and must
/// return exactly `quantity` values on success. A callback error is
/// turned into an exception frame through the handler's mapping table;
/// `serve` itself only fails when the output sink does.
pub struct ReadHandler<C>
    where C: Fn(u8, Address, Quantity) -> Result<Vec<Value>>
{
    callback: C,
    map: fn(&Error) -> ExceptionCode,
}

impl<C> ReadHandler<C>
    where C: Fn(u8, Address, Quantity) -> Result<Vec<Value>>
{
    pub fn new(callback: C) -> ReadHandler<C> {
        Self::with_mapper(callback, default_exception)
    }

    /// Like `new`, with a custom callback-error to exception-code mapping.
    pub fn with_mapper(callback: C, map: fn(&Error) -> ExceptionCode) -> ReadHandler<C> {
        ReadHandler {
            callback: callback,
            map: map,
        }
    }

    /// Decode the read request in `req`, query the callback and write
    /// the response frame to `w`.
    pub fn serve<W: Write>(&self, w: &mut W, req: &Request) -> Result<()> {
        match FunctionCode::from_u8(req.function) {
            Some(FunctionCode::ReadCoils) |
            Some(FunctionCode::ReadHoldingRegisters) => {}
            _ => return exception_response(w, req, ExceptionCode::IllegalFunction),
        }
        if req.payload.len() < 4 {
            return exception_response(w, req, ExceptionCode::IllegalDataValue);
        }
        let mut rdr = Cursor::new(&req.payload[..]);
        let start = rdr.read_u16::<BigEndian>()?;
        let quantity = rdr.read_u16::<BigEndian>()?;

        let values = match (self.callback)(req.header.uid, start, quantity) {
            Ok(values) => values,
            Err(e) => return exception_response(w, req, (self.map)(&e)),
        };

        let data = if req.function == FunctionCode::ReadCoils as u8 {
            binary::pack_bits(&values)
        } else {
            binary::unpack_bytes(&values)
        };

        let mut buff = req.header.response(3 + data.len() as u16).encode()?;
        buff.write_u8(req.function)?;
        buff.write_u8(data.len() as u8)?;
        buff.extend_from_slice(&data);
        w.write_all(&buff).map_err(Error::Io)
    }
}

/// Serves the single and multiple write functions.
///
/// The callback receives `(unit id, start address, values)`; its errors
/// are mapped like the read handler's. Requests failing validation are
/// answered with an exception frame and never reach the callback.
pub struct WriteHandler<C>
    where C: Fn(u8, Address, &[Value]) -> Result<()>
{
    callback: C,
    map: fn(&Error) -> ExceptionCode,
}

impl<C> WriteHandler<C>
    where C: Fn(u8, Address, &[Value]) -> Result<()>
{
    pub fn new(callback: C) -> WriteHandler<C> {
        Self::with_mapper(callback, default_exception)
    }

    /// Like `new`, with a custom callback-error to exception-code mapping.
    pub fn with_mapper(callback: C, map: fn(&Error) -> ExceptionCode) -> WriteHandler<C> {
        WriteHandler {
            callback: callback,
            map: map,
        }
    }

    /// Decode the write request in `req`, apply it through the callback
    /// and write the echo, acknowledgement or exception frame to `w`.
    pub fn serve<W: Write>(&self, w: &mut W, req: &Request) -> Result<()> {
        match FunctionCode::from_u8(req.function) {
            Some(FunctionCode::WriteSingleCoil) |
            Some(FunctionCode::WriteSingleRegister) => self.serve_single(w, req),
            Some(FunctionCode::WriteMultipleRegisters) => self.serve_multiple(w, req),
            _ => exception_response(w, req, ExceptionCode::IllegalFunction),
        }
    }

    // Single coil and single register requests share their shape: a
    // 2-byte address and the raw 16-bit value, echoed verbatim on
    // success. Coil values are not forced onto an on/off sentinel.
    fn serve_single<W: Write>(&self, w: &mut W, req: &Request) -> Result<()> {
        if req.payload.len() != 4 {
            return exception_response(w, req, ExceptionCode::IllegalDataValue);
        }
        let mut rdr = Cursor::new(&req.payload[..]);
        let start = rdr.read_u16::<BigEndian>()?;
        let value = rdr.read_u16::<BigEndian>()?;

        match (self.callback)(req.header.uid, start, &[Value(value)]) {
            Ok(()) => {
                let mut buff = req.header.response(6).encode()?;
                buff.write_u8(req.function)?;
                buff.extend_from_slice(&req.payload);
                w.write_all(&buff).map_err(Error::Io)
            }
            Err(e) => exception_response(w, req, (self.map)(&e)),
        }
    }

    fn serve_multiple<W: Write>(&self, w: &mut W, req: &Request) -> Result<()> {
        if req.payload.len() < 5 {
            return exception_response(w, req, ExceptionCode::IllegalDataValue);
        }
        let mut rdr = Cursor::new(&req.payload[..]);
        let start = rdr.read_u16::<BigEndian>()?;
        let quantity = rdr.read_u16::<BigEndian>()?;
        let byte_count = rdr.read_u8()?;
        let data = &req.payload[5..];
        if byte_count as usize != 2 * quantity as usize || data.len() != byte_count as usize {
            return exception_response(w, req, ExceptionCode::IllegalDataValue);
        }
        let values = binary::pack_bytes(data)?;

        match (self.callback)(req.header.uid, start, &values) {
            Ok(()) => {
                // the acknowledgement declares len 7 though 6 bytes
                // follow the length field; peers expect the frame
                // byte-exact
                let mut buff = req.header.response(7).encode()?;
                buff.write_u8(req.function)?;
                buff.write_u16::<BigEndian>(start)?;
                buff.write_u16::<BigEndian>(quantity)?;
                w.write_all(&buff).map_err(Error::Io)
            }
            Err(e) => exception_response(w, req, (self.map)(&e)),
        }
    }
}

/// Route one request to the handler serving its function code.
///
/// Unknown codes are answered with an `IllegalFunction` exception frame
/// and never reach a handler.
pub fn dispatch<W, R, C>(w: &mut W,
                         req: &Request,
                         read: &ReadHandler<R>,
                         write: &WriteHandler<C>)
                         -> Result<()>
    where W: Write,
          R: Fn(u8, Address, Quantity) -> Result<Vec<Value>>,
          C: Fn(u8, Address, &[Value]) -> Result<()>
{
    match FunctionCode::from_u8(req.function) {
        Some(FunctionCode::ReadCoils) |
        Some(FunctionCode::ReadHoldingRegisters) => read.serve(w, req),
        Some(FunctionCode::WriteSingleCoil) |
        Some(FunctionCode::WriteSingleRegister) |
        Some(FunctionCode::WriteMultipleRegisters) => write.serve(w, req),
        None => exception_response(w, req, ExceptionCode::IllegalFunction),
    }
}

#[cfg(test)]
fn request(function: u8, payload: &[u8]) -> Request {
    Request {
        header: Header::new(0, 0),
        function: function,
        payload: payload.to_vec(),
    }
}

#[test]
fn test_read_handler() {
    let h = ReadHandler::new(|uid, start, quantity| {
        assert_eq!(uid, 0);
        assert_eq!(start, 5);
        assert_eq!(quantity, 3);
        Ok(vec![Value(0), Value(1), Value(1)])
    });

    let tests: Vec<(u8, Vec<u8>)> =
        vec![(0x01, vec![0x0, 0x0, 0x0, 0x0, 0x0, 0x4, 0x0, 0x1, 0x1, 0x6]),
             (0x03,
              vec![0x0, 0x0, 0x0, 0x0, 0x0, 0x9, 0x0, 0x3, 0x6, 0x0, 0x0, 0x0, 0x1, 0x0, 0x1])];

    for (function, expected) in tests {
        let mut buff = Vec::new();
        h.serve(&mut buff, &request(function, &[0x0, 0x5, 0x0, 0x3])).unwrap();
        assert_eq!(buff, expected);
    }
}

#[test]
fn test_read_handler_callback_error() {
    let h = ReadHandler::new(|_, _, _| Err(ExceptionCode::SlaveOrServerBusy.into()));
    let mut buff = Vec::new();
    h.serve(&mut buff, &request(0x01, &[0x0, 0x5, 0x0, 0x3])).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x81, 0x6]);
}

#[test]
fn test_read_handler_short_payload() {
    let h = ReadHandler::new(|_, _, _| -> Result<Vec<Value>> { panic!("callback invoked") });
    let mut buff = Vec::new();
    h.serve(&mut buff, &request(0x03, &[0x0, 0x5, 0x0])).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x83, 0x3]);
}

#[test]
fn test_write_handler_single() {
    let tests: Vec<(u8, Vec<u8>, u16, Result<()>, Vec<u8>)> =
        vec![(0x05,
              vec![0x0, 0x1, 0x0, 0x0],
              0,
              Ok(()),
              vec![0x0, 0x0, 0x0, 0x0, 0x0, 0x6, 0x0, 0x5, 0x0, 0x1, 0x0, 0x0]),
             (0x05,
              vec![0x0, 0x1, 0x0, 0x1],
              1,
              Err(ExceptionCode::IllegalFunction.into()),
              vec![0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x85, 0x1]),
             (0x06,
              vec![0x0, 0x1, 0xc, 0x78],
              3192,
              Ok(()),
              vec![0x0, 0x0, 0x0, 0x0, 0x0, 0x6, 0x0, 0x6, 0x0, 0x1, 0xc, 0x78]),
             (0x06,
              vec![0x0, 0x1, 0xc, 0x78],
              3192,
              Err(ExceptionCode::SlaveOrServerBusy.into()),
              vec![0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x86, 0x6])];

    for (function, payload, value, response, expected) in tests {
        let h = WriteHandler::new(move |uid, start, values: &[Value]| {
            assert_eq!(uid, 0);
            assert_eq!(start, 1);
            assert_eq!(values, &[Value(value)][..]);
            match response {
                Ok(()) => Ok(()),
                Err(ref e) => {
                    match *e {
                        Error::Exception(code) => Err(code.into()),
                        _ => panic!("unexpected error shape"),
                    }
                }
            }
        });
        let mut buff = Vec::new();
        h.serve(&mut buff, &request(function, &payload)).unwrap();
        assert_eq!(buff, expected);
    }
}

#[test]
fn test_write_handler_multiple() {
    let h = WriteHandler::new(|uid, start, values: &[Value]| {
        assert_eq!(uid, 0);
        assert_eq!(start, 1);
        assert_eq!(values, &[Value(0x3c13), Value(0x0100)][..]);
        Ok(())
    });
    let mut buff = Vec::new();
    h.serve(&mut buff,
              &request(0x0f, &[0x0, 0x1, 0x0, 0x2, 0x4, 0x3c, 0x13, 0x01, 0x00]))
     .unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x7, 0x0, 0xf, 0x0, 0x1, 0x0, 0x2]);
}

#[test]
fn test_write_handler_multiple_length_mismatch() {
    use std::cell::Cell;

    let called = Cell::new(false);
    let h = WriteHandler::new(|_, _, _: &[Value]| {
        called.set(true);
        Ok(())
    });
    let mut buff = Vec::new();
    // one data byte short of the declared count
    h.serve(&mut buff, &request(0x0f, &[0x0, 0x1, 0x0, 0x2, 0x4, 0x3c, 0x13, 0x01])).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x8f, 0x3]);
    assert!(!called.get());

    // declared count disagrees with the quantity
    buff.clear();
    h.serve(&mut buff, &request(0x0f, &[0x0, 0x1, 0x0, 0x2, 0x6, 0x3c, 0x13, 0x01, 0x0, 0x0, 0x0]))
     .unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x8f, 0x3]);
    assert!(!called.get());
}

#[test]
fn test_write_handler_single_bad_payload() {
    let called = ::std::cell::Cell::new(false);
    let h = WriteHandler::new(|_, _, _: &[Value]| {
        called.set(true);
        Ok(())
    });
    let mut buff = Vec::new();
    h.serve(&mut buff, &request(0x05, &[0x0, 0x1, 0x0])).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x85, 0x3]);
    assert!(!called.get());
}

#[test]
fn test_dispatch_unknown_function() {
    let read = ReadHandler::new(|_, _, _| Ok(vec![]));
    let write = WriteHandler::new(|_, _, _: &[Value]| Ok(()));
    let mut buff = Vec::new();
    dispatch(&mut buff, &request(0x2b, &[]), &read, &write).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0xab, 0x1]);
}

#[test]
fn test_dispatch_routes_by_function_code() {
    let read = ReadHandler::new(|_, _, quantity| Ok(vec![Value(7); quantity as usize]));
    let write = WriteHandler::new(|_, _, _: &[Value]| Ok(()));

    let mut buff = Vec::new();
    dispatch(&mut buff, &request(0x03, &[0x0, 0x0, 0x0, 0x1]), &read, &write).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x5, 0x0, 0x3, 0x2, 0x0, 0x7]);

    buff.clear();
    dispatch(&mut buff, &request(0x06, &[0x0, 0x2, 0x0, 0x7]), &read, &write).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x6, 0x0, 0x6, 0x0, 0x2, 0x0, 0x7]);
}

#[test]
fn test_custom_error_mapping() {
    fn always_busy(_: &Error) -> ExceptionCode {
        ExceptionCode::SlaveOrServerBusy
    }

    let h = WriteHandler::with_mapper(|_, _, _: &[Value]| Err(Error::InvalidFunction),
                                      always_busy);
    let mut buff = Vec::new();
    h.serve(&mut buff, &request(0x05, &[0x0, 0x1, 0x0, 0x1])).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x85, 0x6]);
}

#[test]
fn test_default_mapping_for_unclassified_errors() {
    let h = ReadHandler::new(|_, _, _| -> Result<Vec<Value>> { Err(Error::InvalidFunction) });
    let mut buff = Vec::new();
    h.serve(&mut buff, &request(0x01, &[0x0, 0x0, 0x0, 0x1])).unwrap();
    assert_eq!(buff, [0x0, 0x0, 0x0, 0x0, 0x0, 0x3, 0x0, 0x81, 0x1]);
}

#[test]
fn test_serve_is_idempotent() {
    let h = ReadHandler::new(|_, _, _| Ok(vec![Value(1), Value(0), Value(1)]));
    let req = request(0x01, &[0x0, 0x5, 0x0, 0x3]);
    let mut first = Vec::new();
    let mut second = Vec::new();
    h.serve(&mut first, &req).unwrap();
    h.serve(&mut second, &req).unwrap();
    assert_eq!(first, second);

    let echo = Header::decode(&first[..MODBUS_HEADER_SIZE]).unwrap();
    assert_eq!(echo, Header::new(0, 0).response(4));
}
