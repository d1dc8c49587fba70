extern crate byteorder;
#[macro_use]
extern crate lazy_static;
extern crate modbus_server;
extern crate num;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use byteorder::WriteBytesExt;
use num::FromPrimitive;

use modbus_server::tcp::{Config, Server};
use modbus_server::{ExceptionCode, Header, ReadHandler, Value, WriteHandler};

// global unique portnumber between all test threads
lazy_static! {
    static ref PORT: AtomicUsize = AtomicUsize::new(22222);
}

/// Serve an in-memory bank of 1024 registers on a fresh port. Coils
/// share the address space through the low bit of each register.
fn start_bank_server() -> u16 {
    let port = PORT.fetch_add(1, Ordering::SeqCst) as u16;
    let bank = Arc::new(Mutex::new(vec![0u16; 1024]));
    let read_bank = bank.clone();
    let write_bank = bank;

    thread::spawn(move || {
        let read = ReadHandler::new(move |_uid, start, quantity| {
            let bank = read_bank.lock().unwrap();
            let start = start as usize;
            let end = start + quantity as usize;
            if end > bank.len() {
                return Err(ExceptionCode::IllegalDataAddress.into());
            }
            Ok(bank[start..end].iter().map(|v| Value(*v)).collect())
        });
        let write = WriteHandler::new(move |_uid, start, values: &[Value]| {
            let mut bank = write_bank.lock().unwrap();
            let start = start as usize;
            if start + values.len() > bank.len() {
                return Err(ExceptionCode::IllegalDataAddress.into());
            }
            for (i, v) in values.iter().enumerate() {
                bank[start + i] = v.0;
            }
            Ok(())
        });
        let mut cfg = Config::default();
        cfg.tcp_port = port;
        Server::new_with_cfg(read, write, cfg).listen("127.0.0.1").unwrap();
    });
    port
}

fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", port)) {
            return s;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("server did not come up on port {}", port);
}

/// Send one request frame and read back `resp_len` response bytes.
///
/// The response length is passed in by the caller since the
/// write-multiple acknowledgement declares one byte more than it
/// carries, so the length field cannot drive the read.
fn roundtrip(stream: &mut TcpStream,
             tid: u16,
             function: u8,
             payload: &[u8],
             resp_len: usize)
             -> Vec<u8> {
    let header = Header {
        tid: tid,
        pid: 0,
        len: payload.len() as u16 + 2,
        uid: 1,
    };
    let mut frame = header.encode().unwrap();
    frame.write_u8(function).unwrap();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).unwrap();

    let mut resp = vec![0; resp_len];
    stream.read_exact(&mut resp).unwrap();
    resp
}

#[test]
fn test_read_coils_over_tcp() {
    let port = start_bank_server();
    let mut stream = connect(port);

    let resp = roundtrip(&mut stream, 1, 0x01, &[0x0, 0x0, 0x0, 0x3], 10);
    assert_eq!(resp, [0x0, 0x1, 0x0, 0x0, 0x0, 0x4, 0x1, 0x1, 0x1, 0x0]);

    // switch coil 1 on, the packed byte now carries bit 1
    let resp = roundtrip(&mut stream, 2, 0x05, &[0x0, 0x1, 0x0, 0x1], 12);
    assert_eq!(resp, [0x0, 0x2, 0x0, 0x0, 0x0, 0x6, 0x1, 0x5, 0x0, 0x1, 0x0, 0x1]);
    let resp = roundtrip(&mut stream, 3, 0x01, &[0x0, 0x0, 0x0, 0x3], 10);
    assert_eq!(resp, [0x0, 0x3, 0x0, 0x0, 0x0, 0x4, 0x1, 0x1, 0x1, 0x2]);
}

#[test]
fn test_read_write_registers_over_tcp() {
    let port = start_bank_server();
    let mut stream = connect(port);

    let resp = roundtrip(&mut stream, 1, 0x06, &[0x0, 0x2, 0xc, 0x78], 12);
    assert_eq!(resp, [0x0, 0x1, 0x0, 0x0, 0x0, 0x6, 0x1, 0x6, 0x0, 0x2, 0xc, 0x78]);

    let resp = roundtrip(&mut stream, 2, 0x03, &[0x0, 0x2, 0x0, 0x2], 13);
    assert_eq!(resp,
               [0x0, 0x2, 0x0, 0x0, 0x0, 0x7, 0x1, 0x3, 0x4, 0xc, 0x78, 0x0, 0x0]);
}

#[test]
fn test_write_multiple_registers_over_tcp() {
    let port = start_bank_server();
    let mut stream = connect(port);

    // the acknowledgement declares len 7 for its 6 trailing bytes
    let resp = roundtrip(&mut stream,
                         1,
                         0x0f,
                         &[0x0, 0x4, 0x0, 0x2, 0x4, 0x3c, 0x13, 0x01, 0x00],
                         12);
    assert_eq!(resp, [0x0, 0x1, 0x0, 0x0, 0x0, 0x7, 0x1, 0xf, 0x0, 0x4, 0x0, 0x2]);

    let resp = roundtrip(&mut stream, 2, 0x03, &[0x0, 0x4, 0x0, 0x2], 13);
    assert_eq!(resp,
               [0x0, 0x2, 0x0, 0x0, 0x0, 0x7, 0x1, 0x3, 0x4, 0x3c, 0x13, 0x1, 0x0]);
}

#[test]
fn test_callback_error_becomes_exception_frame() {
    let port = start_bank_server();
    let mut stream = connect(port);

    // reading past the bank end is refused by the read callback
    let resp = roundtrip(&mut stream, 1, 0x03, &[0xff, 0x0, 0x0, 0x10], 9);
    assert_eq!(resp, [0x0, 0x1, 0x0, 0x0, 0x0, 0x3, 0x1, 0x83, 0x2]);
    assert_eq!(ExceptionCode::from_u8(resp[8]),
               Some(ExceptionCode::IllegalDataAddress));
}

#[test]
fn test_unknown_function_code_over_tcp() {
    let port = start_bank_server();
    let mut stream = connect(port);

    let resp = roundtrip(&mut stream, 1, 0x2b, &[0x0, 0x0], 9);
    assert_eq!(resp, [0x0, 0x1, 0x0, 0x0, 0x0, 0x3, 0x1, 0xab, 0x1]);

    // the connection survives the rejected request
    let resp = roundtrip(&mut stream, 2, 0x01, &[0x0, 0x0, 0x0, 0x1], 10);
    assert_eq!(resp, [0x0, 0x2, 0x0, 0x0, 0x0, 0x4, 0x1, 0x1, 0x1, 0x0]);
}

#[test]
fn test_write_multiple_validation_over_tcp() {
    let port = start_bank_server();
    let mut stream = connect(port);

    // data one byte short of the declared count
    let resp = roundtrip(&mut stream,
                         1,
                         0x0f,
                         &[0x0, 0x4, 0x0, 0x2, 0x4, 0x3c, 0x13, 0x01],
                         9);
    assert_eq!(resp, [0x0, 0x1, 0x0, 0x0, 0x0, 0x3, 0x1, 0x8f, 0x3]);

    // nothing was written
    let resp = roundtrip(&mut stream, 2, 0x03, &[0x0, 0x4, 0x0, 0x2], 13);
    assert_eq!(resp,
               [0x0, 0x2, 0x0, 0x0, 0x0, 0x7, 0x1, 0x3, 0x4, 0x0, 0x0, 0x0, 0x0]);
}
