#[macro_use]
extern crate clap;
extern crate env_logger;
extern crate modbus_server;

use std::sync::Mutex;
use clap::App;
use modbus_server::tcp::{Config, Server};
use modbus_server::{ExceptionCode, ReadHandler, Value, WriteHandler};

/// Modbus TCP server backed by an in-memory bank of 65536 registers.
/// Coils share the address space through the low bit of each register.
fn main() {
    env_logger::init();

    let matches = App::new("server")
                      .author("Falco Hirschenberger <falco.hirschenberger@gmail.com>")
                      .version(&crate_version!()[..])
                      .about("Modbus Tcp server")
                      .args_from_usage("--bind=[ADDR] 'The address to bind (Default: 0.0.0.0)'
                                        \
                                        --port=[PORT] 'The TCP port to listen on (Default: 502)'")
                      .get_matches();

    let bind = matches.value_of("bind").unwrap_or("0.0.0.0");
    let mut cfg = Config::default();
    if let Some(port) = matches.value_of("port") {
        cfg.tcp_port = port.parse().expect(matches.usage());
    }

    let bank = Mutex::new(vec![0u16; 65536]);

    let read = ReadHandler::new(|_uid, start, quantity| {
        let bank = bank.lock().unwrap();
        let start = start as usize;
        let end = start + quantity as usize;
        if end > bank.len() {
            return Err(ExceptionCode::IllegalDataAddress.into());
        }
        Ok(bank[start..end].iter().map(|v| Value(*v)).collect())
    });
    let write = WriteHandler::new(|_uid, start, values: &[Value]| {
        let mut bank = bank.lock().unwrap();
        let start = start as usize;
        if start + values.len() > bank.len() {
            return Err(ExceptionCode::IllegalDataAddress.into());
        }
        for (i, v) in values.iter().enumerate() {
            bank[start + i] = v.0;
        }
        Ok(())
    });

    println!("listening on {}:{}", bind, cfg.tcp_port);
    Server::new_with_cfg(read, write, cfg).listen(bind).expect("IO Error");
}
