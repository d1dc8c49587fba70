use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use server::{dispatch, Header, ReadHandler, Request, WriteHandler, MODBUS_HEADER_SIZE,
             MODBUS_PROTOCOL_TCP};
use {Address, Error, Quantity, Reason, Result, Value};

const MODBUS_TCP_DEFAULT_PORT: u16 = 502;
const MODBUS_MAX_PACKET_SIZE: usize = 260;

/// Config structure for more control over the tcp socket settings
#[derive(Clone, Copy)]
pub struct Config {
    /// The TCP port to listen on (Default: `502`)
    pub tcp_port: u16,
    /// Timeout when reading from a client socket (Default: `infinite`)
    pub tcp_read_timeout: Option<Duration>,
    /// Timeout when writing to a client socket (Default: `infinite`)
    pub tcp_write_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            tcp_port: MODBUS_TCP_DEFAULT_PORT,
            tcp_read_timeout: None,
            tcp_write_timeout: None,
        }
    }
}

/// Blocking Modbus TCP server.
///
/// Owns the two handlers and pumps request frames from client
/// connections through them, one connection at a time. The handlers
/// themselves are reentrant; callers wanting parallel connections can
/// run one `Server` per listener socket.
pub struct Server<R, C>
    where R: Fn(u8, Address, Quantity) -> Result<Vec<Value>>,
          C: Fn(u8, Address, &[Value]) -> Result<()>
{
    read: ReadHandler<R>,
    write: WriteHandler<C>,
    cfg: Config,
}

impl<R, C> Server<R, C>
    where R: Fn(u8, Address, Quantity) -> Result<Vec<Value>>,
          C: Fn(u8, Address, &[Value]) -> Result<()>
{
    /// Create a new server answering on the modbus-tcp default port (502).
    pub fn new(read: ReadHandler<R>, write: WriteHandler<C>) -> Server<R, C> {
        Self::new_with_cfg(read, write, Config::default())
    }

    pub fn new_with_cfg(read: ReadHandler<R>, write: WriteHandler<C>, cfg: Config) -> Server<R, C> {
        Server {
            read: read,
            write: write,
            cfg: cfg,
        }
    }

    /// Bind `addr` and serve connections until accepting fails.
    ///
    /// Connections are served sequentially. A connection dropping its
    /// socket or sending a broken frame only ends that connection; the
    /// listener keeps running.
    pub fn listen(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind((addr, self.cfg.tcp_port))?;
        debug!("listening on {}:{}", addr, self.cfg.tcp_port);
        for stream in listener.incoming() {
            let mut stream = stream?;
            stream.set_read_timeout(self.cfg.tcp_read_timeout)?;
            stream.set_write_timeout(self.cfg.tcp_write_timeout)?;
            stream.set_nodelay(true)?;
            if let Ok(peer) = stream.peer_addr() {
                debug!("connection from {}", peer);
            }
            if let Err(e) = self.serve_connection(&mut stream) {
                warn!("connection closed: {:?}", e);
            }
        }
        Ok(())
    }

    fn serve_connection(&self, stream: &mut TcpStream) -> Result<()> {
        loop {
            let mut head = [0u8; MODBUS_HEADER_SIZE];
            match stream.read_exact(&mut head) {
                Ok(()) => {}
                // clean shutdown between frames
                Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(Error::Io(e)),
            }
            let header = Header::decode(&head)?;
            if header.pid != MODBUS_PROTOCOL_TCP {
                warn!("dropping frame with protocol id {}", header.pid);
                return Err(Error::InvalidData(Reason::InvalidProtocolId));
            }
            let len = header.len as usize;
            if len < 2 || len + 6 > MODBUS_MAX_PACKET_SIZE {
                warn!("dropping frame with length {}", len);
                return Err(Error::InvalidData(Reason::UnexpectedRequestSize));
            }

            // the unit id was part of the header read; function code and
            // payload are still on the stream
            let mut body = vec![0; len - 1];
            stream.read_exact(&mut body).map_err(Error::Io)?;
            let req = Request {
                header: header,
                function: body[0],
                payload: body[1..].to_vec(),
            };
            debug!("request tid {} uid {} function {:#04x}",
                   req.header.tid,
                   req.header.uid,
                   req.function);
            dispatch(stream, &req, &self.read, &self.write)?;
        }
    }
}

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.tcp_port, MODBUS_TCP_DEFAULT_PORT);
    assert!(cfg.tcp_read_timeout.is_none());
    assert!(cfg.tcp_write_timeout.is_none());
}
