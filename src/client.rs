//! Blocking client for the bank.
//!
//! Performs the two-leg handshake (ask the dispatcher for a desk, then
//! open a session with it) and exchanges command lines with the desk.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::framing::{write_flag, Line, LineBuffer, SessionKind};
use crate::protocol::{Response, READY};

/// A live session with one desk.
pub struct BankClient {
    stream: TcpStream,
    lines: LineBuffer,
    desk: SocketAddr,
}

impl BankClient {
    /// Connect through the dispatcher at `addr` and wait for the desk to
    /// report ready.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let desk = request_desk(addr)?;
        debug!(desk = %desk, "Assigned desk");

        let mut stream = TcpStream::connect(desk)?;
        stream.set_nodelay(true)?;
        write_flag(&mut stream, SessionKind::Client)?;

        let mut client = Self {
            stream,
            lines: LineBuffer::new(),
            desk,
        };

        let greeting = client.read_reply()?;
        if greeting != READY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected greeting from desk: {greeting:?}"),
            ));
        }
        Ok(client)
    }

    /// Address of the desk serving this session.
    pub fn desk_addr(&self) -> SocketAddr {
        self.desk
    }

    /// Send one command line and return the reply without its newline.
    pub fn send(&mut self, command: &str) -> io::Result<String> {
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.trim_end_matches('\n').as_bytes());
        line.push(b'\n');
        self.stream.write_all(&line)?;
        self.read_reply()
    }

    /// Send `q` and close the session.
    pub fn quit(mut self) -> io::Result<String> {
        let reply = self.send("q")?;
        if reply != Response::Quit.to_string() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected reply to quit: {reply:?}"),
            ));
        }
        Ok(reply)
    }

    fn read_reply(&mut self) -> io::Result<String> {
        match self.lines.read_line(&mut self.stream)? {
            Some(Line::Complete(line)) => Ok(String::from_utf8_lossy(&line).into_owned()),
            Some(Line::Overlong) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "reply line too long",
            )),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "desk closed the connection",
            )),
        }
    }
}

/// Ask the dispatcher at `addr` which desk to use.
fn request_desk(addr: impl ToSocketAddrs) -> io::Result<SocketAddr> {
    let mut stream = TcpStream::connect(addr)?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;

    let reply = reply.trim_end();
    if reply.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "dispatcher closed without assigning a desk",
        ));
    }
    reply
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad desk address {reply:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_request_desk_parses_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"127.0.0.1:4100\n").unwrap();
        });

        assert_eq!(
            request_desk(addr).unwrap(),
            "127.0.0.1:4100".parse::<SocketAddr>().unwrap()
        );
        server.join().unwrap();
    }

    #[test]
    fn test_request_desk_empty_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let _ = listener.accept().unwrap();
        });

        let err = request_desk(addr).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        server.join().unwrap();
    }
}
