//! Client side of the control connection: discover the daemon through its
//! control file, connect with a bounded timeout, exchange one framed
//! request/response pair per connection.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

use crate::control;
use crate::protocol::{self, Request, Response};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

/// Connect to the daemon identified by the control file at `socket_path`.
/// A missing or unreadable control file means the session does not exist;
/// a control file whose port refuses connections means the daemon is gone.
pub fn connect(socket_path: &Path) -> io::Result<TcpStream> {
    let info = control::read_control_file(socket_path)
        .map_err(|e| io::Error::new(e.kind(), format!("session not found: {e}")))?;

    let addr = SocketAddr::from(([127, 0, 0, 1], info.port));
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| io::Error::new(e.kind(), format!("session not running: {e}")))
}

/// Send one request and read the response.
pub fn send_request(socket_path: &Path, req: &Request) -> io::Result<Response> {
    let mut stream = connect(socket_path)?;
    stream.set_read_timeout(Some(REQUEST_DEADLINE))?;
    stream.set_write_timeout(Some(REQUEST_DEADLINE))?;

    protocol::write_message(&mut stream, req)
        .map_err(|e| io::Error::new(e.kind(), format!("send request: {e}")))?;
    protocol::read_message(&mut stream)
        .map_err(|e| io::Error::new(e.kind(), format!("read response: {e}")))
}
