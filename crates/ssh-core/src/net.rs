//! Socket options applied to tunnel-side TCP connections.

use std::{io, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::debug;

/// Make the next close send RST instead of FIN.
pub fn set_linger_zero(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_linger(Some(Duration::ZERO))
}

pub fn set_keepalive(stream: &TcpStream, idle: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(idle);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Drop a connection so the peer observes a reset rather than a clean close.
pub fn abort(stream: TcpStream) {
    if let Err(err) = set_linger_zero(&stream) {
        debug!(?err, "failed to set linger on aborted connection");
    }
    drop(stream);
}
