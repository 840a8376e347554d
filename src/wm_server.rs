//! Window manager socket server.

use std::error::Error;
use std::fs;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use calloop::LoopHandle;

use crate::socket::SocketSource;
use crate::weir::Weir;

/// Create the wm control socket.
///
/// Connections are handed to [`Weir::wm_connected`]; a new connection
/// replaces the previous wm.
pub fn spawn_wm_socket(
    event_loop: &LoopHandle<'static, Weir>,
    socket_name: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let socket_path = weir_wm::socket_path(socket_name);

    // Try to delete the socket if it exists already.
    if socket_path.exists() {
        fs::remove_file(&socket_path)?;
    }

    // Spawn unix socket event source.
    let listener = UnixListener::bind(&socket_path)?;
    let socket = SocketSource::new(listener)?;

    // Add source to calloop loop.
    event_loop
        .insert_source(socket, |stream, _, weir| weir.wm_connected(stream))
        .map_err(|err| err.error)?;

    Ok(socket_path)
}
