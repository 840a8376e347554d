//! Daemon child process spawning.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

/// Spawn a command line as a disowned child.
///
/// Used to launch the window manager client; the child inherits the
/// environment, including `WAYLAND_DISPLAY`.
pub fn spawn(command: &[String]) -> io::Result<()> {
    let (program, args) = match command.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };

    let mut child = Command::new(program);
    child.args(args);
    child.stdin(Stdio::null());
    child.stdout(Stdio::null());
    child.stderr(Stdio::null());

    // Double fork between our fork and the exec: the intermediate parent
    // exits right away, so the wm client is reparented to init and never
    // turns into a zombie we would have to wait on.
    unsafe {
        child.pre_exec(|| {
            match libc::fork() {
                -1 => Err(io::Error::last_os_error()),
                // Grandchild: detach from our session before the exec.
                0 => match libc::setsid() {
                    -1 => Err(io::Error::last_os_error()),
                    _ => Ok(()),
                },
                _ => libc::_exit(0),
            }
        });
    }

    child.spawn()?.wait()?;

    Ok(())
}
