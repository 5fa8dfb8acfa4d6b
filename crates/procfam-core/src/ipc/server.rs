//! Unix-socket front end.
//!
//! Connections are served on their own threads, but every request is handed
//! to the thread owning the Monitor through one channel, so requests are
//! executed strictly one at a time. A connection waits for the reply to its
//! request before reading the next one.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::frame::{read_frame, write_frame};
use super::protocol::{Request, Response};

/// A decoded request waiting for the Monitor.
#[derive(Debug)]
pub struct Command {
    pub request: Request,
    reply: mpsc::Sender<Response>,
}

impl Command {
    pub fn new(request: Request, reply: mpsc::Sender<Response>) -> Self {
        Self { request, reply }
    }

    /// Sends the reply back to the waiting connection, if it is still there.
    pub fn respond(self, response: Response) {
        if self.reply.send(response).is_err() {
            debug!("client went away before its reply");
        }
    }
}

/// Binds the command socket, replacing a stale socket file.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed stale socket {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    UnixListener::bind(path)
}

/// Accepts connections in the background, forwarding requests to `commands`.
pub fn spawn_listener(
    listener: UnixListener,
    commands: mpsc::Sender<Command>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("procfam-listener".to_string())
        .spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let commands = commands.clone();
                let spawned = thread::Builder::new()
                    .name("procfam-conn".to_string())
                    .spawn(move || serve_connection(stream, commands));
                if let Err(e) = spawned {
                    warn!("cannot serve connection: {}", e);
                }
            }
        })
}

fn serve_connection(mut stream: UnixStream, commands: mpsc::Sender<Command>) {
    loop {
        let request = match read_frame::<_, Request>(&mut stream) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                warn!("dropping connection: {}", e);
                return;
            }
        };
        debug!("received {}", request.name());

        let (reply, response) = mpsc::channel();
        if commands.send(Command::new(request, reply)).is_err() {
            return;
        }
        // no reply means the daemon is going down
        let Ok(response) = response.recv() else {
            return;
        };
        if let Err(e) = write_frame(&mut stream, &response) {
            debug!("failed to send reply: {}", e);
            return;
        }
    }
}
