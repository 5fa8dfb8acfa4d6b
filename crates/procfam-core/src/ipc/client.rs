use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::family::{FamilyDump, FamilyUsage};
use crate::marker::MarkerSet;
use crate::process::Pid;

use super::frame::{read_frame, write_frame};
use super::protocol::{ErrorCode, ReplyBody, Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("daemon closed the connection")]
    Closed,
    #[error("{code:?}: {message}")]
    Refused { code: ErrorCode, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unexpected reply to {request}: {body:?}")]
    UnexpectedReply {
        request: &'static str,
        body: ReplyBody,
    },
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Protocol(ProtocolError::Io(e))
    }
}

/// Typed client for the command socket. One request in flight at a time.
pub struct ProcdClient {
    stream: UnixStream,
}

impl ProcdClient {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        Ok(Self {
            stream: UnixStream::connect(path)?,
        })
    }

    /// Bounds how long a reply may take; `None` waits forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Sends a raw request and returns the body of a successful reply.
    pub fn call(&mut self, request: &Request) -> Result<ReplyBody, ClientError> {
        write_frame(&mut self.stream, request)?;
        let response: Response = read_frame(&mut self.stream)?.ok_or(ClientError::Closed)?;
        if response.code.is_success() {
            return Ok(response.body);
        }
        let message = match response.body {
            ReplyBody::Message(message) => message,
            _ => String::new(),
        };
        Err(ClientError::Refused {
            code: response.code,
            message,
        })
    }

    fn call_empty(&mut self, request: Request) -> Result<(), ClientError> {
        match self.call(&request)? {
            ReplyBody::Empty => Ok(()),
            body => Err(ClientError::UnexpectedReply {
                request: request.name(),
                body,
            }),
        }
    }

    pub fn register_subfamily(
        &mut self,
        root_pid: Pid,
        watcher_pid: Pid,
        max_snapshot_interval: i64,
    ) -> Result<(), ClientError> {
        self.call_empty(Request::RegisterSubfamily {
            root_pid,
            watcher_pid,
            max_snapshot_interval,
        })
    }

    pub fn track_via_environment(&mut self, pid: Pid, markers: MarkerSet) -> Result<(), ClientError> {
        self.call_empty(Request::TrackViaEnvironment { pid, markers })
    }

    pub fn track_via_login(&mut self, pid: Pid, login: &str) -> Result<(), ClientError> {
        self.call_empty(Request::TrackViaLogin {
            pid,
            login: login.to_string(),
        })
    }

    /// Returns the gid the daemon associated with the family.
    pub fn track_via_supplementary_group(
        &mut self,
        pid: Pid,
        gid: Option<u32>,
    ) -> Result<u32, ClientError> {
        let request = Request::TrackViaSupplementaryGroup { pid, gid };
        match self.call(&request)? {
            ReplyBody::Gid(gid) => Ok(gid),
            body => Err(ClientError::UnexpectedReply {
                request: request.name(),
                body,
            }),
        }
    }

    pub fn track_via_cgroup(&mut self, pid: Pid, cgroup: &str) -> Result<(), ClientError> {
        self.call_empty(Request::TrackViaCgroup {
            pid,
            cgroup: cgroup.to_string(),
        })
    }

    pub fn signal_process(&mut self, pid: Pid, signal: i32) -> Result<(), ClientError> {
        self.call_empty(Request::SignalProcess { pid, signal })
    }

    pub fn signal_family(&mut self, pid: Pid, signal: i32) -> Result<(), ClientError> {
        self.call_empty(Request::SignalFamily { pid, signal })
    }

    pub fn suspend_family(&mut self, pid: Pid) -> Result<(), ClientError> {
        self.call_empty(Request::SuspendFamily { pid })
    }

    pub fn continue_family(&mut self, pid: Pid) -> Result<(), ClientError> {
        self.call_empty(Request::ContinueFamily { pid })
    }

    pub fn kill_family(&mut self, pid: Pid) -> Result<(), ClientError> {
        self.call_empty(Request::KillFamily { pid })
    }

    pub fn get_usage(&mut self, pid: Pid) -> Result<FamilyUsage, ClientError> {
        let request = Request::GetUsage { pid };
        match self.call(&request)? {
            ReplyBody::Usage(usage) => Ok(usage),
            body => Err(ClientError::UnexpectedReply {
                request: request.name(),
                body,
            }),
        }
    }

    pub fn unregister_subfamily(&mut self, pid: Pid) -> Result<(), ClientError> {
        self.call_empty(Request::UnregisterSubfamily { pid })
    }

    pub fn snapshot(&mut self) -> Result<(), ClientError> {
        self.call_empty(Request::Snapshot)
    }

    pub fn dump(&mut self, pid: Pid) -> Result<Vec<FamilyDump>, ClientError> {
        let request = Request::Dump { pid };
        match self.call(&request)? {
            ReplyBody::Dump(families) => Ok(families),
            body => Err(ClientError::UnexpectedReply {
                request: request.name(),
                body,
            }),
        }
    }

    pub fn quit(&mut self) -> Result<(), ClientError> {
        self.call_empty(Request::Quit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::StaticSource;
    use crate::ipc::dispatch::dispatch;
    use crate::ipc::server::{bind, spawn_listener};
    use crate::monitor::{Monitor, MonitorConfig, RecordingSignaller};
    use crate::process::ProcessRecord;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_client_against_live_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procd.sock");
        let (tx, rx) = mpsc::channel();
        spawn_listener(bind(&path).unwrap(), tx).unwrap();

        let client = thread::spawn(move || {
            let mut client = ProcdClient::connect(&path).unwrap();
            client.set_timeout(Some(Duration::from_secs(10))).unwrap();
            client.register_subfamily(1001, 1000, 30).unwrap();
            let usage = client.get_usage(1001).unwrap();
            let dump = client.dump(0).unwrap();
            let refused = client.unregister_subfamily(1000).unwrap_err();
            client.kill_family(1001).unwrap();
            client.quit().unwrap();
            (usage, dump, refused)
        });

        let source = StaticSource::new(vec![
            ProcessRecord::new(1, 0, 1),
            ProcessRecord::new(1000, 1, 5000),
            ProcessRecord::new(1001, 1000, 5001).with_cpu(6, 2),
        ]);
        let signaller = RecordingSignaller::new();
        let mut monitor = Monitor::new(source, MonitorConfig::new(1000))
            .unwrap()
            .with_signaller(signaller.clone());

        loop {
            let command = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            let quit = command.request == Request::Quit;
            let result = dispatch(&mut monitor, command.request.clone());
            command.respond(Response::from_result(result).unwrap());
            if quit {
                break;
            }
        }

        let (usage, dump, refused) = client.join().unwrap();
        assert_eq!((usage.user_cpu_time, usage.sys_cpu_time), (6, 2));
        assert_eq!(dump.len(), 2);
        assert!(matches!(
            refused,
            ClientError::Refused {
                code: ErrorCode::UnregisterRoot,
                ..
            }
        ));
        assert_eq!(signaller.sent(), vec![(1001, 9)]);
    }

    #[test]
    fn test_connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProcdClient::connect(dir.path().join("absent.sock")).is_err());
    }
}
