//! SFTP transfer over `ssh2`.
//!
//! One SSH session per endpoint carries many SFTP channels. Sessions
//! authenticate with the endpoint's username and password and do not verify
//! the host key against `known_hosts`.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use feedsync_core::error::AppError;
use feedsync_core::models::RemoteEndpoint;
use feedsync_core::traits::{TransferChannel, TransferConnector, TransferSession};
use ssh2::{Session, Sftp};
use tracing::{debug, warn};

const LOGIN_HOME: &str = ".";

fn transport_error(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::TransportError(format!("{}: {}", context, e))
}

/// [`TransferConnector`] for SFTP hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SftpConnector;

impl TransferConnector for SftpConnector {
    type Session = SftpSession;
    type Channel = SftpChannel;

    fn connect(&self, endpoint: &RemoteEndpoint, timeout: Duration) -> Result<SftpSession, AppError> {
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| transport_error(&format!("Cannot resolve {}", endpoint.host), e))?
            .next()
            .ok_or_else(|| AppError::TransportError(format!("No address for {}", endpoint.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| transport_error(&format!("Cannot connect to {}", addr), e))?;

        let mut session = Session::new().map_err(|e| transport_error("SSH session", e))?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| transport_error("SSH handshake", e))?;
        session
            .userauth_password(&endpoint.username, &endpoint.credential)
            .map_err(|e| transport_error(&format!("Authentication as {}", endpoint.username), e))?;
        if !session.authenticated() {
            return Err(AppError::TransportError(format!(
                "Authentication as {} was rejected",
                endpoint.username
            )));
        }

        debug!(host = %endpoint.host, port = endpoint.port, "SFTP session established");
        Ok(SftpSession {
            session,
            connected: true,
        })
    }
}

pub struct SftpSession {
    session: Session,
    connected: bool,
}

impl TransferSession for SftpSession {
    type Channel = SftpChannel;

    fn is_connected(&self) -> bool {
        self.connected && self.session.authenticated()
    }

    fn open_channel(&self) -> Result<SftpChannel, AppError> {
        Ok(SftpChannel {
            session: self.session.clone(),
            sftp: None,
            cwd: PathBuf::from(LOGIN_HOME),
        })
    }

    fn disconnect(&mut self) {
        if self.connected {
            if let Err(e) = self.session.disconnect(None, "closing", None) {
                warn!(error = %e, "SSH disconnect failed");
            }
            self.connected = false;
        }
    }
}

/// One SFTP subsystem channel. The working directory starts at the login
/// home (`.`) and is tracked client side; `change_dir` always resolves
/// against that home.
pub struct SftpChannel {
    session: Session,
    sftp: Option<Sftp>,
    cwd: PathBuf,
}

impl SftpChannel {
    fn sftp(&self) -> Result<&Sftp, AppError> {
        self.sftp
            .as_ref()
            .ok_or_else(|| AppError::TransportError("channel is not connected".to_string()))
    }
}

impl TransferChannel for SftpChannel {
    fn is_connected(&self) -> bool {
        self.sftp.is_some() && self.session.authenticated()
    }

    fn connect(&mut self) -> Result<(), AppError> {
        let sftp = self
            .session
            .sftp()
            .map_err(|e| transport_error("Opening SFTP channel", e))?;
        self.sftp = Some(sftp);
        self.cwd = PathBuf::from(LOGIN_HOME);
        Ok(())
    }

    fn disconnect(&mut self) {
        // Dropping the handle closes the subsystem channel.
        self.sftp = None;
    }

    fn change_dir(&mut self, path: &str) -> Result<(), AppError> {
        let target = Path::new(LOGIN_HOME).join(path);
        let stat = self
            .sftp()?
            .stat(&target)
            .map_err(|e| transport_error(&format!("cd {}", target.display()), e))?;
        if !stat.is_dir() {
            return Err(AppError::TransportError(format!(
                "Not a directory: {}",
                target.display()
            )));
        }
        self.cwd = target;
        Ok(())
    }

    fn put(&mut self, source: &mut dyn Read, remote_name: &str) -> Result<u64, AppError> {
        let target = self.cwd.join(remote_name);
        let mut remote = self
            .sftp()?
            .create(&target)
            .map_err(|e| transport_error(&format!("Cannot create {}", target.display()), e))?;
        io::copy(source, &mut remote)
            .map_err(|e| transport_error(&format!("Upload of {}", target.display()), e))
    }
}
