//! Client-initiated bootstrap session.
//!
//! At most one session is open at a time. The engine opens it with
//! [`BootstrapSession::try_init_session`], the bootstrap server's writes are
//! accepted while it is open, and the "bootstrap finished" request from the
//! server ends the wait in [`BootstrapSession::wait_bootstrap_finished`].

use std::sync::Mutex;
use std::time::Duration;

use lwm2m_core::{ServerIdentity, ServerInfo};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Phase of the bootstrap session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session.
    Closed,
    /// Session open, waiting for the server to finish.
    Open,
    /// The server signalled the end of bootstrap.
    Finished,
}

#[derive(Debug, Default)]
struct SessionState {
    info: Option<ServerInfo>,
    server: Option<ServerIdentity>,
}

/// Tracks the bootstrap session and its completion signal.
#[derive(Debug)]
pub struct BootstrapSession {
    phase: watch::Sender<SessionPhase>,
    state: Mutex<SessionState>,
}

impl Default for BootstrapSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapSession {
    /// Creates a closed session.
    pub fn new() -> Self {
        let (phase, _) = watch::channel(SessionPhase::Closed);
        Self {
            phase,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Opens a session with `info`. Returns false if one is already open.
    pub fn try_init_session(&self, info: &ServerInfo) -> bool {
        let opened = self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Closed {
                *phase = SessionPhase::Open;
                true
            } else {
                false
            }
        });
        if opened {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.info = Some(info.clone());
            state.server = None;
            debug!(uri = %info.uri, "bootstrap session opened");
        }
        opened
    }

    /// Records the connection used for this session.
    pub fn set_server(&self, server: ServerIdentity) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.server = Some(server);
    }

    /// Signals that the bootstrap server finished provisioning.
    pub fn bootstrap_finished(&self) -> Result<()> {
        let signalled = self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Open {
                *phase = SessionPhase::Finished;
                true
            } else {
                false
            }
        });
        if signalled {
            info!("bootstrap finished by server");
            Ok(())
        } else {
            Err(ClientError::NotInBootstrapSession)
        }
    }

    /// Waits for [`BootstrapSession::bootstrap_finished`]. Returns false on timeout
    /// or when the session closes first.
    pub async fn wait_bootstrap_finished(&self, timeout: Duration) -> bool {
        let mut rx = self.phase.subscribe();
        let finished = tokio::time::timeout(
            timeout,
            rx.wait_for(|phase| *phase != SessionPhase::Open),
        )
        .await;
        matches!(finished, Ok(Ok(phase)) if *phase == SessionPhase::Finished)
    }

    /// Closes the session, whatever its phase.
    pub fn close_session(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.info = None;
        state.server = None;
        drop(state);
        if self.phase.send_replace(SessionPhase::Closed) != SessionPhase::Closed {
            debug!("bootstrap session closed");
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// True unless closed.
    pub fn is_session_open(&self) -> bool {
        self.phase() != SessionPhase::Closed
    }

    /// Connection of the open session, if the endpoint was created.
    pub fn current_server(&self) -> Option<ServerIdentity> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .server
            .clone()
    }

    /// Returns true if `server` is the connection of the open session.
    pub fn is_bootstrap_server(&self, server: &ServerIdentity) -> bool {
        self.is_session_open() && self.current_server().as_ref() == Some(server)
    }
}

/// Closes the session when dropped, including when the owning task is aborted.
pub(crate) struct SessionGuard<'a>(pub(crate) &'a BootstrapSession);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.close_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bs_info() -> ServerInfo {
        ServerInfo::bootstrap("coaps://bs:5684")
    }

    #[test]
    fn test_single_session() {
        let session = BootstrapSession::new();
        assert!(session.try_init_session(&bs_info()));
        assert!(!session.try_init_session(&bs_info()));
        session.close_session();
        assert!(session.try_init_session(&bs_info()));
    }

    #[test]
    fn test_finished_requires_open_session() {
        let session = BootstrapSession::new();
        assert!(matches!(
            session.bootstrap_finished(),
            Err(ClientError::NotInBootstrapSession)
        ));
        session.try_init_session(&bs_info());
        assert!(session.bootstrap_finished().is_ok());
        assert_eq!(session.phase(), SessionPhase::Finished);
    }

    #[test]
    fn test_guard_closes_session() {
        let session = BootstrapSession::new();
        session.try_init_session(&bs_info());
        session.set_server(ServerIdentity::bootstrap(1, "coaps://bs:5684"));
        {
            let _guard = SessionGuard(&session);
        }
        assert!(!session.is_session_open());
        assert!(session.current_server().is_none());
    }

    #[test]
    fn test_is_bootstrap_server() {
        let session = BootstrapSession::new();
        let bs = ServerIdentity::bootstrap(1, "coaps://bs:5684");
        assert!(!session.is_bootstrap_server(&bs));
        session.try_init_session(&bs_info());
        session.set_server(bs.clone());
        assert!(session.is_bootstrap_server(&bs));
        assert!(!session.is_bootstrap_server(&ServerIdentity::bootstrap(2, "coaps://other")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_finished_signal() {
        let session = Arc::new(BootstrapSession::new());
        session.try_init_session(&bs_info());
        let signaller = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            signaller.bootstrap_finished().unwrap();
        });
        assert!(session.wait_bootstrap_finished(Duration::from_secs(93)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_finished_already_signalled() {
        let session = BootstrapSession::new();
        session.try_init_session(&bs_info());
        session.bootstrap_finished().unwrap();
        assert!(session.wait_bootstrap_finished(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_finished_timeout() {
        let session = BootstrapSession::new();
        session.try_init_session(&bs_info());
        assert!(!session.wait_bootstrap_finished(Duration::from_secs(93)).await);
        assert!(session.is_session_open());
    }
}
