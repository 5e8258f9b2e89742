use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{SessionConfig, SessionParams};
use crate::error::{Result, RtpError};
use crate::media::MediaSink;
use crate::session::{ReceptionStatistics, Session, SessionState};
use crate::transport::{ControlLoop, Controller, DataLoop, RtpReceiver};

/// Which of a session's two loops an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Data,
    Control,
}

/// Asynchronous notice from a session's loops.
#[derive(Debug)]
pub enum SessionEvent {
    /// The loop hit a socket error and has exited. The other loop keeps
    /// running until the session is stopped.
    Fatal {
        session: u64,
        kind: LoopKind,
        error: RtpError,
    },
    /// The loop observed the stop flag and exited cleanly.
    Stopped { session: u64, kind: LoopKind },
}

/// Caller's view of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    session: Session,
    rtp_addr: SocketAddr,
    rtcp_addr: SocketAddr,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Bound address of the RTP socket, for the RTSP `Transport` header.
    pub fn rtp_addr(&self) -> SocketAddr {
        self.rtp_addr
    }

    pub fn rtcp_addr(&self) -> SocketAddr {
        self.rtcp_addr
    }

    pub fn statistics(&self) -> ReceptionStatistics {
        self.session.lock().statistics()
    }

    /// Ask the control loop for a receiver report at its next iteration.
    pub fn request_report(&self) {
        self.session.request_report();
    }
}

struct RunningSession {
    handle: SessionHandle,
    data: JoinHandle<()>,
    control: JoinHandle<()>,
}

/// Owns the loops of every received media source.
///
/// One [`start`](Self::start) per negotiated source binds its sockets and
/// spawns an RTP data thread and an RTCP control thread around a shared
/// [`Session`]. [`stop`](Self::stop) sets the session's stop flag and joins
/// both threads, which takes at most about one receive timeout. Loop exits
/// are reported as [`SessionEvent`]s.
pub struct Coordinator {
    config: SessionConfig,
    sessions: HashMap<u64, RunningSession>,
    next_id: u64,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            sessions: HashMap::new(),
            next_id: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Bind both sockets and start the loops for one media source.
    ///
    /// Fails with [`AlreadyRunning`](RtpError::AlreadyRunning) if a running
    /// session already expects the same remote SSRC.
    pub fn start(
        &mut self,
        params: SessionParams,
        sink: Box<dyn MediaSink>,
    ) -> Result<SessionHandle> {
        if let Some(ssrc) = params.remote_ssrc
            && self
                .sessions
                .values()
                .any(|running| running.handle.session.lock().source_ssrc() == Some(ssrc))
        {
            return Err(RtpError::AlreadyRunning);
        }

        let rtp_socket = UdpSocket::bind(params.rtp_bind)?;
        let rtcp_socket = UdpSocket::bind(params.rtcp_bind)?;
        let rtp_addr = rtp_socket.local_addr()?;
        let rtcp_addr = rtcp_socket.local_addr()?;

        let id = self.next_id;
        self.next_id += 1;

        let session = Session::new(SessionState::new(
            params.local_ssrc,
            params.remote_ssrc,
            &params.cname,
            params.clock_rate,
        ));

        let mut data_loop = DataLoop::new(
            rtp_socket,
            RtpReceiver::new(session.clone(), sink, params.payload_types.clone()),
            &self.config,
        );
        let mut control_loop = ControlLoop::new(
            rtcp_socket,
            Controller::new(session.clone(), &self.config),
            params.peer_rtcp,
            &self.config,
        );

        let events = self.events_tx.clone();
        let data = thread::Builder::new()
            .name(format!("rtp-data-{id}"))
            .spawn(move || notify(&events, id, LoopKind::Data, data_loop.run()))?;

        let events = self.events_tx.clone();
        let control = match thread::Builder::new()
            .name(format!("rtcp-control-{id}"))
            .spawn(move || notify(&events, id, LoopKind::Control, control_loop.run()))
        {
            Ok(control) => control,
            Err(e) => {
                session.stop();
                let _ = data.join();
                return Err(e.into());
            }
        };

        tracing::info!(
            session = id,
            %rtp_addr,
            %rtcp_addr,
            local_ssrc = params.local_ssrc,
            "session started"
        );

        let handle = SessionHandle {
            id,
            session,
            rtp_addr,
            rtcp_addr,
        };
        self.sessions.insert(
            id,
            RunningSession {
                handle: handle.clone(),
                data,
                control,
            },
        );
        Ok(handle)
    }

    /// Stop both loops of a session and wait for them to exit.
    pub fn stop(&mut self, id: u64) -> Result<()> {
        let running = self.sessions.remove(&id).ok_or(RtpError::SessionNotFound(id))?;
        running.handle.session.stop();
        let threads = [
            (LoopKind::Data, running.data),
            (LoopKind::Control, running.control),
        ];
        for (kind, thread) in threads {
            if thread.join().is_err() {
                tracing::warn!(session = id, ?kind, "loop thread panicked");
            }
        }
        tracing::info!(session = id, "session stopped");
        Ok(())
    }

    /// Stop every running session.
    pub fn shutdown(&mut self) {
        let ids: Vec<u64> = self.sessions.keys().copied().collect();
        for id in ids {
            let _ = self.stop(id);
        }
    }

    pub fn session(&self, id: u64) -> Option<&SessionHandle> {
        self.sessions.get(&id).map(|running| &running.handle)
    }

    pub fn session_ids(&self) -> Vec<u64> {
        self.sessions.keys().copied().collect()
    }

    /// Wait up to `timeout` for the next loop event.
    pub fn recv_event(&self, timeout: Duration) -> Option<SessionEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    pub fn try_event(&self) -> Option<SessionEvent> {
        self.events_rx.try_recv().ok()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn notify(events: &Sender<SessionEvent>, session: u64, kind: LoopKind, result: Result<()>) {
    let event = match result {
        Ok(()) => SessionEvent::Stopped { session, kind },
        Err(error) => {
            tracing::warn!(session, ?kind, %error, "loop ended with fatal error");
            SessionEvent::Fatal {
                session,
                kind,
                error,
            }
        }
    };
    // The coordinator may already be gone during teardown.
    let _ = events.send(event);
}
