//! A single client session
//!
//! Every session runs on its own task and is the only one touching its state. Work results
//! come back through a bounded event queue of twice the outstanding bound: one bound for the
//! outstanding requests and one for cancelled units that haven't finished yet.

mod active;
mod handshaking;

use std::sync::Arc;
use std::time::Instant;

use active::ActiveState;
use anyhow::Result;
use dhs_protocol::DhsConnection;
use dhs_protocol::PeerError;
use dhs_protocol::commands::client_to_server::ToServerCommand;
use dhs_protocol::commands::server_to_client::CloseReasonSpec;
use dhs_protocol::compat::CompatibilityTable;
use handshaking::Handshake;
use handshaking::HandshakingState;
use log::debug;
use log::error;
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::scheduling::RegionScheduler;
use crate::scheduling::WorkError;
use crate::stats::BridgeStats;
use crate::world::WorldDataProvider;

/// Result of a LOD job as it travels back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LodOutcome {
    /// the encoded payload
    Encoded(Vec<u8>),
    /// the client's copy is not older than the world data
    UpToDate,
    NoData,
}

/// Everything sessions share.
pub struct SessionContext {
    pub config: BridgeConfig,
    pub compat: CompatibilityTable,
    pub provider: Arc<dyn WorldDataProvider>,
    pub scheduler: Arc<dyn RegionScheduler<LodOutcome>>,
    pub stats: Arc<BridgeStats>,
}

/// A finished work unit, tagged with the submission it belongs to.
#[derive(Debug)]
pub(crate) struct CompletionEvent {
    ticket: u64,
    request_id: u32,
    result: Result<LodOutcome, WorkError>,
}

enum State {
    /// waiting for `Hello`
    Handshaking,
    Active(ActiveState),
    Closed,
}

pub struct ClientSession {
    connection: DhsConnection,
    context: Arc<SessionContext>,
    state: State,
    last_activity: Instant,
    events: mpsc::Receiver<CompletionEvent>,
    event_sender: mpsc::Sender<CompletionEvent>,
}

impl ClientSession {
    #[must_use]
    pub fn new(connection: DhsConnection, context: Arc<SessionContext>) -> Self {
        let capacity = 2 * usize::from(context.config.max_outstanding_requests).max(1);
        let (event_sender, events) = mpsc::channel(capacity);
        Self {
            connection,
            context,
            state: State::Handshaking,
            last_activity: Instant::now(),
            events,
            event_sender,
        }
    }

    pub fn spawn(connection: DhsConnection, context: Arc<SessionContext>) -> JoinHandle<()> {
        let session = Self::new(connection, context);
        tokio::spawn(session.run())
    }

    pub async fn run(mut self) {
        let id = self.connection.id();
        self.context.stats.session_opened();
        debug!("[P{id}] starting session");
        match self.run_inner().await {
            Ok(()) => info!("[P{id}] session closed"),
            Err(err) => {
                if let Some(PeerError::PeerClosed) = err.downcast_ref::<PeerError>() {
                    info!("[P{id}] disconnected");
                } else {
                    error!("[P{id}] session failed: {err:?}");
                }
            }
        }
        self.close();
        self.context.stats.session_closed();
    }

    async fn run_inner(&mut self) -> Result<()> {
        let idle_timeout = self.context.config.idle_timeout;
        loop {
            let idle_deadline = tokio::time::Instant::from_std(self.last_activity + idle_timeout);
            tokio::select! {
                command = self.connection.recv() => {
                    let command = command?;
                    self.last_activity = Instant::now();
                    if !self.handle_client_message(command).await? {
                        return Ok(());
                    }
                },
                Some(event) = self.events.recv() => {
                    if let State::Active(state) = &mut self.state {
                        state
                            .handle_completion(event, &self.connection, &self.context)
                            .await?;
                    }
                },
                () = tokio::time::sleep_until(idle_deadline) => {
                    info!(
                        "[P{}] no message for {idle_timeout:?}; closing",
                        self.connection.id()
                    );
                    self.connection
                        .send(
                            CloseReasonSpec {
                                reason: "idle timeout".to_owned(),
                            }
                            .into(),
                        )
                        .await?;
                    return Ok(());
                }
            }
        }
    }

    /// Returns `false` once the session is over.
    async fn handle_client_message(&mut self, message: ToServerCommand) -> Result<bool> {
        match &mut self.state {
            State::Handshaking => {
                match HandshakingState::handle_message(message, &self.connection, &self.context)
                    .await?
                {
                    Handshake::Pending => {
                        debug!("[P{}] handshake is still incomplete", self.connection.id());
                    }
                    Handshake::Negotiated(negotiated) => {
                        debug!(
                            "[P{}] handshake completed; switching to active mode",
                            self.connection.id()
                        );
                        self.state = State::Active(ActiveState::new(
                            negotiated,
                            self.event_sender.clone(),
                        ));
                    }
                    Handshake::Rejected => {
                        self.state = State::Closed;
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            State::Active(state) => {
                let keep_open = state
                    .handle_message(message, &self.connection, &self.context)
                    .await?;
                Ok(keep_open)
            }
            State::Closed => Ok(false),
        }
    }

    /// Cancels all outstanding work. No response is sent afterwards.
    fn close(&mut self) {
        if let State::Active(state) = &mut self.state {
            state.cancel_all(self.connection.id());
        }
        self.state = State::Closed;
        self.events.close();
    }
}
