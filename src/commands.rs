//! Command surface for the UI.
//!
//! [`CallHandle::spawn`] moves a [`CallSession`] onto its own task. That
//! task owns the session and serves both UI commands and store/connection
//! events from one loop, so the two never run at the same time. Handles
//! are cheap to clone.

use std::ops::ControlFlow;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{CallError, Result};
use crate::peer::state::Phase;
use crate::session::{CallEvent, CallSession};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug)]
pub enum CallCommand {
    StartCall(oneshot::Sender<Result<()>>),
    AcceptCall(oneshot::Sender<Result<()>>),
    DeclineOrHangup(oneshot::Sender<Result<()>>),
    Hangup(oneshot::Sender<Result<()>>),
    Phase(oneshot::Sender<Phase>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::Sender<CallCommand>,
    events: broadcast::Sender<CallEvent>,
}

impl CallHandle {
    /// Starts the driver task for `session`.
    pub fn spawn(session: CallSession) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let events = session.event_sender();
        let task = tokio::spawn(drive(session, rx));
        (Self { commands, events }, task)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> CallCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }

    pub async fn start_call(&self) -> Result<()> {
        self.request(CallCommand::StartCall).await?
    }

    pub async fn accept_call(&self) -> Result<()> {
        self.request(CallCommand::AcceptCall).await?
    }

    pub async fn decline_or_hangup(&self) -> Result<()> {
        self.request(CallCommand::DeclineOrHangup).await?
    }

    pub async fn hangup(&self) -> Result<()> {
        self.request(CallCommand::Hangup).await?
    }

    pub async fn phase(&self) -> Result<Phase> {
        self.request(CallCommand::Phase).await
    }

    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Disposes the session and stops the driver task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(CallCommand::Shutdown).await
    }
}

async fn drive(mut session: CallSession, mut commands: mpsc::Receiver<CallCommand>) {
    debug!("Call driver started");
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(command) => {
                    if execute(&mut session, command).await.is_break() {
                        break;
                    }
                }
                None => {
                    // every handle is gone
                    session.dispose().await;
                    break;
                }
            },
            Some(input) = session.next_input() => session.handle_input(input).await,
        }
    }
    info!("Call driver stopped");
}

async fn execute(session: &mut CallSession, command: CallCommand) -> ControlFlow<()> {
    debug!("command {:?}", command);
    match command {
        CallCommand::StartCall(reply) => {
            let _ = reply.send(session.start_call().await);
        }
        CallCommand::AcceptCall(reply) => {
            let _ = reply.send(session.accept_call().await);
        }
        CallCommand::DeclineOrHangup(reply) => {
            let _ = reply.send(session.decline_or_hangup().await);
        }
        CallCommand::Hangup(reply) => {
            let _ = reply.send(session.hangup().await);
        }
        CallCommand::Phase(reply) => {
            let _ = reply.send(session.phase());
        }
        CallCommand::Shutdown(reply) => {
            session.dispose().await;
            let _ = reply.send(());
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}
