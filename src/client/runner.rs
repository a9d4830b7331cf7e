//! Actor that owns a [`CallStore`] and serializes every input to it.

use super::error::ClientError;
use super::signaling::SignalingSender;
use super::store::CallStore;
use log::debug;
use sigcore::client::{CallSnapshot, MediaDevices, NegotiationEvent, PeerConnectionFactory};
use sigcore::protocol::ServerMessage;
use sigcore::types::{CallKind, CallerProfile};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

type Reply = oneshot::Sender<Result<(), ClientError>>;

/// User-initiated actions.
#[derive(Debug)]
pub enum ClientCommand {
    StartCall {
        thread_id: String,
        callee: CallerProfile,
        kind: CallKind,
        reply: Reply,
    },
    AcceptCall {
        reply: Reply,
    },
    RejectCall,
    EndCall,
    ToggleMute,
    ToggleVideo,
    ClearError,
    Reset,
}

/// Everything the actor reacts to, in arrival order.
#[derive(Debug)]
pub enum ClientInput {
    Command(ClientCommand),
    Server(ServerMessage),
    Negotiation {
        generation: u64,
        event: NegotiationEvent,
    },
    Tick {
        generation: u64,
    },
    TransportDisconnected,
    Shutdown,
}

/// Cloneable handle to a running [`CallClient`].
#[derive(Clone)]
pub struct CallClientHandle {
    inputs: mpsc::UnboundedSender<ClientInput>,
    snapshots: watch::Receiver<CallSnapshot>,
}

impl CallClientHandle {
    fn submit(&self, input: ClientInput) -> Result<(), ClientError> {
        self.inputs.send(input).map_err(|_| ClientError::Shutdown)
    }

    async fn request(&self, build: impl FnOnce(Reply) -> ClientCommand) -> Result<(), ClientError> {
        let (reply, result) = oneshot::channel();
        self.submit(ClientInput::Command(build(reply)))?;
        result.await.map_err(|_| ClientError::Shutdown)?
    }

    pub async fn start_call(
        &self,
        thread_id: impl Into<String>,
        callee: CallerProfile,
        kind: CallKind,
    ) -> Result<(), ClientError> {
        let thread_id = thread_id.into();
        self.request(|reply| ClientCommand::StartCall {
            thread_id,
            callee,
            kind,
            reply,
        })
        .await
    }

    pub async fn accept_call(&self) -> Result<(), ClientError> {
        self.request(|reply| ClientCommand::AcceptCall { reply })
            .await
    }

    pub fn reject_call(&self) -> Result<(), ClientError> {
        self.submit(ClientInput::Command(ClientCommand::RejectCall))
    }

    pub fn end_call(&self) -> Result<(), ClientError> {
        self.submit(ClientInput::Command(ClientCommand::EndCall))
    }

    pub fn toggle_mute(&self) -> Result<(), ClientError> {
        self.submit(ClientInput::Command(ClientCommand::ToggleMute))
    }

    pub fn toggle_video(&self) -> Result<(), ClientError> {
        self.submit(ClientInput::Command(ClientCommand::ToggleVideo))
    }

    pub fn clear_error(&self) -> Result<(), ClientError> {
        self.submit(ClientInput::Command(ClientCommand::ClearError))
    }

    pub fn reset(&self) -> Result<(), ClientError> {
        self.submit(ClientInput::Command(ClientCommand::Reset))
    }

    /// Feed a message received from the signaling server.
    pub fn deliver(&self, message: ServerMessage) -> Result<(), ClientError> {
        self.submit(ClientInput::Server(message))
    }

    pub fn transport_disconnected(&self) -> Result<(), ClientError> {
        self.submit(ClientInput::TransportDisconnected)
    }

    pub fn shutdown(&self) {
        let _ = self.inputs.send(ClientInput::Shutdown);
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_in_call(&self) -> bool {
        !self.snapshots.borrow().phase.is_idle()
    }
}

pub struct CallClient {
    store: CallStore,
    inputs: mpsc::UnboundedReceiver<ClientInput>,
}

impl CallClient {
    /// Start the actor on the current runtime.
    pub fn spawn(
        signaling: Arc<dyn SignalingSender>,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
    ) -> (CallClientHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (store, snapshots) = CallStore::new(signaling, media, peers, tx.clone());
        let client = Self { store, inputs: rx };
        let task = tokio::spawn(client.run());
        (
            CallClientHandle {
                inputs: tx,
                snapshots,
            },
            task,
        )
    }

    async fn run(mut self) {
        while let Some(input) = self.inputs.recv().await {
            match input {
                ClientInput::Command(command) => self.handle_command(command).await,
                ClientInput::Server(message) => self.store.handle_server_message(message).await,
                ClientInput::Negotiation { generation, event } => {
                    self.store.handle_negotiation_event(generation, event)
                }
                ClientInput::Tick { generation } => self.store.handle_tick(generation),
                ClientInput::TransportDisconnected => self.store.handle_transport_disconnected(),
                ClientInput::Shutdown => break,
            }
        }
        self.store.end_call();
        debug!(target: "Client/CallStore", "Call client stopped");
    }

    async fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::StartCall {
                thread_id,
                callee,
                kind,
                reply,
            } => {
                let result = self.store.start_call(thread_id, callee, kind).await;
                let _ = reply.send(result);
            }
            ClientCommand::AcceptCall { reply } => {
                let result = self.store.accept_call().await;
                let _ = reply.send(result);
            }
            ClientCommand::RejectCall => self.store.reject_call(),
            ClientCommand::EndCall => self.store.end_call(),
            ClientCommand::ToggleMute => self.store.toggle_mute(),
            ClientCommand::ToggleVideo => self.store.toggle_video(),
            ClientCommand::ClearError => self.store.clear_error(),
            ClientCommand::Reset => self.store.reset(),
        }
    }
}
