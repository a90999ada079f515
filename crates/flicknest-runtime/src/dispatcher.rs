//! [`Dispatcher`] – applies [`SymbolCommand`]s.
//!
//! For each command, in order:
//!
//! 1. mutate the [`SymbolStore`] (persisted before anything else happens),
//!    keeping the symbol locked until step 3 is done;
//! 2. for mobile-originated merges, publish `{name: state}` on the
//!    [`ControlChannel`], keyed by the *stored* name (empty when none is
//!    stored). A control failure is logged and never fails the mutation;
//! 3. emit a [`SymbolUpdate`] on the [`UpdateBus`];
//! 4. answer the caller, if it asked for a reply.
//!
//! Commands are received over an `mpsc` channel and each one runs in its own
//! task, so mutations to different symbols proceed concurrently while
//! same-symbol writes are stored, published and broadcast in one order.

use std::sync::Arc;

use flicknest_memory::SymbolStore;
use flicknest_middleware::{ControlChannel, UpdateBus};
use flicknest_types::{
    HubError, Source, Symbol, SymbolCommand, SymbolPatch, SymbolRef, SymbolUpdate, ToggleOutcome,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Create the command mailbox.
pub fn channel(capacity: usize) -> (DispatcherHandle, mpsc::Receiver<SymbolCommand>) {
    let (commands, rx) = mpsc::channel(capacity.max(1));
    (DispatcherHandle { commands }, rx)
}

pub struct Dispatcher {
    store: Arc<SymbolStore>,
    bus: UpdateBus,
    control: Arc<dyn ControlChannel>,
}

impl Dispatcher {
    pub fn new(store: Arc<SymbolStore>, bus: UpdateBus, control: Arc<dyn ControlChannel>) -> Self {
        Self { store, bus, control }
    }

    /// Consume commands until the mailbox closes or `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        mut commands: mpsc::Receiver<SymbolCommand>,
        shutdown: CancellationToken,
    ) {
        info!("dispatcher started");
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => command,
            };
            let Some(command) = command else { break };
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.execute(command).await });
        }
        info!("dispatcher stopped");
    }

    /// Apply one command and deliver its reply.
    pub async fn execute(&self, command: SymbolCommand) {
        match command {
            SymbolCommand::Merge {
                target,
                patch,
                source,
                reply,
            } => {
                let result = self.merge(&target, &patch, source).await;
                respond(reply, result, &target);
            }
            SymbolCommand::Toggle {
                target,
                source,
                reply,
            } => {
                let result = self.toggle(&target, source).await;
                respond(reply, result, &target);
            }
        }
    }

    async fn merge(
        &self,
        target: &SymbolRef,
        patch: &SymbolPatch,
        source: Source,
    ) -> Result<Symbol, HubError> {
        // The id stays locked until the change has been pushed out, so a
        // later write to it cannot overtake this one on the wire.
        let merged = self
            .store
            .merge_held(&target.id, patch, source)
            .await
            .inspect_err(|e| warn!(target = %target, error = %e, "merge failed"))?;

        if source == Source::Mobile {
            let name = merged.name.as_deref().unwrap_or_default();
            if let Err(e) = self
                .control
                .publish_control(name, merged.state_or_default())
                .await
            {
                warn!(target = %target, error = %e, "control message not delivered");
            }
        }

        self.emit(&target.id, &merged, source);
        Ok(merged.into_inner())
    }

    async fn toggle(&self, target: &SymbolRef, source: Source) -> Result<ToggleOutcome, HubError> {
        let outcome = self
            .store
            .toggle_held(&target.id, source)
            .await
            .inspect_err(|e| warn!(target = %target, error = %e, "toggle failed"))?;
        info!(
            target = %target,
            source = %source,
            new_state = outcome.new_state,
            "symbol toggled"
        );
        self.emit(&target.id, &outcome.symbol, source);
        Ok(outcome.into_inner())
    }

    fn emit(&self, id: &str, symbol: &Symbol, origin: Source) {
        let reached = self
            .bus
            .publish(SymbolUpdate::new(id, symbol.clone(), origin));
        debug!(id = %id, subscribers = reached, "update broadcast");
    }
}

fn respond<T>(
    reply: Option<oneshot::Sender<Result<T, HubError>>>,
    result: Result<T, HubError>,
    target: &SymbolRef,
) {
    if let Some(reply) = reply
        && reply.send(result).is_err()
    {
        debug!(target = %target, "caller went away before the reply");
    }
}

/// Cloneable front door to the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<SymbolCommand>,
}

impl DispatcherHandle {
    /// Raw sender for fire-and-forget ingress.
    pub fn sender(&self) -> mpsc::Sender<SymbolCommand> {
        self.commands.clone()
    }

    pub async fn merge(
        &self,
        target: SymbolRef,
        patch: SymbolPatch,
        source: Source,
    ) -> Result<Symbol, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SymbolCommand::Merge {
            target,
            patch,
            source,
            reply: Some(reply),
        })
        .await?;
        rx.await
            .map_err(|_| HubError::Channel("dispatcher dropped the request".to_string()))?
    }

    pub async fn toggle(&self, target: SymbolRef, source: Source) -> Result<ToggleOutcome, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SymbolCommand::Toggle {
            target,
            source,
            reply: Some(reply),
        })
        .await?;
        rx.await
            .map_err(|_| HubError::Channel("dispatcher dropped the request".to_string()))?
    }

    async fn submit(&self, command: SymbolCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Channel("dispatcher is not running".to_string()))
    }
}
