//! Call supervisor
//!
//! Routes commands to per-call actors, spawning an actor the first time a
//! call is addressed. Actors retire themselves once their call is terminal
//! or idle; a command that lands on a retiring actor is retried on a fresh
//! one.

use callmeter_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::actor::{CallActor, CallCommand, Reply};
use crate::constants::MAX_DISPATCH_ATTEMPTS;
use crate::context::BillingContext;

struct ActorSlot {
    generation: u64,
    sender: mpsc::Sender<CallCommand>,
}

/// Live actors keyed by call id
#[derive(Default)]
pub(crate) struct ActorRegistry {
    slots: Mutex<HashMap<String, ActorSlot>>,
}

impl ActorRegistry {
    /// Unregister an actor and close its mailbox in one step, so no new
    /// command can reach it after it stops reading.
    pub(crate) fn retire(
        &self,
        call_id: &str,
        generation: u64,
        mailbox: &mut mpsc::Receiver<CallCommand>,
    ) {
        let mut slots = self.slots.lock();
        if slots
            .get(call_id)
            .is_some_and(|slot| slot.generation == generation)
        {
            slots.remove(call_id);
        }
        mailbox.close();
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }

    fn contains(&self, call_id: &str) -> bool {
        self.slots
            .lock()
            .get(call_id)
            .is_some_and(|slot| !slot.sender.is_closed())
    }
}

/// Call supervisor
pub struct CallSupervisor {
    ctx: Arc<BillingContext>,
    registry: Arc<ActorRegistry>,
    runtime: Handle,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

impl CallSupervisor {
    /// Must be called from within a Tokio runtime; actors are spawned on it.
    pub fn new(ctx: Arc<BillingContext>) -> AppResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Internal(format!("no async runtime available: {e}")))?;
        Ok(Self {
            ctx,
            registry: Arc::new(ActorRegistry::default()),
            runtime,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            next_generation: AtomicU64::new(1),
        })
    }

    fn sender_for(&self, call_id: &str) -> AppResult<mpsc::Sender<CallCommand>> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::Unavailable("billing engine is shutting down".into()));
        }

        let mut slots = self.registry.slots.lock();
        if let Some(slot) = slots.get(call_id) {
            if !slot.sender.is_closed() {
                return Ok(slot.sender.clone());
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, mailbox) = mpsc::channel(self.ctx.config.mailbox_capacity);
        let actor = CallActor::new(
            call_id.to_string(),
            generation,
            self.ctx.clone(),
            mailbox,
            self.registry.clone(),
            self.shutdown.child_token(),
        );
        self.tracker.spawn_on(actor.run(), &self.runtime);
        slots.insert(
            call_id.to_string(),
            ActorSlot {
                generation,
                sender: sender.clone(),
            },
        );
        debug!(call_id = %call_id, generation, "Spawned call actor");
        Ok(sender)
    }

    /// Send a command to the call's actor and wait for its reply.
    pub(crate) async fn request<T, F>(&self, call_id: &str, make: F) -> AppResult<T>
    where
        F: Fn(Reply<T>) -> CallCommand,
    {
        for attempt in 1..=MAX_DISPATCH_ATTEMPTS {
            let sender = self.sender_for(call_id)?;
            let (reply, response) = oneshot::channel();

            if sender.send(make(reply)).await.is_err() {
                debug!(call_id = %call_id, attempt, "Actor mailbox closed, retrying");
                continue;
            }

            match response.await {
                Ok(result) => return result,
                Err(_) => {
                    debug!(call_id = %call_id, attempt, "Actor retired before replying, retrying");
                }
            }
        }

        Err(AppError::Unavailable(format!(
            "call {call_id} could not be reached"
        )))
    }

    /// Whether a live actor currently owns the call.
    pub fn has_actor(&self, call_id: &str) -> bool {
        self.registry.contains(call_id)
    }

    pub fn active_actors(&self) -> usize {
        self.registry.len()
    }

    /// Stop every actor, letting each persist its meter, and wait for them.
    pub async fn shutdown(&self) {
        info!("Shutting down call supervisor ({} actors)", self.active_actors());
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Call supervisor stopped");
    }
}
