//! The survey's single serialized owner.
//!
//! One [`SurveyActor`] task owns the ledger, the subscriber registry and the
//! tally store, and works through its mailbox strictly in arrival order.
//! [`SurveyHandle`] is the cloneable control surface in front of it.

use chrono::Utc;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

use crate::broadcast::{ConnectionRegistry, SubscriberId, SubscriberSender};
use crate::db::TallyStore;
use crate::error::{StorageError, SurveyError};
use crate::models::{Catalog, Snapshot, SurveyState, Vote};
use crate::protocol::ServerMessage;
use crate::voting::Ledger;

const MAILBOX_CAPACITY: usize = 256;

enum Command {
    SubmitVote {
        session_id: String,
        selections: Vec<String>,
        reply: oneshot::Sender<Result<Vote, SurveyError>>,
    },
    Reset {
        reply: oneshot::Sender<Result<(), SurveyError>>,
    },
    Connect {
        id: SubscriberId,
        tx: SubscriberSender,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        id: SubscriberId,
        reply: oneshot::Sender<()>,
    },
    Sweep {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Clone)]
pub struct SurveyHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl SurveyHandle {
    /// Resolves once the vote is durably stored, or with the reason it was not.
    pub async fn submit_vote(
        &self,
        session_id: impl Into<String>,
        selections: Vec<String>,
    ) -> Result<Vote, SurveyError> {
        self.request(|reply| Command::SubmitVote {
            session_id: session_id.into(),
            selections,
            reply,
        })
        .await?
    }

    /// Authorization is the caller's job.
    pub async fn reset(&self) -> Result<(), SurveyError> {
        self.request(|reply| Command::Reset { reply }).await?
    }

    /// Latest committed snapshot. Never waits on the mailbox.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Register a subscriber; it receives a `state` frame before anything else.
    pub async fn connect(&self, id: SubscriberId, tx: SubscriberSender) -> Result<(), SurveyError> {
        self.request(|reply| Command::Connect { id, tx, reply }).await
    }

    pub async fn disconnect(&self, id: SubscriberId) {
        // A stopped actor has no subscribers left to forget.
        let _ = self.request(|reply| Command::Disconnect { id, reply }).await;
    }

    /// Drop subscribers whose connection vanished; returns how many.
    pub async fn sweep(&self) -> Result<usize, SurveyError> {
        self.request(|reply| Command::Sweep { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SurveyError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SurveyError::Unavailable)?;
        response.await.map_err(|_| SurveyError::Unavailable)
    }
}

/// Load the persisted state and start the owner task.
pub async fn spawn(
    catalog: Arc<Catalog>,
    store: Arc<dyn TallyStore>,
) -> Result<SurveyHandle, StorageError> {
    let state = store.load(&catalog).await?;
    info!(
        "Survey ready: {} option(s), {} vote(s) so far",
        catalog.options().len(),
        state.total_votes()
    );
    Ok(start(state, store))
}

fn start(state: SurveyState, store: Arc<dyn TallyStore>) -> SurveyHandle {
    let ledger = Ledger::new(state);
    let (snapshot_tx, snapshot_rx) = watch::channel(ledger.snapshot(0));
    let (commands_tx, commands_rx) = mpsc::channel(MAILBOX_CAPACITY);

    let actor = SurveyActor {
        ledger,
        registry: ConnectionRegistry::new(),
        store,
        snapshot_tx,
    };
    tokio::spawn(actor.run(commands_rx));

    SurveyHandle {
        commands: commands_tx,
        snapshot: snapshot_rx,
    }
}

struct SurveyActor {
    ledger: Ledger,
    registry: ConnectionRegistry,
    store: Arc<dyn TallyStore>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl SurveyActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::SubmitVote {
                    session_id,
                    selections,
                    reply,
                } => {
                    let result = self.submit_vote(&session_id, &selections).await;
                    let _ = reply.send(result);
                }
                Command::Reset { reply } => {
                    let result = self.reset().await;
                    let _ = reply.send(result);
                }
                Command::Connect { id, tx, reply } => {
                    self.connect(id, tx);
                    let _ = reply.send(());
                }
                Command::Disconnect { id, reply } => {
                    self.disconnect(id);
                    let _ = reply.send(());
                }
                Command::Sweep { reply } => {
                    let pruned = self.sweep();
                    let _ = reply.send(pruned);
                }
            }
        }
        info!("Survey mailbox closed; aggregator stopping");
    }

    async fn submit_vote(
        &mut self,
        session_id: &str,
        selections: &[String],
    ) -> Result<Vote, SurveyError> {
        let vote = self.ledger.validate(session_id, selections, Utc::now())?;

        self.ledger.apply(vote.clone());
        if let Err(e) = self.store.append(self.ledger.state(), &vote).await {
            self.ledger.revert(&vote.session_id);
            error!("Failed to persist vote for session {}: {}", vote.session_id, e);
            return Err(e.into());
        }

        info!(
            "Accepted vote from session {} for {:?} ({} total)",
            vote.session_id,
            vote.selections,
            self.ledger.state().total_votes()
        );
        self.fan_out(ServerMessage::Update(self.snapshot()), None);
        Ok(vote)
    }

    async fn reset(&mut self) -> Result<(), SurveyError> {
        let fresh = SurveyState::fresh(Arc::clone(self.ledger.state().catalog()));
        if let Err(e) = self.store.save(&fresh).await {
            error!("Failed to persist survey reset: {}", e);
            return Err(e.into());
        }

        let discarded = self.ledger.state().total_votes();
        self.ledger.replace(fresh);
        info!("Survey reset; discarded {} vote(s)", discarded);
        self.fan_out(ServerMessage::Reset(self.snapshot()), None);
        Ok(())
    }

    fn connect(&mut self, id: SubscriberId, tx: SubscriberSender) {
        self.registry.connect(id, tx);
        let initial = ServerMessage::State(self.snapshot());
        if !self.registry.send_to(id, &initial) {
            debug!("Subscriber {} left before its initial snapshot", id);
        }
        self.fan_out(ServerMessage::Update(self.snapshot()), Some(id));
    }

    fn disconnect(&mut self, id: SubscriberId) {
        if self.registry.disconnect(id) {
            self.fan_out(ServerMessage::Update(self.snapshot()), None);
        }
    }

    fn sweep(&mut self) -> usize {
        let pruned = self.registry.prune_closed();
        if pruned > 0 {
            self.fan_out(ServerMessage::Update(self.snapshot()), None);
        }
        pruned
    }

    /// Publish the committed snapshot, then push `message` to subscribers.
    ///
    /// Each subscriber lost along the way changes the online count, so the
    /// survivors get another presence update until a round loses nobody.
    fn fan_out(&mut self, message: ServerMessage, skip: Option<SubscriberId>) {
        self.publish();
        let mut dropped = self.registry.notify(&message, skip);
        while dropped > 0 {
            self.publish();
            let presence = ServerMessage::Update(self.snapshot());
            dropped = self.registry.notify(&presence, None);
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> Snapshot {
        self.ledger.snapshot(self.registry.len())
    }
}
