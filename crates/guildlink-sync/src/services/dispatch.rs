//! Event dispatch.
//!
//! Login callbacks and guild events are queued on a per-identity lane. Each
//! lane is a worker task that processes its jobs in arrival order, so a join
//! followed by a role update for the same user applies in that order. Lanes
//! for different users run concurrently and are dropped after a period of
//! inactivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::account_resolver::AccountLookup;
use super::reconcile::ReconciliationEngine;
use crate::error::{SyncError, SyncResult};
use crate::models::{ExternalIdentity, GuildEvent, LoginOutcome, MembershipOutcome, MembershipSnapshot};

/// Default idle time before a lane worker exits.
pub const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(60);

type EventReply = oneshot::Sender<SyncResult<MembershipOutcome>>;
type LoginReply = oneshot::Sender<SyncResult<LoginOutcome>>;

/// Work queued on a lane.
enum Job {
    Event {
        event: GuildEvent,
        queued_at: Instant,
        reply: Option<EventReply>,
    },
    Login {
        identity: ExternalIdentity,
        queued_at: Instant,
        reply: LoginReply,
    },
}

/// Stream of guild events from the gateway side.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is closed.
    async fn next_event(&mut self) -> Option<GuildEvent>;
}

/// Event source fed through an mpsc channel.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<GuildEvent>,
}

impl ChannelEventSource {
    /// Create a source and the sender that feeds it.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<GuildEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<GuildEvent> {
        self.rx.recv().await
    }
}

struct DispatcherInner {
    engine: ReconciliationEngine,
    default_role_ids: Vec<String>,
    lanes: DashMap<String, mpsc::UnboundedSender<Job>>,
    idle: Duration,
    closed: AtomicBool,
}

/// Routes reconciliation work onto per-identity lanes.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl EventDispatcher {
    /// Create a dispatcher.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine that performs the reconciliation
    /// * `default_role_ids` - Role ids granted to users when they join
    /// * `idle` - How long an empty lane is kept before its worker exits
    #[must_use]
    pub fn new(engine: ReconciliationEngine, default_role_ids: Vec<String>, idle: Duration) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                engine,
                default_role_ids,
                lanes: DashMap::new(),
                idle,
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.inner.engine
    }

    /// Number of identities with a live lane.
    #[must_use]
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Queue an event without waiting for its result.
    pub fn dispatch_event(&self, event: GuildEvent) -> SyncResult<()> {
        let key = event.identity().external_id.clone();
        debug!(external_id = %key, kind = event.kind(), "Queueing guild event");
        self.enqueue(
            &key,
            Job::Event {
                event,
                queued_at: Instant::now(),
                reply: None,
            },
        )
    }

    /// Queue an event and wait for its outcome.
    pub async fn handle_event(&self, event: GuildEvent) -> SyncResult<MembershipOutcome> {
        let key = event.identity().external_id.clone();
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            &key,
            Job::Event {
                event,
                queued_at: Instant::now(),
                reply: Some(reply),
            },
        )?;
        rx.await.map_err(|_| SyncError::DispatcherClosed)?
    }

    /// Queue a login reconciliation for an already resolved identity.
    pub fn dispatch_login(
        &self,
        identity: ExternalIdentity,
    ) -> SyncResult<oneshot::Receiver<SyncResult<LoginOutcome>>> {
        let key = identity.external_id.clone();
        let (reply, rx) = oneshot::channel();
        self.enqueue(
            &key,
            Job::Login {
                identity,
                queued_at: Instant::now(),
                reply,
            },
        )?;
        Ok(rx)
    }

    /// Full interactive login.
    ///
    /// The code exchange runs on the caller's task; only the reconciliation
    /// goes through the identity's lane.
    pub async fn login(&self, code: &str, redirect_uri: &str) -> SyncResult<LoginOutcome> {
        if self.is_closed() {
            return Err(SyncError::DispatcherClosed);
        }
        let identity = self.inner.engine.resolve_identity(code, redirect_uri).await?;
        let rx = self.dispatch_login(identity)?;
        rx.await.map_err(|_| SyncError::DispatcherClosed)?
    }

    /// Pull events from `source` until it closes or the dispatcher shuts down.
    pub async fn run<S: EventSource>(&self, mut source: S) {
        info!("Event dispatcher started");
        while let Some(event) = source.next_event().await {
            if let Err(e) = self.dispatch_event(event) {
                warn!(error = %e, "Dropping guild event");
                if matches!(e, SyncError::DispatcherClosed) {
                    break;
                }
            }
        }
        info!("Event dispatcher stopped");
    }

    /// Stop accepting work. Queued jobs are still processed.
    pub fn shutdown(&self) {
        info!(lanes = self.active_lanes(), "Shutting down event dispatcher");
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.lanes.clear();
    }

    fn enqueue(&self, key: &str, job: Job) -> SyncResult<()> {
        let mut job = job;
        loop {
            if self.is_closed() {
                return Err(SyncError::DispatcherClosed);
            }

            let sender = self
                .inner
                .lanes
                .entry(key.to_string())
                .or_insert_with(|| spawn_lane(Arc::clone(&self.inner), key.to_string()))
                .clone();

            match sender.send(job) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    // lane worker exited between lookup and send
                    job = returned;
                    self.inner
                        .lanes
                        .remove_if(key, |_, current| current.same_channel(&sender));
                }
            }
        }
    }
}

fn spawn_lane(inner: Arc<DispatcherInner>, key: String) -> mpsc::UnboundedSender<Job> {
    let (tx, rx) = mpsc::unbounded_channel();
    debug!(external_id = %key, "Opening dispatch lane");
    tokio::spawn(run_lane(inner, key, rx));
    tx
}

async fn run_lane(inner: Arc<DispatcherInner>, key: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    loop {
        match tokio::time::timeout(inner.idle, rx.recv()).await {
            Ok(Some(job)) => inner.process(job).await,
            Ok(None) => break,
            Err(_) => {
                if inner.lanes.remove_if(&key, |_, _| rx.is_empty()).is_some() {
                    // a sender cloned before removal may still deliver
                    rx.close();
                    while let Some(job) = rx.recv().await {
                        inner.process(job).await;
                    }
                    break;
                }
            }
        }
    }
    debug!(external_id = %key, "Closed dispatch lane");
}

impl DispatcherInner {
    async fn process(&self, job: Job) {
        match job {
            Job::Event {
                event,
                queued_at,
                reply,
            } => {
                let external_id = event.identity().external_id.clone();
                debug!(
                    external_id = %external_id,
                    kind = event.kind(),
                    waited_ms = queued_at.elapsed().as_millis() as u64,
                    "Processing guild event"
                );
                let result = self.process_event(&event).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            error!(
                                external_id = %external_id,
                                kind = event.kind(),
                                error = %e,
                                "Guild event reconciliation failed"
                            );
                        }
                    }
                }
            }
            Job::Login {
                identity,
                queued_at,
                reply,
            } => {
                debug!(
                    external_id = %identity.external_id,
                    waited_ms = queued_at.elapsed().as_millis() as u64,
                    "Processing login"
                );
                let result = self.engine.reconcile_login_identity(identity).await;
                if reply.send(result).is_err() {
                    debug!("Login caller went away before the result was ready");
                }
            }
        }
    }

    /// Updates may adopt an unlinked account by name. Joins and leaves only
    /// act on accounts already linked to the identity.
    async fn process_event(&self, event: &GuildEvent) -> SyncResult<MembershipOutcome> {
        let (identity, snapshot, lookup) = match event {
            GuildEvent::MemberUpdated {
                identity,
                role_names,
            } => (
                identity,
                MembershipSnapshot::member(role_names.iter().cloned()),
                AccountLookup::LinkedOrName,
            ),
            GuildEvent::MemberJoined {
                identity,
                role_names,
            } => {
                let mut roles = role_names.clone();
                roles.extend(self.grant_default_roles(identity).await);
                (identity, MembershipSnapshot::member(roles), AccountLookup::Linked)
            }
            GuildEvent::MemberLeft { identity } => (
                identity,
                MembershipSnapshot::not_member(),
                AccountLookup::Linked,
            ),
        };

        self.engine
            .reconcile_membership_change(identity, &snapshot, lookup)
            .await
    }

    async fn grant_default_roles(&self, identity: &ExternalIdentity) -> Vec<String> {
        if self.default_role_ids.is_empty() {
            return Vec::new();
        }
        match self
            .engine
            .membership()
            .grant_default_roles(&identity.external_id, &self.default_role_ids)
            .await
        {
            Ok(granted) => {
                info!(
                    external_id = %identity.external_id,
                    granted = granted.len(),
                    "Granted default roles"
                );
                granted.into_iter().collect()
            }
            Err(e) => {
                warn!(
                    external_id = %identity.external_id,
                    error = %e,
                    "Failed to grant default roles"
                );
                Vec::new()
            }
        }
    }
}
