//! The agent state machine.
//!
//! [`Agent::step`] is the single entry point: it consumes one input
//! event and returns the replies, forwards, depot commands and timer
//! requests for the runtime to deliver. All state lives inside the
//! agent; no I/O, no ambient clock.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use blobdepot_types::{GroupId, Monotonic, TabletId};

use crate::clock::Clock;
use crate::depot::{DepotCommand, DepotResponse};
use crate::error::AgentError;
use crate::event::{ClientRequest, EventEnvelope, Reply, ReplyEnvelope};
use crate::pending::PendingQueue;
use crate::query::{Membership, Query, QueryKey, QueryRegistry, QueryStep};

/// Cadence of both watchdog timers.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// Wall-clock budget of one pending-queue drain before yielding.
const DRAIN_BUDGET: Duration = Duration::from_millis(1);

/// Agent tunables, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// The virtual group this agent serves; echoed in every reply.
    pub virtual_group_id: GroupId,

    /// Byte cap on the pending event queue.
    pub max_pending_bytes: usize,

    /// How long a deferred event may wait before timing out.
    pub event_expiration_time: Duration,

    /// How long a query may run before the watchdog flags it.
    pub query_watchdog_duration: Duration,

    /// Seed for the query id RNG; `None` seeds from entropy. Tests pin
    /// this for reproducible ids.
    pub rng_seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            virtual_group_id: GroupId::new(0),
            max_pending_bytes: 32 << 20,
            event_expiration_time: Duration::from_secs(60),
            query_watchdog_duration: Duration::from_secs(10),
            rng_seed: None,
        }
    }
}

/// Inputs the agent reacts to.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A client request arrived.
    Client(EventEnvelope),

    /// The depot answered a previously issued command.
    Depot(DepotResponse),

    /// The upstream depot connection came up. The depot tablet identity
    /// may still be unresolved; queries created without one terminate
    /// immediately with a group error.
    Connected { tablet_id: Option<TabletId> },

    /// The upstream depot connection went away.
    Disconnected { reason: String },

    /// A previously requested timer fired.
    Timer(TimerKind),
}

/// The agent's internal timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Continue a yielded pending-queue drain.
    ProcessPendingEvent,
    /// Expire timed-out pending entries.
    PendingQueueWatchdog,
    /// Flag long-running queries.
    QueryWatchdog,
}

/// A timer the runtime must arm on the agent's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub kind: TimerKind,
    pub after: Duration,
}

/// Everything one step asks the runtime to deliver.
#[derive(Debug, Default)]
pub struct AgentOutput {
    /// Replies to clients.
    pub replies: Vec<ReplyEnvelope>,

    /// Events handed to the pass-through proxy, identity preserved.
    pub forwards: Vec<EventEnvelope>,

    /// Commands for the depot.
    pub depot_commands: Vec<DepotCommand>,

    /// Timers to (re)arm.
    pub timers: Vec<TimerRequest>,
}

/// In-process request router for one virtual group.
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    tablet_id: Option<TabletId>,
    connected: bool,
    pending: PendingQueue,
    registry: QueryRegistry,
    process_pending_in_flight: bool,
    rng: ChaCha8Rng,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            pending: PendingQueue::new(config.max_pending_bytes),
            registry: QueryRegistry::new(config.query_watchdog_duration),
            tablet_id: None,
            connected: false,
            process_pending_in_flight: false,
            rng,
            config,
        }
    }

    /// Arms the periodic watchdog timers. Call once after construction.
    pub fn start(&mut self) -> AgentOutput {
        let mut out = AgentOutput::default();
        out.timers.push(TimerRequest {
            kind: TimerKind::PendingQueueWatchdog,
            after: WATCHDOG_INTERVAL,
        });
        out.timers.push(TimerRequest {
            kind: TimerKind::QueryWatchdog,
            after: WATCHDOG_INTERVAL,
        });
        out
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn tablet_id(&self) -> Option<TabletId> {
        self.tablet_id
    }

    pub fn pending_queue(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    /// True while a yielded drain has a continuation tick in flight.
    pub fn process_pending_in_flight(&self) -> bool {
        self.process_pending_in_flight
    }

    /// Processes one input event. Physically destroys any queries that
    /// terminated during this step before returning.
    pub fn step<C: Clock>(&mut self, clock: &C, event: AgentEvent) -> AgentOutput {
        let mut out = AgentOutput::default();
        match event {
            AgentEvent::Client(envelope) => self.handle_client_event(clock, &mut out, envelope),
            AgentEvent::Depot(response) => self.handle_depot_response(&mut out, response),
            AgentEvent::Connected { tablet_id } => {
                self.connected = true;
                self.tablet_id = tablet_id;
                debug!(tablet = ?tablet_id, "depot connected");
                self.handle_pending_events(clock, &mut out);
            }
            AgentEvent::Disconnected { reason } => {
                self.connected = false;
                debug!(%reason, "depot disconnected");
                self.clear_pending_event_queue(clock, &mut out, &reason);
                self.fail_in_flight_queries(&mut out, &reason);
            }
            AgentEvent::Timer(kind) => self.handle_timer(clock, &mut out, kind),
        }
        self.registry.sweep(clock.monotonic());
        out
    }

    // ========================================================================
    // Client events
    // ========================================================================

    fn handle_client_event(
        &mut self,
        clock: &impl Clock,
        out: &mut AgentOutput,
        envelope: EventEnvelope,
    ) {
        // Decommissioned reads and assimilation bypass the agent: the
        // event moves to the proxy with sender and cookie intact.
        if envelope.request.decommission()
            || matches!(envelope.request, ClientRequest::Assimilate(_))
        {
            out.forwards.push(envelope);
            return;
        }

        let size = envelope.request.calculate_size();
        if !self.connected && !self.pending.fits(size) {
            let key = self.create_query(clock, envelope);
            self.end_with_error(out, key, AgentError::QueueOverflow);
            return;
        }

        if !self.connected || !self.pending.is_empty() {
            let expires_at = clock.monotonic() + self.config.event_expiration_time;
            self.pending.push(envelope, size, expires_at);
        } else {
            self.process_storage_event(clock, out, envelope);
        }
    }

    /// Constructs a query for an accepted event and initiates it, or
    /// terminates it straight away when no depot is bound.
    fn process_storage_event(
        &mut self,
        clock: &impl Clock,
        out: &mut AgentOutput,
        envelope: EventEnvelope,
    ) {
        let key = self.create_query(clock, envelope);
        let query = self.registry.get(key).expect("freshly created query");
        debug!(
            group = %self.config.virtual_group_id,
            query_id = %query.display_id(),
            name = query.name(),
            "new query"
        );
        if self.tablet_id.is_none() {
            self.end_with_error(out, key, AgentError::GroupError);
            return;
        }
        let (command, membership) = self.registry.get_mut(key).initiate();
        self.registry.link(key, membership);
        out.depot_commands.push(command);
    }

    fn create_query(&mut self, clock: &impl Clock, envelope: EventEnvelope) -> QueryKey {
        let query = Query::new(
            self.rng.gen::<u64>(),
            self.tablet_id,
            self.config.virtual_group_id,
            envelope,
            clock.monotonic(),
            self.config.query_watchdog_duration,
        );
        self.registry.insert(query)
    }

    // ========================================================================
    // Pending queue
    // ========================================================================

    /// Drains the pending queue front-to-back, handing each event to the
    /// query constructor. Yields after the drain budget elapses with the
    /// queue still non-empty: a continuation tick is scheduled and the
    /// in-flight flag stops a second tick from stacking.
    fn handle_pending_events(&mut self, clock: &impl Clock, out: &mut AgentOutput) {
        let start = clock.monotonic();
        while !self.pending.is_empty() {
            let envelope = self.pending.pop_front();
            self.process_storage_event(clock, out, envelope);
            if !self.pending.is_empty()
                && clock.monotonic().saturating_since(start) >= DRAIN_BUDGET
            {
                if !self.process_pending_in_flight {
                    self.process_pending_in_flight = true;
                    out.timers.push(TimerRequest {
                        kind: TimerKind::ProcessPendingEvent,
                        after: Duration::ZERO,
                    });
                }
                break;
            }
        }
    }

    /// Terminates every deferred event with the given reason.
    fn clear_pending_event_queue(
        &mut self,
        clock: &impl Clock,
        out: &mut AgentOutput,
        reason: &str,
    ) {
        for envelope in self.pending.clear() {
            let key = self.create_query(clock, envelope);
            self.end_with_error(out, key, AgentError::Disconnect(reason.to_owned()));
        }
    }

    /// Terminates every in-flight query; the depot will not answer them
    /// any more.
    fn fail_in_flight_queries(&mut self, out: &mut AgentOutput, reason: &str) {
        for membership in Membership::ALL {
            for key in self.registry.members(membership) {
                self.end_with_error(out, key, AgentError::Disconnect(reason.to_owned()));
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn handle_timer(&mut self, clock: &impl Clock, out: &mut AgentOutput, kind: TimerKind) {
        match kind {
            TimerKind::ProcessPendingEvent => {
                assert!(
                    self.process_pending_in_flight,
                    "continuation tick without a yielded drain"
                );
                self.process_pending_in_flight = false;
                self.handle_pending_events(clock, out);
            }
            TimerKind::PendingQueueWatchdog => {
                if !self.connected {
                    let now = clock.monotonic();
                    for envelope in self.pending.drain_expired(now) {
                        let key = self.create_query(clock, envelope);
                        self.end_with_error(out, key, AgentError::QueueTimeout);
                    }
                }
                out.timers.push(TimerRequest {
                    kind: TimerKind::PendingQueueWatchdog,
                    after: WATCHDOG_INTERVAL,
                });
            }
            TimerKind::QueryWatchdog => {
                self.registry.watchdog_tick(clock.monotonic());
                out.timers.push(TimerRequest {
                    kind: TimerKind::QueryWatchdog,
                    after: WATCHDOG_INTERVAL,
                });
            }
        }
    }

    // ========================================================================
    // Depot responses
    // ========================================================================

    fn handle_depot_response(&mut self, out: &mut AgentOutput, response: DepotResponse) {
        let Some(key) = self.registry.lookup(response.query_id) else {
            debug!(
                query_id = %format_args!("{:x}", response.query_id),
                "response for unknown query"
            );
            return;
        };
        match response.result {
            Err(depot_error) => self.end_with_error(
                out,
                key,
                AgentError::Protocol {
                    status: depot_error.status,
                    reason: depot_error.reason,
                },
            ),
            Ok(payload) => match self.registry.get_mut(key).on_depot_payload(payload) {
                QueryStep::Issue(command, membership) => {
                    self.registry.relink(key, membership);
                    out.depot_commands.push(command);
                }
                QueryStep::Succeed(reply) => self.end_with_success(out, key, reply),
                QueryStep::Fail(status, reason) => self.end_with_error(
                    out,
                    key,
                    AgentError::Protocol { status, reason },
                ),
            },
        }
    }

    // ========================================================================
    // Termination
    // ========================================================================

    fn end_with_success(&mut self, out: &mut AgentOutput, key: QueryKey, reply: Reply) {
        let query = self.registry.terminate(key);
        debug!(
            group = %self.config.virtual_group_id,
            query_id = %query.display_id(),
            name = query.name(),
            "query ends with success"
        );
        out.replies.push(ReplyEnvelope {
            to: query.event().sender,
            cookie: query.event().cookie,
            reply,
        });
    }

    fn end_with_error(&mut self, out: &mut AgentOutput, key: QueryKey, error: AgentError) {
        let status = error.status();
        let reason = error.to_string();
        let query = self.registry.terminate(key);
        info!(
            group = %self.config.virtual_group_id,
            query_id = %query.display_id(),
            name = query.name(),
            ?status,
            %reason,
            "query ends with error"
        );
        let reply =
            query
                .event()
                .request
                .error_response(status, reason, self.config.virtual_group_id);
        out.replies.push(ReplyEnvelope {
            to: query.event().sender,
            cookie: query.event().cookie,
            reply,
        });
    }
}
