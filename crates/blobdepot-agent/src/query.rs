//! Query lifecycle and the registry that owns it.
//!
//! A query is one in-flight client request. It is constructed when the
//! agent accepts an event, lives in an arena owned by [`QueryRegistry`],
//! and terminates exactly once with either success or a taxonomised
//! error. The registry also maintains:
//!
//! - a deadline-ordered watchdog index that periodically flags
//!   long-running queries,
//! - three intrusive membership lists (executing, pending block checks,
//!   pending id) with O(1) unlink from any of them,
//! - a destruction list of terminated queries, swept at the end of the
//!   dispatch step that terminated them.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use slotmap::{new_key_type, SlotMap};
use tracing::{debug, info};

use blobdepot_types::{GroupId, Monotonic, TabletId};

use crate::depot::{DepotCommand, DepotPayload};
use crate::event::{
    BlockResult, ClientRequest, CollectGarbageResult, DiscoverResult, EventEnvelope, GetResult,
    PatchResult, PutResult, RangeResult, Reply, ReplyStatus, StatusResult,
};

new_key_type! {
    /// Stable handle of a query in the registry arena.
    pub struct QueryKey;
}

/// The intrusive lists a query may be linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Waiting on its final depot command.
    Executing,
    /// Waiting for a tablet block check.
    PendingBlockChecks,
    /// Waiting for a write sequence lease.
    PendingId,
}

impl Membership {
    pub const ALL: [Membership; 3] = [
        Membership::Executing,
        Membership::PendingBlockChecks,
        Membership::PendingId,
    ];

    fn index(self) -> usize {
        match self {
            Membership::Executing => 0,
            Membership::PendingBlockChecks => 1,
            Membership::PendingId => 2,
        }
    }
}

/// Per-list prev/next links stored inside the query itself, so removal
/// is O(1) from any list.
#[derive(Debug, Clone, Copy, Default)]
struct Links {
    member: bool,
    prev: Option<QueryKey>,
    next: Option<QueryKey>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ListHead {
    head: Option<QueryKey>,
    tail: Option<QueryKey>,
    len: usize,
}

/// Watchdog log level: the first "still executing" warning goes out
/// quietly, subsequent ones at notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchdogLevel {
    Debug,
    Notice,
}

/// Multi-step progress of a query between construction and termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Created,
    CheckingBlock,
    AllocatingId,
    Executing,
}

/// What the registry should do after a query digested a depot payload.
#[derive(Debug)]
pub(crate) enum QueryStep {
    /// Issue the next depot command and move to the given list.
    Issue(DepotCommand, Membership),
    /// Terminate with success.
    Succeed(Reply),
    /// Terminate with an error.
    Fail(ReplyStatus, String),
}

/// One in-flight client request.
#[derive(Debug)]
pub struct Query {
    id: u64,
    display_id: String,
    event: EventEnvelope,
    group: GroupId,
    progress: Progress,
    start_time: Monotonic,
    watchdog_deadline: Monotonic,
    watchdog_level: WatchdogLevel,
    destroyed: bool,
    links: [Links; 3],
}

impl Query {
    pub(crate) fn new(
        id: u64,
        tablet: Option<TabletId>,
        group: GroupId,
        event: EventEnvelope,
        start_time: Monotonic,
        watchdog_duration: Duration,
    ) -> Self {
        // Derived once; identity stays stable for the query's lifetime.
        let display_id = match tablet {
            Some(tablet) => format!("{id:x}@{tablet}"),
            None => format!("{id:x}"),
        };
        Self {
            id,
            display_id,
            event,
            group,
            progress: Progress::Created,
            start_time,
            watchdog_deadline: start_time + watchdog_duration,
            watchdog_level: WatchdogLevel::Debug,
            destroyed: false,
            links: [Links::default(); 3],
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hex query id, suffixed with the depot tablet when known.
    pub fn display_id(&self) -> &str {
        &self.display_id
    }

    /// Request kind name for diagnostics.
    pub fn name(&self) -> &'static str {
        self.event.request.name()
    }

    pub fn event(&self) -> &EventEnvelope {
        &self.event
    }

    pub fn start_time(&self) -> Monotonic {
        self.start_time
    }

    pub fn destroyed(&self) -> bool {
        self.destroyed
    }

    /// Issues the first depot command for this query.
    ///
    /// Writes are fenced by tablet blocks, so `Put` and `Patch` check
    /// the block state first; everything else goes straight to its
    /// final command.
    pub(crate) fn initiate(&mut self) -> (DepotCommand, Membership) {
        assert_eq!(
            self.progress,
            Progress::Created,
            "query {} initiated twice",
            self.display_id
        );
        let query_id = self.id;
        match &self.event.request {
            ClientRequest::Get(get) => {
                self.progress = Progress::Executing;
                (
                    DepotCommand::ResolveBlob {
                        query_id,
                        blob: get.blob,
                        shift: get.shift,
                        size: get.size,
                    },
                    Membership::Executing,
                )
            }
            ClientRequest::Put(put) => {
                self.progress = Progress::CheckingBlock;
                (
                    DepotCommand::CheckBlock {
                        query_id,
                        tablet: put.blob.tablet,
                    },
                    Membership::PendingBlockChecks,
                )
            }
            ClientRequest::Block(block) => {
                self.progress = Progress::Executing;
                (
                    DepotCommand::BlockTablet {
                        query_id,
                        tablet: block.tablet,
                        generation: block.generation,
                    },
                    Membership::Executing,
                )
            }
            ClientRequest::Discover(discover) => {
                self.progress = Progress::Executing;
                (
                    DepotCommand::Discover {
                        query_id,
                        tablet: discover.tablet,
                        read_body: discover.read_body,
                    },
                    Membership::Executing,
                )
            }
            ClientRequest::Range(range) => {
                self.progress = Progress::Executing;
                (
                    DepotCommand::ListRange {
                        query_id,
                        tablet: range.tablet,
                        from: range.from,
                        to: range.to,
                    },
                    Membership::Executing,
                )
            }
            ClientRequest::CollectGarbage(collect) => {
                self.progress = Progress::Executing;
                (
                    DepotCommand::CollectGarbage {
                        query_id,
                        tablet: collect.tablet,
                        record_generation: collect.record_generation,
                        collect_generation: collect.collect_generation,
                        collect_step: collect.collect_step,
                    },
                    Membership::Executing,
                )
            }
            ClientRequest::Status(_) => {
                self.progress = Progress::Executing;
                (DepotCommand::QueryStatus { query_id }, Membership::Executing)
            }
            ClientRequest::Patch(patch) => {
                self.progress = Progress::CheckingBlock;
                (
                    DepotCommand::CheckBlock {
                        query_id,
                        tablet: patch.original.tablet,
                    },
                    Membership::PendingBlockChecks,
                )
            }
            ClientRequest::Assimilate(_) => {
                unreachable!("assimilate events are forwarded to the proxy")
            }
        }
    }

    /// Digests one depot payload and decides the next lifecycle step.
    pub(crate) fn on_depot_payload(&mut self, payload: DepotPayload) -> QueryStep {
        let query_id = self.id;
        let group = self.group;
        match (self.progress, &self.event.request, payload) {
            (
                Progress::CheckingBlock,
                ClientRequest::Put(put),
                DepotPayload::BlockChecked { blocked_generation },
            ) => {
                if blocked_generation.is_some_and(|blocked| put.blob.generation <= blocked) {
                    return QueryStep::Fail(ReplyStatus::Error, "tablet is blocked".to_owned());
                }
                self.progress = Progress::AllocatingId;
                QueryStep::Issue(DepotCommand::AllocateId { query_id }, Membership::PendingId)
            }

            (
                Progress::AllocatingId,
                ClientRequest::Put(put),
                DepotPayload::IdAllocated { sequence },
            ) => {
                self.progress = Progress::Executing;
                QueryStep::Issue(
                    DepotCommand::WriteBlob {
                        query_id,
                        blob: put.blob,
                        data: put.data.clone(),
                        sequence,
                    },
                    Membership::Executing,
                )
            }

            (Progress::Executing, ClientRequest::Put(put), DepotPayload::Written) => {
                QueryStep::Succeed(Reply::Put(PutResult {
                    status: ReplyStatus::Ok,
                    reason: None,
                    group,
                    blob: put.blob,
                }))
            }

            (
                Progress::CheckingBlock,
                ClientRequest::Patch(patch),
                DepotPayload::BlockChecked { blocked_generation },
            ) => {
                if blocked_generation.is_some_and(|blocked| patch.patched.generation <= blocked) {
                    return QueryStep::Fail(ReplyStatus::Error, "tablet is blocked".to_owned());
                }
                self.progress = Progress::Executing;
                QueryStep::Issue(
                    DepotCommand::PatchBlob {
                        query_id,
                        original: patch.original,
                        patched: patch.patched,
                        diffs: patch.diffs.clone(),
                    },
                    Membership::Executing,
                )
            }

            (Progress::Executing, ClientRequest::Patch(patch), DepotPayload::Patched) => {
                QueryStep::Succeed(Reply::Patch(PatchResult {
                    status: ReplyStatus::Ok,
                    reason: None,
                    group,
                    blob: patch.patched,
                }))
            }

            (Progress::Executing, ClientRequest::Get(_), DepotPayload::Blob { data }) => {
                QueryStep::Succeed(Reply::Get(GetResult {
                    status: ReplyStatus::Ok,
                    reason: None,
                    group,
                    data,
                }))
            }

            (Progress::Executing, ClientRequest::Block(_), DepotPayload::Blocked) => {
                QueryStep::Succeed(Reply::Block(BlockResult {
                    status: ReplyStatus::Ok,
                    reason: None,
                    group,
                }))
            }

            (
                Progress::Executing,
                ClientRequest::Discover(_),
                DepotPayload::Discovered { last_blob, data },
            ) => QueryStep::Succeed(Reply::Discover(DiscoverResult {
                status: ReplyStatus::Ok,
                reason: None,
                group,
                last_blob,
                data,
            })),

            (Progress::Executing, ClientRequest::Range(_), DepotPayload::Range { blobs }) => {
                QueryStep::Succeed(Reply::Range(RangeResult {
                    status: ReplyStatus::Ok,
                    reason: None,
                    group,
                    blobs,
                }))
            }

            (
                Progress::Executing,
                ClientRequest::CollectGarbage(_),
                DepotPayload::Collected,
            ) => QueryStep::Succeed(Reply::CollectGarbage(CollectGarbageResult {
                status: ReplyStatus::Ok,
                reason: None,
                group,
            })),

            (Progress::Executing, ClientRequest::Status(_), DepotPayload::Status { flags }) => {
                QueryStep::Succeed(Reply::Status(StatusResult {
                    status: ReplyStatus::Ok,
                    reason: None,
                    group,
                    flags: Some(flags),
                }))
            }

            (_, _, payload) => QueryStep::Fail(
                ReplyStatus::Error,
                format!("unexpected depot response {payload:?}"),
            ),
        }
    }
}

/// Lifecycle owner of every live query.
#[derive(Debug)]
pub struct QueryRegistry {
    arena: SlotMap<QueryKey, Query>,
    by_id: HashMap<u64, QueryKey>,
    watchdog: BTreeMap<(Monotonic, QueryKey), ()>,
    lists: [ListHead; 3],
    destroy_list: Vec<QueryKey>,
    watchdog_duration: Duration,
}

impl QueryRegistry {
    pub fn new(watchdog_duration: Duration) -> Self {
        Self {
            arena: SlotMap::with_key(),
            by_id: HashMap::new(),
            watchdog: BTreeMap::new(),
            lists: [ListHead::default(); 3],
            destroy_list: Vec::new(),
            watchdog_duration,
        }
    }

    pub fn watchdog_duration(&self) -> Duration {
        self.watchdog_duration
    }

    /// Number of live (not yet terminated) queries.
    pub fn live_len(&self) -> usize {
        self.arena.len() - self.destroy_list.len()
    }

    /// Number of entries in the deadline index; equals [`Self::live_len`]
    /// whenever the registry is consistent.
    pub fn watchdog_len(&self) -> usize {
        self.watchdog.len()
    }

    pub fn list_len(&self, membership: Membership) -> usize {
        self.lists[membership.index()].len
    }

    pub fn get(&self, key: QueryKey) -> Option<&Query> {
        self.arena.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: QueryKey) -> &mut Query {
        &mut self.arena[key]
    }

    /// Finds the live query that issued the command with this id.
    pub fn lookup(&self, query_id: u64) -> Option<QueryKey> {
        self.by_id.get(&query_id).copied()
    }

    /// Admits a freshly constructed query: arena, id index and deadline
    /// index.
    pub(crate) fn insert(&mut self, query: Query) -> QueryKey {
        let id = query.id;
        let deadline = query.watchdog_deadline;
        let key = self.arena.insert(query);
        let previous = self.by_id.insert(id, key);
        debug_assert!(previous.is_none(), "duplicate query id {id:x}");
        self.watchdog.insert((deadline, key), ());
        key
    }

    /// Links a query at the tail of a membership list.
    pub(crate) fn link(&mut self, key: QueryKey, membership: Membership) {
        let index = membership.index();
        let tail = self.lists[index].tail;
        {
            let links = &mut self.arena[key].links[index];
            assert!(!links.member, "query already linked in {membership:?}");
            links.member = true;
            links.prev = tail;
            links.next = None;
        }
        match tail {
            Some(tail_key) => self.arena[tail_key].links[index].next = Some(key),
            None => self.lists[index].head = Some(key),
        }
        self.lists[index].tail = Some(key);
        self.lists[index].len += 1;
    }

    /// Unlinks a query from one membership list; no-op if not a member.
    pub(crate) fn unlink(&mut self, key: QueryKey, membership: Membership) {
        let index = membership.index();
        let links = self.arena[key].links[index];
        if !links.member {
            return;
        }
        match links.prev {
            Some(prev) => self.arena[prev].links[index].next = links.next,
            None => self.lists[index].head = links.next,
        }
        match links.next {
            Some(next) => self.arena[next].links[index].prev = links.prev,
            None => self.lists[index].tail = links.prev,
        }
        self.arena[key].links[index] = Links::default();
        self.lists[index].len -= 1;
    }

    /// Moves a query to `membership`, unlinking it from wherever it was.
    pub(crate) fn relink(&mut self, key: QueryKey, membership: Membership) {
        for list in Membership::ALL {
            self.unlink(key, list);
        }
        self.link(key, membership);
    }

    /// Keys currently linked in a membership list, head first.
    pub fn members(&self, membership: Membership) -> Vec<QueryKey> {
        let index = membership.index();
        let mut keys = Vec::with_capacity(self.lists[index].len);
        let mut cursor = self.lists[index].head;
        while let Some(key) = cursor {
            keys.push(key);
            cursor = self.arena[key].links[index].next;
        }
        keys
    }

    /// Terminates a query exactly once: removes it from the id and
    /// deadline indexes, tombstones every membership link and appends it
    /// to the destruction list. The query stays readable until the
    /// dispatch step ends.
    ///
    /// # Panics
    ///
    /// Panics on double termination.
    pub(crate) fn terminate(&mut self, key: QueryKey) -> &Query {
        let (id, deadline) = {
            let query = &self.arena[key];
            assert!(
                !query.destroyed,
                "query {} terminated twice",
                query.display_id
            );
            (query.id, query.watchdog_deadline)
        };
        self.watchdog.remove(&(deadline, key));
        self.by_id.remove(&id);
        for list in Membership::ALL {
            self.unlink(key, list);
        }
        let query = &mut self.arena[key];
        query.destroyed = true;
        self.destroy_list.push(key);
        &self.arena[key]
    }

    /// Walks expired deadline-index entries in order, logging "still
    /// executing" for each and re-arming it one watchdog period out.
    /// Stops at the first non-expired entry.
    pub(crate) fn watchdog_tick(&mut self, now: Monotonic) {
        loop {
            let Some((&(deadline, key), _)) = self.watchdog.iter().next() else {
                break;
            };
            if deadline > now {
                break;
            }
            self.watchdog.remove(&(deadline, key));

            let duration = now - self.arena[key].start_time;
            let query = &mut self.arena[key];
            match query.watchdog_level {
                WatchdogLevel::Debug => debug!(
                    query_id = %query.display_id,
                    name = query.name(),
                    ?duration,
                    "query is still executing"
                ),
                WatchdogLevel::Notice => info!(
                    query_id = %query.display_id,
                    name = query.name(),
                    ?duration,
                    "query is still executing"
                ),
            }
            query.watchdog_level = WatchdogLevel::Notice;
            query.watchdog_deadline = now + self.watchdog_duration;
            let deadline = query.watchdog_deadline;
            self.watchdog.insert((deadline, key), ());
        }
    }

    /// Physically destroys terminated queries. Called at the end of each
    /// dispatch step.
    pub(crate) fn sweep(&mut self, now: Monotonic) {
        for key in std::mem::take(&mut self.destroy_list) {
            let query = self
                .arena
                .remove(key)
                .expect("destruction list entries outlive the sweep");
            let duration = now.saturating_since(query.start_time);
            if duration >= self.watchdog_duration {
                info!(
                    query_id = %query.display_id,
                    name = query.name(),
                    ?duration,
                    "query execution took too much time"
                );
            }
        }
    }
}
