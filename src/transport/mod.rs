//! The low-level transport this crate orchestrates.
//!
//! Everything below this trait (raw queues, shared buffers, device memory,
//! memory groups, the broker's event channel and pid lookup) lives outside the
//! crate. [`sim::SimTransport`] provides an in-memory implementation.

pub mod sim;

use bytes::Bytes;

use crate::core::attr::QueueAttr;
use crate::core::buffer::{BufHandle, BufType, Permission};

/// Raw status code returned by transport primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RtError(i32);

impl RtError {
    pub const PARAM_INVALID: RtError = RtError(107_000);
    pub const NOT_FOUND: RtError = RtError(107_003);
    pub const NO_PERMISSION: RtError = RtError(107_011);
    pub const INVALID_HANDLE: RtError = RtError(107_017);
    pub const QUEUE_EMPTY: RtError = RtError(207_013);
    pub const QUEUE_FULL: RtError = RtError(207_014);
    pub const REPEATED_INIT: RtError = RtError(207_015);
    pub const NO_MEMORY: RtError = RtError(207_001);
    pub const INTERNAL: RtError = RtError(507_899);

    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for RtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport error {}", self.0)
    }
}

impl std::error::Error for RtError {}

pub type RtResult<T> = Result<T, RtError>;

/// Execution mode reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Host,
    Device,
    Other(u32),
}

/// Which cooperating device process a pid lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    ControlCpu,
    Broker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DstEngine {
    AcpuDevice,
    CcpuDevice,
}

/// One synchronous control message to the broker.
#[derive(Debug, Clone)]
pub struct EventSummary {
    pub pid: i32,
    pub grp_id: u32,
    pub event_id: u32,
    pub sub_event_id: u32,
    pub dst_engine: DstEngine,
    pub msg: Bytes,
}

/// Rights a process holds inside a device memory group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupRights {
    pub admin: bool,
    pub read: bool,
    pub write: bool,
    pub alloc: bool,
}

impl GroupRights {
    pub const FULL: GroupRights = GroupRights {
        admin: true,
        read: true,
        write: true,
        alloc: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemGroupInfo {
    pub name: String,
    pub rights: GroupRights,
}

pub trait Transport: Send + Sync {
    // ── environment ───────────────────────────────────────
    fn run_mode(&self) -> RtResult<RunMode>;
    fn current_device(&self) -> RtResult<i32>;
    fn current_pid(&self) -> i32 {
        std::process::id() as i32
    }
    fn query_dev_pid(&self, device: i32, host_pid: i32, role: ProcessRole) -> RtResult<i32>;

    // ── queues ────────────────────────────────────────────
    fn queue_init(&self, device: i32) -> RtResult<()>;
    fn queue_init_broker(&self, device: i32) -> RtResult<()>;
    fn queue_create(&self, device: i32, attr: &QueueAttr) -> RtResult<u32>;
    fn queue_destroy(&self, device: i32, qid: u32) -> RtResult<()>;
    /// Non-blocking; `QUEUE_FULL` when there is no room.
    fn queue_enqueue(&self, device: i32, qid: u32, buf: BufHandle) -> RtResult<()>;
    /// Non-blocking; `QUEUE_EMPTY` when nothing is queued.
    fn queue_dequeue(&self, device: i32, qid: u32) -> RtResult<BufHandle>;
    fn queue_enqueue_buff(
        &self,
        device: i32,
        qid: u32,
        data: &[u8],
        user_data: &[u8],
        timeout_ms: i32,
    ) -> RtResult<()>;
    /// Size of the payload at the head of the queue.
    fn queue_peek(&self, device: i32, qid: u32, timeout_ms: i32) -> RtResult<usize>;
    fn queue_dequeue_buff(
        &self,
        device: i32,
        qid: u32,
        data: &mut [u8],
        user_data: &mut [u8],
        timeout_ms: i32,
    ) -> RtResult<()>;
    fn queue_grant(&self, device: i32, qid: u32, pid: i32, permission: Permission) -> RtResult<()>;
    fn queue_attach(&self, device: i32, qid: u32, timeout_ms: i32) -> RtResult<()>;
    fn queue_permission(&self, device: i32, qid: u32) -> RtResult<Permission>;

    // ── shared buffers ────────────────────────────────────
    fn mbuf_init(&self) -> RtResult<()>;
    fn mbuf_alloc(&self, size: usize) -> RtResult<BufHandle>;
    fn mbuf_alloc_ex(&self, size: usize, kind: BufType, group_id: i32) -> RtResult<BufHandle>;
    fn mbuf_free(&self, buf: BufHandle) -> RtResult<()>;
    fn mbuf_size(&self, buf: BufHandle) -> RtResult<usize>;
    fn mbuf_read(&self, buf: BufHandle, offset: usize, out: &mut [u8]) -> RtResult<()>;
    fn mbuf_write(&self, buf: BufHandle, offset: usize, data: &[u8]) -> RtResult<()>;
    fn mbuf_data_len(&self, buf: BufHandle) -> RtResult<usize>;
    fn mbuf_set_data_len(&self, buf: BufHandle, len: usize) -> RtResult<()>;
    fn mbuf_user_data(&self, buf: BufHandle, out: &mut [u8], offset: usize) -> RtResult<()>;
    fn mbuf_set_user_data(&self, buf: BufHandle, data: &[u8], offset: usize) -> RtResult<()>;
    fn mbuf_copy_ref(&self, buf: BufHandle) -> RtResult<BufHandle>;
    fn mbuf_chain_append(&self, head: BufHandle, buf: BufHandle) -> RtResult<()>;
    fn mbuf_chain_len(&self, head: BufHandle) -> RtResult<u32>;
    fn mbuf_chain_get(&self, head: BufHandle, index: u32) -> RtResult<BufHandle>;

    // ── host-visible device memory ───────────────────────
    fn dev_malloc(&self, size: usize) -> RtResult<u64>;
    fn dev_free(&self, addr: u64) -> RtResult<()>;
    fn dev_write(&self, addr: u64, offset: usize, data: &[u8]) -> RtResult<()>;
    fn dev_read(&self, addr: u64, offset: usize, out: &mut [u8]) -> RtResult<()>;

    // ── memory groups ─────────────────────────────────────
    fn mem_group_query_process(&self, pid: i32) -> RtResult<Vec<MemGroupInfo>>;
    fn mem_group_id(&self, name: &str) -> RtResult<i32>;
    fn mem_group_create(&self, name: &str) -> RtResult<()>;
    fn mem_group_add_process(&self, name: &str, pid: i32, rights: GroupRights) -> RtResult<()>;
    fn mem_group_attach(&self, name: &str, timeout_ms: i32) -> RtResult<()>;

    // ── broker channel ────────────────────────────────────
    /// Submits `event` and blocks for the broker's reply bytes.
    fn submit_event_sync(&self, device: i32, event: &EventSummary) -> RtResult<Bytes>;
}
