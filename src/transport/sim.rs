//! In-memory transport with an embedded broker thread.
//!
//! Queues, shared buffers, host-visible device memory and memory groups live in
//! process memory. Broker events are handed to a dedicated thread over a flume
//! channel and answered with the same wire codec the processors use, so the
//! full connect/bind/unbind/query round trip runs without hardware.
//!
//! The simulated broker serves whichever contact queue currently holds a
//! request, which is enough for processors whose control path is serialised.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{
    DstEngine, EventSummary, GroupRights, MemGroupInfo, ProcessRole, RtError, RtResult, RunMode,
    Transport,
};
use crate::core::attr::QueueAttr;
use crate::core::buffer::{BufHandle, BufType, Permission};
use crate::core::poll::{poll_until, Attempt, Deadline, DEFAULT_POLL_INTERVAL};
use crate::core::protocol::{
    self, query_type, ConnectMsg, QueryBlock, Reply, SubEvent, CLIENT_MAJOR_VERSION,
    ENHANCED_BROKER_VERSION, HEADER_LEN, QS_MSG_EVENT_ID,
};
use crate::core::route::{status, Route};

/// Bytes of private user data carried by every shared buffer.
pub const USER_DATA_LEN: usize = 96;
const CONTACT_QUEUE_DEPTH: u32 = 8;
const DEV_ADDR_BASE: u64 = 0x1000_0000;

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub run_mode: RunMode,
    pub device: i32,
    /// Pid reported for the process itself.
    pub pid: i32,
    pub control_cpu_pid: Option<i32>,
    pub broker_pid: Option<i32>,
    pub broker_version: u16,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            run_mode: RunMode::Device,
            device: 0,
            pid: std::process::id() as i32,
            control_cpu_pid: Some(4_001),
            broker_pid: Some(4_002),
            broker_version: ENHANCED_BROKER_VERSION,
        }
    }
}

struct MbufBlock {
    data: Vec<u8>,
    data_len: usize,
    user_data: [u8; USER_DATA_LEN],
}

struct Mbuf {
    block: Arc<Mutex<MbufBlock>>,
    chain: Vec<BufHandle>,
}

struct SimQueue {
    attr: QueueAttr,
    owner: i32,
    items: Mutex<VecDeque<BufHandle>>,
}

struct SimGroup {
    name: String,
    id: i32,
    members: HashMap<i32, GroupRights>,
}

#[derive(Debug, Clone, Copy)]
struct Contact {
    qid: u32,
    enhanced: bool,
}

#[derive(Debug, Clone, Copy)]
struct BoundRoute {
    src: u32,
    dst: u32,
}

struct SimState {
    options: SimOptions,
    current_pid: AtomicI32,
    pids: Mutex<(Option<i32>, Option<i32>)>,
    broker_version: AtomicU16,
    run_mode_script: Mutex<VecDeque<RtResult<RunMode>>>,

    next_qid: AtomicU32,
    queues: DashMap<u32, Arc<SimQueue>>,
    grants: DashMap<(u32, i32), Permission>,

    next_handle: AtomicU64,
    mbufs: DashMap<u64, Mbuf>,

    next_addr: AtomicU64,
    dev_mem: DashMap<u64, Vec<u8>>,

    groups: Mutex<Vec<SimGroup>>,
    next_group_id: AtomicI32,

    contacts: Mutex<HashMap<i32, Contact>>,
    routes: Mutex<Vec<BoundRoute>>,

    fail_next_submit: Mutex<Option<RtError>>,
    fail_next_reply: Mutex<Option<i32>>,
    submits: AtomicUsize,
    queue_inits: AtomicUsize,
    broker_inits: AtomicUsize,
    mbuf_inits: AtomicUsize,
}

struct BrokerJob {
    event: EventSummary,
    reply: flume::Sender<RtResult<Bytes>>,
}

/// In-memory [`Transport`] used by tests, benches and the self-test binary.
pub struct SimTransport {
    state: Arc<SimState>,
    broker_tx: flume::Sender<BrokerJob>,
}

impl SimTransport {
    pub fn new(options: SimOptions) -> Self {
        let state = Arc::new(SimState {
            current_pid: AtomicI32::new(options.pid),
            pids: Mutex::new((options.control_cpu_pid, options.broker_pid)),
            broker_version: AtomicU16::new(options.broker_version),
            run_mode_script: Mutex::new(VecDeque::new()),
            next_qid: AtomicU32::new(1),
            queues: DashMap::new(),
            grants: DashMap::new(),
            next_handle: AtomicU64::new(1),
            mbufs: DashMap::new(),
            next_addr: AtomicU64::new(DEV_ADDR_BASE),
            dev_mem: DashMap::new(),
            groups: Mutex::new(Vec::new()),
            next_group_id: AtomicI32::new(1),
            contacts: Mutex::new(HashMap::new()),
            routes: Mutex::new(Vec::new()),
            fail_next_submit: Mutex::new(None),
            fail_next_reply: Mutex::new(None),
            submits: AtomicUsize::new(0),
            queue_inits: AtomicUsize::new(0),
            broker_inits: AtomicUsize::new(0),
            mbuf_inits: AtomicUsize::new(0),
            options,
        });

        let (broker_tx, broker_rx) = flume::unbounded::<BrokerJob>();
        let broker_state = Arc::clone(&state);
        let spawned = thread::Builder::new()
            .name("sim-broker".into())
            .spawn(move || broker_loop(broker_state, broker_rx));
        if let Err(e) = spawned {
            // Submissions will fail with INTERNAL once the receiver is gone.
            warn!("failed to spawn simulated broker: {}", e);
        }

        Self { state, broker_tx }
    }

    pub fn host() -> Self {
        Self::new(SimOptions {
            run_mode: RunMode::Host,
            ..SimOptions::default()
        })
    }

    pub fn device() -> Self {
        Self::new(SimOptions::default())
    }

    // ── fault injection ───────────────────────────────────

    /// Answers subsequent run-mode queries from `script` before the configured mode.
    pub fn script_run_mode(&self, script: impl IntoIterator<Item = RtResult<RunMode>>) {
        self.state.run_mode_script.lock().extend(script);
    }

    pub fn fail_next_submit(&self, err: RtError) {
        *self.state.fail_next_submit.lock() = Some(err);
    }

    /// Makes the broker answer the next event with `code` instead of processing it.
    pub fn fail_next_reply(&self, code: i32) {
        *self.state.fail_next_reply.lock() = Some(code);
    }

    pub fn set_broker_pid(&self, pid: Option<i32>) {
        self.state.pids.lock().1 = pid;
    }

    pub fn set_control_cpu_pid(&self, pid: Option<i32>) {
        self.state.pids.lock().0 = pid;
    }

    pub fn set_broker_version(&self, version: u16) {
        self.state.broker_version.store(version, Ordering::SeqCst);
    }

    pub fn set_current_pid(&self, pid: i32) {
        self.state.current_pid.store(pid, Ordering::SeqCst);
    }

    /// Registers `pid` as a member of group `name`, creating the group if needed.
    pub fn seed_group(&self, name: &str, pid: i32, rights: GroupRights) -> i32 {
        let mut groups = self.state.groups.lock();
        let idx = match groups.iter().position(|g| g.name == name) {
            Some(idx) => idx,
            None => {
                groups.push(SimGroup {
                    name: name.to_owned(),
                    id: self.state.next_group_id.fetch_add(1, Ordering::SeqCst),
                    members: HashMap::new(),
                });
                groups.len() - 1
            }
        };
        groups[idx].members.insert(pid, rights);
        groups[idx].id
    }

    // ── inspection ────────────────────────────────────────

    pub fn queue_exists(&self, qid: u32) -> bool {
        self.state.queues.contains_key(&qid)
    }

    pub fn queue_len(&self, qid: u32) -> Option<usize> {
        self.state.queue(qid).ok().map(|q| q.items.lock().len())
    }

    pub fn queue_attr(&self, qid: u32) -> Option<QueueAttr> {
        self.state.queue(qid).ok().map(|q| q.attr.clone())
    }

    pub fn granted(&self, qid: u32, pid: i32) -> Permission {
        self.state
            .grants
            .get(&(qid, pid))
            .map(|p| *p)
            .unwrap_or_default()
    }

    pub fn bound_routes(&self) -> Vec<(u32, u32)> {
        self.state.routes.lock().iter().map(|r| (r.src, r.dst)).collect()
    }

    pub fn live_mbufs(&self) -> usize {
        self.state.mbufs.len()
    }

    pub fn live_dev_allocs(&self) -> usize {
        self.state.dev_mem.len()
    }

    pub fn submit_count(&self) -> usize {
        self.state.submits.load(Ordering::SeqCst)
    }

    pub fn queue_init_count(&self) -> usize {
        self.state.queue_inits.load(Ordering::SeqCst)
    }

    pub fn broker_init_count(&self) -> usize {
        self.state.broker_inits.load(Ordering::SeqCst)
    }

    pub fn mbuf_init_count(&self) -> usize {
        self.state.mbuf_inits.load(Ordering::SeqCst)
    }

    pub fn group_names(&self) -> Vec<String> {
        self.state.groups.lock().iter().map(|g| g.name.clone()).collect()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::device()
    }
}

impl SimState {
    fn pid(&self) -> i32 {
        self.current_pid.load(Ordering::SeqCst)
    }

    fn queue(&self, qid: u32) -> RtResult<Arc<SimQueue>> {
        self.queues
            .get(&qid)
            .map(|q| Arc::clone(&*q))
            .ok_or(RtError::NOT_FOUND)
    }

    fn create_queue(&self, attr: &QueueAttr, owner: i32) -> RtResult<u32> {
        if attr.depth() == 0 {
            return Err(RtError::PARAM_INVALID);
        }
        let qid = self.next_qid.fetch_add(1, Ordering::SeqCst);
        self.queues.insert(
            qid,
            Arc::new(SimQueue {
                attr: attr.clone(),
                owner,
                items: Mutex::new(VecDeque::new()),
            }),
        );
        Ok(qid)
    }

    fn destroy_queue(&self, qid: u32) -> RtResult<()> {
        let (_, queue) = self.queues.remove(&qid).ok_or(RtError::NOT_FOUND)?;
        let leftovers: Vec<BufHandle> = queue.items.lock().drain(..).collect();
        for buf in leftovers {
            let _ = self.free_mbuf(buf);
        }
        self.grants.retain(|(q, _), _| *q != qid);
        Ok(())
    }

    fn try_enqueue(&self, qid: u32, buf: BufHandle) -> RtResult<()> {
        let queue = self.queue(qid)?;
        let mut items = queue.items.lock();
        if items.len() >= queue.attr.depth() as usize {
            return Err(RtError::QUEUE_FULL);
        }
        items.push_back(buf);
        Ok(())
    }

    fn try_dequeue(&self, qid: u32) -> RtResult<BufHandle> {
        let queue = self.queue(qid)?;
        let mut items = queue.items.lock();
        items.pop_front().ok_or(RtError::QUEUE_EMPTY)
    }

    fn alloc_mbuf(&self, size: usize) -> BufHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.mbufs.insert(
            raw,
            Mbuf {
                block: Arc::new(Mutex::new(MbufBlock {
                    data: vec![0; size],
                    data_len: 0,
                    user_data: [0; USER_DATA_LEN],
                })),
                chain: Vec::new(),
            },
        );
        BufHandle::from_raw(raw)
    }

    fn block(&self, buf: BufHandle) -> RtResult<Arc<Mutex<MbufBlock>>> {
        self.mbufs
            .get(&buf.raw())
            .map(|m| Arc::clone(&m.block))
            .ok_or(RtError::INVALID_HANDLE)
    }

    /// Frees `buf` and every buffer chained behind it.
    fn free_mbuf(&self, buf: BufHandle) -> RtResult<()> {
        let (_, mbuf) = self.mbufs.remove(&buf.raw()).ok_or(RtError::INVALID_HANDLE)?;
        for linked in mbuf.chain {
            self.mbufs.remove(&linked.raw());
        }
        Ok(())
    }

    fn read_mbuf(&self, buf: BufHandle) -> RtResult<Vec<u8>> {
        let block = self.block(buf)?;
        let data = block.lock().data.clone();
        Ok(data)
    }

    fn write_mbuf(&self, buf: BufHandle, offset: usize, data: &[u8]) -> RtResult<()> {
        let block = self.block(buf)?;
        let mut block = block.lock();
        let end = offset.checked_add(data.len()).ok_or(RtError::PARAM_INVALID)?;
        if end > block.data.len() {
            return Err(RtError::PARAM_INVALID);
        }
        block.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn group_exists(&self, id: i32) -> bool {
        self.groups.lock().iter().any(|g| g.id == id)
    }

    fn is_broker_pid(&self, pid: i32) -> bool {
        let (cp, qs) = *self.pids.lock();
        cp == Some(pid) || qs == Some(pid) || pid == self.pid()
    }
}

impl Transport for SimTransport {
    fn run_mode(&self) -> RtResult<RunMode> {
        if let Some(scripted) = self.state.run_mode_script.lock().pop_front() {
            return scripted;
        }
        Ok(self.state.options.run_mode)
    }

    fn current_device(&self) -> RtResult<i32> {
        Ok(self.state.options.device)
    }

    fn current_pid(&self) -> i32 {
        self.state.pid()
    }

    fn query_dev_pid(&self, _device: i32, _host_pid: i32, role: ProcessRole) -> RtResult<i32> {
        let (cp, qs) = *self.state.pids.lock();
        let pid = match role {
            ProcessRole::ControlCpu => cp,
            ProcessRole::Broker => qs,
        };
        pid.ok_or(RtError::NOT_FOUND)
    }

    fn queue_init(&self, _device: i32) -> RtResult<()> {
        if self.state.queue_inits.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(RtError::REPEATED_INIT);
        }
        Ok(())
    }

    fn queue_init_broker(&self, _device: i32) -> RtResult<()> {
        self.state.broker_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn queue_create(&self, _device: i32, attr: &QueueAttr) -> RtResult<u32> {
        self.state.create_queue(attr, self.state.pid())
    }

    fn queue_destroy(&self, _device: i32, qid: u32) -> RtResult<()> {
        self.state.destroy_queue(qid)
    }

    fn queue_enqueue(&self, _device: i32, qid: u32, buf: BufHandle) -> RtResult<()> {
        self.state.block(buf)?;
        self.state.try_enqueue(qid, buf)
    }

    fn queue_dequeue(&self, _device: i32, qid: u32) -> RtResult<BufHandle> {
        self.state.try_dequeue(qid)
    }

    fn queue_enqueue_buff(
        &self,
        _device: i32,
        qid: u32,
        data: &[u8],
        user_data: &[u8],
        timeout_ms: i32,
    ) -> RtResult<()> {
        if user_data.len() > USER_DATA_LEN {
            return Err(RtError::PARAM_INVALID);
        }
        self.state.queue(qid)?;
        let buf = self.state.alloc_mbuf(data.len());
        {
            let block = self.state.block(buf)?;
            let mut block = block.lock();
            block.data.copy_from_slice(data);
            block.data_len = data.len();
            block.user_data[..user_data.len()].copy_from_slice(user_data);
        }
        let res = poll_until(
            Deadline::from_timeout_ms(timeout_ms),
            DEFAULT_POLL_INTERVAL,
            || match self.state.try_enqueue(qid, buf) {
                Ok(()) => Attempt::Done(()),
                Err(RtError::QUEUE_FULL) => Attempt::Retry(RtError::QUEUE_FULL),
                Err(e) => Attempt::Fatal(e),
            },
        );
        if res.is_err() {
            let _ = self.state.free_mbuf(buf);
        }
        res
    }

    fn queue_peek(&self, _device: i32, qid: u32, timeout_ms: i32) -> RtResult<usize> {
        poll_until(
            Deadline::from_timeout_ms(timeout_ms),
            DEFAULT_POLL_INTERVAL,
            || {
                let queue = match self.state.queue(qid) {
                    Ok(queue) => queue,
                    Err(e) => return Attempt::Fatal(e),
                };
                let head = queue.items.lock().front().copied();
                match head {
                    Some(buf) => match self.state.block(buf) {
                        Ok(block) => Attempt::Done(block.lock().data_len),
                        Err(e) => Attempt::Fatal(e),
                    },
                    None => Attempt::Retry(RtError::QUEUE_EMPTY),
                }
            },
        )
    }

    fn queue_dequeue_buff(
        &self,
        _device: i32,
        qid: u32,
        data: &mut [u8],
        user_data: &mut [u8],
        timeout_ms: i32,
    ) -> RtResult<()> {
        let queue = self.state.queue(qid)?;
        let buf = poll_until(
            Deadline::from_timeout_ms(timeout_ms),
            DEFAULT_POLL_INTERVAL,
            || {
                let mut items = queue.items.lock();
                let Some(&head) = items.front() else {
                    return Attempt::Retry(RtError::QUEUE_EMPTY);
                };
                let fits = self
                    .state
                    .block(head)
                    .map(|b| b.lock().data_len <= data.len());
                match fits {
                    Ok(true) => {
                        items.pop_front();
                        Attempt::Done(head)
                    }
                    Ok(false) => Attempt::Fatal(RtError::PARAM_INVALID),
                    Err(e) => Attempt::Fatal(e),
                }
            },
        )?;
        {
            let block = self.state.block(buf)?;
            let block = block.lock();
            data[..block.data_len].copy_from_slice(&block.data[..block.data_len]);
            let n = user_data.len().min(USER_DATA_LEN);
            user_data[..n].copy_from_slice(&block.user_data[..n]);
        }
        self.state.free_mbuf(buf)
    }

    fn queue_grant(&self, _device: i32, qid: u32, pid: i32, permission: Permission) -> RtResult<()> {
        let queue = self.state.queue(qid)?;
        let caller = self.state.pid();
        let caller_may_manage = queue.owner == caller
            || self
                .state
                .grants
                .get(&(qid, caller))
                .is_some_and(|p| p.contains(Permission::MANAGE));
        if !caller_may_manage {
            return Err(RtError::NO_PERMISSION);
        }
        *self.state.grants.entry((qid, pid)).or_default() |= permission;
        Ok(())
    }

    fn queue_attach(&self, _device: i32, qid: u32, timeout_ms: i32) -> RtResult<()> {
        let pid = self.state.pid();
        poll_until(
            Deadline::from_timeout_ms(timeout_ms),
            DEFAULT_POLL_INTERVAL,
            || match self.state.queue(qid) {
                Err(e) => Attempt::Fatal(e),
                Ok(q) if q.owner == pid => Attempt::Done(()),
                Ok(_) if self.state.grants.contains_key(&(qid, pid)) => Attempt::Done(()),
                Ok(_) => Attempt::Retry(RtError::NO_PERMISSION),
            },
        )
    }

    fn queue_permission(&self, _device: i32, qid: u32) -> RtResult<Permission> {
        let queue = self.state.queue(qid)?;
        let pid = self.state.pid();
        if queue.owner == pid {
            return Ok(Permission::all());
        }
        self.state
            .grants
            .get(&(qid, pid))
            .map(|p| *p)
            .ok_or(RtError::NO_PERMISSION)
    }

    fn mbuf_init(&self) -> RtResult<()> {
        if self.state.mbuf_inits.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(RtError::REPEATED_INIT);
        }
        Ok(())
    }

    fn mbuf_alloc(&self, size: usize) -> RtResult<BufHandle> {
        Ok(self.state.alloc_mbuf(size))
    }

    fn mbuf_alloc_ex(&self, size: usize, _kind: BufType, group_id: i32) -> RtResult<BufHandle> {
        if !self.state.group_exists(group_id) {
            return Err(RtError::PARAM_INVALID);
        }
        Ok(self.state.alloc_mbuf(size))
    }

    fn mbuf_free(&self, buf: BufHandle) -> RtResult<()> {
        self.state.free_mbuf(buf)
    }

    fn mbuf_size(&self, buf: BufHandle) -> RtResult<usize> {
        Ok(self.state.block(buf)?.lock().data.len())
    }

    fn mbuf_read(&self, buf: BufHandle, offset: usize, out: &mut [u8]) -> RtResult<()> {
        let block = self.state.block(buf)?;
        let block = block.lock();
        let end = offset.checked_add(out.len()).ok_or(RtError::PARAM_INVALID)?;
        if end > block.data.len() {
            return Err(RtError::PARAM_INVALID);
        }
        out.copy_from_slice(&block.data[offset..end]);
        Ok(())
    }

    fn mbuf_write(&self, buf: BufHandle, offset: usize, data: &[u8]) -> RtResult<()> {
        self.state.write_mbuf(buf, offset, data)
    }

    fn mbuf_data_len(&self, buf: BufHandle) -> RtResult<usize> {
        Ok(self.state.block(buf)?.lock().data_len)
    }

    fn mbuf_set_data_len(&self, buf: BufHandle, len: usize) -> RtResult<()> {
        let block = self.state.block(buf)?;
        let mut block = block.lock();
        if len > block.data.len() {
            return Err(RtError::PARAM_INVALID);
        }
        block.data_len = len;
        Ok(())
    }

    fn mbuf_user_data(&self, buf: BufHandle, out: &mut [u8], offset: usize) -> RtResult<()> {
        let block = self.state.block(buf)?;
        let block = block.lock();
        let end = offset.checked_add(out.len()).ok_or(RtError::PARAM_INVALID)?;
        if end > USER_DATA_LEN {
            return Err(RtError::PARAM_INVALID);
        }
        out.copy_from_slice(&block.user_data[offset..end]);
        Ok(())
    }

    fn mbuf_set_user_data(&self, buf: BufHandle, data: &[u8], offset: usize) -> RtResult<()> {
        let block = self.state.block(buf)?;
        let mut block = block.lock();
        let end = offset.checked_add(data.len()).ok_or(RtError::PARAM_INVALID)?;
        if end > USER_DATA_LEN {
            return Err(RtError::PARAM_INVALID);
        }
        block.user_data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn mbuf_copy_ref(&self, buf: BufHandle) -> RtResult<BufHandle> {
        let block = self.state.block(buf)?;
        let raw = self.state.next_handle.fetch_add(1, Ordering::SeqCst);
        self.state.mbufs.insert(
            raw,
            Mbuf {
                block,
                chain: Vec::new(),
            },
        );
        Ok(BufHandle::from_raw(raw))
    }

    fn mbuf_chain_append(&self, head: BufHandle, buf: BufHandle) -> RtResult<()> {
        if head == buf {
            return Err(RtError::PARAM_INVALID);
        }
        self.state.block(buf)?;
        let mut entry = self
            .state
            .mbufs
            .get_mut(&head.raw())
            .ok_or(RtError::INVALID_HANDLE)?;
        entry.chain.push(buf);
        Ok(())
    }

    fn mbuf_chain_len(&self, head: BufHandle) -> RtResult<u32> {
        let entry = self.state.mbufs.get(&head.raw()).ok_or(RtError::INVALID_HANDLE)?;
        Ok(entry.chain.len() as u32 + 1)
    }

    fn mbuf_chain_get(&self, head: BufHandle, index: u32) -> RtResult<BufHandle> {
        let entry = self.state.mbufs.get(&head.raw()).ok_or(RtError::INVALID_HANDLE)?;
        match index {
            0 => Ok(head),
            i => entry
                .chain
                .get(i as usize - 1)
                .copied()
                .ok_or(RtError::PARAM_INVALID),
        }
    }

    fn dev_malloc(&self, size: usize) -> RtResult<u64> {
        if size == 0 {
            return Err(RtError::PARAM_INVALID);
        }
        let stride = (size as u64).div_ceil(64) * 64 + 64;
        let addr = self.state.next_addr.fetch_add(stride, Ordering::SeqCst);
        self.state.dev_mem.insert(addr, vec![0; size]);
        Ok(addr)
    }

    fn dev_free(&self, addr: u64) -> RtResult<()> {
        self.state
            .dev_mem
            .remove(&addr)
            .map(|_| ())
            .ok_or(RtError::INVALID_HANDLE)
    }

    fn dev_write(&self, addr: u64, offset: usize, data: &[u8]) -> RtResult<()> {
        let mut mem = self.state.dev_mem.get_mut(&addr).ok_or(RtError::INVALID_HANDLE)?;
        let end = offset.checked_add(data.len()).ok_or(RtError::PARAM_INVALID)?;
        if end > mem.len() {
            return Err(RtError::PARAM_INVALID);
        }
        mem[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn dev_read(&self, addr: u64, offset: usize, out: &mut [u8]) -> RtResult<()> {
        let mem = self.state.dev_mem.get(&addr).ok_or(RtError::INVALID_HANDLE)?;
        let end = offset.checked_add(out.len()).ok_or(RtError::PARAM_INVALID)?;
        if end > mem.len() {
            return Err(RtError::PARAM_INVALID);
        }
        out.copy_from_slice(&mem[offset..end]);
        Ok(())
    }

    fn mem_group_query_process(&self, pid: i32) -> RtResult<Vec<MemGroupInfo>> {
        Ok(self
            .state
            .groups
            .lock()
            .iter()
            .filter_map(|g| {
                g.members.get(&pid).map(|rights| MemGroupInfo {
                    name: g.name.clone(),
                    rights: *rights,
                })
            })
            .collect())
    }

    fn mem_group_id(&self, name: &str) -> RtResult<i32> {
        self.state
            .groups
            .lock()
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.id)
            .ok_or(RtError::NOT_FOUND)
    }

    fn mem_group_create(&self, name: &str) -> RtResult<()> {
        let mut groups = self.state.groups.lock();
        if groups.iter().any(|g| g.name == name) {
            return Err(RtError::REPEATED_INIT);
        }
        groups.push(SimGroup {
            name: name.to_owned(),
            id: self.state.next_group_id.fetch_add(1, Ordering::SeqCst),
            members: HashMap::new(),
        });
        Ok(())
    }

    fn mem_group_add_process(&self, name: &str, pid: i32, rights: GroupRights) -> RtResult<()> {
        let mut groups = self.state.groups.lock();
        let group = groups
            .iter_mut()
            .find(|g| g.name == name)
            .ok_or(RtError::NOT_FOUND)?;
        group.members.insert(pid, rights);
        Ok(())
    }

    fn mem_group_attach(&self, name: &str, _timeout_ms: i32) -> RtResult<()> {
        let pid = self.state.pid();
        let groups = self.state.groups.lock();
        match groups.iter().find(|g| g.name == name) {
            Some(g) if g.members.contains_key(&pid) => Ok(()),
            Some(_) => Err(RtError::NO_PERMISSION),
            None => Err(RtError::NOT_FOUND),
        }
    }

    fn submit_event_sync(&self, _device: i32, event: &EventSummary) -> RtResult<Bytes> {
        self.state.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.fail_next_submit.lock().take() {
            return Err(err);
        }
        if event.event_id != QS_MSG_EVENT_ID {
            return Err(RtError::PARAM_INVALID);
        }
        if !self.state.is_broker_pid(event.pid) {
            return Err(RtError::NOT_FOUND);
        }
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.broker_tx
            .send(BrokerJob {
                event: event.clone(),
                reply: reply_tx,
            })
            .map_err(|_| RtError::INTERNAL)?;
        reply_rx.recv().map_err(|_| RtError::INTERNAL)?
    }
}

// ── simulated broker ──────────────────────────────────────

fn broker_loop(state: Arc<SimState>, rx: flume::Receiver<BrokerJob>) {
    while let Ok(job) = rx.recv() {
        let reply = handle_event(&state, &job.event);
        let _ = job.reply.send(reply);
    }
    debug!("simulated broker stopped");
}

fn handle_event(state: &SimState, event: &EventSummary) -> RtResult<Bytes> {
    let op = SubEvent::from_raw(event.sub_event_id).ok_or(RtError::PARAM_INVALID)?;
    debug!(
        op = op.name(),
        pid = event.pid,
        grp_id = event.grp_id,
        ccpu = matches!(event.dst_engine, DstEngine::CcpuDevice),
        "broker event"
    );
    let injected = state.fail_next_reply.lock().take();
    let reply = match op {
        SubEvent::BindInit => connect(state, &event.msg, injected)?,
        SubEvent::QueryNum => query_num(state, &event.msg, injected)?,
        SubEvent::Bind | SubEvent::Unbind | SubEvent::Query => {
            table_op(state, op, &event.msg, injected)?
        }
    };
    Ok(reply.encode())
}

fn reply_code(code: i32) -> Reply {
    Reply {
        ret_code: code,
        ..Reply::default()
    }
}

fn connect(state: &SimState, msg: &[u8], injected: Option<i32>) -> RtResult<Reply> {
    let hello = ConnectMsg::decode(msg).map_err(|_| RtError::PARAM_INVALID)?;
    if let Some(code) = injected {
        return Ok(reply_code(code));
    }
    let version = state.broker_version.load(Ordering::SeqCst);
    let mut contacts = state.contacts.lock();
    let contact = match contacts.get(&hello.pid) {
        Some(existing) if state.queues.contains_key(&existing.qid) => *existing,
        _ => {
            let mut attr = QueueAttr::with_depth(CONTACT_QUEUE_DEPTH);
            attr.set_name(&format!("qs-contact-{}", hello.pid))
                .map_err(|_| RtError::INTERNAL)?;
            let qid = state.create_queue(&attr, hello.pid)?;
            let contact = Contact {
                qid,
                enhanced: hello.major_version >= CLIENT_MAJOR_VERSION
                    && version >= ENHANCED_BROKER_VERSION,
            };
            contacts.insert(hello.pid, contact);
            contact
        }
    };
    Ok(Reply {
        ret_value: u64::from(contact.qid),
        ret_code: 0,
        major_version: version,
        minor_version: 0,
    })
}

fn matches(block: &QueryBlock, route: &BoundRoute, queues: &DashMap<u32, Arc<SimQueue>>) -> bool {
    match block.query_type {
        query_type::SRC => route.src == block.src,
        query_type::DST => route.dst == block.dst,
        query_type::SRC_OR_DST => route.src == block.src || route.dst == block.dst,
        query_type::SRC_AND_DST => route.src == block.src && route.dst == block.dst,
        query_type::ABNORMAL => is_abnormal(route, queues),
        _ => false,
    }
}

/// A bound route is abnormal once either endpoint queue no longer exists.
fn is_abnormal(route: &BoundRoute, queues: &DashMap<u32, Arc<SimQueue>>) -> bool {
    !queues.contains_key(&route.src) || !queues.contains_key(&route.dst)
}

fn query_num(state: &SimState, msg: &[u8], injected: Option<i32>) -> RtResult<Reply> {
    let block = QueryBlock::decode(msg).map_err(|_| RtError::PARAM_INVALID)?;
    if let Some(code) = injected {
        return Ok(reply_code(code));
    }
    let count = state
        .routes
        .lock()
        .iter()
        .filter(|r| matches(&block, r, &state.queues))
        .count();
    Ok(Reply {
        ret_value: count as u64,
        ..Reply::default()
    })
}

fn table_op(state: &SimState, op: SubEvent, msg: &[u8], injected: Option<i32>) -> RtResult<Reply> {
    let addr = protocol::decode_route_list_msg(msg).map_err(|_| RtError::PARAM_INVALID)?;
    if addr != 0 {
        let mut table = state.dev_mem.get_mut(&addr).ok_or(RtError::INVALID_HANDLE)?;
        return Ok(reply_code(process_table(state, op, &mut table, injected)));
    }

    let (buf, contact) = take_mailbox(state)?;
    let mut table = state.read_mbuf(buf)?;
    let code = process_table(state, op, &mut table, injected);
    state.write_mbuf(buf, 0, &table)?;
    if contact.enhanced {
        // Hand the buffer back so the sender can reclaim it.
        state.try_enqueue(contact.qid, buf)?;
    }
    Ok(reply_code(code))
}

/// Pulls the newest request buffer out of whichever contact queue holds one.
fn take_mailbox(state: &SimState) -> RtResult<(BufHandle, Contact)> {
    let contacts: Vec<Contact> = state.contacts.lock().values().copied().collect();
    for contact in contacts {
        let mut newest = None;
        while let Ok(buf) = state.try_dequeue(contact.qid) {
            if let Some(stale) = newest.replace(buf) {
                warn!(qid = contact.qid, "dropping stale mailbox buffer");
                let _ = state.free_mbuf(stale);
            }
        }
        if let Some(buf) = newest {
            return Ok((buf, contact));
        }
    }
    Err(RtError::QUEUE_EMPTY)
}

fn process_table(state: &SimState, op: SubEvent, table: &mut [u8], injected: Option<i32>) -> i32 {
    let header = match protocol::decode_header(table) {
        Ok(header) if header.sub_event == op as u32 => header,
        _ => return RtError::PARAM_INVALID.code(),
    };
    if let Some(code) = injected {
        return code;
    }
    let count = header.route_num as usize;
    match op {
        SubEvent::Bind | SubEvent::Unbind => {
            let Ok(requested) = protocol::decode_records(table, HEADER_LEN, count) else {
                return RtError::PARAM_INVALID.code();
            };
            let mut first_failure = 0;
            for (index, route) in requested.iter().enumerate() {
                let code = if op == SubEvent::Bind {
                    bind_one(state, route)
                } else {
                    unbind_one(state, route)
                };
                if first_failure == 0 {
                    first_failure = code;
                }
                let updated = Route::with_status(route.src(), route.dst(), code);
                if protocol::write_record(table, HEADER_LEN, index, &updated).is_err() {
                    return RtError::PARAM_INVALID.code();
                }
            }
            first_failure
        }
        SubEvent::Query => {
            let Ok(block) = QueryBlock::decode(&table[HEADER_LEN..]) else {
                return RtError::PARAM_INVALID.code();
            };
            let found: Vec<Route> = state
                .routes
                .lock()
                .iter()
                .filter(|r| matches(&block, r, &state.queues))
                .take(count)
                .map(|r| {
                    let st = if is_abnormal(r, &state.queues) {
                        status::BOUND_ABNORMAL
                    } else {
                        status::BOUND
                    };
                    Route::with_status(r.src, r.dst, st)
                })
                .collect();
            let offset = HEADER_LEN + protocol::QUERY_BLOCK_LEN;
            for (index, route) in found.iter().enumerate() {
                if protocol::write_record(table, offset, index, route).is_err() {
                    return RtError::PARAM_INVALID.code();
                }
            }
            // Shrink the advertised count if fewer routes matched than were asked for.
            table[8..12].copy_from_slice(&(found.len() as u32).to_le_bytes());
            0
        }
        SubEvent::BindInit | SubEvent::QueryNum => RtError::PARAM_INVALID.code(),
    }
}

fn bind_one(state: &SimState, route: &Route) -> i32 {
    if route.src() == route.dst() {
        return RtError::PARAM_INVALID.code();
    }
    if !state.queues.contains_key(&route.src()) || !state.queues.contains_key(&route.dst()) {
        return RtError::NOT_FOUND.code();
    }
    let mut routes = state.routes.lock();
    if !routes
        .iter()
        .any(|r| r.src == route.src() && r.dst == route.dst())
    {
        routes.push(BoundRoute {
            src: route.src(),
            dst: route.dst(),
        });
    }
    0
}

fn unbind_one(state: &SimState, route: &Route) -> i32 {
    state
        .routes
        .lock()
        .retain(|r| !(r.src == route.src() && r.dst == route.dst()));
    0
}
