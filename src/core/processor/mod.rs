//! The queue processor contract and the state shared by all three variants.
//!
//! [`QueueProcessor`] carries the full operation surface as default methods
//! built on [`ProcessorCore`]; each variant overrides only what depends on
//! where data and permissions live in its environment.

mod control_cpu;
mod host;
mod share_group;

pub use control_cpu::ControlCpuProcessor;
pub use host::HostProcessor;
pub use share_group::ShareGroupProcessor;

use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{const_mutex, Mutex, ReentrantMutex};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::core::attr::QueueAttr;
use crate::core::buffer::{BufHandle, BufType, Permission};
use crate::core::error::{QueueError, Result};
use crate::core::locks::QueueLockRegistry;
use crate::core::poll::{poll_until, Attempt, Deadline};
use crate::core::protocol::{
    self, ConnectMsg, QueryBlock, Reply, SubEvent, BIND_QUEUE_GROUP_ID, CLIENT_MAJOR_VERSION,
    ENHANCED_BROKER_VERSION, HEADER_LEN, QS_MSG_EVENT_ID, QUERY_BLOCK_LEN,
};
use crate::core::route::{RouteList, RouteQueryInfo};
use crate::transport::{
    DstEngine, EventSummary, GroupRights, ProcessRole, RtError, RunMode, Transport,
};

/// Device id used by processes that run on the device itself.
pub const LOCAL_DEVICE: i32 = 0;

// The transport accepts one broker-path and one shared-buffer initialisation
// per process, so these flags are process-wide rather than per processor.
static BROKER_INITIALISED: Mutex<bool> = const_mutex(false);
static MBUF_INITIALISED: Mutex<bool> = const_mutex(false);

/// Which of the three environments a processor serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunEnv {
    Host,
    DeviceShareGroup,
    DeviceControlCpu,
}

/// Destination of broker events for one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventTarget {
    pub pid: i32,
    pub grp_id: u32,
    pub dst_engine: DstEngine,
}

impl EventTarget {
    /// Addressing used by host processes (the device control CPU relays).
    pub fn host(pid: i32) -> Self {
        Self {
            pid,
            grp_id: 0,
            dst_engine: DstEngine::AcpuDevice,
        }
    }

    /// Addressing used by device processes (straight to the broker group).
    pub fn device(pid: i32) -> Self {
        Self {
            pid,
            grp_id: BIND_QUEUE_GROUP_ID,
            dst_engine: DstEngine::CcpuDevice,
        }
    }
}

/// How a route table reaches the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Copy into host-visible device memory and pass its address.
    HostMemory,
    /// Write into a shared buffer and post it on the broker contact queue.
    Mailbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteChannel {
    pub device: i32,
    pub target: EventTarget,
    pub exchange: Exchange,
}

/// Broker session owned by one processor.
#[derive(Debug, Default)]
pub struct Session {
    contact: Cell<Option<u32>>,
    enhanced: Cell<bool>,
}

impl Session {
    pub fn contact(&self) -> Option<u32> {
        self.contact.get()
    }

    /// Whether the broker hands mailbox buffers back after replying.
    pub fn enhanced(&self) -> bool {
        self.enhanced.get()
    }
}

/// Frees a device allocation when dropped.
struct DevAlloc<'a> {
    transport: &'a dyn Transport,
    addr: u64,
}

impl Drop for DevAlloc<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.dev_free(self.addr) {
            warn!(addr = self.addr, code = e.code(), "failed to free route table memory");
        }
    }
}

/// Frees a shared buffer when dropped unless ownership moved elsewhere.
struct MbufGuard<'a> {
    transport: &'a dyn Transport,
    buf: Option<BufHandle>,
}

impl<'a> MbufGuard<'a> {
    fn new(transport: &'a dyn Transport, buf: BufHandle) -> Self {
        Self {
            transport,
            buf: Some(buf),
        }
    }

    fn replace(&mut self, buf: BufHandle) {
        self.buf = Some(buf);
    }

    fn disarm(&mut self) {
        self.buf = None;
    }
}

impl Drop for MbufGuard<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if let Err(e) = self.transport.mbuf_free(buf) {
                warn!(buf = buf.raw(), code = e.code(), "failed to free route table buffer");
            }
        }
    }
}

/// State and helpers shared by every processor variant.
pub struct ProcessorCore {
    transport: Arc<dyn Transport>,
    settings: Settings,
    locks: QueueLockRegistry,
    control: ReentrantMutex<Session>,
    group: Mutex<Option<i32>>,
}

impl ProcessorCore {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            transport,
            settings,
            locks: QueueLockRegistry::new(),
            control: ReentrantMutex::new(Session::default()),
            group: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn locks(&self) -> &QueueLockRegistry {
        &self.locks
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval()
    }

    /// Serialises the control path; re-entrant so destroy can query under it.
    pub fn control(&self) -> parking_lot::ReentrantMutexGuard<'_, Session> {
        self.control.lock()
    }

    pub fn default_attr(&self) -> QueueAttr {
        QueueAttr::with_depth(self.settings.queue.default_depth)
    }

    /// Host processes address the current device; device processes use their own.
    pub fn device_id(&self) -> Result<i32> {
        let mode = self.transport.run_mode().map_err(|e| {
            error!("[Get][RunMode]get run mode failed, errorCode = {}", e.code());
            QueueError::transport("run_mode", e)
        })?;
        match mode {
            RunMode::Host => self.transport.current_device().map_err(|e| {
                error!("[Get][DeviceId]fail to get deviceId errorCode = {}", e.code());
                QueueError::transport("current_device", e)
            }),
            _ => Ok(LOCAL_DEVICE),
        }
    }

    pub fn unsupported<T>(&self, feature: &'static str) -> Result<T> {
        error!(
            feature,
            reason = "please check",
            "[Unsupport][Feature]{} is not supported in this environment",
            feature
        );
        Err(QueueError::Unsupported { feature })
    }

    // ── queue lifecycle ───────────────────────────────────

    pub fn create_queue_with_attr(&self, device: i32, attr: Option<&QueueAttr>) -> Result<u32> {
        let default_attr;
        let attr = match attr {
            Some(attr) => attr,
            None => {
                default_attr = self.default_attr();
                &default_attr
            }
        };
        if attr.name().len() + 1 > self.settings.queue.max_name_len {
            error!(
                param = "name",
                value = attr.name().len() + 1,
                reason = "queue name too long",
                "queue name exceeds the configured limit"
            );
            return Err(QueueError::invalid(
                "name",
                format!("exceeds {} bytes", self.settings.queue.max_name_len),
            ));
        }
        let qid = self.transport.queue_create(device, attr).map_err(|e| {
            error!(device, depth = attr.depth(), "queue create failed, ret is {}", e.code());
            QueueError::transport("queue_create", e)
        })?;
        info!(device, qid, depth = attr.depth(), name = attr.name(), "queue created");
        Ok(qid)
    }

    /// Destroys `qid` once the broker confirms no route references it.
    ///
    /// `probe` addresses the broker for the route check; `None` skips the check
    /// because no broker is reachable.
    pub fn destroy_queue_guarded(
        &self,
        device: i32,
        qid: u32,
        probe: Option<RouteChannel>,
    ) -> Result<()> {
        let _session = self.control();
        let route_num = match probe {
            Some(channel) => self.count_routes(&channel, &QueryBlock::touching(qid))?,
            None => {
                info!(qid, "broker pid unavailable, skipping bound route check");
                0
            }
        };
        if route_num > 0 {
            error!("qid [{}] can not be destroyed, it need to be unbinded first.", qid);
            return Err(QueueError::RoutesStillBound {
                qid,
                routes: route_num,
            });
        }
        self.transport.queue_destroy(device, qid).map_err(|e| {
            error!(device, qid, "queue destroy failed, ret is {}", e.code());
            QueueError::transport("queue_destroy", e)
        })?;
        self.locks.remove(qid);
        info!(device, qid, "queue destroyed");
        Ok(())
    }

    /// Destroy for device processes: the broker is found by role.
    pub fn destroy_queue_on_device(&self, qid: u32, thread_mode: bool) -> Result<()> {
        let probe = self
            .dst_pid(LOCAL_DEVICE, ProcessRole::Broker, thread_mode)
            .ok()
            .map(|pid| RouteChannel {
                device: LOCAL_DEVICE,
                target: EventTarget::device(pid),
                exchange: Exchange::Mailbox,
            });
        self.destroy_queue_guarded(LOCAL_DEVICE, qid, probe)
    }

    // ── data path ─────────────────────────────────────────

    pub fn enqueue(&self, qid: u32, buf: BufHandle, timeout_ms: i32) -> Result<()> {
        let buf = buf.require("buf")?;
        let pair = self.locks.get_or_create(qid);
        poll_until(
            Deadline::from_timeout_ms(timeout_ms),
            self.poll_interval(),
            || {
                let _held = pair.produce_attempt();
                match self.transport.queue_enqueue(LOCAL_DEVICE, qid, buf) {
                    Ok(()) => Attempt::Done(()),
                    Err(RtError::QUEUE_FULL) => Attempt::Retry(QueueError::QueueFull { qid }),
                    Err(e) => {
                        error!("[Enqueue][Queue]fail to enqueue result = {}", e.code());
                        Attempt::Fatal(QueueError::from_rt("queue_enqueue", qid, e))
                    }
                }
            },
        )
    }

    pub fn dequeue(&self, qid: u32, timeout_ms: i32) -> Result<BufHandle> {
        let pair = self.locks.get_or_create(qid);
        poll_until(
            Deadline::from_timeout_ms(timeout_ms),
            self.poll_interval(),
            || {
                let _held = pair.consume_attempt();
                match self.transport.queue_dequeue(LOCAL_DEVICE, qid) {
                    Ok(buf) => Attempt::Done(buf),
                    Err(RtError::QUEUE_EMPTY) => Attempt::Retry(QueueError::QueueEmpty { qid }),
                    Err(e) => {
                        error!("[Dequeue][Queue]fail to dequeue result = {}", e.code());
                        Attempt::Fatal(QueueError::from_rt("queue_dequeue", qid, e))
                    }
                }
            },
        )
    }

    pub fn enqueue_data(
        &self,
        qid: u32,
        data: &[u8],
        user_data: &[u8],
        timeout_ms: i32,
    ) -> Result<()> {
        info!(
            qid,
            data_size = data.len(),
            user_data_size = user_data.len(),
            timeout_ms,
            "start to enqueue data"
        );
        if data.is_empty() {
            error!(param = "dataSize", value = 0, reason = "must be positive", "invalid data size");
            return Err(QueueError::invalid("data", "payload must not be empty"));
        }
        let device = self.device_id()?;
        let pair = self.locks.get_or_create(qid);
        let _producer = pair.producer().lock();
        match self
            .transport
            .queue_enqueue_buff(device, qid, data, user_data, timeout_ms)
        {
            Ok(()) => {
                info!(device, qid, "success to enqueue data");
                Ok(())
            }
            Err(RtError::QUEUE_FULL) => {
                info!("queue is full, device is {}, qid is {}", device, qid);
                Err(QueueError::QueueFull { qid })
            }
            Err(e) => {
                error!(device, qid, "fail to enqueue data, ret is {}", e.code());
                Err(QueueError::from_rt("queue_enqueue_buff", qid, e))
            }
        }
    }

    /// Dequeues one message into `data`, returning the payload size.
    pub fn dequeue_data(
        &self,
        qid: u32,
        data: &mut [u8],
        user_data: &mut [u8],
        timeout_ms: i32,
    ) -> Result<usize> {
        info!(
            qid,
            data_size = data.len(),
            user_data_size = user_data.len(),
            timeout_ms,
            "start to dequeue data"
        );
        if data.is_empty() {
            error!(param = "dataSize", value = 0, reason = "must be positive", "invalid data size");
            return Err(QueueError::invalid("data", "buffer must not be empty"));
        }
        let device = self.device_id()?;
        let pair = self.locks.get_or_create(qid);
        let _consumer = pair.consumer().lock();

        let size = match self.transport.queue_peek(device, qid, timeout_ms) {
            Ok(size) => size,
            Err(RtError::QUEUE_EMPTY) => {
                info!("queue is empty, device is {}, qid is {}", device, qid);
                return Err(QueueError::QueueEmpty { qid });
            }
            Err(e) => {
                error!("peek queue [{}] failed, device is {}", qid, device);
                return Err(QueueError::from_rt("queue_peek", qid, e));
            }
        };
        if size > data.len() {
            error!(
                param = "dataSize",
                value = data.len(),
                reason = "smaller than the queued message",
                "message of {} bytes does not fit",
                size
            );
            return Err(QueueError::invalid(
                "data",
                format!("{} bytes cannot hold a {size} byte message", data.len()),
            ));
        }

        match self
            .transport
            .queue_dequeue_buff(device, qid, data, user_data, timeout_ms)
        {
            Ok(()) => {
                info!(device, qid, ret_data_size = size, "success to dequeue data");
                Ok(size)
            }
            Err(RtError::QUEUE_EMPTY) => {
                info!("queue is empty, device is {}, qid is {}", device, qid);
                Err(QueueError::QueueEmpty { qid })
            }
            Err(e) => {
                error!(device, qid, "failed to dequeue data, ret is {}", e.code());
                Err(QueueError::from_rt("queue_dequeue_buff", qid, e))
            }
        }
    }

    // ── broker plumbing ───────────────────────────────────

    /// Initialises the transport's broker path once per process.
    pub fn init_broker_once(&self, device: i32) -> Result<()> {
        let mut done = BROKER_INITIALISED.lock();
        if *done {
            return Ok(());
        }
        info!(device, "need to init queue schedule");
        self.transport.queue_init_broker(device).map_err(|e| {
            error!("queue schedule init failed, ret is {}", e.code());
            QueueError::transport("queue_init_broker", e)
        })?;
        *done = true;
        Ok(())
    }

    pub fn broker_initialised() -> bool {
        *BROKER_INITIALISED.lock()
    }

    /// Resolves the pid of a cooperating device process.
    ///
    /// In thread mode an initialised broker runs inside this process.
    pub fn dst_pid(&self, device: i32, role: ProcessRole, thread_mode: bool) -> Result<i32> {
        if thread_mode && Self::broker_initialised() {
            return Ok(self.transport.current_pid());
        }
        let host_pid = self.transport.current_pid();
        debug!(device, ?role, "start to get dst pid");
        self.transport
            .query_dev_pid(device, host_pid, role)
            .map(|pid| {
                debug!(device, ?role, pid, "get dst pid success");
                pid
            })
            .map_err(|e| {
                info!(device, ?role, "can not query device pid");
                QueueError::transport("query_dev_pid", e)
            })
    }

    fn submit(&self, channel: &RouteChannel, op: SubEvent, msg: Bytes) -> Result<Reply> {
        let event = EventSummary {
            pid: channel.target.pid,
            grp_id: channel.target.grp_id,
            event_id: QS_MSG_EVENT_ID,
            sub_event_id: op as u32,
            dst_engine: channel.target.dst_engine,
            msg,
        };
        let raw = self
            .transport
            .submit_event_sync(channel.device, &event)
            .map_err(|e| {
                error!(op = op.name(), "call submit event sync failed, ret code id {}", e.code());
                QueueError::transport("submit_event_sync", e)
            })?;
        Reply::decode(&raw)
            .map_err(|e| QueueError::Internal(format!("malformed {} reply: {e}", op.name())))
    }

    fn check_reply(op: SubEvent, reply: &Reply) -> Result<()> {
        if reply.ret_code != 0 {
            error!(op = op.name(), "broker rejected request, ret code id {}", reply.ret_code);
            return Err(QueueError::Broker {
                op: op.name(),
                code: reply.ret_code,
            });
        }
        Ok(())
    }

    /// Sends the one-time hello and caches the contact queue id.
    pub fn connect_to_broker(&self, session: &Session, channel: &RouteChannel) -> Result<u32> {
        if let Some(contact) = session.contact() {
            return Ok(contact);
        }
        info!("start to send contact msg");
        let hello = ConnectMsg {
            pid: self.transport.current_pid(),
            grp_id: 0,
            major_version: CLIENT_MAJOR_VERSION,
        };
        let reply = self.submit(channel, SubEvent::BindInit, hello.encode())?;
        Self::check_reply(SubEvent::BindInit, &reply)?;
        let contact = u32::try_from(reply.ret_value).map_err(|_| {
            QueueError::Internal(format!("contact id {} out of range", reply.ret_value))
        })?;
        session.contact.set(Some(contact));
        session
            .enhanced
            .set(reply.major_version >= ENHANCED_BROKER_VERSION);
        info!(
            contact,
            broker_version = reply.major_version,
            enhanced = session.enhanced(),
            "successfully connected to queue schedule"
        );
        Ok(contact)
    }

    /// Moves `table` to the broker and returns it as the broker left it.
    fn exchange_table(
        &self,
        session: &Session,
        channel: &RouteChannel,
        op: SubEvent,
        table: BytesMut,
    ) -> Result<Vec<u8>> {
        match channel.exchange {
            Exchange::HostMemory => self.host_round_trip(channel, op, &table),
            Exchange::Mailbox => self.mailbox_round_trip(session, channel, op, &table),
        }
    }

    fn host_round_trip(&self, channel: &RouteChannel, op: SubEvent, table: &[u8]) -> Result<Vec<u8>> {
        let transport = self.transport();
        let addr = transport.dev_malloc(table.len()).map_err(|e| {
            error!(size = table.len(), "call malloc failed, ret is {}", e.code());
            QueueError::transport("dev_malloc", e)
        })?;
        let _alloc = DevAlloc { transport, addr };
        transport
            .dev_write(addr, 0, table)
            .map_err(|e| QueueError::transport("dev_write", e))?;
        let reply = self.submit(channel, op, protocol::encode_route_list_msg(addr))?;
        Self::check_reply(op, &reply)?;
        let mut out = vec![0u8; table.len()];
        transport
            .dev_read(addr, 0, &mut out)
            .map_err(|e| QueueError::transport("dev_read", e))?;
        Ok(out)
    }

    fn mailbox_round_trip(
        &self,
        session: &Session,
        channel: &RouteChannel,
        op: SubEvent,
        table: &[u8],
    ) -> Result<Vec<u8>> {
        let transport = self.transport();
        let contact = self.connect_to_broker(session, channel)?;
        let buf = transport.mbuf_alloc(table.len()).map_err(|e| {
            error!(size = table.len(), "[Get][mbuf]alloc mbuf failed, ret is {}", e.code());
            QueueError::BadAlloc { what: "route table buffer" }
        })?;
        let mut guard = MbufGuard::new(transport, buf);
        transport
            .mbuf_write(buf, 0, table)
            .map_err(|e| QueueError::transport("mbuf_write", e))?;
        transport.queue_enqueue(channel.device, contact, buf).map_err(|e| {
            error!(contact, "[Call][Rts]call enqueue to contact queue failed");
            QueueError::transport("queue_enqueue", e)
        })?;

        let reply = match self.submit(channel, op, protocol::encode_route_list_msg(0)) {
            Ok(reply) => reply,
            Err(e) => {
                if session.enhanced() {
                    // The broker owns the posted buffer now.
                    guard.disarm();
                }
                return Err(e);
            }
        };
        let buf = if session.enhanced() {
            match transport.queue_dequeue(channel.device, contact) {
                Ok(back) => {
                    guard.replace(back);
                    back
                }
                Err(e) => {
                    guard.disarm();
                    error!(contact, "dequeue route table from contact queue failed");
                    return Err(QueueError::transport("queue_dequeue", e));
                }
            }
        } else {
            buf
        };
        Self::check_reply(op, &reply)?;
        let mut out = vec![0u8; table.len()];
        transport
            .mbuf_read(buf, 0, &mut out)
            .map_err(|e| QueueError::transport("mbuf_read", e))?;
        Ok(out)
    }

    // ── route protocol ────────────────────────────────────

    /// Bind or unbind every route in `routes`, copying back per-route status.
    pub fn route_table_op(
        &self,
        channel: &RouteChannel,
        op: SubEvent,
        routes: &mut RouteList,
    ) -> Result<()> {
        let session = self.control();
        info!(op = op.name(), routes = routes.len(), "start to send route table");
        if routes.is_empty() {
            debug!(op = op.name(), "empty route list, nothing to send");
            return Ok(());
        }
        let table = protocol::encode_route_table(op, routes.as_slice());
        let result = self.exchange_table(&session, channel, op, table)?;
        let statuses = protocol::decode_records(&result, HEADER_LEN, routes.len())
            .map_err(|e| QueueError::Internal(format!("{} result: {e}", op.name())))?;
        for (i, (route, updated)) in routes.as_mut_slice().iter_mut().zip(&statuses).enumerate() {
            route.set_status(updated.status());
            debug!(
                "route {}, srcqid is {}, dstqid is {}, status is {}",
                i,
                route.src(),
                route.dst(),
                route.status()
            );
        }
        info!(op = op.name(), routes = routes.len(), "route table round trip finished");
        Ok(())
    }

    /// First phase of a query: how many bound routes match `block`.
    pub fn count_routes(&self, channel: &RouteChannel, block: &QueryBlock) -> Result<usize> {
        let _session = self.control();
        let reply = self.submit(channel, SubEvent::QueryNum, block.encode())?;
        Self::check_reply(SubEvent::QueryNum, &reply)?;
        let route_num = usize::try_from(reply.ret_value)
            .map_err(|_| QueueError::Internal(format!("route count {} out of range", reply.ret_value)))?;
        info!(route_num, query_type = block.query_type, "got queue route num");
        Ok(route_num)
    }

    /// Second phase of a query: fetch up to `route_num` matching routes into `out`.
    pub fn fetch_routes(
        &self,
        channel: &RouteChannel,
        block: &QueryBlock,
        route_num: usize,
        out: &mut RouteList,
    ) -> Result<()> {
        let session = self.control();
        info!(route_num, "start to query queue routes");
        if route_num == 0 {
            return Ok(());
        }
        let table = protocol::encode_query_table(block, route_num);
        let result = self.exchange_table(&session, channel, SubEvent::Query, table)?;
        let header = protocol::decode_header(&result)
            .map_err(|e| QueueError::Internal(format!("query result: {e}")))?;
        let found = (header.route_num as usize).min(route_num);
        let routes = protocol::decode_records(&result, HEADER_LEN + QUERY_BLOCK_LEN, found)
            .map_err(|e| QueueError::Internal(format!("query result: {e}")))?;
        for route in routes {
            debug!(
                "route srcqid is {}, dstqid is {}, status is {}",
                route.src(),
                route.dst(),
                route.status()
            );
            out.add(route);
        }
        info!(routes = out.len(), "successfully queried queue routes");
        Ok(())
    }

    // ── shared buffers and groups ─────────────────────────

    /// Initialises the shared-buffer subsystem once per process.
    pub fn init_mbuf_once(&self) -> Result<()> {
        let mut done = MBUF_INITIALISED.lock();
        if *done {
            return Ok(());
        }
        match self.transport.mbuf_init() {
            Ok(()) | Err(RtError::REPEATED_INIT) => {
                *done = true;
                Ok(())
            }
            Err(e) => {
                error!("mbuf init failed, ret is {}", e.code());
                Err(QueueError::transport("mbuf_init", e))
            }
        }
    }

    /// Cached memory group id, resolved on first use by `resolve`.
    pub fn group_id(&self, resolve: impl FnOnce() -> Result<i32>) -> Result<i32> {
        let mut group = self.group.lock();
        if let Some(id) = *group {
            return Ok(id);
        }
        let id = resolve()?;
        *group = Some(id);
        Ok(id)
    }

    /// Finds the first group this process may allocate from.
    pub fn query_alloc_group(&self) -> Result<Option<i32>> {
        let pid = self.transport.current_pid();
        let groups = self
            .transport
            .mem_group_query_process(pid)
            .map_err(|e| QueueError::transport("mem_group_query_process", e))?;
        for group in &groups {
            info!(
                "This proc [{}] has [{}] group, alloc is {}, name is {}",
                pid,
                groups.len(),
                group.rights.alloc,
                group.name
            );
            if group.rights.alloc {
                let id = self
                    .transport
                    .mem_group_id(&group.name)
                    .map_err(|e| QueueError::transport("mem_group_id", e))?;
                info!("This groupId is {}, name is {}", id, group.name);
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Creates a private group with full rights for this process and attaches it.
    pub fn create_own_group(&self) -> Result<i32> {
        let pid = self.transport.current_pid();
        let name = format!("queuelink_{pid}");
        info!(pid, group = %name, "creating memory group");
        self.transport
            .mem_group_create(&name)
            .map_err(|e| QueueError::transport("mem_group_create", e))?;
        self.transport
            .mem_group_add_process(&name, pid, GroupRights::FULL)
            .map_err(|e| QueueError::transport("mem_group_add_process", e))?;
        self.transport
            .mem_group_attach(&name, -1)
            .map_err(|e| QueueError::transport("mem_group_attach", e))?;
        self.transport
            .mem_group_id(&name)
            .map_err(|e| QueueError::transport("mem_group_id", e))
    }

    pub fn alloc_in_group(&self, size: usize, kind: BufType, group: i32) -> Result<BufHandle> {
        self.transport
            .mbuf_alloc_ex(size, kind, group)
            .map_err(|e| {
                error!("[Alloc][mbuf]fail to alloc mbuf result = {}", e.code());
                QueueError::transport("mbuf_alloc_ex", e)
            })
    }

    pub fn grant(&self, qid: u32, pid: i32, permission: Permission) -> Result<()> {
        self.transport
            .queue_grant(LOCAL_DEVICE, qid, pid, permission)
            .map_err(|e| {
                error!(qid, pid, ?permission, "grant queue failed, ret is {}", e.code());
                QueueError::transport("queue_grant", e)
            })
    }
}

/// The operation surface shared by all environments.
pub trait QueueProcessor: Send + Sync {
    fn core(&self) -> &ProcessorCore;

    fn env(&self) -> RunEnv;

    /// Where route tables go and how they get there.
    fn route_channel(&self) -> Result<RouteChannel>;

    fn create_queue(&self, attr: Option<&QueueAttr>) -> Result<u32>;

    fn destroy_queue(&self, qid: u32) -> Result<()>;

    fn enqueue(&self, qid: u32, buf: BufHandle, timeout_ms: i32) -> Result<()> {
        self.core().enqueue(qid, buf, timeout_ms)
    }

    fn dequeue(&self, qid: u32, timeout_ms: i32) -> Result<BufHandle> {
        self.core().dequeue(qid, timeout_ms)
    }

    fn enqueue_data(&self, qid: u32, data: &[u8], user_data: &[u8], timeout_ms: i32) -> Result<()> {
        self.core().enqueue_data(qid, data, user_data, timeout_ms)
    }

    fn dequeue_data(
        &self,
        qid: u32,
        data: &mut [u8],
        user_data: &mut [u8],
        timeout_ms: i32,
    ) -> Result<usize> {
        self.core().dequeue_data(qid, data, user_data, timeout_ms)
    }

    fn grant_queue(&self, _qid: u32, _pid: i32, _permission: Permission, _timeout_ms: i32) -> Result<()> {
        self.core().unsupported("grant_queue")
    }

    fn attach_queue(&self, _qid: u32, _timeout_ms: i32) -> Result<Permission> {
        self.core().unsupported("attach_queue")
    }

    fn bind_routes(&self, routes: &mut RouteList) -> Result<()> {
        let channel = self.route_channel()?;
        self.core().route_table_op(&channel, SubEvent::Bind, routes)
    }

    fn unbind_routes(&self, routes: &mut RouteList) -> Result<()> {
        let channel = self.route_channel()?;
        self.core().route_table_op(&channel, SubEvent::Unbind, routes)
    }

    fn query_route_count(&self, info: &RouteQueryInfo) -> Result<usize> {
        let mode = info.validate()?;
        let channel = self.route_channel()?;
        self.core()
            .count_routes(&channel, &QueryBlock::from_info(info, mode))
    }

    fn fetch_routes(&self, info: &RouteQueryInfo, route_num: usize, out: &mut RouteList) -> Result<()> {
        let mode = info.validate()?;
        let channel = self.route_channel()?;
        self.core()
            .fetch_routes(&channel, &QueryBlock::from_info(info, mode), route_num, out)
    }

    /// Count then fetch under one control-path lock, appending to `out`.
    fn query_routes(&self, info: &RouteQueryInfo, out: &mut RouteList) -> Result<()> {
        let _session = self.core().control();
        let route_num = self.query_route_count(info)?;
        self.fetch_routes(info, route_num, out)
    }

    fn alloc_buf(&self, _size: usize, _kind: BufType) -> Result<BufHandle> {
        self.core().unsupported("alloc_buf")
    }

    fn free_buf(&self, buf: BufHandle) -> Result<()> {
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_free(buf)
            .map_err(|e| QueueError::transport("mbuf_free", e))
    }

    /// Snapshot of the whole data region of `buf`.
    fn get_buf_data(&self, buf: BufHandle) -> Result<Bytes> {
        let buf = buf.require("buf")?;
        let transport = self.core().transport();
        let size = transport
            .mbuf_size(buf)
            .map_err(|e| QueueError::transport("mbuf_size", e))?;
        let mut out = vec![0u8; size];
        transport
            .mbuf_read(buf, 0, &mut out)
            .map_err(|e| QueueError::transport("mbuf_read", e))?;
        Ok(Bytes::from(out))
    }

    fn write_buf_data(&self, buf: BufHandle, offset: usize, data: &[u8]) -> Result<()> {
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_write(buf, offset, data)
            .map_err(|e| QueueError::transport("mbuf_write", e))
    }

    fn get_buf_data_len(&self, buf: BufHandle) -> Result<usize> {
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_data_len(buf)
            .map_err(|e| QueueError::transport("mbuf_data_len", e))
    }

    fn set_buf_data_len(&self, buf: BufHandle, len: usize) -> Result<()> {
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_set_data_len(buf, len)
            .map_err(|e| QueueError::transport("mbuf_set_data_len", e))
    }

    fn get_buf_user_data(&self, buf: BufHandle, out: &mut [u8], offset: usize) -> Result<()> {
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_user_data(buf, out, offset)
            .map_err(|e| QueueError::transport("mbuf_user_data", e))
    }

    fn set_buf_user_data(&self, buf: BufHandle, data: &[u8], offset: usize) -> Result<()> {
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_set_user_data(buf, data, offset)
            .map_err(|e| QueueError::transport("mbuf_set_user_data", e))
    }

    fn copy_buf_ref(&self, buf: BufHandle) -> Result<BufHandle> {
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_copy_ref(buf)
            .map_err(|e| QueueError::transport("mbuf_copy_ref", e))
    }

    fn append_buf_chain(&self, head: BufHandle, buf: BufHandle) -> Result<()> {
        let head = head.require("headBuf")?;
        let buf = buf.require("buf")?;
        self.core()
            .transport()
            .mbuf_chain_append(head, buf)
            .map_err(|e| QueueError::transport("mbuf_chain_append", e))
    }

    fn get_buf_chain_num(&self, head: BufHandle) -> Result<u32> {
        let head = head.require("headBuf")?;
        self.core()
            .transport()
            .mbuf_chain_len(head)
            .map_err(|e| QueueError::transport("mbuf_chain_len", e))
    }

    fn get_buf_from_chain(&self, head: BufHandle, index: u32) -> Result<BufHandle> {
        let head = head.require("headBuf")?;
        self.core()
            .transport()
            .mbuf_chain_get(head, index)
            .map_err(|e| QueueError::transport("mbuf_chain_get", e))
    }
}
