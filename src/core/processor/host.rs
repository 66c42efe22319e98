use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info};

use super::{EventTarget, Exchange, ProcessorCore, QueueProcessor, RouteChannel, RunEnv};
use crate::config::Settings;
use crate::core::attr::QueueAttr;
use crate::core::buffer::{BufHandle, BufType};
use crate::core::error::{QueueError, Result};
use crate::core::protocol::SubEvent;
use crate::core::route::RouteList;
use crate::transport::{ProcessRole, RtError, Transport};

/// Processor for host processes.
///
/// Route tables travel through host-visible device memory and are relayed by
/// the device control CPU. Buffers cannot be queued or allocated from here.
pub struct HostProcessor {
    core: ProcessorCore,
}

impl HostProcessor {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            core: ProcessorCore::new(transport, settings),
        }
    }

    fn channel_for(&self, device: i32) -> Result<RouteChannel> {
        let pid = self.core.dst_pid(device, ProcessRole::ControlCpu, false)?;
        Ok(RouteChannel {
            device,
            target: EventTarget::host(pid),
            exchange: Exchange::HostMemory,
        })
    }
}

impl QueueProcessor for HostProcessor {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn env(&self) -> RunEnv {
        RunEnv::Host
    }

    fn route_channel(&self) -> Result<RouteChannel> {
        let device = self.core.device_id()?;
        self.channel_for(device)
    }

    fn create_queue(&self, attr: Option<&QueueAttr>) -> Result<u32> {
        let device = self.core.device_id()?;
        match self.core.transport().queue_init(device) {
            Ok(()) | Err(RtError::REPEATED_INIT) => {}
            Err(e) => {
                error!(device, "queue init failed, ret is {}", e.code());
                return Err(QueueError::transport("queue_init", e));
            }
        }
        self.core.create_queue_with_attr(device, attr)
    }

    fn destroy_queue(&self, qid: u32) -> Result<()> {
        let device = self.core.device_id()?;
        let probe = match self.core.dst_pid(device, ProcessRole::Broker, false) {
            Ok(_) => Some(self.channel_for(device)?),
            Err(_) => None,
        };
        info!(device, qid, "start to destroy queue on host");
        self.core.destroy_queue_guarded(device, qid, probe)
    }

    fn bind_routes(&self, routes: &mut RouteList) -> Result<()> {
        let device = self.core.device_id()?;
        self.core.init_broker_once(device)?;
        let channel = self.channel_for(device)?;
        self.core.route_table_op(&channel, SubEvent::Bind, routes)
    }

    fn enqueue(&self, _qid: u32, _buf: BufHandle, _timeout_ms: i32) -> Result<()> {
        self.core.unsupported("enqueue")
    }

    fn dequeue(&self, _qid: u32, _timeout_ms: i32) -> Result<BufHandle> {
        self.core.unsupported("dequeue")
    }

    fn alloc_buf(&self, _size: usize, _kind: BufType) -> Result<BufHandle> {
        self.core.unsupported("alloc_buf")
    }

    // Buffers live on the device; none of them can be touched from the host.

    fn free_buf(&self, _buf: BufHandle) -> Result<()> {
        self.core.unsupported("free_buf")
    }

    fn get_buf_data(&self, _buf: BufHandle) -> Result<Bytes> {
        self.core.unsupported("get_buf_data")
    }

    fn write_buf_data(&self, _buf: BufHandle, _offset: usize, _data: &[u8]) -> Result<()> {
        self.core.unsupported("write_buf_data")
    }

    fn get_buf_data_len(&self, _buf: BufHandle) -> Result<usize> {
        self.core.unsupported("get_buf_data_len")
    }

    fn set_buf_data_len(&self, _buf: BufHandle, _len: usize) -> Result<()> {
        self.core.unsupported("set_buf_data_len")
    }

    fn get_buf_user_data(&self, _buf: BufHandle, _out: &mut [u8], _offset: usize) -> Result<()> {
        self.core.unsupported("get_buf_user_data")
    }

    fn set_buf_user_data(&self, _buf: BufHandle, _data: &[u8], _offset: usize) -> Result<()> {
        self.core.unsupported("set_buf_user_data")
    }

    fn copy_buf_ref(&self, _buf: BufHandle) -> Result<BufHandle> {
        self.core.unsupported("copy_buf_ref")
    }

    fn append_buf_chain(&self, _head: BufHandle, _buf: BufHandle) -> Result<()> {
        self.core.unsupported("append_buf_chain")
    }

    fn get_buf_chain_num(&self, _head: BufHandle) -> Result<u32> {
        self.core.unsupported("get_buf_chain_num")
    }

    fn get_buf_from_chain(&self, _head: BufHandle, _index: u32) -> Result<BufHandle> {
        self.core.unsupported("get_buf_from_chain")
    }
}
