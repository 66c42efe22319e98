use std::sync::Arc;

use tracing::info;

use super::{
    EventTarget, Exchange, ProcessorCore, QueueProcessor, RouteChannel, RunEnv, LOCAL_DEVICE,
};
use crate::config::Settings;
use crate::core::attr::QueueAttr;
use crate::core::buffer::{BufHandle, BufType};
use crate::core::error::Result;
use crate::core::protocol::SubEvent;
use crate::core::route::RouteList;
use crate::transport::{ProcessRole, Transport};

/// Processor for device processes that run alongside the broker.
///
/// The broker may live in this very process (thread mode), and the memory
/// group is found or created on first allocation.
pub struct ControlCpuProcessor {
    core: ProcessorCore,
}

impl ControlCpuProcessor {
    const THREAD_MODE: bool = true;

    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            core: ProcessorCore::new(transport, settings),
        }
    }

    fn ensure_group(&self) -> Result<i32> {
        self.core.group_id(|| {
            let id = match self.core.query_alloc_group()? {
                Some(id) => id,
                None => {
                    info!("no usable memory group, creating one");
                    self.core.create_own_group()?
                }
            };
            self.core.init_mbuf_once()?;
            Ok(id)
        })
    }
}

impl QueueProcessor for ControlCpuProcessor {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn env(&self) -> RunEnv {
        RunEnv::DeviceControlCpu
    }

    fn route_channel(&self) -> Result<RouteChannel> {
        let pid = self
            .core
            .dst_pid(LOCAL_DEVICE, ProcessRole::Broker, Self::THREAD_MODE)?;
        Ok(RouteChannel {
            device: LOCAL_DEVICE,
            target: EventTarget::device(pid),
            exchange: Exchange::Mailbox,
        })
    }

    fn create_queue(&self, attr: Option<&QueueAttr>) -> Result<u32> {
        self.core.create_queue_with_attr(LOCAL_DEVICE, attr)
    }

    fn destroy_queue(&self, qid: u32) -> Result<()> {
        self.core.destroy_queue_on_device(qid, Self::THREAD_MODE)
    }

    /// Brings the broker up in this process before the first bind, after which
    /// route traffic targets the own pid.
    fn bind_routes(&self, routes: &mut RouteList) -> Result<()> {
        self.core.init_broker_once(LOCAL_DEVICE)?;
        let channel = self.route_channel()?;
        self.core.route_table_op(&channel, SubEvent::Bind, routes)
    }

    fn alloc_buf(&self, size: usize, kind: BufType) -> Result<BufHandle> {
        let group = self.ensure_group()?;
        self.core.alloc_in_group(size, kind, group)
    }
}
