use std::sync::Arc;

use tracing::{error, info, warn};

use super::{
    EventTarget, Exchange, ProcessorCore, QueueProcessor, RouteChannel, RunEnv, LOCAL_DEVICE,
};
use crate::config::Settings;
use crate::core::attr::QueueAttr;
use crate::core::buffer::{BufHandle, BufType, Permission};
use crate::core::error::{QueueError, Result};
use crate::core::protocol::SubEvent;
use crate::core::route::RouteList;
use crate::transport::{ProcessRole, Transport};

/// Processor for device processes whose memory group was configured externally.
///
/// Queues created here are shared with the control CPU right away, and bind
/// requests hand the endpoint queues to the broker before submitting.
pub struct ShareGroupProcessor {
    core: ProcessorCore,
}

impl ShareGroupProcessor {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            core: ProcessorCore::new(transport, settings),
        }
    }

    fn control_cpu_pid(&self) -> Result<i32> {
        self.core
            .dst_pid(LOCAL_DEVICE, ProcessRole::ControlCpu, false)
    }

    fn grant_endpoints_to_broker(&self, routes: &RouteList, broker_pid: i32) -> Result<()> {
        for route in routes.iter() {
            self.core.grant(route.src(), broker_pid, Permission::READ_WRITE)?;
            self.core.grant(route.dst(), broker_pid, Permission::READ_WRITE)?;
        }
        Ok(())
    }
}

impl QueueProcessor for ShareGroupProcessor {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn env(&self) -> RunEnv {
        RunEnv::DeviceShareGroup
    }

    fn route_channel(&self) -> Result<RouteChannel> {
        let pid = self.core.dst_pid(LOCAL_DEVICE, ProcessRole::Broker, false)?;
        Ok(RouteChannel {
            device: LOCAL_DEVICE,
            target: EventTarget::device(pid),
            exchange: Exchange::Mailbox,
        })
    }

    fn create_queue(&self, attr: Option<&QueueAttr>) -> Result<u32> {
        let qid = self.core.create_queue_with_attr(LOCAL_DEVICE, attr)?;
        let granted = self
            .control_cpu_pid()
            .and_then(|cp_pid| self.core.grant(qid, cp_pid, Permission::all()).map(|()| cp_pid));
        match granted {
            Ok(cp_pid) => {
                info!(qid, cp_pid, "granted queue to control cpu");
                Ok(qid)
            }
            Err(e) => {
                error!(qid, error = %e, "grant to control cpu failed, destroying queue");
                if let Err(rt) = self.core.transport().queue_destroy(LOCAL_DEVICE, qid) {
                    warn!(qid, code = rt.code(), "failed to destroy ungranted queue");
                }
                Err(e)
            }
        }
    }

    fn destroy_queue(&self, qid: u32) -> Result<()> {
        self.core.destroy_queue_on_device(qid, false)
    }

    fn grant_queue(&self, qid: u32, pid: i32, permission: Permission, _timeout_ms: i32) -> Result<()> {
        if permission.is_empty() {
            return Err(QueueError::invalid("permission", "no permission bits set"));
        }
        self.core.grant(qid, pid, permission)?;
        info!(qid, pid, ?permission, "success to grant queue");
        Ok(())
    }

    fn attach_queue(&self, qid: u32, timeout_ms: i32) -> Result<Permission> {
        let transport = self.core.transport();
        transport
            .queue_attach(LOCAL_DEVICE, qid, timeout_ms)
            .map_err(|e| QueueError::transport("queue_attach", e))?;
        let permission = transport
            .queue_permission(LOCAL_DEVICE, qid)
            .map_err(|e| QueueError::transport("queue_permission", e))?;
        info!(qid, ?permission, "success to attach queue");

        match self.control_cpu_pid() {
            Ok(cp_pid) => {
                if let Err(e) = self.core.grant(qid, cp_pid, Permission::all()) {
                    warn!(qid, cp_pid, error = %e, "re-grant to control cpu failed");
                }
            }
            Err(e) => warn!(qid, error = %e, "control cpu pid unavailable, skipping re-grant"),
        }
        Ok(permission)
    }

    fn bind_routes(&self, routes: &mut RouteList) -> Result<()> {
        let channel = self.route_channel()?;
        self.grant_endpoints_to_broker(routes, channel.target.pid)?;
        self.core.route_table_op(&channel, SubEvent::Bind, routes)
    }

    fn alloc_buf(&self, size: usize, kind: BufType) -> Result<BufHandle> {
        self.core.init_mbuf_once()?;
        let group = self.core.group_id(|| {
            self.core
                .query_alloc_group()?
                .ok_or_else(|| QueueError::Failure("no memory group with alloc rights".into()))
        })?;
        self.core.alloc_in_group(size, kind, group)
    }
}
