//! Environment resolution and the process-wide processor instance.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::Settings;
use crate::core::error::{QueueError, Result};
use crate::core::processor::{
    ControlCpuProcessor, HostProcessor, QueueProcessor, RunEnv, ShareGroupProcessor,
};
use crate::transport::{RunMode, Transport};

static GLOBAL: OnceCell<QueueManager> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvState {
    /// Not known yet; every call queries the runtime again.
    Unresolved,
    Resolved(RunEnv),
    /// The runtime reported a mode this crate cannot serve.
    Unrecognized(u32),
}

/// Picks the processor variant for this process and owns the single instance.
pub struct QueueManager {
    transport: Arc<dyn Transport>,
    settings: Settings,
    env: Mutex<EnvState>,
    processor: OnceCell<Arc<dyn QueueProcessor>>,
    build_lock: Mutex<()>,
}

impl QueueManager {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            transport,
            settings,
            env: Mutex::new(EnvState::Unresolved),
            processor: OnceCell::new(),
            build_lock: Mutex::new(()),
        }
    }

    /// Installs `manager` as the process-wide instance. The first install wins.
    pub fn install(manager: QueueManager) -> &'static QueueManager {
        GLOBAL.get_or_init(|| manager)
    }

    pub fn global() -> Result<&'static QueueManager> {
        GLOBAL
            .get()
            .ok_or_else(|| QueueError::Internal("no queue manager installed".into()))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Determines the environment once; unresolved states are retried per call.
    pub fn resolve_environment(&self) -> Result<RunEnv> {
        let mut state = self.env.lock();
        match *state {
            EnvState::Resolved(env) => return Ok(env),
            EnvState::Unrecognized(raw) => {
                return Err(QueueError::Internal(format!("unrecognized run mode {raw}")))
            }
            EnvState::Unresolved => {}
        }

        let mode = self.transport.run_mode().map_err(|e| {
            error!("[Get][RunMode]get run mode failed, errorCode = {}", e.code());
            QueueError::transport("run_mode", e)
        })?;
        let env = match mode {
            RunMode::Host => RunEnv::Host,
            RunMode::Device if self.settings.environment.share_group => RunEnv::DeviceShareGroup,
            RunMode::Device => RunEnv::DeviceControlCpu,
            RunMode::Other(raw) => {
                error!(run_mode = raw, "unrecognized run mode");
                *state = EnvState::Unrecognized(raw);
                return Err(QueueError::Internal(format!("unrecognized run mode {raw}")));
            }
        };
        info!(?env, "queue environment resolved");
        *state = EnvState::Resolved(env);
        Ok(env)
    }

    /// Returns the processor, constructing it on first use.
    pub fn get_processor(&self) -> Result<Arc<dyn QueueProcessor>> {
        if let Some(processor) = self.processor.get() {
            return Ok(Arc::clone(processor));
        }
        let _building = self.build_lock.lock();
        if let Some(processor) = self.processor.get() {
            return Ok(Arc::clone(processor));
        }

        let env = self.resolve_environment().map_err(|e| {
            error!(error = %e, "cannot build queue processor");
            QueueError::Internal(format!("queue processor unavailable: {e}"))
        })?;
        let processor = self.build(env);
        let processor = self.processor.get_or_init(|| processor);
        Ok(Arc::clone(processor))
    }

    fn build(&self, env: RunEnv) -> Arc<dyn QueueProcessor> {
        let transport = Arc::clone(&self.transport);
        let settings = self.settings.clone();
        info!(?env, "constructing queue processor");
        match env {
            RunEnv::Host => Arc::new(HostProcessor::new(transport, settings)),
            RunEnv::DeviceShareGroup => Arc::new(ShareGroupProcessor::new(transport, settings)),
            RunEnv::DeviceControlCpu => Arc::new(ControlCpuProcessor::new(transport, settings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::{SimOptions, SimTransport};
    use crate::transport::RtError;

    fn manager(sim: SimTransport, share_group: bool) -> QueueManager {
        let mut settings = Settings::default();
        settings.environment.share_group = share_group;
        QueueManager::new(Arc::new(sim), settings)
    }

    #[test]
    fn host_mode_selects_host_processor() {
        let m = manager(SimTransport::host(), false);
        assert_eq!(m.resolve_environment().unwrap(), RunEnv::Host);
        assert_eq!(m.get_processor().unwrap().env(), RunEnv::Host);
    }

    #[test]
    fn device_mode_honours_share_group_flag() {
        let shared = manager(SimTransport::device(), true);
        assert_eq!(shared.resolve_environment().unwrap(), RunEnv::DeviceShareGroup);
        let control = manager(SimTransport::device(), false);
        assert_eq!(control.resolve_environment().unwrap(), RunEnv::DeviceControlCpu);
    }

    #[test]
    fn failed_query_is_retried_then_cached() {
        let sim = SimTransport::new(SimOptions::default());
        sim.script_run_mode([Err(RtError::INTERNAL), Ok(RunMode::Device)]);
        let m = manager(sim, false);
        let err = m.resolve_environment().unwrap_err();
        assert_eq!(err.code(), RtError::INTERNAL.code());
        assert_eq!(m.resolve_environment().unwrap(), RunEnv::DeviceControlCpu);
        assert_eq!(m.resolve_environment().unwrap(), RunEnv::DeviceControlCpu);
    }

    #[test]
    fn unknown_mode_is_internal_and_sticky() {
        let sim = SimTransport::new(SimOptions::default());
        sim.script_run_mode([Ok(RunMode::Other(7)), Ok(RunMode::Device)]);
        let m = manager(sim, false);
        assert!(matches!(m.resolve_environment(), Err(QueueError::Internal(_))));
        assert!(matches!(m.resolve_environment(), Err(QueueError::Internal(_))));
        assert!(matches!(m.get_processor(), Err(QueueError::Internal(_))));
    }
}
