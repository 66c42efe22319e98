#![allow(dead_code)]

use std::sync::{Arc, Once};

use queuelink::core::processor::{ControlCpuProcessor, HostProcessor, ShareGroupProcessor};
use queuelink::transport::sim::{SimOptions, SimTransport};
use queuelink::Settings;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        queuelink::logging::init_logging_with("warn");
    });
}

pub fn control_cpu(sim: &Arc<SimTransport>) -> ControlCpuProcessor {
    init_logging();
    ControlCpuProcessor::new(sim.clone(), Settings::default())
}

pub fn share_group(sim: &Arc<SimTransport>) -> ShareGroupProcessor {
    init_logging();
    ShareGroupProcessor::new(sim.clone(), Settings::default())
}

pub fn host(sim: &Arc<SimTransport>) -> HostProcessor {
    init_logging();
    HostProcessor::new(sim.clone(), Settings::default())
}

pub fn device_sim() -> Arc<SimTransport> {
    Arc::new(SimTransport::device())
}

pub fn host_sim() -> Arc<SimTransport> {
    Arc::new(SimTransport::host())
}

/// Device simulation whose broker speaks the given protocol version.
pub fn device_sim_with_broker(version: u16) -> Arc<SimTransport> {
    Arc::new(SimTransport::new(SimOptions {
        broker_version: version,
        ..SimOptions::default()
    }))
}
