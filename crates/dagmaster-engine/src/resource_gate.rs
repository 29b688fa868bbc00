use std::sync::Mutex;

use sysinfo::System;

/// Host resource thresholds (fractions of 1.0) above which new task dispatch
/// is paused until the next tick.
#[derive(Debug, Clone, Copy)]
pub struct ResourceThresholds {
    pub cpu_threshold: f32,
    pub mem_threshold: f32,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_threshold: 0.9,
            mem_threshold: 0.9,
        }
    }
}

/// Admission control gate consulted by `DagEngine` before dispatching a task.
/// Backpressure only, never an error: a saturated host just delays dispatch.
pub trait ResourceGate: Send + Sync + std::fmt::Debug {
    fn allows_dispatch(&self) -> bool;
}

#[derive(Debug)]
pub struct SysinfoResourceGate {
    thresholds: ResourceThresholds,
    system: Mutex<System>,
}

impl SysinfoResourceGate {
    pub fn new(thresholds: ResourceThresholds) -> Self {
        Self {
            thresholds,
            system: Mutex::new(System::new()),
        }
    }
}

impl ResourceGate for SysinfoResourceGate {
    fn allows_dispatch(&self) -> bool {
        let Ok(mut system) = self.system.lock() else {
            return true;
        };
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu = system.global_cpu_usage() / 100.0;
        let mem = if system.total_memory() == 0 {
            0.0
        } else {
            system.used_memory() as f32 / system.total_memory() as f32
        };
        cpu < self.thresholds.cpu_threshold && mem < self.thresholds.mem_threshold
    }
}

/// Test double that never backpressures.
#[derive(Debug, Default)]
pub struct AlwaysAllow;

impl ResourceGate for AlwaysAllow {
    fn allows_dispatch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_allow_never_blocks() {
        assert!(AlwaysAllow.allows_dispatch());
    }

    #[test]
    fn sysinfo_gate_reports_without_panicking() {
        let gate = SysinfoResourceGate::new(ResourceThresholds::default());
        let _ = gate.allows_dispatch();
    }
}
