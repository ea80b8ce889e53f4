//! Compute device detection.
//!
//! The detected device is reported through a `device` event and never
//! influences which backend runs or how it schedules work.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
    /// Apple Metal Performance Shaders.
    Mps,
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
            Self::Mps => f.write_str("mps"),
        }
    }
}

pub trait DeviceProbe: Send + Sync {
    fn detect(&self) -> ComputeDevice;
}

/// Probe for the tensor backend compiled into this crate.
///
/// The neural backend runs on burn's ndarray backend, which only ever
/// executes on the host CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDeviceProbe;

impl DeviceProbe for HostDeviceProbe {
    fn detect(&self) -> ComputeDevice {
        ComputeDevice::Cpu
    }
}

/// Probe that always reports the same device.
#[derive(Debug, Clone, Copy)]
pub struct FixedDeviceProbe(pub ComputeDevice);

impl DeviceProbe for FixedDeviceProbe {
    fn detect(&self) -> ComputeDevice {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_names() {
        assert_eq!(ComputeDevice::Cpu.to_string(), "cpu");
        assert_eq!(ComputeDevice::Cuda(1).to_string(), "cuda:1");
        assert_eq!(ComputeDevice::Mps.to_string(), "mps");
    }

    #[test]
    fn test_host_probe_reports_cpu() {
        assert_eq!(HostDeviceProbe.detect(), ComputeDevice::Cpu);
        assert_eq!(FixedDeviceProbe(ComputeDevice::Mps).detect(), ComputeDevice::Mps);
    }
}
