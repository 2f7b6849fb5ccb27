//! The device catalog: a snapshot of the host audio library's input and
//! output devices, indexed independently per direction, taken once at
//! [`crate::engine::Engine::initialize`] and discarded at `shutdown`.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{EngineError, EngineResult};

/// An immutable snapshot of one host device. `host_index` is the device's
/// position in the host library's own enumeration (`cpal::Host::devices`),
/// kept around for diagnostics even though lookups go through the
/// direction-specific index instead.
#[derive(Debug, Clone)]
pub struct Device {
    pub host_index: usize,
    pub name: String,
    pub suggested_latency: Duration,
}

/// Input and output devices enumerated at `initialize`, plus the host's
/// reported default for each direction (absent if the host reports none).
#[derive(Debug, Default)]
pub struct DeviceCatalog {
    inputs: Vec<Device>,
    outputs: Vec<Device>,
    default_input: Option<usize>,
    default_output: Option<usize>,
}

impl DeviceCatalog {
    /// Enumerate every device the host library reports, splitting into
    /// input/output lists by whether the device exposes a default config
    /// in that direction.
    pub fn enumerate(host: &cpal::Host) -> EngineResult<Self> {
        let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
        let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

        let mut catalog = Self::default();

        let devices = host
            .devices()
            .map_err(|e| EngineError::Host(format!("failed to enumerate devices: {e}")))?;

        for (host_index, device) in devices.enumerate() {
            let Ok(name) = device.name() else { continue };

            if let Ok(config) = device.default_input_config() {
                if catalog.default_input.is_none() && default_input_name.as_deref() == Some(name.as_str())
                {
                    catalog.default_input = Some(catalog.inputs.len());
                }
                catalog.inputs.push(Device {
                    host_index,
                    name: name.clone(),
                    suggested_latency: latency_from_config(&config),
                });
            }

            if let Ok(config) = device.default_output_config() {
                if catalog.default_output.is_none()
                    && default_output_name.as_deref() == Some(name.as_str())
                {
                    catalog.default_output = Some(catalog.outputs.len());
                }
                catalog.outputs.push(Device {
                    host_index,
                    name,
                    suggested_latency: latency_from_config(&config),
                });
            }
        }

        log::info!(
            "enumerated {} input device(s), {} output device(s)",
            catalog.inputs.len(),
            catalog.outputs.len()
        );

        Ok(catalog)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn default_input_index(&self) -> Option<usize> {
        self.default_input
    }

    pub fn default_output_index(&self) -> Option<usize> {
        self.default_output
    }

    pub fn input(&self, index: usize) -> EngineResult<&Device> {
        self.inputs
            .get(index)
            .ok_or_else(|| EngineError::Precondition(format!("input device index {index} out of range")))
    }

    pub fn output(&self, index: usize) -> EngineResult<&Device> {
        self.outputs
            .get(index)
            .ok_or_else(|| EngineError::Precondition(format!("output device index {index} out of range")))
    }

    pub fn input_name(&self, index: usize) -> EngineResult<&str> {
        Ok(self.input(index)?.name.as_str())
    }

    pub fn output_name(&self, index: usize) -> EngineResult<&str> {
        Ok(self.output(index)?.name.as_str())
    }
}

/// cpal has no direct equivalent of PortAudio's suggested latency; we
/// approximate it from the device's default buffer size at its default
/// sample rate, falling back to a conservative 20ms guess when the host
/// reports a range instead of a fixed size.
fn latency_from_config(config: &cpal::SupportedStreamConfig) -> Duration {
    let sample_rate = config.sample_rate().0.max(1) as f64;
    let frames = match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, .. } => (*min).max(1) as f64,
        cpal::SupportedBufferSize::Unknown => sample_rate * 0.02,
    };
    Duration::from_secs_f64(frames / sample_rate)
}
