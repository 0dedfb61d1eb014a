mod probe;

pub use probe::SystemProbe;

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    ExecutionProviderDispatch,
};
use std::fmt;
use std::str::FromStr;

/// Compute capability major version from which TF32 matmul is enabled (Ampere)
const TF32_MIN_COMPUTE_MAJOR: u32 = 8;

/// Execution device for the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda { allow_tf32: bool },
    CoreMl,
    Cpu,
}

impl Device {
    /// ONNX Runtime execution provider for this device
    pub fn execution_provider(&self) -> ExecutionProviderDispatch {
        match *self {
            Device::Cuda { allow_tf32 } => CUDAExecutionProvider::default()
                .with_tf32(allow_tf32)
                .build(),
            Device::CoreMl => CoreMLExecutionProvider::default().build(),
            Device::Cpu => CPUExecutionProvider::default().build(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda { .. } => write!(f, "cuda"),
            Device::CoreMl => write!(f, "coreml"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// What the host machine can run on
///
/// Kept behind a trait so selection can be exercised without GPUs.
pub trait DeviceProbe {
    fn cuda_available(&self) -> bool;

    /// Major compute capability of the first CUDA device, when known
    fn cuda_compute_major(&self) -> Option<u32>;

    fn coreml_available(&self) -> bool;
}

/// Requested device on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cuda,
    CoreMl,
    Cpu,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cuda" => Ok(DevicePreference::Cuda),
            "coreml" | "mps" => Ok(DevicePreference::CoreMl),
            "cpu" => Ok(DevicePreference::Cpu),
            other => Err(format!(
                "unknown device {:?} (expected auto, cuda, coreml or cpu)",
                other
            )),
        }
    }
}

/// Picks the execution device once per process
pub struct DeviceSelector {
    device: Device,
}

impl DeviceSelector {
    /// Pick the execution device; `Auto` probes for CUDA, then CoreML, then CPU
    pub fn with_preference<P: DeviceProbe>(probe: &P, preference: DevicePreference) -> Self {
        let device = match preference {
            DevicePreference::Auto => Self::select(probe),
            DevicePreference::Cuda => Self::configure_cuda(probe),
            DevicePreference::CoreMl => {
                Self::warn_about_coreml();
                Device::CoreMl
            }
            DevicePreference::Cpu => Device::Cpu,
        };

        tracing::info!("Using device: {}", device);
        Self { device }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn select<P: DeviceProbe>(probe: &P) -> Device {
        if probe.cuda_available() {
            Self::configure_cuda(probe)
        } else if probe.coreml_available() {
            Self::warn_about_coreml();
            Device::CoreMl
        } else {
            Device::Cpu
        }
    }

    fn configure_cuda<P: DeviceProbe>(probe: &P) -> Device {
        let allow_tf32 = probe
            .cuda_compute_major()
            .map(|major| major >= TF32_MIN_COMPUTE_MAJOR)
            .unwrap_or(false);

        if allow_tf32 {
            tracing::debug!("Enabling TF32 matmul on CUDA");
        }

        Device::Cuda { allow_tf32 }
    }

    fn warn_about_coreml() {
        tracing::warn!(
            "Support for CoreML devices is preliminary; results may differ numerically from CUDA"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe {
        cuda: bool,
        compute_major: Option<u32>,
        coreml: bool,
    }

    impl DeviceProbe for FakeProbe {
        fn cuda_available(&self) -> bool {
            self.cuda
        }

        fn cuda_compute_major(&self) -> Option<u32> {
            self.compute_major
        }

        fn coreml_available(&self) -> bool {
            self.coreml
        }
    }

    fn auto(probe: &FakeProbe) -> Device {
        DeviceSelector::with_preference(probe, DevicePreference::Auto).device()
    }

    #[test]
    fn falls_back_to_cpu_without_accelerators() {
        let probe = FakeProbe {
            cuda: false,
            compute_major: None,
            coreml: false,
        };
        assert_eq!(auto(&probe), Device::Cpu);
    }

    #[test]
    fn prefers_cuda_over_coreml() {
        let probe = FakeProbe {
            cuda: true,
            compute_major: Some(7),
            coreml: true,
        };
        assert_eq!(auto(&probe), Device::Cuda { allow_tf32: false });
    }

    #[test]
    fn modern_cuda_enables_tf32() {
        let probe = FakeProbe {
            cuda: true,
            compute_major: Some(8),
            coreml: false,
        };
        assert_eq!(auto(&probe), Device::Cuda { allow_tf32: true });
    }

    #[test]
    fn coreml_is_second_choice() {
        let probe = FakeProbe {
            cuda: false,
            compute_major: None,
            coreml: true,
        };
        assert_eq!(auto(&probe), Device::CoreMl);
    }

    #[test]
    fn explicit_preference_skips_probing() {
        let probe = FakeProbe {
            cuda: true,
            compute_major: Some(9),
            coreml: true,
        };
        let selector = DeviceSelector::with_preference(&probe, DevicePreference::Cpu);
        assert_eq!(selector.device(), Device::Cpu);
    }

    #[test]
    fn parses_preferences() {
        assert_eq!("CUDA".parse::<DevicePreference>(), Ok(DevicePreference::Cuda));
        assert_eq!("mps".parse::<DevicePreference>(), Ok(DevicePreference::CoreMl));
        assert!("tpu".parse::<DevicePreference>().is_err());
    }
}
