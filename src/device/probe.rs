use super::DeviceProbe;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider,
};
use std::process::Command;

/// Probes the real host through ONNX Runtime and `nvidia-smi`
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn cuda_available(&self) -> bool {
        CUDAExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
    }

    fn cuda_compute_major(&self) -> Option<u32> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=compute_cap", "--format=csv,noheader"])
            .output()
            .ok()?;

        if !output.status.success() {
            tracing::debug!("nvidia-smi exited with {}", output.status);
            return None;
        }

        parse_compute_major(&String::from_utf8_lossy(&output.stdout))
    }

    fn coreml_available(&self) -> bool {
        CoreMLExecutionProvider::default()
            .is_available()
            .unwrap_or(false)
    }
}

/// Major version from the first line of `compute_cap` output, e.g. "8.6"
fn parse_compute_major(output: &str) -> Option<u32> {
    output
        .lines()
        .next()?
        .trim()
        .split('.')
        .next()?
        .parse()
        .ok()
}
