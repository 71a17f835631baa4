pub mod backend;
pub mod diagnostics;
pub mod generator;
#[cfg(feature = "kgsl")]
pub mod kgsl;
#[cfg(test)]
pub mod mock_backend;
#[cfg(not(feature = "kgsl"))]
pub mod msm;
pub mod replay_session;
pub mod vma_heap;

use crate::trace::capture_reader::CaptureError;
use backend::DeviceError;
use generator::GeneratorError;
use std::io;
use thiserror::Error;

#[cfg(feature = "kgsl")]
pub type DefaultBackend = kgsl::KgslBackend;
#[cfg(not(feature = "kgsl"))]
pub type DefaultBackend = msm::MsmBackend;

/// Open the device backend this binary was built for.
pub fn open_default_backend() -> Result<DefaultBackend, DeviceError> {
    DefaultBackend::open()
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("override generator failed: {0}")]
    Generator(#[from] GeneratorError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("gpu range {iova:#x}+{size:#x} is not available")]
    AddressUnavailable { iova: u64, size: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReplayError {
    /// Device state can't be trusted after these; everything else only
    /// ends the current input file.
    pub fn is_fatal(&self) -> bool {
        match self {
            ReplayError::Device(_) | ReplayError::AddressUnavailable { .. } => true,
            ReplayError::Generator(_) | ReplayError::Capture(_) | ReplayError::Io(_) => false,
        }
    }
}
