//! Scan failure taxonomy

use crate::usb::ReleaseError;
use common::ScanFailureKind;
use protocol::ProtocolError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Protocol phase a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prime,
    QueryCapabilities,
    Reprime,
    Negotiate,
    ConfigureFeeder,
    StartScan,
    ReadScanData,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Prime => "prime",
            Phase::QueryCapabilities => "query capabilities",
            Phase::Reprime => "re-prime",
            Phase::Negotiate => "negotiate resolution",
            Phase::ConfigureFeeder => "configure feeder",
            Phase::StartScan => "start scan",
            Phase::ReadScanData => "read scan data",
            Phase::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{phase}: {source}")]
    Phase {
        phase: Phase,
        source: Box<ScanError>,
    },

    #[error("USB transport error: {0}")]
    Transport(#[from] rusb::Error),

    #[error("timeout waiting for response after {polls} empty reads")]
    Timeout { polls: u32 },

    #[error("no end of stream within {0:?}")]
    StreamDeadline(Duration),

    #[error("malformed response: {0}")]
    Parse(#[from] ProtocolError),

    #[error("no suitable scanner found for device: VendorID={vendor_id}, ProductID={product_id}")]
    NoMatchingDevice {
        vendor_id: String,
        product_id: String,
    },

    #[error("invalid device descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("failed to open device {vendor_id:04x}:{product_id:04x}")]
    OpenFailed { vendor_id: u16, product_id: u16 },

    #[error("scanner is not connected")]
    NotConnected,

    #[error("protocol engine already ran; start a new one for the next scan")]
    EngineSpent,

    #[error("failed to write scan output: {0}")]
    Sink(std::io::Error),

    #[error(transparent)]
    Teardown(#[from] ReleaseError),
}

impl ScanError {
    /// Root cause classification, looking through phase wrappers
    pub fn kind(&self) -> ScanFailureKind {
        match self {
            ScanError::Phase { source, .. } => source.kind(),
            ScanError::Transport(_)
            | ScanError::OpenFailed { .. }
            | ScanError::NotConnected
            | ScanError::EngineSpent => ScanFailureKind::Transport,
            ScanError::Timeout { .. } | ScanError::StreamDeadline(_) => ScanFailureKind::Timeout,
            ScanError::Parse(_) => ScanFailureKind::Parse,
            ScanError::NoMatchingDevice { .. } => ScanFailureKind::NoMatchingDevice,
            ScanError::InvalidDescriptor(_) => ScanFailureKind::InvalidDescriptor,
            ScanError::Teardown(_) => ScanFailureKind::Teardown,
            ScanError::Sink(_) => ScanFailureKind::Sink,
        }
    }

    /// Innermost phase tag, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ScanError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

impl From<common::Error> for ScanError {
    fn from(err: common::Error) -> Self {
        ScanError::InvalidDescriptor(err.to_string())
    }
}

impl From<ScanError> for common::Error {
    fn from(err: ScanError) -> Self {
        common::Error::Scan {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Tag a failure with the phase it happened in
pub trait PhaseExt<T> {
    fn in_phase(self, phase: Phase) -> Result<T, ScanError>;
}

impl<T, E: Into<ScanError>> PhaseExt<T> for Result<T, E> {
    fn in_phase(self, phase: Phase) -> Result<T, ScanError> {
        self.map_err(|e| ScanError::Phase {
            phase,
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wrapping_keeps_kind() {
        let result: Result<(), rusb::Error> = Err(rusb::Error::Pipe);
        let err = result.in_phase(Phase::Negotiate).unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Negotiate));
        assert_eq!(err.kind(), ScanFailureKind::Transport);
        assert!(err.to_string().starts_with("negotiate resolution: "));
    }

    #[test]
    fn test_timeout_kind() {
        let result: Result<(), ScanError> = Err(ScanError::Timeout { polls: 100 });
        let err = result.in_phase(Phase::ConfigureFeeder).unwrap_err();
        assert_eq!(err.kind(), ScanFailureKind::Timeout);
        assert_eq!(
            ScanError::StreamDeadline(Duration::from_secs(1)).kind(),
            ScanFailureKind::Timeout
        );
    }

    #[test]
    fn test_no_matching_device_message_names_ids() {
        let err = ScanError::NoMatchingDevice {
            vendor_id: "0x1234".into(),
            product_id: "0x5678".into(),
        };
        let message = err.to_string();
        assert!(message.contains("0x1234"));
        assert!(message.contains("0x5678"));
    }

    #[test]
    fn test_conversion_to_common_error() {
        let err: common::Error = ScanError::Parse(ProtocolError::TooShort { len: 4, min: 10 }).into();
        match err {
            common::Error::Scan { kind, message } => {
                assert_eq!(kind, ScanFailureKind::Parse);
                assert!(message.contains("malformed response"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
