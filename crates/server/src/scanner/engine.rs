//! Scanner protocol engine
//!
//! Drives a [`Transport`] through the fixed phase sequence the firmware
//! expects:
//!
//! ```text
//! prime(1) -> query capabilities -> prime(2), prime(1) -> negotiate
//!   -> configure feeder -> start scan -> stream image -> finalize(2)
//! ```
//!
//! Phases are never skipped, reordered or retried. The only retries are the
//! empty reads inside [`poll_response`].

use super::error::{Phase, PhaseExt, ScanError};
use crate::usb::Transport;
use protocol::{
    CAPABILITIES_RESPONSE_LEN, CONTROL_INDEX, CONTROL_REQUEST_FINALIZE, CONTROL_REQUEST_PRIME,
    CONTROL_RESPONSE_LEN, CONTROL_VALUE, DEFAULT_BRIGHTNESS, DEFAULT_CONTRAST,
    FEEDER_RESPONSE_LEN, NEGOTIATION_RESPONSE_LEN, NegotiationResult, ScanOptions, ScanRequest,
    ScanWindow, StreamChunk, capabilities_request, feeder_request, negotiation_request,
    parse_negotiation,
};
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Tunables of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Empty reads tolerated while waiting for a fixed-length response
    pub max_polls: u32,
    /// Sleep after each empty read while polling
    pub poll_interval: Duration,
    /// Bulk read size while streaming image data
    pub stream_buffer_size: usize,
    /// Upper bound for the whole image stream; `None` waits forever
    pub stream_deadline: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_polls: 100,
            poll_interval: Duration::from_millis(30),
            stream_buffer_size: 16 * 1024,
            stream_deadline: Some(Duration::from_secs(120)),
        }
    }
}

/// Where the engine is in the phase sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Primed,
    CapabilitiesQueried,
    Negotiated,
    AdfConfigured,
    Scanning,
    Draining,
    Done,
    Failed,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Done | ScanState::Failed)
    }
}

/// One scan over an opened transport
///
/// Single use: once `Done` or `Failed`, build a new engine for the next scan.
pub struct ProtocolEngine<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    settings: &'a EngineSettings,
    state: ScanState,
}

impl<'a, T: Transport + ?Sized> ProtocolEngine<'a, T> {
    pub fn new(transport: &'a mut T, settings: &'a EngineSettings) -> Self {
        Self {
            transport,
            settings,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Run every phase, streaming the image payload into `out`
    ///
    /// Returns the number of payload bytes written.
    pub fn run(&mut self, out: &mut dyn Write, opts: &ScanOptions) -> Result<u64, ScanError> {
        if self.state != ScanState::Idle {
            return Err(ScanError::EngineSpent);
        }
        let result = self.run_phases(out, opts);
        if result.is_err() {
            self.transition(ScanState::Failed);
        }
        result
    }

    fn run_phases(&mut self, out: &mut dyn Write, opts: &ScanOptions) -> Result<u64, ScanError> {
        self.control(CONTROL_REQUEST_PRIME).in_phase(Phase::Prime)?;
        self.transition(ScanState::Primed);

        self.exchange(&capabilities_request(), CAPABILITIES_RESPONSE_LEN)
            .in_phase(Phase::QueryCapabilities)?;
        self.transition(ScanState::CapabilitiesQueried);

        self.control(CONTROL_REQUEST_FINALIZE).in_phase(Phase::Reprime)?;
        self.control(CONTROL_REQUEST_PRIME).in_phase(Phase::Reprime)?;

        let negotiated = self.negotiate(opts).in_phase(Phase::Negotiate)?;
        self.transition(ScanState::Negotiated);

        self.exchange(&feeder_request(), FEEDER_RESPONSE_LEN)
            .in_phase(Phase::ConfigureFeeder)?;
        self.transition(ScanState::AdfConfigured);

        let request = build_scan_request(opts, &negotiated);
        debug!("Scan window: {:?}", request.window);
        self.transport
            .write_bulk(&request.to_bytes())
            .in_phase(Phase::StartScan)?;
        self.transition(ScanState::Scanning);

        let written = stream_image(&mut *self.transport, out, self.settings)
            .in_phase(Phase::ReadScanData)?;
        self.transition(ScanState::Draining);

        self.control(CONTROL_REQUEST_FINALIZE).in_phase(Phase::Finalize)?;
        self.transition(ScanState::Done);

        info!("Scan complete: {} bytes", written);
        Ok(written)
    }

    fn transition(&mut self, next: ScanState) {
        debug!("Scan state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn control(&mut self, request: u8) -> Result<(), ScanError> {
        let mut buf = [0u8; CONTROL_RESPONSE_LEN];
        let len = self
            .transport
            .read_control(request, CONTROL_VALUE, CONTROL_INDEX, &mut buf)?;
        trace!("Control {} reply: {:02x?}", request, &buf[..len]);
        Ok(())
    }

    /// Write a command and wait for its fixed-length response
    fn exchange(&mut self, command: &[u8], response_len: usize) -> Result<Vec<u8>, ScanError> {
        self.transport.write_bulk(command)?;
        poll_response(&mut *self.transport, response_len, self.settings)
    }

    fn negotiate(&mut self, opts: &ScanOptions) -> Result<NegotiationResult, ScanError> {
        let reply = self.exchange(
            &negotiation_request(opts.dpi, opts.mode),
            NEGOTIATION_RESPONSE_LEN,
        )?;
        let negotiated = parse_negotiation(&reply)?;
        debug!(
            "Negotiated {}x{} DPI, scan area {}x{}, output {}x{}",
            negotiated.horizontal_dpi,
            negotiated.vertical_dpi,
            negotiated.scan_width,
            negotiated.scan_height,
            negotiated.output_width,
            negotiated.output_height
        );
        Ok(negotiated)
    }
}

/// Start-scan parameters for `opts` at the negotiated resolution
pub fn build_scan_request(opts: &ScanOptions, negotiated: &NegotiationResult) -> ScanRequest {
    ScanRequest {
        horizontal_dpi: negotiated.horizontal_dpi,
        vertical_dpi: negotiated.vertical_dpi,
        mode: opts.mode,
        compression: opts.compression,
        brightness: DEFAULT_BRIGHTNESS,
        contrast: DEFAULT_CONTRAST,
        window: ScanWindow::clamped(opts, negotiated),
    }
}

/// Wait for a fixed-length response
///
/// Performs at most `max_polls + 1` reads, sleeping `poll_interval` between
/// them. The first non-empty read is returned as received.
pub fn poll_response<T: Transport + ?Sized>(
    transport: &mut T,
    expected_len: usize,
    settings: &EngineSettings,
) -> Result<Vec<u8>, ScanError> {
    let mut buf = vec![0u8; expected_len];
    for attempt in 0..=settings.max_polls {
        let len = transport.read_bulk(&mut buf)?;
        if len > 0 {
            buf.truncate(len);
            debug!("Response: {} of {} bytes after {} empty reads", len, expected_len, attempt);
            return Ok(buf);
        }
        if attempt < settings.max_polls {
            trace!("Empty read {}, waiting {:?}", attempt, settings.poll_interval);
            thread::sleep(settings.poll_interval);
        }
    }
    Err(ScanError::Timeout {
        polls: settings.max_polls,
    })
}

/// Forward the image stream into `out` until the end sentinel
pub fn stream_image<T: Transport + ?Sized>(
    transport: &mut T,
    out: &mut dyn Write,
    settings: &EngineSettings,
) -> Result<u64, ScanError> {
    let mut buf = vec![0u8; settings.stream_buffer_size];
    let started = Instant::now();
    let mut written: u64 = 0;

    loop {
        if let Some(deadline) = settings.stream_deadline {
            if started.elapsed() >= deadline {
                return Err(ScanError::StreamDeadline(deadline));
            }
        }

        let len = transport.read_bulk(&mut buf)?;
        match StreamChunk::classify(&buf[..len]) {
            StreamChunk::Empty => continue,
            StreamChunk::End => break,
            StreamChunk::Data(data) => {
                out.write_all(data).map_err(ScanError::Sink)?;
                written += data.len() as u64;
                trace!("Forwarded {} bytes ({} total)", data.len(), written);
            }
        }
    }

    out.flush().map_err(ScanError::Sink)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::mock::{MockTransport, Op};
    use common::ScanFailureKind;
    use common::test_utils::negotiation_reply;
    use protocol::{Compression, ScanMode};
    use std::io;

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            max_polls: 100,
            poll_interval: Duration::ZERO,
            stream_buffer_size: 16 * 1024,
            stream_deadline: None,
        }
    }

    fn gray_options(width: f64, height: f64) -> ScanOptions {
        ScanOptions {
            dpi: 100,
            mode: ScanMode::Gray64,
            compression: Compression::RunLength,
            top: 10.7,
            left: 8.2,
            width,
            height,
        }
    }

    /// Script every response of a successful scan up to the image stream
    fn script_handshake(mock: &mut MockTransport, negotiation: &str) {
        mock.push_read(&[0u8; CAPABILITIES_RESPONSE_LEN])
            .push_empty_reads(3)
            .push_read(&negotiation_reply(negotiation))
            .push_read(&[0u8; FEEDER_RESPONSE_LEN]);
    }

    #[test]
    fn test_full_scan_sequence() {
        let mut mock = MockTransport::new();
        script_handshake(&mut mock, "100,100,2,1000,291,1000,300");
        mock.push_read(&[0xff, 0xd8])
            .push_empty_reads(2)
            .push_read(&[0x64, 0x07, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0xaa])
            .push_read(&[0xff, 0xd9])
            .push_read(&[0x80]);

        let settings = fast_settings();
        let mut out = Vec::new();
        let mut engine = ProtocolEngine::new(&mut mock, &settings);
        let written = engine.run(&mut out, &gray_options(207.4, 290.8)).unwrap();
        assert_eq!(engine.state(), ScanState::Done);

        assert_eq!(out, vec![0xff, 0xd8, 0xaa, 0xff, 0xd9]);
        assert_eq!(written, 5);

        let requests: Vec<u8> = mock.controls.iter().map(|c| c.request).collect();
        assert_eq!(requests, vec![1, 2, 1, 2]);
        assert!(
            mock.controls
                .iter()
                .all(|c| c.value == 0x0002 && c.index == 0 && c.len == 5)
        );

        assert_eq!(mock.writes.len(), 4);
        assert_eq!(mock.writes[0], capabilities_request());
        assert_eq!(mock.writes[1], negotiation_request(100, ScanMode::Gray64));
        assert_eq!(mock.writes[2], feeder_request());
        let start = String::from_utf8_lossy(&mock.writes[3]).into_owned();
        assert!(start.contains("R=100,100\nM=GRAY64\nC=RLENGTH\n"));
        assert!(start.contains("A=32,42,816,1144\n"));
        assert_eq!(mock.remaining_reads(), 0);
    }

    #[test]
    fn test_phase_order() {
        let mut mock = MockTransport::new();
        script_handshake(&mut mock, "100,100,2,1000,291,1000,300");
        mock.push_read(&[0x80]);

        let settings = fast_settings();
        ProtocolEngine::new(&mut mock, &settings)
            .run(&mut Vec::new(), &gray_options(10.0, 10.0))
            .unwrap();

        let shape: Vec<&str> = mock
            .ops
            .iter()
            .filter(|op| !matches!(op, Op::Read(_)))
            .map(|op| match op {
                Op::Control(1) => "prime",
                Op::Control(_) => "finalize",
                Op::Write(_) => "write",
                Op::Read(_) => unreachable!(),
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                "prime", "write", "finalize", "prime", "write", "write", "write", "finalize"
            ]
        );
    }

    #[test]
    fn test_scan_window_clamped_to_device_area() {
        let mut mock = MockTransport::new();
        // Device reports 100 x 150 at 100 DPI
        script_handshake(&mut mock, "100,100,2,100,291,150,300");
        mock.push_read(&[0x80]);

        let settings = fast_settings();
        ProtocolEngine::new(&mut mock, &settings)
            .run(&mut Vec::new(), &gray_options(211.881, 355.567))
            .unwrap();

        let start = String::from_utf8_lossy(&mock.writes[3]).into_owned();
        assert!(start.contains("A=32,42,393,590\n"), "{}", start);
    }

    #[test]
    fn test_poll_returns_after_empty_reads() {
        let mut mock = MockTransport::new();
        mock.push_empty_reads(100).push_read(b"ok");

        let reply = poll_response(&mut mock, 64, &fast_settings()).unwrap();
        assert_eq!(reply, b"ok");
    }

    #[test]
    fn test_poll_times_out() {
        let mut mock = MockTransport::new();
        mock.push_empty_reads(101).push_read(b"late");

        let err = poll_response(&mut mock, 64, &fast_settings()).unwrap_err();
        assert!(matches!(err, ScanError::Timeout { polls: 100 }));
        // The late reply was never consumed
        assert_eq!(mock.remaining_reads(), 1);
    }

    #[test]
    fn test_poll_timeout_skips_final_sleep() {
        let mut mock = MockTransport::new();
        mock.push_empty_reads(1);
        let settings = EngineSettings {
            max_polls: 0,
            poll_interval: Duration::from_secs(10),
            ..fast_settings()
        };

        let started = Instant::now();
        let err = poll_response(&mut mock, 64, &settings).unwrap_err();
        assert!(matches!(err, ScanError::Timeout { polls: 0 }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(mock.remaining_reads(), 0);
    }

    #[test]
    fn test_poll_propagates_transport_error() {
        let mut mock = MockTransport::new();
        mock.push_empty_reads(2).push_read_error(rusb::Error::NoDevice);

        let err = poll_response(&mut mock, 64, &fast_settings()).unwrap_err();
        assert!(matches!(err, ScanError::Transport(rusb::Error::NoDevice)));
    }

    #[test]
    fn test_prime_failure_is_fatal() {
        let mut mock = MockTransport::new();
        mock.fail_control(1, rusb::Error::Pipe);

        let settings = fast_settings();
        let mut engine = ProtocolEngine::new(&mut mock, &settings);
        let err = engine
            .run(&mut Vec::new(), &gray_options(10.0, 10.0))
            .unwrap_err();
        assert_eq!(engine.state(), ScanState::Failed);

        assert_eq!(err.phase(), Some(Phase::Prime));
        assert_eq!(err.kind(), ScanFailureKind::Transport);
        assert!(mock.writes.is_empty());
    }

    #[test]
    fn test_capability_timeout_tagged() {
        let mut mock = MockTransport::new();
        mock.push_empty_reads(101);

        let settings = fast_settings();
        let err = ProtocolEngine::new(&mut mock, &settings)
            .run(&mut Vec::new(), &gray_options(10.0, 10.0))
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::QueryCapabilities));
        assert_eq!(err.kind(), ScanFailureKind::Timeout);
    }

    #[test]
    fn test_negotiation_parse_failure() {
        let mut mock = MockTransport::new();
        mock.push_read(&[0u8; CAPABILITIES_RESPONSE_LEN])
            .push_read(&negotiation_reply("300,300,x,2480,291,3437,300"));

        let settings = fast_settings();
        let err = ProtocolEngine::new(&mut mock, &settings)
            .run(&mut Vec::new(), &gray_options(10.0, 10.0))
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::Negotiate));
        assert_eq!(err.kind(), ScanFailureKind::Parse);
        // Nothing after negotiation was sent
        assert_eq!(mock.writes.len(), 2);
    }

    #[test]
    fn test_stream_read_error_aborts() {
        let mut mock = MockTransport::new();
        script_handshake(&mut mock, "100,100,2,1000,291,1000,300");
        mock.push_read(&[0x01, 0x02])
            .push_read_error(rusb::Error::Io);

        let settings = fast_settings();
        let mut out = Vec::new();
        let mut engine = ProtocolEngine::new(&mut mock, &settings);
        let err = engine
            .run(&mut out, &gray_options(10.0, 10.0))
            .unwrap_err();

        assert_eq!(err.phase(), Some(Phase::ReadScanData));
        assert_eq!(engine.state(), ScanState::Failed);
        assert_eq!(out, vec![0x01, 0x02]);
        // No finalize after a failed stream
        assert_eq!(mock.controls.len(), 3);
    }

    #[test]
    fn test_stream_deadline() {
        let mut mock = MockTransport::new();
        mock.push_empty_reads(5);

        let settings = EngineSettings {
            stream_deadline: Some(Duration::ZERO),
            ..fast_settings()
        };
        let err = stream_image(&mut mock, &mut Vec::new(), &settings).unwrap_err();
        assert!(matches!(err, ScanError::StreamDeadline(_)));
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sink_failure() {
        let mut mock = MockTransport::new();
        mock.push_read(&[0x01]).push_read(&[0x80]);

        let err = stream_image(&mut mock, &mut BrokenSink, &fast_settings()).unwrap_err();
        assert_eq!(err.kind(), ScanFailureKind::Sink);
    }

    #[test]
    fn test_engine_is_single_use() {
        let mut mock = MockTransport::new();
        script_handshake(&mut mock, "100,100,2,1000,291,1000,300");
        mock.push_read(&[0x80]);

        let settings = fast_settings();
        let mut engine = ProtocolEngine::new(&mut mock, &settings);
        engine
            .run(&mut Vec::new(), &gray_options(10.0, 10.0))
            .unwrap();
        assert!(engine.state().is_terminal());

        let err = engine
            .run(&mut Vec::new(), &gray_options(10.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, ScanError::EngineSpent));
        assert_eq!(engine.state(), ScanState::Done);
    }
}
