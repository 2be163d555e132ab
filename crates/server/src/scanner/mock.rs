//! Scripted in-memory transport for driving the engine without hardware

use crate::usb::Transport;
use std::collections::VecDeque;

/// A control request as the engine issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCall {
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub len: usize,
}

/// Everything the engine did, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Control(u8),
    Write(Vec<u8>),
    Read(usize),
}

/// Records controls and writes, replays scripted bulk reads
///
/// An exhausted read script fails with `rusb::Error::Io`.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub controls: Vec<ControlCall>,
    pub writes: Vec<Vec<u8>>,
    pub ops: Vec<Op>,
    reads: VecDeque<rusb::Result<Vec<u8>>>,
    fail_control: Option<(u8, rusb::Error)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_read(&mut self, data: &[u8]) -> &mut Self {
        self.reads.push_back(Ok(data.to_vec()));
        self
    }

    pub fn push_empty_reads(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.reads.push_back(Ok(Vec::new()));
        }
        self
    }

    pub fn push_read_error(&mut self, err: rusb::Error) -> &mut Self {
        self.reads.push_back(Err(err));
        self
    }

    /// Fail every control transfer with `request`
    pub fn fail_control(&mut self, request: u8, err: rusb::Error) -> &mut Self {
        self.fail_control = Some((request, err));
        self
    }

    pub fn remaining_reads(&self) -> usize {
        self.reads.len()
    }
}

impl Transport for MockTransport {
    fn read_control(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
    ) -> rusb::Result<usize> {
        self.controls.push(ControlCall {
            request,
            value,
            index,
            len: buf.len(),
        });
        self.ops.push(Op::Control(request));
        match self.fail_control {
            Some((failing, err)) if failing == request => Err(err),
            _ => Ok(buf.len()),
        }
    }

    fn write_bulk(&mut self, data: &[u8]) -> rusb::Result<usize> {
        self.writes.push(data.to_vec());
        self.ops.push(Op::Write(data.to_vec()));
        Ok(data.len())
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> rusb::Result<usize> {
        self.ops.push(Op::Read(buf.len()));
        let data = self.reads.pop_front().unwrap_or(Err(rusb::Error::Io))?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }
}
