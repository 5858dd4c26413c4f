//! Scripted in-memory transport for engine tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::channel::{ScpChannel, ScpTransport};
use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MockCall {
    Open,
    Exec(String),
    Write(Vec<u8>),
    Read(usize),
    Poll,
    SendEof,
    Close,
}

#[derive(Default)]
pub(crate) struct MockWire {
    pub inbound: VecDeque<u8>,
    pub written: Vec<u8>,
    pub calls: Vec<MockCall>,
    /// Accept at most this many bytes per write
    pub write_cap: Option<usize>,
    /// Return at most this many bytes per read
    pub read_cap: Option<usize>,
    pub fail_open: bool,
    pub fail_exec: bool,
    pub fail_write: bool,
    pub fail_eof: bool,
}

fn broken() -> TransportError {
    TransportError::Io(std::io::ErrorKind::BrokenPipe.into())
}

impl MockWire {
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.calls.push(MockCall::Open);
        if self.fail_open {
            return Err(broken());
        }
        Ok(())
    }

    fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.calls.push(MockCall::Exec(command.to_owned()));
        if self.fail_exec {
            return Err(TransportError::ExecRejected(command.to_owned()));
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if self.fail_write {
            self.calls.push(MockCall::Write(data.to_vec()));
            return Err(broken());
        }
        let accepted = self.write_cap.map_or(data.len(), |cap| cap.min(data.len()));
        self.calls.push(MockCall::Write(data[..accepted].to_vec()));
        self.written.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.calls.push(MockCall::Read(buf.len()));
        let n = self
            .read_cap
            .map_or(buf.len(), |cap| cap.min(buf.len()))
            .min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn send_eof(&mut self) -> Result<(), TransportError> {
        self.calls.push(MockCall::SendEof);
        if self.fail_eof {
            return Err(broken());
        }
        Ok(())
    }

    /// Payload bytes written after the control traffic, i.e. everything
    /// past the first `skip` bytes.
    pub fn written_after(&self, skip: usize) -> &[u8] {
        &self.written[skip.min(self.written.len())..]
    }

    pub fn io_calls(&self) -> usize {
        self.calls.len()
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    wire: Arc<Mutex<MockWire>>,
}

impl MockTransport {
    pub fn with_inbound(bytes: &[u8]) -> Self {
        let transport = Self::default();
        transport.wire().feed(bytes);
        transport
    }

    pub fn wire(&self) -> MutexGuard<'_, MockWire> {
        self.wire.lock().unwrap()
    }
}

pub(crate) struct MockChannel {
    wire: Arc<Mutex<MockWire>>,
}

impl MockChannel {
    fn wire(&self) -> MutexGuard<'_, MockWire> {
        self.wire.lock().unwrap()
    }
}

#[async_trait]
impl ScpTransport for MockTransport {
    type Channel = MockChannel;

    async fn open_channel(&mut self) -> Result<MockChannel, TransportError> {
        self.wire().open()?;
        Ok(MockChannel {
            wire: self.wire.clone(),
        })
    }
}

#[async_trait]
impl ScpChannel for MockChannel {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.wire().exec(command)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.wire().write(data)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.wire().read(buf))
    }

    async fn poll(&mut self) -> Result<usize, TransportError> {
        let mut wire = self.wire();
        wire.calls.push(MockCall::Poll);
        Ok(wire.inbound.len())
    }

    async fn send_eof(&mut self) -> Result<(), TransportError> {
        self.wire().send_eof()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.wire().calls.push(MockCall::Close);
        Ok(())
    }
}
