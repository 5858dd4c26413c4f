//! SSH transport over an authenticated russh client connection.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::FutureExt;
use russh::client::{self, Msg};
use russh::{Channel, ChannelMsg};
use tokio::sync::Mutex;
use tracing::*;

use crate::channel::{ScpChannel, ScpTransport};
use crate::error::TransportError;

/// Opens session channels on a shared client handle.
pub struct RusshTransport<H: client::Handler> {
    handle: Arc<Mutex<client::Handle<H>>>,
}

impl<H: client::Handler> RusshTransport<H> {
    pub fn new(handle: client::Handle<H>) -> Self {
        Self::from_shared(Arc::new(Mutex::new(handle)))
    }

    pub fn from_shared(handle: Arc<Mutex<client::Handle<H>>>) -> Self {
        RusshTransport { handle }
    }

    pub fn handle(&self) -> Arc<Mutex<client::Handle<H>>> {
        self.handle.clone()
    }
}

#[async_trait]
impl<H: client::Handler> ScpTransport for RusshTransport<H> {
    type Channel = RusshChannel;

    async fn open_channel(&mut self) -> Result<RusshChannel, TransportError> {
        let channel = self.handle.lock().await.channel_open_session().await?;
        debug!(channel=?channel.id(), "Opened SSH session channel");
        Ok(RusshChannel {
            channel,
            pending: BytesMut::new(),
            eof: false,
        })
    }
}

pub struct RusshChannel {
    channel: Channel<Msg>,
    pending: BytesMut,
    eof: bool,
}

impl RusshChannel {
    /// Folds one channel event into the local state and hands back the
    /// events it has no use for.
    fn absorb(&mut self, msg: Option<ChannelMsg>) -> Option<ChannelMsg> {
        match msg {
            Some(ChannelMsg::Data { data }) => {
                self.pending.extend_from_slice(&data);
                None
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                debug!(ext, stderr=%String::from_utf8_lossy(&data).trim_end(), "Remote scp diagnostics");
                None
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                debug!(exit_status, "Remote scp exited");
                None
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                self.eof = true;
                None
            }
            Some(ChannelMsg::WindowAdjusted { .. }) => None,
            Some(other) => Some(other),
        }
    }
}

#[async_trait]
impl ScpChannel for RusshChannel {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.channel.exec(true, command).await?;
        loop {
            let msg = self.channel.wait().await;
            match self.absorb(msg) {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(TransportError::ExecRejected(command.to_owned()))
                }
                Some(other) => trace!(?other, "Ignoring channel event"),
                None if self.eof => return Err(TransportError::Closed),
                None => (),
            }
        }
    }

    /// Sends no more than the peer's window and one packet currently allow.
    /// Returns 0 while the window is exhausted.
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let n = self.channel.writable_packet_size().await.min(data.len());
        if n == 0 {
            trace!(len = data.len(), "Peer window exhausted");
            return Ok(0);
        }
        self.channel.data(&data[..n]).await?;
        Ok(n)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.channel.data(data).await?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        while self.pending.is_empty() && !self.eof {
            let msg = self.channel.wait().await;
            if let Some(other) = self.absorb(msg) {
                trace!(?other, "Ignoring channel event");
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    async fn poll(&mut self) -> Result<usize, TransportError> {
        while !self.eof {
            let Some(msg) = self.channel.wait().now_or_never() else {
                break;
            };
            if let Some(other) = self.absorb(msg) {
                trace!(?other, "Ignoring channel event");
            }
        }
        Ok(self.pending.len())
    }

    async fn send_eof(&mut self) -> Result<(), TransportError> {
        self.channel.eof().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.channel.close().await?;
        Ok(())
    }
}
