use async_trait::async_trait;

use crate::error::TransportError;

/// Opens channels on an already authenticated connection.
#[async_trait]
pub trait ScpTransport: Send {
    type Channel: ScpChannel;

    async fn open_channel(&mut self) -> Result<Self::Channel, TransportError>;
}

/// A bidirectional byte channel able to run one remote command.
///
/// `write` and `read` may both transfer fewer bytes than asked for; the
/// engine surfaces those counts to its caller instead of retrying.
#[async_trait]
pub trait ScpChannel: Send {
    /// Requests execution of `command` and waits for the peer's verdict.
    async fn exec(&mut self, command: &str) -> Result<(), TransportError>;

    /// Submits as much of `data` as the channel accepts right now, which
    /// may be nothing when the peer's window is exhausted.
    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Writes all of `data`, waiting for capacity as needed. Used for
    /// control lines and status bytes.
    async fn write_all(&mut self, mut data: &[u8]) -> Result<(), TransportError> {
        while !data.is_empty() {
            let written = self.write(data).await?;
            if written == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
            }
            data = &data[written.min(data.len())..];
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes, waiting for at least one. `Ok(0)`
    /// means the peer closed its side.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Non-blocking hint of how many bytes can be read without waiting.
    async fn poll(&mut self) -> Result<usize, TransportError>;

    async fn send_eof(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
