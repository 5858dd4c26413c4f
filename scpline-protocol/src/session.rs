//! SCP engine
//!
//! One [`ScpSession`] drives one transfer direction over one channel. Every
//! public operation consults [`ScpOperation::permitted_in`] first; a call in
//! the wrong state fails with [`ScpError::InvalidState`] and touches nothing.
//! Any fatal failure moves the session to [`ScpState::Error`], after which
//! only [`ScpSession::close`] is accepted.
//!
//! The engine does not model a directory stack on the read side: a source
//! announces directories with `D` lines, and it is up to the caller to keep
//! track of nesting.

use tracing::*;

use crate::channel::{ScpChannel, ScpTransport};
use crate::config::ScpConfig;
use crate::error::{ScpError, TransportError};
use crate::state::{ScpMode, ScpOperation, ScpRequest, ScpRequestKind, ScpState};
use crate::wire;

pub struct ScpSession<T: ScpTransport> {
    transport: T,
    mode: ScpMode,
    location: String,
    config: ScpConfig,
    channel: Option<T::Channel>,
    state: ScpState,
    file_len: u64,
    processed: u64,
    request: Option<ScpRequest>,
}

impl<T: ScpTransport> ScpSession<T> {
    pub fn new(transport: T, mode: ScpMode, location: impl Into<String>) -> Self {
        Self::with_config(transport, mode, location, ScpConfig::default())
    }

    pub fn with_config(
        transport: T,
        mode: ScpMode,
        location: impl Into<String>,
        config: ScpConfig,
    ) -> Self {
        ScpSession {
            transport,
            mode,
            location: location.into(),
            config,
            channel: None,
            state: ScpState::New,
            file_len: 0,
            processed: 0,
            request: None,
        }
    }

    pub fn mode(&self) -> ScpMode {
        self.mode
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn state(&self) -> ScpState {
        self.state
    }

    pub fn config(&self) -> &ScpConfig {
        &self.config
    }

    /// Declared length of the payload currently being streamed.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Bytes of the current payload transferred so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens a channel, runs `scp -t <location>` or `scp -f <location>` on
    /// the remote end and waits for its go-ahead.
    pub async fn init(&mut self) -> Result<(), ScpError> {
        let op = ScpOperation::Init;
        self.guard(op)?;

        let channel = match self.transport.open_channel().await {
            Ok(channel) => channel,
            Err(source) => return Err(self.fail(ScpError::transport(op, source))),
        };
        self.channel = Some(channel);

        let command = wire::exec_command(self.mode, &self.location);
        debug!(%command, "Requesting remote scp");
        if let Err(error) = self.start(op, &command).await {
            return Err(self.fail(error));
        }

        self.state = ScpState::inited(self.mode);
        info!(mode=?self.mode, location=%self.location, "SCP session initialized");
        Ok(())
    }

    async fn start(&mut self, op: ScpOperation, command: &str) -> Result<(), ScpError> {
        self.channel_mut(op)?
            .exec(command)
            .await
            .map_err(|e| ScpError::transport(op, e))?;
        if self.mode == ScpMode::Read && self.config.openssh_compat {
            // An OpenSSH source stays silent until the sink speaks first
            self.send(op, &[wire::STATUS_OK]).await
        } else {
            self.read_status(op).await
        }
    }

    /// Sends end-of-stream, closes the channel and returns to
    /// [`ScpState::New`]. The session is reset even when the teardown
    /// fails, so it can always be initialized again.
    pub async fn close(&mut self) -> Result<(), ScpError> {
        let op = ScpOperation::Close;
        let result = match self.channel.take() {
            Some(mut channel) => {
                let eof = channel.send_eof().await;
                let closed = channel.close().await;
                eof.and(closed).map_err(|e| ScpError::transport(op, e))
            }
            None => Ok(()),
        };

        self.state = ScpState::New;
        self.file_len = 0;
        self.processed = 0;
        self.request = None;

        match &result {
            Ok(()) => debug!(location=%self.location, "SCP session closed"),
            Err(error) => {
                warn!(%error, location=%self.location, "SCP channel did not close cleanly")
            }
        }
        result
    }

    /// Announces a directory to the sink. Every push must be paired with a
    /// later [`ScpSession::leave_directory`].
    pub async fn push_directory(&mut self, dirname: &str, perms: &str) -> Result<(), ScpError> {
        let op = ScpOperation::PushDirectory;
        self.guard(op)?;
        let name = wire::basename(dirname);
        wire::check_name("directory name", name)?;
        wire::check_permissions(perms)?;

        let line = wire::directory_line(perms, name);
        if let Err(error) = self.exchange(op, line.as_bytes()).await {
            return Err(self.fail(error));
        }
        debug!(dirname = name, perms, "Entered remote directory");
        Ok(())
    }

    pub async fn leave_directory(&mut self) -> Result<(), ScpError> {
        let op = ScpOperation::LeaveDirectory;
        self.guard(op)?;
        if let Err(error) = self.exchange(op, wire::END_DIRECTORY_LINE).await {
            return Err(self.fail(error));
        }
        debug!("Left remote directory");
        Ok(())
    }

    /// Announces a file of exactly `size` bytes. The payload follows through
    /// [`ScpSession::write`]; an empty file is completed by a zero-length
    /// write.
    pub async fn push_file(&mut self, filename: &str, size: u64, perms: &str) -> Result<(), ScpError> {
        let op = ScpOperation::PushFile;
        self.guard(op)?;
        let name = wire::basename(filename);
        wire::check_name("file name", name)?;
        wire::check_permissions(perms)?;

        let line = wire::file_line(perms, size, name);
        if let Err(error) = self.exchange(op, line.as_bytes()).await {
            return Err(self.fail(error));
        }

        self.file_len = size;
        self.processed = 0;
        self.state = ScpState::WriteWriting;
        debug!(filename = name, size, perms, "Pushing file");
        Ok(())
    }

    /// Streams part of the current file and returns how many bytes the
    /// channel accepted, which may be fewer than `data.len()`. The caller
    /// re-invokes `write` with the remainder. Bytes past the declared size
    /// are dropped silently.
    ///
    /// Once the declared size has been reached the session goes back to
    /// [`ScpState::WriteInited`] without waiting for a trailing
    /// acknowledgement, unless `openssh_compat` is enabled.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, ScpError> {
        let op = ScpOperation::Write;
        self.guard(op)?;

        let remaining = self.file_len - self.processed;
        let len = usize::try_from(remaining).map_or(data.len(), |r| r.min(data.len()));

        let channel = self.channel_mut(op)?;
        if let Err(error) = channel.poll().await {
            trace!(%error, "Readiness probe failed");
        }
        let written = if len == 0 {
            0
        } else {
            match channel.write(&data[..len]).await {
                Ok(written) => written.min(len),
                Err(source) => return Err(self.fail(ScpError::transport(op, source))),
            }
        };

        self.processed += written as u64;
        trace!(
            written,
            processed = self.processed,
            file_len = self.file_len,
            "Wrote payload"
        );

        if self.processed == self.file_len {
            if let Err(error) = self.complete_write().await {
                return Err(self.fail(error));
            }
        }
        Ok(written)
    }

    async fn complete_write(&mut self) -> Result<(), ScpError> {
        if self.config.openssh_compat {
            self.exchange(ScpOperation::Write, &[wire::STATUS_OK]).await?;
        }
        debug!(size = self.file_len, "File payload sent");
        self.file_len = 0;
        self.processed = 0;
        self.state = ScpState::WriteInited;
        Ok(())
    }

    /// Waits for the source to offer the next file or directory.
    ///
    /// Timestamp lines, end-of-directory lines and anything else the engine
    /// does not handle fail with [`ScpError::UnsupportedDirective`] and
    /// leave the session where it was. That includes warning and error
    /// status lines sent in place of a request, e.g. for a missing remote
    /// path; their directive is `'\u{1}'` or `'\u{2}'`.
    pub async fn pull_request(&mut self) -> Result<ScpRequestKind, ScpError> {
        let op = ScpOperation::PullRequest;
        self.guard(op)?;

        let line = match self.read_line(op).await {
            Ok(line) => line,
            Err(error) => return Err(self.fail(error)),
        };

        match wire::parse_request(&line) {
            Ok(request) => {
                let kind = request.kind;
                debug!(
                    ?kind,
                    filename=%request.name,
                    size=request.size,
                    permissions=%request.permissions,
                    "Received request"
                );
                self.file_len = request.size;
                self.processed = 0;
                self.request = Some(request);
                self.state = ScpState::ReadRequested;
                Ok(kind)
            }
            Err(error @ ScpError::UnsupportedDirective { .. }) => {
                debug!(%error, "Skipping unsupported directive");
                // Status lines from the source are not acknowledged
                let status = matches!(
                    error,
                    ScpError::UnsupportedDirective {
                        directive: '\u{1}' | '\u{2}',
                        ..
                    }
                );
                if self.config.openssh_compat && !status {
                    if let Err(ack_error) = self.send(op, &[wire::STATUS_OK]).await {
                        return Err(self.fail(ack_error));
                    }
                }
                Err(error)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Refuses the pending request with a human-readable reason. A failed
    /// send leaves the request pending.
    pub async fn deny_request(&mut self, reason: &str) -> Result<(), ScpError> {
        let op = ScpOperation::DenyRequest;
        self.guard(op)?;
        self.send(op, &wire::deny_message(reason)).await?;

        self.file_len = 0;
        self.processed = 0;
        self.state = ScpState::ReadInited;
        debug!(reason, "Denied request");
        Ok(())
    }

    /// Accepts the pending request. Files move on to
    /// [`ScpState::ReadReading`]; directories carry no payload and return
    /// straight to [`ScpState::ReadInited`].
    pub async fn accept_request(&mut self) -> Result<(), ScpError> {
        let op = ScpOperation::AcceptRequest;
        self.guard(op)?;
        if let Err(error) = self.send(op, &[wire::STATUS_OK]).await {
            return Err(self.fail(error));
        }

        self.state = match self.request_kind() {
            Some(ScpRequestKind::NewFile) => ScpState::ReadReading,
            _ => ScpState::ReadInited,
        };
        trace!(state=?self.state, "Accepted request");
        Ok(())
    }

    /// Reads part of the current file into `buf` and returns the number of
    /// bytes received. A pending file request is accepted first.
    ///
    /// Each call reads at most `max_read_chunk` bytes and never past the
    /// declared size. After the last byte the session returns to
    /// [`ScpState::ReadInited`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ScpError> {
        let op = ScpOperation::Read;
        if self.state == ScpState::ReadRequested
            && self.request_kind() == Some(ScpRequestKind::NewFile)
        {
            self.accept_request().await?;
        }
        self.guard(op)?;

        let remaining = self.file_len - self.processed;
        let chunk = buf.len().min(self.config.max_read_chunk.max(1));
        let len = usize::try_from(remaining).map_or(chunk, |r| r.min(chunk));

        let received = if len == 0 {
            0
        } else {
            let channel = self.channel_mut(op)?;
            match channel.read(&mut buf[..len]).await {
                Ok(0) => return Err(self.fail(ScpError::EndOfStream)),
                Ok(received) => received.min(len),
                Err(source) => return Err(self.fail(ScpError::transport(op, source))),
            }
        };

        self.processed += received as u64;
        trace!(
            received,
            processed = self.processed,
            file_len = self.file_len,
            "Read payload"
        );

        if self.processed == self.file_len {
            if let Err(error) = self.complete_read().await {
                return Err(self.fail(error));
            }
        }
        Ok(received)
    }

    async fn complete_read(&mut self) -> Result<(), ScpError> {
        if self.config.openssh_compat {
            self.read_status(ScpOperation::Read).await?;
            self.send(ScpOperation::Read, &[wire::STATUS_OK]).await?;
        }
        debug!(size = self.file_len, "File payload received");
        self.file_len = 0;
        self.processed = 0;
        self.state = ScpState::ReadInited;
        Ok(())
    }

    /// The last successfully pulled request.
    pub fn request(&self) -> Option<&ScpRequest> {
        self.request.as_ref()
    }

    pub fn request_kind(&self) -> Option<ScpRequestKind> {
        self.request.as_ref().map(|r| r.kind)
    }

    pub fn request_filename(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.name.as_str())
    }

    /// The requested name as sent, for names that are not valid UTF-8.
    pub fn request_filename_bytes(&self) -> Option<&[u8]> {
        self.request.as_ref().map(|r| r.raw_name.as_slice())
    }

    pub fn request_permissions(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.permissions.as_str())
    }

    /// Declared size of the last pulled request, 0 for directories.
    pub fn request_size(&self) -> Option<u64> {
        self.request.as_ref().map(|r| r.size)
    }

    fn guard(&self, operation: ScpOperation) -> Result<(), ScpError> {
        if operation.permitted_in(self.state) {
            Ok(())
        } else {
            Err(ScpError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn fail(&mut self, error: ScpError) -> ScpError {
        error!(
            %error,
            mode=?self.mode,
            location=%self.location,
            state=?self.state,
            "SCP session failed"
        );
        self.state = ScpState::Error;
        error
    }

    fn channel_mut(&mut self, operation: ScpOperation) -> Result<&mut T::Channel, ScpError> {
        self.channel
            .as_mut()
            .ok_or_else(|| ScpError::transport(operation, TransportError::Closed))
    }

    async fn send(&mut self, operation: ScpOperation, data: &[u8]) -> Result<(), ScpError> {
        self.channel_mut(operation)?
            .write_all(data)
            .await
            .map_err(|e| ScpError::transport(operation, e))
    }

    async fn exchange(&mut self, operation: ScpOperation, data: &[u8]) -> Result<(), ScpError> {
        self.send(operation, data).await?;
        self.read_status(operation).await
    }

    async fn read_status(&mut self, operation: ScpOperation) -> Result<(), ScpError> {
        match self.read_byte(operation).await? {
            None => Err(ScpError::EndOfStream),
            Some(wire::STATUS_OK) => Ok(()),
            Some(code) => {
                let message = match code {
                    wire::STATUS_WARNING | wire::STATUS_ERROR => self
                        .read_line(operation)
                        .await
                        .ok()
                        .map(|line| wire::display_line(&line)),
                    _ => None,
                };
                Err(ScpError::ProtocolReject { code, message })
            }
        }
    }

    async fn read_byte(&mut self, operation: ScpOperation) -> Result<Option<u8>, ScpError> {
        let mut byte = [0u8; 1];
        let channel = self.channel_mut(operation)?;
        let n = channel
            .read(&mut byte)
            .await
            .map_err(|e| ScpError::transport(operation, e))?;
        Ok((n > 0).then_some(byte[0]))
    }

    /// Reads up to and including `\n`, or `max_line_length - 1` bytes,
    /// whichever comes first.
    async fn read_line(&mut self, operation: ScpOperation) -> Result<Vec<u8>, ScpError> {
        let limit = self.config.max_line_length.max(2) - 1;
        let mut line = Vec::new();
        while line.len() < limit {
            let Some(byte) = self.read_byte(operation).await? else {
                return Err(ScpError::EndOfStream);
            };
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        Ok(line)
    }
}

impl<T: ScpTransport> Drop for ScpSession<T> {
    fn drop(&mut self) {
        if self.channel.is_some() {
            warn!(location=%self.location, state=?self.state, "SCP session dropped without close");
        }
    }
}
