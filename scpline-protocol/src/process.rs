//! Local process transport
//!
//! Runs the scp command as a child process and speaks to it over its
//! standard streams. With a wrapper such as `ssh user@host` this gives a
//! session over the system SSH client; with no wrapper the command runs
//! through the local shell.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::*;

use crate::channel::{ScpChannel, ScpTransport};
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct CommandTransport {
    program: Option<String>,
    args: Vec<String>,
}

impl CommandTransport {
    /// Runs commands through `sh -c` (`cmd /C` on Windows).
    pub fn local() -> Self {
        CommandTransport {
            program: None,
            args: vec![],
        }
    }

    /// Runs `program args.. <command>`, the remote command being passed as
    /// the last argument.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandTransport {
            program: Some(program.into()),
            args,
        }
    }

    /// Splits a wrapper command line such as `ssh -p 2222 user@host` on
    /// whitespace. Returns `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn command(&self, remote_command: &str) -> Command {
        match &self.program {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.args(&self.args).arg(remote_command);
                cmd
            }
            None if cfg!(target_os = "windows") => {
                let mut cmd = Command::new("cmd");
                cmd.args(["/C", remote_command]);
                cmd
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.args(["-c", remote_command]);
                cmd
            }
        }
    }
}

#[async_trait]
impl ScpTransport for CommandTransport {
    type Channel = CommandChannel;

    async fn open_channel(&mut self) -> Result<CommandChannel, TransportError> {
        Ok(CommandChannel {
            transport: self.clone(),
            child: None,
            stdin: None,
            stdout: None,
        })
    }
}

pub struct CommandChannel {
    transport: CommandTransport,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl CommandChannel {
    fn stdin(&mut self) -> Result<&mut ChildStdin, TransportError> {
        self.stdin.as_mut().ok_or(TransportError::Closed)
    }

    fn stdout(&mut self) -> Result<&mut BufReader<ChildStdout>, TransportError> {
        self.stdout.as_mut().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl ScpChannel for CommandChannel {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        if self.child.is_some() {
            return Err(TransportError::ExecRejected(command.to_owned()));
        }

        let mut cmd = self.transport.command(command);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        info!(program = ?self.transport.program, %command, "Spawning scp process");
        let mut child = cmd.spawn()?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);
        self.child = Some(child);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let stdin = self.stdin()?;
        let written = stdin.write(data).await?;
        stdin.flush().await?;
        Ok(written)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.stdout()?.read(buf).await?)
    }

    async fn poll(&mut self) -> Result<usize, TransportError> {
        Ok(self.stdout()?.buffer().len())
    }

    async fn send_eof(&mut self) -> Result<(), TransportError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let status = child.wait().await?;
            if status.success() {
                debug!(%status, "scp process exited");
            } else {
                warn!(%status, "scp process exited");
            }
        }
        Ok(())
    }
}
