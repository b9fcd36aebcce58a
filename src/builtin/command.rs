//! External command task body.
//!
//! Runs a command line through the configured shell (`sh -c` by default),
//! which is how site generators, bundlers and uploaders get invoked.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::process::Command;

use crate::core::TaskBody;
use crate::error::{Error, Result};
use crate::util::with_optional_timeout;
use crate::{pwlog_debug, pwlog_warn};

/// Default shell used to interpret command lines.
pub const DEFAULT_SHELL: &str = "sh";

/// Runs `shell -c <command>` and succeeds on exit status 0.
#[derive(Debug, Clone)]
pub struct CommandBody {
    command: String,
    shell: String,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandBody {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: DEFAULT_SHELL.to_string(),
            env: BTreeMap::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Kill the command and fail with [`Error::Timeout`] after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn execute(&self) -> Result<()> {
        pwlog_debug!(
            "CommandBody: {} -c {:?} cwd={:?}",
            self.shell,
            self.command,
            self.cwd
        );

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.command).kill_on_drop(true);
        cmd.envs(&self.env);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let status = cmd.status().await?;
        if status.success() {
            Ok(())
        } else {
            pwlog_warn!("Command {:?} exited with {:?}", self.command, status.code());
            Err(Error::CommandFailed {
                command: self.command.clone(),
                code: status.code(),
            })
        }
    }
}

impl TaskBody for CommandBody {
    fn run(&self) -> BoxFuture<'_, Result<()>> {
        with_optional_timeout(self.timeout, self.execute()).boxed()
    }

    fn kind(&self) -> &'static str {
        "command"
    }
}
