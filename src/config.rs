//! Project file (`Pipewright.toml`) loading.
//!
//! The file declares tasks, named sequences and watch bindings:
//!
//! ```toml
//! [settings]
//! debounce_ms = 200
//!
//! [[task]]
//! name = "clean"
//! clean = [".tmp", "public"]
//!
//! [[task]]
//! name = "jekyll"
//! command = "jekyll build --incremental --quiet"
//!
//! [[sequence]]
//! name = "build"
//! phases = ["clean", ["jekyll", "styles"], "html"]
//!
//! [[watch]]
//! pattern = "src/assets/styles/**/*.scss"
//! tasks = ["styles"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builtin::{CleanBody, CommandBody, CopyBody, DEFAULT_SHELL};
use crate::core::{NoopBody, Plan, Task, TaskBody, TaskRegistry};
use crate::orchestration::{Orchestrator, WatchBinding, DEFAULT_DEBOUNCE_MS};
use crate::util::resolve_path;
use crate::{pwlog_debug, Error, Result};

/// File name looked up when `--file` is not given.
pub const DEFAULT_PROJECT_FILE: &str = "Pipewright.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    pub shell: Option<String>,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            shell: None,
        }
    }
}

impl Settings {
    pub fn effective_shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(DEFAULT_SHELL)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyConfig {
    pub from: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub to: String,
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub deps: Vec<String>,
    pub description: Option<String>,
    pub command: Option<String>,
    pub clean: Option<Vec<String>>,
    pub copy: Option<CopyConfig>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub cwd: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl TaskConfig {
    /// Build the body this entry describes.
    ///
    /// At most one of `command`, `clean` and `copy` may be set; with none the
    /// task only groups its prerequisites.
    pub fn body(&self, root: &Path, settings: &Settings) -> Result<Arc<dyn TaskBody>> {
        let kinds = [
            self.command.is_some(),
            self.clean.is_some(),
            self.copy.is_some(),
        ];
        if kinds.iter().filter(|set| **set).count() > 1 {
            return Err(Error::Config(format!(
                "task '{}' sets more than one of command, clean, copy",
                self.name
            )));
        }

        let command_only = !self.env.is_empty() || self.cwd.is_some() || self.timeout_secs.is_some();
        if command_only && self.command.is_none() {
            return Err(Error::Config(format!(
                "task '{}': env, cwd and timeout_secs need a command",
                self.name
            )));
        }

        if let Some(command) = &self.command {
            let mut body = CommandBody::new(command)
                .with_shell(settings.effective_shell())
                .with_cwd(resolve_path(root, self.cwd.as_deref().unwrap_or(".")));
            for (key, value) in &self.env {
                body = body.with_env(key, value);
            }
            if let Some(secs) = self.timeout_secs {
                body = body.with_timeout(Duration::from_secs(secs));
            }
            return Ok(Arc::new(body));
        }

        if let Some(paths) = &self.clean {
            return Ok(Arc::new(CleanBody::new(
                paths.iter().map(|p| resolve_path(root, p)),
            )));
        }

        if let Some(copy) = &self.copy {
            return Ok(Arc::new(CopyBody::new(root, &copy.from, &copy.exclude, &copy.to)?));
        }

        Ok(Arc::new(NoopBody))
    }
}

/// One `[[sequence]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceConfig {
    pub name: String,
    pub phases: Plan,
}

/// A parsed project file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub task: Vec<TaskConfig>,
    #[serde(default)]
    pub sequence: Vec<SequenceConfig>,
    #[serde(default)]
    pub watch: Vec<WatchBinding>,
}

impl ProjectFile {
    pub fn load(path: &Path) -> Result<Self> {
        pwlog_debug!("ProjectFile::load path={}", path.display());
        let project = Self::parse(&fs::read_to_string(path)?)?;
        pwlog_debug!(
            "Project loaded: {} task(s), {} sequence(s), {} watch binding(s)",
            project.task.len(),
            project.sequence.len(),
            project.watch.len()
        );
        Ok(project)
    }

    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Directory relative paths in the project file resolve against.
    pub fn root_of(path: &Path) -> PathBuf {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Register every task (in file order), then sequences and bindings.
    ///
    /// Does not validate the result; call [`Orchestrator::validate`].
    pub fn build(&self, root: &Path) -> Result<Orchestrator> {
        let mut registry = TaskRegistry::new();
        for entry in &self.task {
            let mut task = Task::new(&entry.name, entry.deps.clone(), entry.body(root, &self.settings)?);
            if let Some(description) = &entry.description {
                task = task.with_description(description);
            }
            pwlog_debug!("Registering '{}' ({})", task.name, task.kind());
            registry.insert(task)?;
        }

        let mut orchestrator = Orchestrator::new(registry).with_debounce(self.settings.debounce());
        for sequence in &self.sequence {
            orchestrator.add_sequence(&sequence.name, sequence.phases.clone())?;
        }
        for binding in &self.watch {
            orchestrator.add_binding(binding.clone());
        }
        Ok(orchestrator)
    }
}
