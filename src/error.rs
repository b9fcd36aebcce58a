use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Task '{task}' failed in phase {phase}: {source}")]
    TaskExecution {
        task: String,
        phase: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Command `{command}` exited with {}", .code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Name of the task a run halted on, if this is an execution failure.
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            Error::TaskExecution { task, .. } => Some(task),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
