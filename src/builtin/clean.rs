//! Removes output paths (`.tmp`, `public`, ...) before a fresh build.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};

use crate::core::TaskBody;
use crate::error::Result;
use crate::pwlog_debug;
use crate::util::blocking;

#[derive(Debug, Clone)]
pub struct CleanBody {
    paths: Vec<PathBuf>,
}

impl CleanBody {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

fn remove(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    pwlog_debug!("CleanBody: removing {}", path.display());
    if meta.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

impl TaskBody for CleanBody {
    fn run(&self) -> BoxFuture<'_, Result<()>> {
        let paths = self.paths.clone();
        async move {
            blocking(move || {
                for path in &paths {
                    remove(path)?;
                }
                Ok(())
            })
            .await
        }
        .boxed()
    }

    fn kind(&self) -> &'static str {
        "clean"
    }
}
