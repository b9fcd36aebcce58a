//! Copies files selected by globs into an output directory.
//!
//! Covers the "extras" and "fonts" style chores: pick files with include
//! patterns, drop the ones matching an exclude pattern, and write each one to
//! `to/<path below the include pattern's base>`.

use std::path::{Path, PathBuf};

use futures::future::{BoxFuture, FutureExt};
use ignore::WalkBuilder;

use crate::core::pattern::normalize;
use crate::core::{GlobPattern, TaskBody};
use crate::error::Result;
use crate::util::blocking;
use crate::{pwlog_debug, pwlog_trace};

#[derive(Debug, Clone)]
pub struct CopyBody {
    root: PathBuf,
    from: Vec<GlobPattern>,
    exclude: Vec<GlobPattern>,
    to: PathBuf,
}

impl CopyBody {
    /// Build a copy body; patterns are relative to `root`, `to` is resolved against it.
    pub fn new(root: impl Into<PathBuf>, from: &[String], exclude: &[String], to: impl AsRef<Path>) -> Result<Self> {
        let root = root.into();
        Ok(Self {
            to: crate::util::resolve_path(&root, to),
            root,
            from: from
                .iter()
                .map(|p| GlobPattern::new(p))
                .collect::<Result<Vec<_>>>()?,
            exclude: exclude
                .iter()
                .map(|p| GlobPattern::new(p))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.to
    }

    /// Files that would be copied, as (source, destination) pairs.
    pub fn plan_copies(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut copies = Vec::new();
        for pattern in &self.from {
            let base = self.root.join(pattern.base());
            for file in walk_files(&base, pattern.depth_limit())? {
                let Ok(relative) = file.strip_prefix(&self.root) else {
                    continue;
                };
                let relative = normalize(relative);
                if !pattern.is_match_str(&relative) {
                    continue;
                }
                if self.exclude.iter().any(|ex| ex.is_match_str(&relative)) {
                    pwlog_trace!("CopyBody: excluded {}", relative);
                    continue;
                }
                let Ok(below_base) = file.strip_prefix(&base) else {
                    continue;
                };
                let target = self.to.join(below_base);
                if !copies.iter().any(|(src, _): &(PathBuf, PathBuf)| src == &file) {
                    copies.push((file, target));
                }
            }
        }
        Ok(copies)
    }
}

/// Files below `dir`, at most `max_depth` levels down.
///
/// Symlinked directories are not entered; symlinked files are returned. No
/// ignore files or hidden-file rules apply.
fn walk_files(dir: &Path, max_depth: Option<usize>) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .follow_links(false)
        .max_depth(max_depth)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        let is_dir = entry.file_type().map_or(true, |t| t.is_dir());
        if !is_dir && entry.path().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

impl TaskBody for CopyBody {
    fn run(&self) -> BoxFuture<'_, Result<()>> {
        let body = self.clone();
        async move {
            blocking(move || {
                let copies = body.plan_copies()?;
                pwlog_debug!(
                    "CopyBody: {} file(s) -> {}",
                    copies.len(),
                    body.to.display()
                );
                for (src, dst) in copies {
                    if let Some(parent) = dst.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(&src, &dst)?;
                }
                Ok(())
            })
            .await
        }
        .boxed()
    }

    fn kind(&self) -> &'static str {
        "copy"
    }
}
