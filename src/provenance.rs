use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use tracing::warn;

use crate::error::ExpdbError;
use crate::tool::{find_in_path, run_cmd};

/// Revision state of the code producing a timecourse.
pub trait SourceControl {
    fn head_commit(&self) -> Result<String, ExpdbError>;

    /// `true` when the working tree has no uncommitted changes.
    fn is_clean(&self) -> Result<bool, ExpdbError>;
}

/// Queries the `git` executable, optionally in a fixed working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    git: Option<PathBuf>,
    repo: Option<PathBuf>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            git: find_in_path("git"),
            repo: None,
        }
    }

    pub fn in_repo(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: Some(repo.into()),
            ..Self::new()
        }
    }

    fn git(&self, args: &[&str]) -> Result<String, ExpdbError> {
        let git = self
            .git
            .as_deref()
            .ok_or_else(|| ExpdbError::MissingTool("git".to_string()))?;
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let stdout =
            run_cmd(git, &args, self.repo.as_deref()).map_err(ExpdbError::SourceControl)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

impl SourceControl for GitCli {
    fn head_commit(&self) -> Result<String, ExpdbError> {
        self.git(&["rev-parse", "HEAD"])
    }

    fn is_clean(&self) -> Result<bool, ExpdbError> {
        self.git(&["status", "--porcelain"])
            .map(|status| status.is_empty())
    }
}

pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Returns the commit to record for a new timecourse. Outside debug mode a
/// dirty tree is refused; in debug mode it is tolerated and an unreadable
/// head is recorded as `unknown`.
pub fn capture(source_control: &dyn SourceControl, debug: bool) -> Result<String, ExpdbError> {
    if debug {
        return Ok(source_control.head_commit().unwrap_or_else(|err| {
            warn!(error = %err, "could not read head commit");
            "unknown".to_string()
        }));
    }
    if !source_control.is_clean()? {
        return Err(ExpdbError::UnreproducibleState);
    }
    source_control.head_commit()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    struct Tree {
        clean: bool,
        head: Option<&'static str>,
    }

    impl SourceControl for Tree {
        fn head_commit(&self) -> Result<String, ExpdbError> {
            self.head
                .map(str::to_string)
                .ok_or_else(|| ExpdbError::SourceControl("no HEAD".to_string()))
        }

        fn is_clean(&self) -> Result<bool, ExpdbError> {
            Ok(self.clean)
        }
    }

    #[test]
    fn dirty_tree_is_refused_outside_debug() {
        let tree = Tree {
            clean: false,
            head: Some("abc"),
        };
        assert_matches!(capture(&tree, false), Err(ExpdbError::UnreproducibleState));
        assert_eq!(capture(&tree, true).unwrap(), "abc");
    }

    #[test]
    fn debug_tolerates_missing_head() {
        let tree = Tree {
            clean: true,
            head: None,
        };
        assert_eq!(capture(&tree, true).unwrap(), "unknown");
        assert_matches!(capture(&tree, false), Err(ExpdbError::SourceControl(_)));
    }
}
