//! Remote-execution collaborator for submitting through a remote scheduler.
//!
//! Transport details (SSH, SFTP, SCP) are external to this crate; callers
//! provide a [`RemoteSession`] implementation. A [`RemoteContext`] scopes all
//! remote operations to a per-job scratch directory and tears it down with an
//! explicit [`RemoteContext::close`] rather than relying on drop order.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use uuid::Uuid;

use crate::errors::Result;

/// A live session against a remote execution host.
pub trait RemoteSession {
    /// Run a shell command remotely and return its stdout lines.
    fn execute(&self, command: &str) -> Result<Vec<String>>;

    /// Copy local files or directories under `remote_root`.
    fn put(&self, local_paths: &[PathBuf], remote_root: &str) -> Result<()>;

    /// Copy a remote path (recursively) under `local_root`.
    fn get(&self, remote_path: &str, local_root: &Path) -> Result<()>;

    /// Create a remote directory, including parents. Idempotent.
    fn makedirs(&self, remote_path: &str) -> Result<()>;

    /// Open a remote file for writing.
    fn open_remote_file(&self, remote_path: &str) -> Result<Box<dyn Write>>;
}

/// A remote execution target bound to a unique scratch directory.
pub struct RemoteContext {
    session: Box<dyn RemoteSession>,
    scratch_id: String,
}

impl RemoteContext {
    pub fn new(session: Box<dyn RemoteSession>) -> Self {
        let scratch_id = Uuid::new_v4().simple().to_string();
        Self {
            session,
            scratch_id,
        }
    }

    /// The scratch directory all of this context's operations run under.
    pub fn scratch_id(&self) -> &str {
        &self.scratch_id
    }

    fn scratch_path(&self, path: &str) -> String {
        format!("{}/{}", self.scratch_id, path.trim_start_matches("./"))
    }

    /// Run a command inside the scratch directory.
    pub fn execute(&self, args: &[String]) -> Result<(String, String)> {
        let command = format!("cd {} && {}", self.scratch_id, args.join(" "));
        info!("Executing remote command: {}", command);
        match self.session.execute(&command) {
            Ok(lines) => Ok((lines.join("\n"), String::new())),
            // The session reports remote failure as an error carrying the
            // command's output; surface it as stderr for triage.
            Err(err) => Ok((String::new(), err.to_string())),
        }
    }

    pub fn makedirs(&self, path: &str) -> Result<()> {
        self.session.makedirs(&self.scratch_path(path))
    }

    /// Write a file under the scratch directory.
    pub fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let mut file = self.session.open_remote_file(&self.scratch_path(path))?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    /// Stage local input files into the scratch directory.
    pub fn stage_inputs(&self, local_paths: &[PathBuf]) -> Result<()> {
        if local_paths.is_empty() {
            return Ok(());
        }
        self.session.put(local_paths, &self.scratch_id)
    }

    /// Pull a directory of results out of the scratch directory.
    pub fn fetch_outputs(&self, remote_path: &str, local_root: &Path) -> Result<()> {
        self.session
            .get(&self.scratch_path(remote_path), local_root)
    }

    /// Remove the scratch directory and release the session. Scratch removal
    /// is best effort; a failure is logged, not returned.
    pub fn close(self) {
        if let Err(err) = self.session.execute(&format!("rm -rf {}", self.scratch_id)) {
            warn!(
                "Failed to remove remote scratch directory {}: {}",
                self.scratch_id, err
            );
        }
    }
}

impl std::fmt::Debug for RemoteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteContext")
            .field("scratch_id", &self.scratch_id)
            .finish_non_exhaustive()
    }
}
