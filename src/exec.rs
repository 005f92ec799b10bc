//! Process collaborator for invoking scheduler commands.
//!
//! All scheduler interaction goes through the [`SchedulerExec`] trait so
//! tests can script the scheduler's textual responses. [`LocalExec`] is the
//! production implementation over local subprocesses.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use log::{debug, trace, warn};
use regex::Regex;

use crate::errors::{CondorError, Result};

/// Cluster id in the scheduler's submission acknowledgment: the integer
/// following `cluster ` or `** Proc `.
static CLUSTER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:cluster |\*\* Proc )(\d+)").expect("invalid cluster regex"));

/// Stderr output that does not indicate a failed submission.
static BENIGN_STDERR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(WARNING|Renaming)").expect("invalid stderr regex"));

/// Executes scheduler commands and captures their output.
pub trait SchedulerExec {
    /// Run `args` with the given working directory and return
    /// `(stdout, stderr)`.
    fn execute(&self, args: &[String], cwd: &Path) -> Result<(String, String)>;
}

/// Runs scheduler commands as local subprocesses.
#[derive(Debug, Default)]
pub struct LocalExec;

impl SchedulerExec for LocalExec {
    fn execute(&self, args: &[String], cwd: &Path) -> Result<(String, String)> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| CondorError::Scheduler("empty command".to_string()))?;
        debug!("Executing local command: {}", args.join(" "));

        let output = Command::new(program).args(rest).current_dir(cwd).output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!("Execute results - out: [{}], err: [{}]", stdout, stderr);
        Ok((stdout, stderr))
    }
}

/// Parse the cluster id from a submission acknowledgment.
///
/// A parse failure is not an error: the submission may have succeeded even
/// though the acknowledgment was unreadable, so the caller records the `-1`
/// sentinel instead.
pub(crate) fn parse_cluster_id(stdout: &str) -> i64 {
    match CLUSTER_ID_RE
        .captures(stdout)
        .and_then(|captures| captures[1].parse::<i64>().ok())
    {
        Some(id) => id,
        None => {
            warn!("Could not parse a cluster id from scheduler output: [{}]", stdout);
            -1
        }
    }
}

/// Fail on any stderr that is not an allow-listed benign warning.
pub(crate) fn check_stderr(stderr: &str) -> Result<()> {
    let stderr = stderr.trim_end();
    if stderr.is_empty() {
        return Ok(());
    }
    if BENIGN_STDERR_RE.is_match(stderr) {
        warn!("{}", stderr);
        return Ok(());
    }
    Err(CondorError::Scheduler(stderr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_id_from_submit_ack() {
        let out = "Submitting job(s).\n1 job(s) submitted to cluster 1842.";
        assert_eq!(parse_cluster_id(out), 1842);
    }

    #[test]
    fn test_parse_cluster_id_proc_form() {
        assert_eq!(parse_cluster_id("** Proc 1234.0:\n"), 1234);
    }

    #[test]
    fn test_parse_cluster_id_failure_is_sentinel() {
        assert_eq!(parse_cluster_id("no id in here"), -1);
        assert_eq!(parse_cluster_id(""), -1);
    }

    #[test]
    fn test_benign_stderr_is_accepted() {
        assert!(check_stderr("").is_ok());
        assert!(check_stderr("WARNING: the pool is busy\n").is_ok());
        assert!(check_stderr("Renaming rescue DAGs newer than number 0").is_ok());
    }

    #[test]
    fn test_fatal_stderr_is_surfaced() {
        let err = check_stderr("ERROR: failed to connect to the scheduler").unwrap_err();
        assert!(matches!(err, CondorError::Scheduler(msg) if msg.contains("failed to connect")));
    }

    #[test]
    fn test_local_exec_captures_output() {
        let exec = LocalExec;
        let args = vec!["echo".to_string(), "hello".to_string()];
        let (out, err) = exec.execute(&args, Path::new(".")).unwrap();
        assert_eq!(out.trim(), "hello");
        assert!(err.is_empty());
    }
}
