//! The job model: one submit description plus its submission lifecycle.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::attributes::{AttrValue, AttributeStore};
use crate::errors::{CondorError, Result};
use crate::exec::{SchedulerExec, check_stderr, parse_cluster_id};
use crate::remote::RemoteContext;
use crate::status::JobStatus;

/// Cluster id of a job that has not been submitted yet.
pub const NULL_CLUSTER_ID: i64 = 0;

/// A job to be submitted to the scheduler.
///
/// A `Job` owns its [`AttributeStore`] and tracks the cluster id assigned at
/// submission (`0` until then, `-1` if the scheduler's acknowledgment could
/// not be parsed). All file operations are rooted at an explicit working
/// directory; the process-wide current directory is never changed.
#[derive(Debug)]
pub struct Job {
    attributes: AttributeStore,
    num_jobs: u32,
    cluster_id: i64,
    working_dir: PathBuf,
    remote: Option<RemoteContext>,
    remote_input_files: Vec<PathBuf>,
}

impl Job {
    /// Create a job with the given name. The name becomes the `job_name`
    /// attribute and derives the submit file name `<name>.job`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "job name must be non-empty");
        let mut attributes = AttributeStore::new();
        attributes.set("job_name", name);
        Self {
            attributes,
            num_jobs: 1,
            cluster_id: NULL_CLUSTER_ID,
            working_dir: PathBuf::from("."),
            remote: None,
            remote_input_files: Vec::new(),
        }
    }

    /// Create a job seeded with ordered attribute pairs.
    pub fn with_attributes<I, K, V>(name: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let mut job = Self::new(name);
        for (key, value) in pairs {
            job.set(key, value);
        }
        job
    }

    pub fn name(&self) -> String {
        self.attributes.get_str("job_name").unwrap_or_default()
    }

    pub fn attributes(&self) -> &AttributeStore {
        &self.attributes
    }

    pub fn num_jobs(&self) -> u32 {
        self.num_jobs
    }

    pub fn set_num_jobs(&mut self, num_jobs: u32) {
        self.num_jobs = num_jobs.max(1);
    }

    pub fn cluster_id(&self) -> i64 {
        self.cluster_id
    }

    pub(crate) fn set_cluster_id(&mut self, cluster_id: i64) {
        self.cluster_id = cluster_id;
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Root all relative file operations for this job at `dir`.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = dir.into();
    }

    /// Target a remote scheduler. Submission, queries, and file writes go
    /// through the session's scratch directory from here on.
    pub fn set_remote(&mut self, remote: RemoteContext) {
        self.remote = Some(remote);
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Local input files to stage into the remote scratch directory before
    /// submission.
    pub fn set_remote_input_files(&mut self, files: Vec<PathBuf>) {
        self.remote_input_files = files;
    }

    /// Resolved value of an attribute, or `None` if absent. Never fails on
    /// a missing key.
    pub fn get(&self, attr: &str) -> Result<Option<String>> {
        self.attributes.resolve(attr, self.cluster_id)
    }

    /// Raw (unresolved) value of an attribute.
    pub fn get_raw(&self, attr: &str) -> Option<String> {
        self.attributes.get_str(attr)
    }

    /// Resolved value of an attribute, falling back to `default`.
    pub fn get_or(&self, attr: &str, default: &str) -> Result<String> {
        Ok(self.get(attr)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn set(&mut self, attr: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.set(attr, value);
    }

    pub fn delete(&mut self, attr: &str) -> Option<AttrValue> {
        self.attributes.delete(attr)
    }

    pub fn executable(&self) -> Option<String> {
        self.get_raw("executable").filter(|exe| !exe.is_empty())
    }

    pub fn arguments(&self) -> Option<String> {
        self.get_raw("arguments").filter(|args| !args.is_empty())
    }

    /// The directory the job runs in, relative to the working directory.
    /// Defaults to the working directory itself. An absolute path is
    /// rejected when the job targets a remote scheduler, because remote
    /// paths are scoped to the session's scratch directory.
    pub fn initial_dir(&self) -> Result<PathBuf> {
        let configured = self
            .attributes
            .resolve("initialdir", self.cluster_id)?
            .filter(|dir| !dir.is_empty());
        let dir = match configured {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("."),
        };
        if self.remote.is_some() && dir.is_absolute() {
            return Err(CondorError::RemoteConfiguration {
                path: dir.display().to_string(),
            });
        }
        Ok(dir)
    }

    /// Path of the submit description file, relative to the working
    /// directory: `<initial_dir>/<name>.job`.
    pub fn job_file(&self) -> Result<PathBuf> {
        Ok(self.initial_dir()?.join(format!("{}.job", self.name())))
    }

    /// Path of the job's event log. Synthesizes and stores a `log`
    /// attribute of `<name>.log` on first use so later reads are stable.
    pub fn log_file(&mut self) -> Result<PathBuf> {
        let unset = self
            .get_raw("log")
            .map(|log| log.is_empty())
            .unwrap_or(true);
        if unset {
            let log = format!("{}.log", self.name());
            self.set("log", log);
        }
        let resolved = self
            .attributes
            .resolve("log", self.cluster_id)?
            .unwrap_or_default();
        Ok(self.initial_dir()?.join(resolved))
    }

    /// Render the submit description file contents.
    pub fn submit_description(&self) -> String {
        self.attributes.submit_description(self.num_jobs)
    }

    /// Submit the job. Returns the assigned cluster id, or `-1` when the
    /// scheduler's acknowledgment could not be parsed (the submission may
    /// still have gone through; that degradation is deliberate).
    pub fn submit(
        &mut self,
        exec: &dyn SchedulerExec,
        queue: Option<u32>,
        options: &[String],
    ) -> Result<i64> {
        if self.executable().is_none() {
            return Err(CondorError::NoExecutable);
        }
        if let Some(queue) = queue {
            self.set_num_jobs(queue);
        }

        self.write_job_file()?;

        let mut args = vec!["condor_submit".to_string()];
        args.extend(options.iter().cloned());
        args.push(self.job_file()?.display().to_string());

        let (out, err) = self.execute(exec, &args)?;
        check_stderr(&err)?;
        info!("{}", out.trim_end());
        self.cluster_id = parse_cluster_id(&out);
        Ok(self.cluster_id)
    }

    /// Remove the job (or one sub-job) from the queue.
    pub fn remove(
        &self,
        exec: &dyn SchedulerExec,
        options: &[String],
        sub_job_num: Option<u32>,
    ) -> Result<()> {
        let mut args = vec!["condor_rm".to_string()];
        args.extend(options.iter().cloned());
        args.push(self.scheduler_job_id(sub_job_num));
        let (out, err) = self.execute(exec, &args)?;
        info!("condor_rm: {} {}", out.trim_end(), err.trim_end());
        Ok(())
    }

    /// Block until the job's log records a terminal event.
    pub fn wait(
        &mut self,
        exec: &dyn SchedulerExec,
        options: &[String],
        sub_job_num: Option<u32>,
    ) -> Result<()> {
        let log_file = self.log_file()?;
        let mut args = vec!["condor_wait".to_string()];
        args.extend(options.iter().cloned());
        // Relative to the collaborator's cwd, like the submit file path.
        args.push(log_file.display().to_string());
        args.push(self.scheduler_job_id(sub_job_num));
        let (_, err) = self.execute(exec, &args)?;
        check_stderr(&err)
    }

    /// Per-instance status codes, mapped to symbolic states.
    pub fn statuses(&self, exec: &dyn SchedulerExec) -> Result<Vec<JobStatus>> {
        if self.cluster_id == NULL_CLUSTER_ID {
            return Ok(vec![JobStatus::Unexpanded; self.num_jobs as usize]);
        }

        let args = vec![
            "condor_q".to_string(),
            "-format".to_string(),
            "%d\\n".to_string(),
            "JobStatus".to_string(),
            self.cluster_id.to_string(),
        ];
        let (out, err) = self.execute(exec, &args)?;
        check_stderr(&err)?;

        let mut statuses = Vec::new();
        for line in out.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<i32>() {
                Ok(code) => statuses.push(JobStatus::from_code(code)?),
                Err(_) => warn!("Skipping malformed status line: {}", line),
            }
        }

        if statuses.is_empty() {
            return Err(CondorError::Scheduler(format!(
                "no job found with cluster id {}",
                self.cluster_id
            )));
        }
        Ok(statuses)
    }

    /// Aggregate status: the shared state of every instance, or `Various`
    /// when instances disagree. `Unexpanded` before submission.
    pub fn status(&self, exec: &dyn SchedulerExec) -> Result<JobStatus> {
        let statuses = self.statuses(exec)?;
        let first = statuses[0];
        if statuses.iter().all(|status| *status == first) {
            Ok(first)
        } else {
            Ok(JobStatus::Various)
        }
    }

    /// Pull the initial directory (outputs and logs) back from the remote
    /// scratch directory.
    pub fn sync_remote_output(&self) -> Result<()> {
        if let Some(remote) = &self.remote {
            let initial_dir = self.initial_dir()?;
            remote.fetch_outputs(&initial_dir.display().to_string(), &self.working_dir)?;
        }
        Ok(())
    }

    /// Tear down the remote session, removing its scratch directory.
    pub fn close_remote(&mut self) {
        if let Some(remote) = self.remote.take() {
            remote.close();
        }
    }

    fn scheduler_job_id(&self, sub_job_num: Option<u32>) -> String {
        match sub_job_num {
            Some(sub) => format!("{}.{}", self.cluster_id, sub),
            None => self.cluster_id.to_string(),
        }
    }

    fn execute(&self, exec: &dyn SchedulerExec, args: &[String]) -> Result<(String, String)> {
        match &self.remote {
            Some(remote) => remote.execute(args),
            None => exec.execute(args, &self.working_dir),
        }
    }

    /// Write the submit description file, creating the directories it needs.
    /// Called once per submission attempt.
    pub(crate) fn write_job_file(&mut self) -> Result<()> {
        self.make_job_dirs()?;
        let job_file = self.job_file()?;
        let contents = self.submit_description();
        debug!("Writing job file {}", job_file.display());

        match &self.remote {
            Some(remote) => {
                remote.write_file(&job_file.display().to_string(), &contents)?;
                remote.stage_inputs(&self.remote_input_files)?;
            }
            None => fs::write(self.working_dir.join(&job_file), contents)?,
        }
        Ok(())
    }

    fn make_job_dirs(&self) -> Result<()> {
        let initial_dir = self.initial_dir()?;
        self.make_dir(&initial_dir);
        if let Some(log_dir) = self.attributes.resolve("logdir", self.cluster_id)?
            && !log_dir.is_empty()
        {
            self.make_dir(&initial_dir.join(log_dir));
        }
        Ok(())
    }

    fn make_dir(&self, dir: &Path) {
        debug!("Making directory {}", dir.display());
        let outcome = match &self.remote {
            Some(remote) => remote.makedirs(&dir.display().to_string()),
            None => fs::create_dir_all(self.working_dir.join(dir)).map_err(CondorError::from),
        };
        // An already-existing directory is not an error.
        if let Err(err) = outcome {
            warn!("Unable to create directory {}: {}", dir.display(), err);
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.submit_description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use crate::remote::{RemoteContext, RemoteSession};

    /// Scripted scheduler: returns queued (stdout, stderr) pairs and
    /// records every invocation.
    pub(crate) struct FakeExec {
        responses: RefCell<VecDeque<(String, String)>>,
        pub calls: RefCell<Vec<Vec<String>>>,
    }

    impl FakeExec {
        pub fn new(responses: Vec<(&str, &str)>) -> Self {
            Self {
                responses: RefCell::new(
                    responses
                        .into_iter()
                        .map(|(out, err)| (out.to_string(), err.to_string()))
                        .collect(),
                ),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl SchedulerExec for FakeExec {
        fn execute(&self, args: &[String], _cwd: &Path) -> Result<(String, String)> {
            self.calls.borrow_mut().push(args.to_vec());
            Ok(self
                .responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_default())
        }
    }

    /// Scripted remote session: returns queued stdout lines and records
    /// every operation through shared handles.
    #[derive(Default)]
    struct FakeSession {
        stdout: Vec<String>,
        commands: Arc<Mutex<Vec<String>>>,
        puts: Arc<Mutex<Vec<(Vec<PathBuf>, String)>>>,
        gets: Arc<Mutex<Vec<(String, PathBuf)>>>,
        writes: Arc<Mutex<Vec<String>>>,
    }

    impl RemoteSession for FakeSession {
        fn execute(&self, command: &str) -> Result<Vec<String>> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(self.stdout.clone())
        }

        fn put(&self, local_paths: &[PathBuf], remote_root: &str) -> Result<()> {
            self.puts
                .lock()
                .unwrap()
                .push((local_paths.to_vec(), remote_root.to_string()));
            Ok(())
        }

        fn get(&self, remote_path: &str, local_root: &Path) -> Result<()> {
            self.gets
                .lock()
                .unwrap()
                .push((remote_path.to_string(), local_root.to_path_buf()));
            Ok(())
        }

        fn makedirs(&self, _remote_path: &str) -> Result<()> {
            Ok(())
        }

        fn open_remote_file(&self, remote_path: &str) -> Result<Box<dyn Write>> {
            self.writes.lock().unwrap().push(remote_path.to_string());
            Ok(Box::new(Vec::<u8>::new()))
        }
    }

    #[test]
    fn test_new_sets_job_name_attribute() {
        let job = Job::new("analysis");
        assert_eq!(job.name(), "analysis");
        assert_eq!(job.get_raw("job_name").unwrap(), "analysis");
        assert_eq!(job.cluster_id(), NULL_CLUSTER_ID);
        assert_eq!(job.num_jobs(), 1);
    }

    #[test]
    fn test_job_file_derivation() {
        let mut job = Job::new("analysis");
        assert_eq!(job.job_file().unwrap(), PathBuf::from("./analysis.job"));

        job.set("initialdir", "work");
        assert_eq!(job.job_file().unwrap(), PathBuf::from("work/analysis.job"));
    }

    #[test]
    fn test_log_file_synthesized_and_stored() {
        let mut job = Job::new("analysis");
        assert!(job.get_raw("log").is_none());

        let log = job.log_file().unwrap();
        assert_eq!(log, PathBuf::from("./analysis.log"));
        // Stored as a side effect, so subsequent reads are stable.
        assert_eq!(job.get_raw("log").unwrap(), "analysis.log");
    }

    #[test]
    fn test_cluster_macro_tracks_id_changes() {
        let mut job = Job::new("analysis");
        job.set("log", "run_$(cluster).log");
        assert_eq!(job.get("log").unwrap().unwrap(), "run_0.log");

        job.set_cluster_id(99);
        assert_eq!(job.get("log").unwrap().unwrap(), "run_99.log");
    }

    #[test]
    fn test_submit_without_executable_fails_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new("remote_test");
        job.set_working_dir(dir.path());

        let exec = FakeExec::new(vec![]);
        let err = job.submit(&exec, None, &[]).unwrap_err();
        assert!(matches!(err, CondorError::NoExecutable));
        assert!(!dir.path().join("remote_test.job").exists());
        assert!(exec.calls.borrow().is_empty());
    }

    #[test]
    fn test_submit_writes_file_and_parses_cluster_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new("analysis");
        job.set_working_dir(dir.path());
        job.set("executable", "run.sh");

        let exec = FakeExec::new(vec![("1 job(s) submitted to cluster 77.", "")]);
        let cluster_id = job.submit(&exec, Some(3), &[]).unwrap();

        assert_eq!(cluster_id, 77);
        assert_eq!(job.cluster_id(), 77);
        assert_eq!(job.num_jobs(), 3);

        let written = fs::read_to_string(dir.path().join("analysis.job")).unwrap();
        assert_eq!(
            written,
            "job_name = analysis\nexecutable = run.sh\n\nqueue 3\n"
        );

        let calls = exec.calls.borrow();
        assert_eq!(calls[0][0], "condor_submit");
        assert_eq!(calls[0].last().unwrap(), "./analysis.job");
    }

    #[test]
    fn test_submit_ack_parse_failure_degrades_to_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new("analysis");
        job.set_working_dir(dir.path());
        job.set("executable", "run.sh");

        let exec = FakeExec::new(vec![("submission acknowledged, no id", "")]);
        let cluster_id = job.submit(&exec, None, &[]).unwrap();
        assert_eq!(cluster_id, -1);
    }

    #[test]
    fn test_submit_surfaces_fatal_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new("analysis");
        job.set_working_dir(dir.path());
        job.set("executable", "run.sh");

        let exec = FakeExec::new(vec![("", "ERROR: schedd unreachable")]);
        let err = job.submit(&exec, None, &[]).unwrap_err();
        assert!(matches!(err, CondorError::Scheduler(msg) if msg.contains("schedd unreachable")));
    }

    #[test]
    fn test_submit_tolerates_benign_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = Job::new("analysis");
        job.set_working_dir(dir.path());
        job.set("executable", "run.sh");

        let exec = FakeExec::new(vec![(
            "1 job(s) submitted to cluster 5.",
            "WARNING: submit file permissions are loose",
        )]);
        assert_eq!(job.submit(&exec, None, &[]).unwrap(), 5);
    }

    #[test]
    fn test_status_before_submission_is_unexpanded() {
        let job = Job::new("analysis");
        let exec = FakeExec::new(vec![]);
        assert_eq!(job.status(&exec).unwrap(), JobStatus::Unexpanded);
        assert!(exec.calls.borrow().is_empty());
    }

    #[test]
    fn test_status_aggregation() {
        let mut job = Job::new("analysis");
        job.set_cluster_id(12);

        let exec = FakeExec::new(vec![("2\n2\n2\n", "")]);
        assert_eq!(job.status(&exec).unwrap(), JobStatus::Running);

        let exec = FakeExec::new(vec![("4\n2\n", "")]);
        assert_eq!(job.status(&exec).unwrap(), JobStatus::Various);
    }

    #[test]
    fn test_status_with_no_matching_job_is_error() {
        let mut job = Job::new("analysis");
        job.set_cluster_id(12);

        let exec = FakeExec::new(vec![("", "")]);
        let err = job.status(&exec).unwrap_err();
        assert!(matches!(err, CondorError::Scheduler(msg) if msg.contains("cluster id 12")));
    }

    #[test]
    fn test_queue_directive_uses_num_jobs() {
        let mut job = Job::new("sweep");
        job.set("executable", "run.sh");
        job.set_num_jobs(10);
        assert!(job.submit_description().ends_with("\nqueue 10\n"));
    }

    #[test]
    fn test_remote_rejects_absolute_initial_dir() {
        let mut job = Job::new("analysis");
        job.set("initialdir", "/scratch/runs");

        // Acceptable for a local job.
        assert_eq!(job.initial_dir().unwrap(), PathBuf::from("/scratch/runs"));

        job.set_remote(RemoteContext::new(Box::new(FakeSession::default())));
        let err = job.initial_dir().unwrap_err();
        assert!(
            matches!(err, CondorError::RemoteConfiguration { path } if path == "/scratch/runs")
        );
    }

    #[test]
    fn test_remote_submit_lifecycle() {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let puts = Arc::new(Mutex::new(Vec::new()));
        let gets = Arc::new(Mutex::new(Vec::new()));
        let writes = Arc::new(Mutex::new(Vec::new()));
        let session = FakeSession {
            stdout: vec!["1 job(s) submitted to cluster 88.".to_string()],
            commands: Arc::clone(&commands),
            puts: Arc::clone(&puts),
            gets: Arc::clone(&gets),
            writes: Arc::clone(&writes),
        };
        let context = RemoteContext::new(Box::new(session));
        let scratch = context.scratch_id().to_string();

        let mut job = Job::new("analysis");
        job.set("executable", "run.sh");
        job.set_remote(context);
        job.set_remote_input_files(vec![PathBuf::from("data.csv")]);

        // The local collaborator must stay untouched for a remote job.
        let exec = FakeExec::new(vec![]);
        assert_eq!(job.submit(&exec, None, &[]).unwrap(), 88);
        assert!(exec.calls.borrow().is_empty());

        // Submit file and inputs went into the scratch directory, and the
        // submit command ran inside it.
        assert_eq!(
            *writes.lock().unwrap(),
            vec![format!("{}/analysis.job", scratch)]
        );
        assert_eq!(
            *puts.lock().unwrap(),
            vec![(vec![PathBuf::from("data.csv")], scratch.clone())]
        );
        assert_eq!(
            commands.lock().unwrap()[0],
            format!("cd {} && condor_submit ./analysis.job", scratch)
        );

        job.sync_remote_output().unwrap();
        assert_eq!(gets.lock().unwrap()[0].0, format!("{}/.", scratch));

        job.close_remote();
        assert!(!job.is_remote());
        assert_eq!(
            commands.lock().unwrap()[1],
            format!("rm -rf {}", scratch)
        );
    }
}
