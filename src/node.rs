//! Graph vertices: a job (or nested workflow) plus its DAG directives.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::errors::Result;
use crate::exec::SchedulerExec;
use crate::job::Job;
use crate::status::JobStatus;
use crate::workflow::Workflow;

/// Index of a node in its owning workflow's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a node submits: a leaf job, or a nested workflow run as an external
/// sub-DAG.
#[derive(Debug)]
pub enum NodePayload {
    Job(Job),
    SubWorkflow(Workflow),
}

/// A pre- or post-processing script attached to a node.
#[derive(Debug, Clone)]
pub struct Script {
    pub path: String,
    pub args: Option<String>,
}

/// One vertex of a workflow graph.
///
/// Parent and child edge sets are symmetric by construction: the owning
/// [`Workflow`]'s edge mutators maintain the reciprocal edge in the same
/// call.
#[derive(Debug)]
pub struct Node {
    payload: NodePayload,
    pub(crate) parents: BTreeSet<NodeId>,
    pub(crate) children: BTreeSet<NodeId>,
    retry: u32,
    pre_script: Option<Script>,
    post_script: Option<Script>,
    vars: Vec<(String, String)>,
    priority: Option<i32>,
    category: Option<String>,
    noop: bool,
    done: bool,
    dir: Option<PathBuf>,
}

impl Node {
    pub fn new(job: Job) -> Self {
        Self::with_payload(NodePayload::Job(job))
    }

    pub fn sub_workflow(workflow: Workflow) -> Self {
        Self::with_payload(NodePayload::SubWorkflow(workflow))
    }

    fn with_payload(payload: NodePayload) -> Self {
        Self {
            payload,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            retry: 0,
            pre_script: None,
            post_script: None,
            vars: Vec::new(),
            priority: None,
            category: None,
            noop: false,
            done: false,
            dir: None,
        }
    }

    pub fn name(&self) -> String {
        match &self.payload {
            NodePayload::Job(job) => job.name(),
            NodePayload::SubWorkflow(workflow) => workflow.name().to_string(),
        }
    }

    /// The file the DAG declaration points at: the job's submit file, or
    /// the nested workflow's DAG file.
    pub fn target_file(&self) -> Result<PathBuf> {
        match &self.payload {
            NodePayload::Job(job) => job.job_file(),
            NodePayload::SubWorkflow(workflow) => Ok(workflow.dag_file()),
        }
    }

    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut NodePayload {
        &mut self.payload
    }

    pub fn job(&self) -> Option<&Job> {
        match &self.payload {
            NodePayload::Job(job) => Some(job),
            NodePayload::SubWorkflow(_) => None,
        }
    }

    pub fn job_mut(&mut self) -> Option<&mut Job> {
        match &mut self.payload {
            NodePayload::Job(job) => Some(job),
            NodePayload::SubWorkflow(_) => None,
        }
    }

    /// Status of the underlying job or nested workflow.
    pub fn status(&self, exec: &dyn SchedulerExec) -> Result<JobStatus> {
        match &self.payload {
            NodePayload::Job(job) => job.status(exec),
            NodePayload::SubWorkflow(workflow) => workflow.status(exec),
        }
    }

    pub fn parents(&self) -> &BTreeSet<NodeId> {
        &self.parents
    }

    pub fn children(&self) -> &BTreeSet<NodeId> {
        &self.children
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    pub fn set_retry(&mut self, retry: u32) {
        self.retry = retry;
    }

    pub fn set_pre_script(&mut self, path: impl Into<String>, args: Option<&str>) {
        self.pre_script = Some(Script {
            path: path.into(),
            args: args.map(str::to_string),
        });
    }

    pub fn set_post_script(&mut self, path: impl Into<String>, args: Option<&str>) {
        self.post_script = Some(Script {
            path: path.into(),
            args: args.map(str::to_string),
        });
    }

    /// Add a macro substitution visible inside the node's submit file.
    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = Some(priority);
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        self.category = Some(category.into());
    }

    /// Mark the node as a no-op: declared in the DAG but never run.
    pub fn set_noop(&mut self, noop: bool) {
        self.noop = noop;
    }

    /// Mark the node as already done.
    pub fn set_done(&mut self, done: bool) {
        self.done = done;
    }

    /// Working-directory override for this node.
    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dir = Some(dir.into());
    }

    /// The node's `JOB`/`SUBDAG` declaration line, with its modifiers.
    pub(crate) fn declaration_line(&self) -> Result<String> {
        let keyword = match &self.payload {
            NodePayload::Job(_) => "JOB",
            NodePayload::SubWorkflow(_) => "SUBDAG EXTERNAL",
        };
        let mut line = format!(
            "{} {} {}",
            keyword,
            self.name(),
            self.target_file()?.display()
        );
        if let Some(dir) = &self.dir {
            line.push_str(&format!(" DIR {}", dir.display()));
        }
        if self.noop {
            line.push_str(" NOOP");
        }
        if self.done {
            line.push_str(" DONE");
        }
        line.push('\n');
        Ok(line)
    }

    pub(crate) fn script_lines(&self) -> String {
        let mut result = String::new();
        for (kind, script) in [("PRE", &self.pre_script), ("POST", &self.post_script)] {
            if let Some(script) = script {
                result.push_str(&format!(
                    "SCRIPT {} {} {} {}\n",
                    kind,
                    self.name(),
                    script.path,
                    script.args.as_deref().unwrap_or("")
                ));
            }
        }
        result
    }

    pub(crate) fn option_lines(&self) -> String {
        let name = self.name();
        let mut result = String::new();
        if !self.vars.is_empty() {
            let pairs: Vec<String> = self
                .vars
                .iter()
                .map(|(key, value)| format!("{}=\"{}\"", key, value))
                .collect();
            result.push_str(&format!("VARS {} {}\n", name, pairs.join(" ")));
        }
        if self.retry > 0 {
            result.push_str(&format!("RETRY {} {}\n", name, self.retry));
        }
        if let Some(priority) = self.priority {
            result.push_str(&format!("PRIORITY {} {}\n", name, priority));
        }
        if let Some(category) = &self.category {
            result.push_str(&format!("CATEGORY {} {}\n", name, category));
        }
        result
    }
}
