//! Workflows: DAGs of job nodes, their serialization, submission, and
//! post-submission status reconciliation.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::errors::{CondorError, Result};
use crate::exec::{SchedulerExec, check_stderr, parse_cluster_id};
use crate::job::{Job, NULL_CLUSTER_ID};
use crate::node::{Node, NodeId, NodePayload};
use crate::status::{JobStatus, StatusTally};

/// Which edge set a traversal follows.
#[derive(Clone, Copy)]
enum Direction {
    Parents,
    Children,
}

/// A scheduler job discovered while reconciling node ids, as reported by a
/// `DAGManJobId`-constrained queue query.
#[derive(Debug)]
struct QueueCandidate {
    cluster_id: i64,
    command: String,
    arguments: Option<String>,
}

/// A directed acyclic graph of job nodes, submitted as a unit.
///
/// The workflow owns every node in an arena; callers hold [`NodeId`]
/// handles. The set of member nodes may be incomplete (only directly-added
/// nodes) until [`Workflow::complete_node_set`] expands it over the
/// dependency edges.
#[derive(Debug)]
pub struct Workflow {
    name: String,
    config: Option<PathBuf>,
    max_jobs: Vec<(String, u32)>,
    nodes: Vec<Node>,
    members: Vec<NodeId>,
    cluster_id: i64,
    working_dir: PathBuf,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "workflow name must be non-empty");
        Self {
            name,
            config: None,
            max_jobs: Vec::new(),
            nodes: Vec::new(),
            members: Vec::new(),
            cluster_id: NULL_CLUSTER_ID,
            working_dir: PathBuf::from("."),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster_id(&self) -> i64 {
        self.cluster_id
    }

    pub fn dag_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.dag", self.name))
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = dir.into();
    }

    /// Reference an external DAG configuration file.
    pub fn set_config(&mut self, config: impl Into<PathBuf>) {
        self.config = Some(config.into());
    }

    /// Cap how many jobs of a category run at once.
    pub fn set_max_jobs(&mut self, category: impl Into<String>, limit: u32) {
        let category = category.into();
        match self.max_jobs.iter_mut().find(|(c, _)| *c == category) {
            Some(entry) => entry.1 = limit,
            None => self.max_jobs.push((category, limit)),
        }
    }

    /// Put a node in the arena and the member set.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.create_node(node);
        self.members.push(id);
        id
    }

    /// Put a node in the arena without adding it to the member set. It will
    /// join the set when [`Workflow::complete_node_set`] finds it reachable
    /// from a member.
    pub fn create_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Wrap a job in a node and add it to the workflow.
    pub fn add_job(&mut self, job: Job) -> NodeId {
        self.add_node(Node::new(job))
    }

    /// Add a nested workflow as an external sub-DAG node.
    pub fn add_sub_workflow(&mut self, workflow: Workflow) -> NodeId {
        self.add_node(Node::sub_workflow(workflow))
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Member nodes, in insertion order.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Make `parent` a dependency of `node`. The reciprocal child edge is
    /// established in the same call.
    pub fn add_parent(&mut self, node: NodeId, parent: NodeId) {
        self.nodes[node.index()].parents.insert(parent);
        self.nodes[parent.index()].children.insert(node);
    }

    /// Make `child` depend on `node`.
    pub fn add_child(&mut self, node: NodeId, child: NodeId) {
        self.add_parent(child, node);
    }

    /// Remove a dependency edge, both directions.
    pub fn remove_parent(&mut self, node: NodeId, parent: NodeId) {
        self.nodes[node.index()].parents.remove(&parent);
        self.nodes[parent.index()].children.remove(&node);
    }

    pub fn remove_child(&mut self, node: NodeId, child: NodeId) {
        self.remove_parent(child, node);
    }

    /// All transitive ancestors of a node.
    pub fn ancestors_of(&self, id: NodeId) -> Result<BTreeSet<NodeId>> {
        self.collect_relatives(id, Direction::Parents)
    }

    /// All transitive descendants of a node.
    pub fn descendants_of(&self, id: NodeId) -> Result<BTreeSet<NodeId>> {
        self.collect_relatives(id, Direction::Children)
    }

    /// Union of a node's ancestors and descendants.
    pub fn family_of(&self, id: NodeId) -> Result<BTreeSet<NodeId>> {
        let mut family = self.ancestors_of(id)?;
        family.extend(self.descendants_of(id)?);
        Ok(family)
    }

    fn collect_relatives(&self, start: NodeId, direction: Direction) -> Result<BTreeSet<NodeId>> {
        let mut collected = BTreeSet::new();
        let mut on_path = Vec::new();
        self.walk(start, direction, &mut collected, &mut on_path)?;
        Ok(collected)
    }

    /// Depth-first walk along one edge direction. The cycle check is
    /// structural: stepping onto a node already on the current path fails
    /// at the level where the cycle closes, before any unbounded recursion.
    /// Nodes already collected on a sibling branch are not re-walked, so
    /// one traversal is O(V+E).
    fn walk(
        &self,
        current: NodeId,
        direction: Direction,
        collected: &mut BTreeSet<NodeId>,
        on_path: &mut Vec<NodeId>,
    ) -> Result<()> {
        on_path.push(current);
        let edges = match direction {
            Direction::Parents => &self.nodes[current.index()].parents,
            Direction::Children => &self.nodes[current.index()].children,
        };
        for &next in edges {
            if on_path.contains(&next) {
                let node = self.nodes[next.index()].name();
                warn!("Circular dependency found at node '{}'", node);
                return Err(CondorError::CircularDependency { node });
            }
            if collected.insert(next) {
                self.walk(next, direction, collected, on_path)?;
            }
        }
        on_path.pop();
        Ok(())
    }

    /// Expand the member set to the fixed point of member-set union the
    /// family of every member. Idempotent: a second call is a no-op.
    pub fn complete_node_set(&mut self) -> Result<()> {
        let mut member_set: HashSet<NodeId> = self.members.iter().copied().collect();
        loop {
            let snapshot = self.members.clone();
            let mut grew = false;
            for id in snapshot {
                for relative in self.family_of(id)? {
                    if member_set.insert(relative) {
                        self.members.push(relative);
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }
        Ok(())
    }

    /// Render the DAG description file. Declarations come first because the
    /// DAG engine requires a job to be declared before it is referenced:
    /// jobs, then scripts, then relations, then per-node options, then
    /// global throttles.
    pub fn dag_description(&mut self) -> Result<String> {
        self.complete_node_set()?;

        let mut jobs = String::new();
        let mut scripts = String::new();
        let mut relations = String::new();
        let mut options = String::new();
        for &id in &self.members {
            let node = &self.nodes[id.index()];
            jobs.push_str(&node.declaration_line()?);
            scripts.push_str(&node.script_lines());
            if !node.children.is_empty() {
                let child_names: Vec<String> = node
                    .children
                    .iter()
                    .map(|&child| self.nodes[child.index()].name())
                    .collect();
                relations.push_str(&format!(
                    "PARENT {} CHILD {}\n",
                    node.name(),
                    child_names.join(" ")
                ));
            }
            options.push_str(&node.option_lines());
        }

        let mut throttles = String::new();
        for (category, limit) in &self.max_jobs {
            throttles.push_str(&format!("MAXJOBS {} {}\n", category, limit));
        }

        let mut sections = Vec::new();
        if let Some(config) = &self.config {
            sections.push(format!("CONFIG {}\n", config.display()));
        }
        for section in [jobs, scripts, relations, options, throttles] {
            if !section.is_empty() {
                sections.push(section);
            }
        }
        Ok(sections.join("\n"))
    }

    /// Write the DAG file and every member's submit file under the working
    /// directory.
    fn write_files(&mut self) -> Result<()> {
        let description = self.dag_description()?;
        let dag_path = self.working_dir.join(self.dag_file());
        debug!("Writing DAG file {}", dag_path.display());
        fs::write(dag_path, description)?;

        let working_dir = self.working_dir.clone();
        for id in self.members.clone() {
            match self.nodes[id.index()].payload_mut() {
                NodePayload::Job(job) => {
                    job.set_working_dir(working_dir.clone());
                    // Pin the log attribute so the DAG engine and later
                    // waits agree on the log path.
                    job.log_file()?;
                    job.write_job_file()?;
                }
                NodePayload::SubWorkflow(workflow) => {
                    workflow.set_working_dir(working_dir.clone());
                    workflow.write_files()?;
                }
            }
        }
        Ok(())
    }

    /// Submit the workflow as a DAG. Completes the node set, writes all
    /// files, and records the root cluster id (`-1` when the acknowledgment
    /// could not be parsed).
    pub fn submit(&mut self, exec: &dyn SchedulerExec, options: &[String]) -> Result<i64> {
        self.write_files()?;

        let mut args = vec!["condor_submit_dag".to_string()];
        args.extend(options.iter().cloned());
        args.push(self.dag_file().display().to_string());

        let (out, err) = exec.execute(&args, &self.working_dir)?;
        check_stderr(&err)?;
        info!("{}", out.trim_end());
        self.cluster_id = parse_cluster_id(&out);
        Ok(self.cluster_id)
    }

    /// Block until the DAG's own log records completion.
    pub fn wait(&self, exec: &dyn SchedulerExec, options: &[String]) -> Result<()> {
        let mut args = vec!["condor_wait".to_string()];
        args.extend(options.iter().cloned());
        args.push(format!("{}.dagman.log", self.dag_file().display()));
        let (_, err) = exec.execute(&args, &self.working_dir)?;
        check_stderr(&err)
    }

    /// Remove the DAG's meta-job (and with it, its sub-jobs).
    pub fn remove(&self, exec: &dyn SchedulerExec, options: &[String]) -> Result<()> {
        let mut args = vec!["condor_rm".to_string()];
        args.extend(options.iter().cloned());
        args.push(self.cluster_id.to_string());
        let (out, err) = exec.execute(&args, &self.working_dir)?;
        info!("condor_rm: {} {}", out.trim_end(), err.trim_end());
        Ok(())
    }

    /// Status of the DAG's own meta-job. `Unexpanded` until a real cluster
    /// id has been recorded.
    pub fn status(&self, exec: &dyn SchedulerExec) -> Result<JobStatus> {
        if self.cluster_id == NULL_CLUSTER_ID {
            return Ok(JobStatus::Unexpanded);
        }
        let args = vec![
            "condor_q".to_string(),
            "-format".to_string(),
            "%d\\n".to_string(),
            "JobStatus".to_string(),
            self.cluster_id.to_string(),
        ];
        let (out, err) = exec.execute(&args, &self.working_dir)?;
        check_stderr(&err)?;
        match out
            .lines()
            .find_map(|line| line.trim().parse::<i32>().ok())
        {
            Some(code) => JobStatus::from_code(code),
            None => Err(CondorError::Scheduler(format!(
                "no job found with cluster id {}",
                self.cluster_id
            ))),
        }
    }

    /// Re-associate member nodes with the cluster ids the scheduler
    /// assigned to their sub-jobs.
    ///
    /// Sub-jobs only become visible once the DAG engine submits them, and
    /// the workflow has no a-priori mapping from node to cluster id. This
    /// queries every job whose parent-DAG id is this workflow's cluster id
    /// and binds each still-unresolved node to the first candidate whose
    /// command contains the node's executable and whose argument string is
    /// equal (absent matches absent). Candidates with identical command and
    /// arguments are taken in scheduler-reported order; nothing further
    /// disambiguates them. Nodes with no acceptable candidate stay
    /// unresolved until a later poll.
    pub fn update_node_ids(&mut self, exec: &dyn SchedulerExec) -> Result<()> {
        if self.cluster_id == NULL_CLUSTER_ID {
            return Ok(());
        }

        let candidates = self.query_sub_jobs(exec)?;
        for id in self.members.clone() {
            let Some(job) = self.nodes[id.index()].job_mut() else {
                continue;
            };
            if job.cluster_id() != NULL_CLUSTER_ID {
                continue;
            }
            let Some(executable) = job.executable() else {
                continue;
            };
            let arguments = job.arguments();
            for candidate in &candidates {
                if candidate.command.contains(&executable) && candidate.arguments == arguments {
                    debug!(
                        "Bound node '{}' to cluster id {}",
                        job.name(),
                        candidate.cluster_id
                    );
                    job.set_cluster_id(candidate.cluster_id);
                    break;
                }
            }
        }
        Ok(())
    }

    fn query_sub_jobs(&self, exec: &dyn SchedulerExec) -> Result<Vec<QueueCandidate>> {
        let args = vec![
            "condor_q".to_string(),
            "-constraint".to_string(),
            format!("DAGManJobId == {}", self.cluster_id),
            "-af:t".to_string(),
            "ClusterId".to_string(),
            "Cmd".to_string(),
            "Args".to_string(),
            "Arguments".to_string(),
        ];
        let (out, err) = exec.execute(&args, &self.working_dir)?;
        check_stderr(&err)?;

        let mut candidates = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 4 {
                warn!("Skipping malformed queue line: {}", line);
                continue;
            }
            let Ok(cluster_id) = fields[0].trim().parse::<i64>() else {
                warn!("Skipping queue line with bad cluster id: {}", line);
                continue;
            };
            // Exactly one of the legacy (Args) and new-syntax (Arguments)
            // fields is expected to be defined; prefer the new syntax.
            let arguments = [fields[3], fields[2]]
                .into_iter()
                .map(str::trim)
                .find(|value| *value != "undefined" && !value.is_empty())
                .map(str::to_string);
            candidates.push(QueueCandidate {
                cluster_id,
                command: fields[1].trim().to_string(),
                arguments,
            });
        }
        Ok(candidates)
    }

    /// Tally the status of every member node. Reconciles node ids first;
    /// nodes the scheduler cannot account for count as `Unexpanded`.
    pub fn statuses(&mut self, exec: &dyn SchedulerExec) -> Result<StatusTally> {
        self.update_node_ids(exec)?;

        let mut tally = StatusTally::default();
        for &id in &self.members {
            let status = self.nodes[id.index()]
                .status(exec)
                .unwrap_or(JobStatus::Unexpanded);
            tally.record(status);
        }
        Ok(tally)
    }
}
