// src/model/execution.rs

use tracing::info;

use crate::errors::{FleetError, Result};
use crate::model::host::HostExecution;
use crate::types::{HostId, JobSpec, Outcome, Timestamp};

/// Aggregate counts over every host of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub finished: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub warned: usize,
    pub rebooting: usize,
}

/// Progress of one job invocation across its fixed host set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionModel {
    target: Option<HostId>,
    job: JobSpec,
    begin_time: Option<Timestamp>,
    end_time: Option<Timestamp>,
    hosts: Vec<HostExecution>,
}

impl ExecutionModel {
    /// Build the model for `fleet`, or for `target` alone when given.
    ///
    /// The host set is fixed here for the lifetime of the model.
    pub fn new(job: JobSpec, fleet: &[HostId], target: Option<&str>) -> Result<Self> {
        let hosts = match target {
            Some(id) if !fleet.iter().any(|h| h == id) => {
                return Err(FleetError::HostNotInConfiguration(id.to_string()));
            }
            Some(id) => vec![HostExecution::new(id)],
            None => fleet.iter().map(HostExecution::new).collect(),
        };
        Ok(Self {
            target: target.map(str::to_string),
            job,
            begin_time: None,
            end_time: None,
            hosts,
        })
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn job(&self) -> &JobSpec {
        &self.job
    }

    pub fn begin_time(&self) -> Option<Timestamp> {
        self.begin_time
    }

    pub fn end_time(&self) -> Option<Timestamp> {
        self.end_time
    }

    pub fn is_running(&self) -> bool {
        self.begin_time.is_some() && self.end_time.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn hosts(&self) -> &[HostExecution] {
        &self.hosts
    }

    pub fn host_ids(&self) -> Vec<HostId> {
        self.hosts.iter().map(|h| h.id().to_string()).collect()
    }

    pub fn host(&self, id: &str) -> Option<&HostExecution> {
        self.hosts.iter().find(|h| h.id() == id)
    }

    pub fn host_mut(&mut self, id: &str) -> Option<&mut HostExecution> {
        self.hosts.iter_mut().find(|h| h.id() == id)
    }

    pub fn begin(&mut self, at: Timestamp) {
        info!(job = %self.job.name, hosts = self.hosts.len(), "EXECUTION [BEGIN]");
        self.begin_time = Some(at);
        self.end_time = None;
    }

    pub fn end(&mut self, at: Timestamp) {
        info!(job = %self.job.name, "EXECUTION [END]");
        self.end_time = Some(at);
    }

    pub fn rebooting_count(&self) -> usize {
        self.hosts.iter().filter(|h| h.is_rebooting()).count()
    }

    /// The command line shown in the dashboard header.
    pub fn command_line(&self) -> String {
        match &self.target {
            Some(host) => format!("fleetexec apply {} {host}", self.job.name),
            None => format!("fleetexec apply {}", self.job.name),
        }
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.hosts.len(),
            ..Summary::default()
        };
        for host in &self.hosts {
            if host.is_finished() {
                summary.finished += 1;
            }
            match host.outcome() {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Unknown => {}
            }
            if host.has_warnings() {
                summary.warned += 1;
            }
            if host.is_rebooting() {
                summary.rebooting += 1;
            }
        }
        summary
    }
}
