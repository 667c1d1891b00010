use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::mpsc;
use fleetexec::errors::{FleetError, Result};
use fleetexec::exec::{ExecutionBackend, ReturnBatch, ReturnStream};
use fleetexec::types::{HostId, JobSpec, Target};

/// A scripted execution backend that:
/// - records every job submission and marker update
/// - hands out return streams the test scripted beforehand, one per
///   submission, in order
/// - fails a submission when nothing is scripted for it.
#[derive(Debug, Default)]
pub struct FakeBackend {
    streams: Mutex<VecDeque<ReturnStream>>,
    submissions: Mutex<Vec<(Target, JobSpec)>>,
    markers: Mutex<Vec<(Target, String, bool)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the return stream of the next submission. Returns are pushed
    /// through the sender; dropping it ends the stream.
    pub fn script(&self) -> mpsc::Sender<Result<ReturnBatch>> {
        let (tx, rx) = mpsc::channel(16);
        self.streams.lock().unwrap().push_back(rx);
        tx
    }

    pub fn submissions(&self) -> Vec<(Target, JobSpec)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn markers(&self) -> Vec<(Target, String, bool)> {
        self.markers.lock().unwrap().clone()
    }
}

impl ExecutionBackend for FakeBackend {
    fn stream_job(
        &self,
        target: Target,
        job: JobSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ReturnStream>> + Send + '_>> {
        Box::pin(async move {
            self.submissions.lock().unwrap().push((target.clone(), job));
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| FleetError::Backend(format!("no scripted returns for {target}")))
        })
    }

    fn set_marker(
        &self,
        target: Target,
        key: String,
        value: bool,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeMap<HostId, bool>>> + Send + '_>> {
        Box::pin(async move {
            let outcome = target.hosts().into_iter().map(|h| (h, true)).collect();
            self.markers.lock().unwrap().push((target, key, value));
            Ok(outcome)
        })
    }
}
