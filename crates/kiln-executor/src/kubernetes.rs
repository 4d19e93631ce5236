//! Kubernetes executor implementation.
//!
//! Jobs run as bare pods labelled `kiln.dev/managed=true`. Job annotations
//! are stored as pod annotations under the `kiln.dev/` prefix. A watch loop
//! turns pod changes into [`JobStatus`] updates and captures each pod's logs
//! into the log store once it starts running.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ContainerStateTerminated, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kiln_core::events::{ErrorSink, StatusPublisher};
use kiln_core::executor::{Executor, StartOptions};
use kiln_core::store::LogStore;
use kiln_core::{Annotations, Error, JobMetadata, JobPhase, JobSpec, JobStatus, Result};
use kube::api::{Api, LogParams, PostParams};
use kube::runtime::{WatchStreamExt, watcher};
use kube::Client;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info, warn};

/// Label selecting pods created by this executor.
pub const MANAGED_LABEL: &str = "kiln.dev/managed";
/// Prefix job annotations are stored under on the pod.
pub const ANNOTATION_PREFIX: &str = "kiln.dev/";
const GENERATE_NAME: &str = "kiln-";
const LOG_PIPE_CAPACITY: usize = 64 * 1024;

/// Kubernetes-based job executor.
pub struct KubernetesExecutor {
    pods: Api<Pod>,
    namespace: String,
    publisher: Arc<dyn StatusPublisher>,
    logs: Arc<dyn LogStore>,
    errors: Arc<dyn ErrorSink>,
    captures: Arc<Captures>,
}

/// Names of pods whose logs are being captured.
#[derive(Debug, Default)]
struct Captures {
    active: Mutex<HashSet<String>>,
}

impl Captures {
    /// Claim `name`, or `None` if a capture for it is already running.
    fn begin(self: &Arc<Self>, name: &str) -> Option<CaptureGuard> {
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
        inserted.then(|| CaptureGuard {
            captures: self.clone(),
            name: name.to_string(),
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Releases the claim on a pod name when its capture task ends.
struct CaptureGuard {
    captures: Arc<Captures>,
    name: String,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.captures
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Whether the log of `name` is already in the store.
async fn log_stored(logs: &dyn LogStore, name: &str) -> Result<bool> {
    match logs.read(name).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

impl KubernetesExecutor {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        publisher: Arc<dyn StatusPublisher>,
        logs: Arc<dyn LogStore>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            pods: Api::namespaced(client, &namespace),
            namespace,
            publisher,
            logs,
            errors,
            captures: Arc::default(),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster configuration.
    pub async fn try_default(
        namespace: impl Into<String>,
        publisher: Arc<dyn StatusPublisher>,
        logs: Arc<dyn LogStore>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::new(client, namespace, publisher, logs, errors))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Run [`watch`](Self::watch) on a background task.
    pub fn spawn_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.watch().await })
    }

    /// Publish a status for every change to a managed pod.
    ///
    /// Watch errors are reported and the watch resumes with backoff. Runs
    /// until the underlying stream ends.
    pub async fn watch(&self) {
        let config = watcher::Config::default().labels(&format!("{}=true", MANAGED_LABEL));
        let mut pods = watcher(self.pods.clone(), config)
            .default_backoff()
            .applied_objects()
            .boxed();

        info!(namespace = %self.namespace, "Watching job pods");
        loop {
            match pods.try_next().await {
                Ok(Some(pod)) => {
                    let Some(status) = status_from_pod(&pod) else {
                        continue;
                    };
                    if status.phase != JobPhase::Pending {
                        if let Some(guard) = self.captures.begin(&status.name) {
                            self.capture_logs(guard);
                        }
                    }
                    debug!(job = %status.name, phase = %status.phase, "Job status changed");
                    self.publisher.publish(status).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Pod watch failed");
                    self.errors.report(&e);
                }
            }
        }
    }

    /// Stream a pod's logs into the log store under the job name.
    ///
    /// Pods whose log is already stored, for example finished pods replayed
    /// by the watch after a restart, are skipped.
    fn capture_logs(&self, guard: CaptureGuard) {
        let pods = self.pods.clone();
        let logs = self.logs.clone();
        let errors = self.errors.clone();

        tokio::spawn(async move {
            let name = guard.name.clone();
            match log_stored(logs.as_ref(), &name).await {
                Ok(false) => {}
                Ok(true) => {
                    debug!(job = %name, "Log already stored");
                    return;
                }
                Err(e) => {
                    warn!(job = %name, error = %e, "Cannot check stored log");
                    errors.report(&e);
                    return;
                }
            }

            let (mut writer, reader) = tokio::io::duplex(LOG_PIPE_CAPACITY);
            let params = LogParams {
                follow: true,
                ..Default::default()
            };

            let copy = {
                let name = name.clone();
                async move {
                    let result = match pods.log_stream(&name, &params).await {
                        Ok(stream) => {
                            let mut stream = std::pin::pin!(stream.compat());
                            tokio::io::copy(&mut stream, &mut writer)
                                .await
                                .map(|_| ())
                                .map_err(Error::from)
                        }
                        Err(e) => Err(Error::ExecutionFailed(format!(
                            "cannot stream logs of {}: {}",
                            name, e
                        ))),
                    };
                    // Closing the writer ends the stored log.
                    let _ = writer.shutdown().await;
                    result
                }
            };
            let place = logs.place(&name, Box::pin(reader));

            let (copied, placed) = tokio::join!(copy, place);
            let failures = match placed {
                // Another capture stored it first; the copy only saw a closed pipe.
                Err(e) if e.is_already_exists() => {
                    debug!(job = %name, "Log already stored");
                    Vec::new()
                }
                placed => [copied.err(), placed.err()].into_iter().flatten().collect(),
            };
            for err in failures {
                warn!(job = %name, error = %err, "Log capture failed");
                errors.report(&err);
            }
            debug!(job = %name, "Log capture finished");
            drop(guard);
        });
    }
}

/// Build the pod a job runs in.
pub fn pod_for(spec: JobSpec, annotations: &Annotations) -> Pod {
    let annotations: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (format!("{}{}", ANNOTATION_PREFIX, k), v.clone()))
        .collect();

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(GENERATE_NAME.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

/// Translate a pod into the status of the job it runs.
///
/// Returns `None` for pods without a name.
pub fn status_from_pod(pod: &Pod) -> Option<JobStatus> {
    let name = pod.metadata.name.clone()?;

    let annotations: Annotations = pod
        .metadata
        .annotations
        .iter()
        .flatten()
        .filter_map(|(k, v)| {
            k.strip_prefix(ANNOTATION_PREFIX)
                .map(|key| (key.to_string(), v.clone()))
        })
        .collect();

    let status = pod.status.as_ref();
    let phase = match status.and_then(|s| s.phase.as_deref()) {
        Some("Pending") | None => JobPhase::Pending,
        Some("Running") => JobPhase::Running,
        Some("Succeeded") => JobPhase::Succeeded,
        Some("Failed") => JobPhase::Failed,
        Some(_) => JobPhase::Unknown,
    };

    let terminated = first_terminated(pod);
    let metadata = JobMetadata {
        started_at: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
        finished_at: terminated.and_then(|t| t.finished_at.as_ref()).map(|t| t.0),
        exit_code: terminated.map(|t| t.exit_code),
        message: status
            .and_then(|s| s.message.clone())
            .or_else(|| terminated.and_then(|t| t.reason.clone())),
    };

    Some(JobStatus {
        name,
        annotations,
        phase,
        metadata,
    })
}

fn first_terminated(pod: &Pod) -> Option<&ContainerStateTerminated> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find_map(|c| c.state.as_ref()?.terminated.as_ref())
}

#[async_trait]
impl Executor for KubernetesExecutor {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn start(&self, spec: JobSpec, options: StartOptions) -> Result<String> {
        let pod = pod_for(spec, &options.annotations);
        let created = self
            .pods
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("cannot create pod: {}", e)))?;

        let name = created
            .metadata
            .name
            .ok_or_else(|| Error::Internal("created pod has no name".to_string()))?;
        info!(job = %name, namespace = %self.namespace, "Created job pod");
        Ok(name)
    }
}
