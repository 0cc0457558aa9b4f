//! Runs one-shot check workloads as kubernetes jobs

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use serde_json::json;
use vigil::models::{CheckConfig, JobStatus};
use vigil::{Clients, Error};

/// The operations a scheduler needs from a job backend
///
/// Runners only move a job through its lifecycle; interpreting the outcome
/// is the scheduler's job. A runner owns at most one live job at a time and
/// the scheduler guarantees it never starts a second one.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Create the external job for an attempt
    ///
    /// # Arguments
    ///
    /// * `config` - The config of the check this job runs for
    async fn start(&self, config: &CheckConfig) -> Result<(), Error>;

    /// Take a snapshot of the job's progress
    async fn poll(&self) -> Result<JobStatus, Error>;

    /// Fetch all currently available output from the job's pods
    async fn logs(&self) -> Result<String, Error>;

    /// Request removal of the job and its pods
    async fn destroy(&self) -> Result<(), Error>;
}

/// A job runner backed by the kubernetes batch api
pub struct K8sJobRunner {
    /// The jobs api in this check's namespace
    jobs: Api<Job>,
    /// The pods api in this check's namespace
    pods: Api<Pod>,
    /// The name of the check and its job
    name: String,
}

impl K8sJobRunner {
    /// Create a new kubernetes job runner
    ///
    /// # Arguments
    ///
    /// * `clients` - The k8s client bundle
    /// * `config` - The config of the check this runner starts jobs for
    pub fn new(clients: &Clients, config: &CheckConfig) -> Self {
        K8sJobRunner {
            jobs: clients.jobs_in(&config.namespace),
            pods: clients.pods_in(&config.namespace),
            name: config.name.clone(),
        }
    }
}

#[async_trait]
impl JobRunner for K8sJobRunner {
    /// Create the external job for an attempt
    ///
    /// The job wraps the check's pod spec with a backoff limit of 0 so a
    /// failing pod fails the job instead of retrying behind our back.
    ///
    /// # Arguments
    ///
    /// * `config` - The config of the check this job runs for
    async fn start(&self, config: &CheckConfig) -> Result<(), Error> {
        // build the job wrapping this check's pod spec
        let raw = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": &self.name,
                "labels": {"app": &self.name}
            },
            "spec": {
                "backoffLimit": 0,
                "template": {
                    "metadata": {"labels": {"app": &self.name}},
                    "spec": config.spec
                }
            }
        });
        // cast this json into a barebones job
        let job: Job = serde_json::from_value(raw)?;
        // create the job in this check's namespace
        self.jobs.create(&PostParams::default(), &job).await?;
        Ok(())
    }

    /// Take a snapshot of the job's progress
    async fn poll(&self) -> Result<JobStatus, Error> {
        // read the job back from the api
        let job = self.jobs.get(&self.name).await?;
        // map the job's counts onto a snapshot
        let mut snapshot = JobStatus::default();
        if let Some(status) = job.status {
            snapshot.active = status.active.unwrap_or(0) > 0;
            snapshot.succeeded = status.succeeded.unwrap_or(0) > 0;
            snapshot.failed = status.failed.unwrap_or(0) > 0;
            snapshot.start_time = status.start_time.map(|time| time.0);
        }
        Ok(snapshot)
    }

    /// Fetch all currently available output from the job's pods
    ///
    /// The job deletes its pods once we tear it down so this grabs their
    /// logs while they still exist.
    async fn logs(&self) -> Result<String, Error> {
        // find this job's pods by the app label
        let params = ListParams::default().labels(&format!("app={}", self.name));
        let pods = self.pods.list(&params).await?;
        // concatenate the logs of every pod this job ran
        let mut logs = String::new();
        for pod in pods {
            if let Some(name) = &pod.metadata.name {
                logs.push_str(&self.pods.logs(name, &LogParams::default()).await?);
            }
        }
        Ok(logs)
    }

    /// Request removal of the job and its pods
    async fn destroy(&self) -> Result<(), Error> {
        // delete pods in the foreground to prevent build up of pods
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Foreground),
            ..Default::default()
        };
        // delete our job
        if let Err(error) = self.jobs.delete(&self.name, &params).await {
            // a missing job is already gone so only real errors propagate
            match error {
                kube::Error::Api(error) => {
                    if error.code != 404 {
                        return Err(Error::from(kube::Error::Api(error)));
                    }
                }
                error => return Err(Error::from(error)),
            }
        }
        Ok(())
    }
}
