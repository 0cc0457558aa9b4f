//! The k8s client bundle handed to the controller and its schedulers

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::config::KubeConfigOptions;

use crate::models::Check;
use crate::Error;

/// The kubernetes clients used across vigil
///
/// Built once at startup and handed explicitly to the controller and every
/// scheduler so nothing reaches for a global client.
#[derive(Clone)]
pub struct Clients {
    /// The underlying k8s client
    pub kube: kube::Client,
    /// The checks api across all namespaces
    pub checks: Api<Check>,
}

impl Clients {
    /// Build the client bundle for this environment
    ///
    /// The in-cluster config is used when the standard kubernetes env var is
    /// set, otherwise the local kubeconfig is loaded.
    pub async fn new() -> Result<Self, Error> {
        // detect whether we are running inside a cluster
        let config = if std::env::var_os("KUBERNETES_PORT").is_some() {
            kube::Config::incluster()?
        } else {
            kube::Config::from_kubeconfig(&KubeConfigOptions::default()).await?
        };
        // build the client all apis hang off of
        let kube = kube::Client::try_from(config)?;
        // build the all-namespace checks api
        let checks = Api::all(kube.clone());
        Ok(Clients { kube, checks })
    }

    /// Get a checks api scoped to a namespace
    ///
    /// # Arguments
    ///
    /// * `ns` - The namespace to scope to
    pub fn checks_in(&self, ns: &str) -> Api<Check> {
        Api::namespaced(self.kube.clone(), ns)
    }

    /// Get a jobs api scoped to a namespace
    ///
    /// # Arguments
    ///
    /// * `ns` - The namespace to scope to
    pub fn jobs_in(&self, ns: &str) -> Api<Job> {
        Api::namespaced(self.kube.clone(), ns)
    }

    /// Get a pods api scoped to a namespace
    ///
    /// # Arguments
    ///
    /// * `ns` - The namespace to scope to
    pub fn pods_in(&self, ns: &str) -> Api<Pod> {
        Api::namespaced(self.kube.clone(), ns)
    }
}
