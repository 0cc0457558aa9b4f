//! Installs the Check CRD

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::core::CustomResourceExt;
use kube::runtime::{conditions, wait::await_condition};
use kube::Client;
use tracing::{event, Level};
use vigil::models::Check;
use vigil::Error;

pub const CRD_NAME: &str = "checks.vigil.dev";

/// Create the Check CRD in k8s or update it in place
///
/// The crd always has to exist before we can watch the resource.
///
/// # Arguments
///
/// * `client` - The k8s client to apply the CRD with
pub async fn create_or_update(client: &Client) -> Result<(), Error> {
    let params = PatchParams::apply("vigil_check_apply").force();
    let crd_api: Api<CustomResourceDefinition> = Api::all(client.clone());
    // create the CRD for this controller version or patch it if it already exists
    crd_api
        .patch(CRD_NAME, &params, &Patch::Apply(Check::crd()))
        .await?;
    // wait for the crd to be established before watching it
    let established = await_condition(crd_api, CRD_NAME, conditions::is_crd_established());
    // timeout if the CRD isn't setup in 30 seconds
    match tokio::time::timeout(tokio::time::Duration::from_secs(30), established).await {
        Ok(_) => event!(Level::INFO, crd = CRD_NAME, "check crd applied"),
        Err(_) => {
            return Err(Error::new(
                "timed out waiting for the check crd to be established",
            ));
        }
    }
    Ok(())
}
