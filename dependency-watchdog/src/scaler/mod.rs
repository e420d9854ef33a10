//! The Scaler: builds and runs the ordered, dependency-aware scale-up and
//! scale-down flows across a cluster's dependent workloads (spec §4.3).

pub mod dag;
pub mod resource;

use kube::Client;
use tokio_util::sync::CancellationToken;

pub use resource::ResourceError as ScalerError;

use crate::types::{DependentResourceInfo, Operation};

pub struct Scaler {
    client: Client,
    namespace: String,
    dependents: Vec<DependentResourceInfo>,
}

impl Scaler {
    pub fn new(client: Client, namespace: String, dependents: Vec<DependentResourceInfo>) -> Self {
        Scaler {
            client,
            namespace,
            dependents,
        }
    }

    pub async fn scale_up(&self, token: &CancellationToken) -> Result<(), ScalerError> {
        self.run(Operation::Up, token).await
    }

    pub async fn scale_down(&self, token: &CancellationToken) -> Result<(), ScalerError> {
        self.run(Operation::Down, token).await
    }

    async fn run(&self, operation: Operation, token: &CancellationToken) -> Result<(), ScalerError> {
        let resources = self
            .dependents
            .iter()
            .flat_map(|dependent| dependent.flatten())
            .filter(|resource| resource.operation == operation)
            .collect();
        dag::execute(&self.client, &self.namespace, resources, token).await
    }
}
