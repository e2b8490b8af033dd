use std::sync::Arc;

use anyhow::bail;

use crate::onvif::{Contract, OnvifService, Operation};
use crate::Result;

/// A path served by one implementation through one or more contracts.
pub struct Endpoint {
    pub path: &'static str,
    pub service: Arc<dyn OnvifService>,
    pub contracts: Vec<&'static Contract>,
}

impl Endpoint {
    /// First contract at this path declaring the body element as an operation.
    pub fn find(&self, namespace: &str, name: &str) -> Option<(&'static Contract, &'static Operation)> {
        self.contracts
            .iter()
            .find_map(|c| c.operation(namespace, name).map(|o| (*c, o)))
    }
}

#[derive(Default)]
pub struct ServiceBuilder {
    endpoints: Vec<Endpoint>,
}

impl ServiceBuilder {
    pub fn add_service_endpoint<S>(&mut self, service: Arc<S>, contract: &'static Contract, path: &'static str) -> Result<&mut Self>
    where
        S: OnvifService + 'static,
    {
        match self.endpoints.iter_mut().find(|e| e.path == path) {
            Some(endpoint) => {
                let existing = Arc::as_ptr(&endpoint.service) as *const u8;
                if existing != Arc::as_ptr(&service) as *const u8 {
                    bail!("{} is already served by another implementation", path);
                }
                if endpoint.contracts.iter().any(|c| c.name == contract.name) {
                    bail!("{} already exposes {}", path, contract.name);
                }
                endpoint.contracts.push(contract);
            }
            None => self.endpoints.push(Endpoint {
                path,
                service,
                contracts: vec![contract],
            }),
        }
        Ok(self)
    }

    pub fn build(self) -> Vec<Endpoint> {
        self.endpoints
    }
}
