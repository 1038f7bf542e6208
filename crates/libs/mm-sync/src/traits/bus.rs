use std::rc::Rc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RpcError;
use crate::traits::ModemManagerRpc;
use crate::types::ServiceEvent;

/// Bus connection: name-ownership watch plus channel creation.
#[async_trait(?Send)]
pub trait ModemManagerBus {
    /// Watch ownership of `service`. If the name already has an owner the
    /// first event delivered is `Appeared`.
    fn watch(&self, service: &str) -> mpsc::UnboundedReceiver<ServiceEvent>;

    /// Open an RPC channel to the manager object at `object_path` on the
    /// connection that currently owns the service name.
    async fn connect(
        &self,
        owner: &str,
        object_path: &str,
    ) -> Result<Rc<dyn ModemManagerRpc>, RpcError>;
}
