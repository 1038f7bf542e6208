use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::RpcError;
use crate::types::*;

/// Calls and signals of the remote modem manager object.
///
/// Implementations run on the manager's event-loop thread, so neither the
/// futures nor the channel itself need to be `Send`. Dropping a returned
/// future abandons the call.
#[async_trait(?Send)]
pub trait ModemManagerRpc {
    /// Base bulk fetch, understood by every revision of the service.
    async fn get_all(&self) -> Result<GetAllReply, RpcError>;

    async fn get_all2(&self) -> Result<GetAll2Reply, RpcError>;

    async fn get_all3(&self) -> Result<GetAll3Reply, RpcError>;

    async fn get_all4(&self) -> Result<GetAll4Reply, RpcError>;

    async fn get_all5(&self) -> Result<GetAll5Reply, RpcError>;

    /// Select the SIM used for MMS. Returns the path of the modem that
    /// now carries MMS, empty if none.
    async fn set_mms_sim(&self, imsi: &str) -> Result<ModemPath, RpcError>;

    /// Subscribe to incremental update signals.
    fn subscribe(&self) -> broadcast::Receiver<ModemSignal>;
}
