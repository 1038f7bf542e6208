mod bus;
mod rpc;

pub use bus::ModemManagerBus;
pub use rpc::ModemManagerRpc;
