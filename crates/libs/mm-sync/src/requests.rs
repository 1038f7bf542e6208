use std::cell::Cell;
use std::rc::Rc;

use tokio_util::sync::CancellationToken;

use crate::error::{ErrorClass, ManagerError};
use crate::traits::ModemManagerRpc;
use crate::types::ModemHandle;

/// Outcome of an MMS SIM selection: the modem now carrying MMS, if any.
pub type MmsResult = Result<Option<ModemHandle>, ManagerError>;

/// An MMS SIM selection in flight.
///
/// Dropping the handle does not cancel the request; call [`cancel`](Self::cancel).
#[derive(Clone, Debug)]
pub struct MmsRequest {
    id: u64,
    imsi: String,
    token: CancellationToken,
}

impl MmsRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn imsi(&self) -> &str {
        &self.imsi
    }

    /// Abandon the request. Its callback will not run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Issues write commands as independent, individually cancellable tasks.
/// Identical concurrent requests are not coalesced.
#[derive(Default)]
pub(crate) struct RequestTracker {
    last_id: Cell<u64>,
    in_flight: Rc<Cell<usize>>,
}

struct InFlight(Rc<Cell<usize>>);

impl InFlight {
    fn enter(count: &Rc<Cell<usize>>) -> Self {
        count.set(count.get() + 1);
        Self(Rc::clone(count))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl RequestTracker {
    pub fn pending(&self) -> usize {
        self.in_flight.get()
    }

    /// Issue `SetMmsSim(imsi)` on the current `LocalSet`.
    ///
    /// `callback` runs once with the outcome, unless the request or
    /// `parent` is cancelled before the reply is handled.
    pub fn set_mms_sim<F>(
        &self,
        rpc: Rc<dyn ModemManagerRpc>,
        imsi: &str,
        parent: &CancellationToken,
        callback: F,
    ) -> MmsRequest
    where
        F: FnOnce(MmsResult) + 'static,
    {
        let id = self.last_id.get() + 1;
        self.last_id.set(id);
        let request = MmsRequest {
            id,
            imsi: imsi.to_owned(),
            token: parent.child_token(),
        };

        let token = request.token.clone();
        let imsi = request.imsi.clone();
        let guard = InFlight::enter(&self.in_flight);
        tokio::task::spawn_local(async move {
            let _guard = guard;
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = rpc.set_mms_sim(&imsi) => Some(result),
            };
            match outcome {
                Some(result) if !token.is_cancelled() => match result {
                    Ok(path) => {
                        log::debug!("SetMmsSim({}) #{} -> {:?}", imsi, id, path);
                        callback(Ok(ModemHandle::resolve(&path)));
                    }
                    Err(err) if err.class() == ErrorClass::Cancelled => {
                        log::debug!("SetMmsSim({}) #{}: {}", imsi, id, err);
                    }
                    Err(err) => {
                        log::warn!("SetMmsSim({}) #{} failed: {}", imsi, id, err);
                        callback(Err(err.into()));
                    }
                },
                _ => log::debug!("SetMmsSim({}) #{} cancelled", imsi, id),
            }
        });
        request
    }
}
