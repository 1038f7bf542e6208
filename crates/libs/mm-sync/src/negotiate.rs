//! Bulk-fetch version negotiation.
//!
//! The base `GetAll` call reports the interface version of the service.
//! Version 1 replies are complete; anything newer is re-fetched with the
//! matching `GetAllN` call (capped at [`MAX_INTERFACE_VERSION`]) and every
//! reply is normalised into the same [`Snapshot`] shape.

use crate::error::RpcError;
use crate::traits::ModemManagerRpc;
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FetchCall {
    GetAll,
    GetAll2,
    GetAll3,
    GetAll4,
    GetAll5,
}

impl FetchCall {
    /// Call to issue for a service reporting `version`.
    pub fn for_version(version: u32) -> Self {
        match version.min(MAX_INTERFACE_VERSION) {
            0 | 1 => Self::GetAll,
            2 => Self::GetAll2,
            3 => Self::GetAll3,
            4 => Self::GetAll4,
            _ => Self::GetAll5,
        }
    }

    pub fn version(self) -> u32 {
        match self {
            Self::GetAll => 1,
            Self::GetAll2 => 2,
            Self::GetAll3 => 3,
            Self::GetAll4 => 4,
            Self::GetAll5 => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::GetAll => "GetAll",
            Self::GetAll2 => "GetAll2",
            Self::GetAll3 => "GetAll3",
            Self::GetAll4 => "GetAll4",
            Self::GetAll5 => "GetAll5",
        }
    }
}

/// A bulk-fetch reply of any revision.
///
/// Lives only between the fetch and [`normalize`], which moves it apart.
#[allow(clippy::large_enum_variant)]
#[derive(Clone, Debug, PartialEq)]
pub enum BulkReply {
    V1(GetAllReply),
    V2(GetAll2Reply),
    V3(GetAll3Reply),
    V4(GetAll4Reply),
    V5(GetAll5Reply),
}

/// Result of one negotiation step.
#[derive(Clone, Debug, PartialEq)]
pub enum Negotiated {
    Complete { version: u32, snapshot: Snapshot },
    /// The base call reported a newer interface; issue this call next.
    Upgrade(FetchCall),
}

/// Issue `call` and interpret its reply.
pub async fn fetch(rpc: &dyn ModemManagerRpc, call: FetchCall) -> Result<Negotiated, RpcError> {
    let reply = match call {
        FetchCall::GetAll => return interpret_base(rpc.get_all().await?),
        FetchCall::GetAll2 => BulkReply::V2(rpc.get_all2().await?),
        FetchCall::GetAll3 => BulkReply::V3(rpc.get_all3().await?),
        FetchCall::GetAll4 => BulkReply::V4(rpc.get_all4().await?),
        FetchCall::GetAll5 => BulkReply::V5(rpc.get_all5().await?),
    };
    let snapshot = normalize(reply)?;
    Ok(Negotiated::Complete {
        version: call.version(),
        snapshot,
    })
}

/// Decide what the base reply means. Its payload is only used at version 1.
pub fn interpret_base(reply: GetAllReply) -> Result<Negotiated, RpcError> {
    match reply.version {
        1 => Ok(Negotiated::Complete {
            version: 1,
            snapshot: normalize(BulkReply::V1(reply))?,
        }),
        version if version > 1 => {
            log::debug!("interface version {}", version);
            Ok(Negotiated::Upgrade(FetchCall::for_version(version.unsigned_abs())))
        }
        version => Err(RpcError::protocol(format!(
            "invalid interface version {}",
            version
        ))),
    }
}

/// Map a reply of any revision onto the canonical snapshot, filling in
/// fields the revision does not carry.
pub fn normalize(reply: BulkReply) -> Result<Snapshot, RpcError> {
    let snapshot = match reply {
        BulkReply::V1(r) => base_snapshot(
            r.available,
            r.enabled,
            r.data_imsi,
            r.voice_imsi,
            &r.data_modem,
            &r.voice_modem,
        ),
        BulkReply::V2(r) => Snapshot {
            present_sims: r.present_sims,
            ..base_snapshot(
                r.available,
                r.enabled,
                r.data_imsi,
                r.voice_imsi,
                &r.data_modem,
                &r.voice_modem,
            )
        },
        BulkReply::V3(r) => Snapshot {
            present_sims: r.present_sims,
            imei: r.imei,
            ..base_snapshot(
                r.available,
                r.enabled,
                r.data_imsi,
                r.voice_imsi,
                &r.data_modem,
                &r.voice_modem,
            )
        },
        BulkReply::V4(r) => Snapshot {
            present_sims: r.present_sims,
            imei: r.imei,
            mms_imsi: non_empty(r.mms_imsi),
            mms_modem: ModemHandle::resolve(&r.mms_modem),
            ..base_snapshot(
                r.available,
                r.enabled,
                r.data_imsi,
                r.voice_imsi,
                &r.data_modem,
                &r.voice_modem,
            )
        },
        BulkReply::V5(r) => Snapshot {
            present_sims: r.present_sims,
            imei: r.imei,
            mms_imsi: non_empty(r.mms_imsi),
            mms_modem: ModemHandle::resolve(&r.mms_modem),
            ready: r.ready,
            ..base_snapshot(
                r.available,
                r.enabled,
                r.data_imsi,
                r.voice_imsi,
                &r.data_modem,
                &r.voice_modem,
            )
        },
    };
    validate(snapshot)
}

fn base_snapshot(
    available: Vec<ModemPath>,
    enabled: Vec<ModemPath>,
    data_imsi: Imsi,
    voice_imsi: Imsi,
    data_modem: &str,
    voice_modem: &str,
) -> Snapshot {
    Snapshot {
        available,
        enabled,
        data_imsi: non_empty(data_imsi),
        voice_imsi: non_empty(voice_imsi),
        mms_imsi: None,
        data_modem: ModemHandle::resolve(data_modem),
        voice_modem: ModemHandle::resolve(voice_modem),
        mms_modem: None,
        present_sims: Vec::new(),
        imei: Vec::new(),
        ready: true,
    }
}

fn validate(snapshot: Snapshot) -> Result<Snapshot, RpcError> {
    let modem_count = snapshot.modem_count();
    if !snapshot.present_sims.is_empty() && snapshot.present_sims.len() != modem_count {
        return Err(RpcError::protocol(format!(
            "{} presence flags for {} modems",
            snapshot.present_sims.len(),
            modem_count
        )));
    }
    if !snapshot.imei.is_empty() && snapshot.imei.len() != modem_count {
        log::warn!("{} IMEIs reported for {} modems", snapshot.imei.len(), modem_count);
    }
    Ok(snapshot)
}

pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
