use std::fmt;

use serde::{Deserialize, Serialize};

// ── Type aliases ──────────────────────────────────────────────────────────────

/// Modem object path as reported by the service, e.g. `/ril_0`.
pub type ModemPath = String;

/// SIM subscriber identity.
pub type Imsi = String;

/// Highest bulk-fetch revision this crate understands.
pub const MAX_INTERFACE_VERSION: u32 = 5;

// ── Modem handles ─────────────────────────────────────────────────────────────

/// A modem resolved from the path the service reported for it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModemHandle {
    path: ModemPath,
}

impl ModemHandle {
    /// Resolve a path into a handle. An empty path means "no modem".
    pub fn resolve(path: &str) -> Option<Self> {
        if path.is_empty() {
            None
        } else {
            Some(Self { path: path.to_owned() })
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path component, `ril_0` for `/ril_0`.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').find(|part| !part.is_empty()).unwrap_or(self.path.as_str())
    }
}

impl fmt::Display for ModemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// Canonical state of the remote modem manager, independent of the
/// interface version it was fetched with.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub available: Vec<ModemPath>,
    pub enabled: Vec<ModemPath>,
    pub data_imsi: Option<Imsi>,
    pub voice_imsi: Option<Imsi>,
    pub mms_imsi: Option<Imsi>,
    pub data_modem: Option<ModemHandle>,
    pub voice_modem: Option<ModemHandle>,
    pub mms_modem: Option<ModemHandle>,
    /// Indexed like `available`. Empty when the service does not report presence.
    pub present_sims: Vec<bool>,
    /// Indexed like `available`. Empty before interface version 3.
    pub imei: Vec<String>,
    pub ready: bool,
}

impl Snapshot {
    pub fn modem_count(&self) -> usize {
        self.available.len()
    }

    /// Whether the modem at `index` in `available` is also enabled.
    /// Enabled entries that are not in `available` never match.
    pub fn modem_enabled_at(&self, index: usize) -> bool {
        self.available
            .get(index)
            .is_some_and(|path| self.enabled.iter().any(|enabled| enabled == path))
    }

    pub fn sim_count(&self) -> usize {
        self.present_sims.iter().filter(|present| **present).count()
    }

    pub fn active_sim_count(&self) -> usize {
        self.present_sims
            .iter()
            .enumerate()
            .filter(|(index, present)| **present && self.modem_enabled_at(*index))
            .count()
    }
}

// ── Bulk-fetch replies ────────────────────────────────────────────────────────
//
// One owned type per interface revision. Strings are reported as-is by the
// service: an empty IMSI or path means "none".

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GetAllReply {
    pub version: i32,
    pub available: Vec<ModemPath>,
    pub enabled: Vec<ModemPath>,
    pub data_imsi: Imsi,
    pub voice_imsi: Imsi,
    pub data_modem: ModemPath,
    pub voice_modem: ModemPath,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GetAll2Reply {
    pub version: i32,
    pub available: Vec<ModemPath>,
    pub enabled: Vec<ModemPath>,
    pub data_imsi: Imsi,
    pub voice_imsi: Imsi,
    pub data_modem: ModemPath,
    pub voice_modem: ModemPath,
    pub present_sims: Vec<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GetAll3Reply {
    pub version: i32,
    pub available: Vec<ModemPath>,
    pub enabled: Vec<ModemPath>,
    pub data_imsi: Imsi,
    pub voice_imsi: Imsi,
    pub data_modem: ModemPath,
    pub voice_modem: ModemPath,
    pub present_sims: Vec<bool>,
    pub imei: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GetAll4Reply {
    pub version: i32,
    pub available: Vec<ModemPath>,
    pub enabled: Vec<ModemPath>,
    pub data_imsi: Imsi,
    pub voice_imsi: Imsi,
    pub data_modem: ModemPath,
    pub voice_modem: ModemPath,
    pub present_sims: Vec<bool>,
    pub imei: Vec<String>,
    pub mms_imsi: Imsi,
    pub mms_modem: ModemPath,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GetAll5Reply {
    pub version: i32,
    pub available: Vec<ModemPath>,
    pub enabled: Vec<ModemPath>,
    pub data_imsi: Imsi,
    pub voice_imsi: Imsi,
    pub data_modem: ModemPath,
    pub voice_modem: ModemPath,
    pub present_sims: Vec<bool>,
    pub imei: Vec<String>,
    pub mms_imsi: Imsi,
    pub mms_modem: ModemPath,
    pub ready: bool,
}

// ── Remote signals ────────────────────────────────────────────────────────────

/// Incremental update pushed by the service after the bulk fetch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ModemSignal {
    EnabledModemsChanged(Vec<ModemPath>),
    DefaultDataSimChanged(Imsi),
    DefaultDataModemChanged(ModemPath),
    DefaultVoiceSimChanged(Imsi),
    DefaultVoiceModemChanged(ModemPath),
    PresentSimsChanged { index: i32, present: bool },
    MmsSimChanged(Imsi),
    MmsModemChanged(ModemPath),
    ReadyChanged(bool),
}

/// Ownership changes of the service's bus name.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceEvent {
    Appeared { owner: String },
    Vanished,
}

// ── Consumer events ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    Valid,
    EnabledModems,
    DataImsi,
    DataModem,
    VoiceImsi,
    VoiceModem,
    PresentSims,
    SimCount,
    ActiveSimCount,
    MmsImsi,
    MmsModem,
    Ready,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        Self::Valid,
        Self::EnabledModems,
        Self::DataImsi,
        Self::DataModem,
        Self::VoiceImsi,
        Self::VoiceModem,
        Self::PresentSims,
        Self::SimCount,
        Self::ActiveSimCount,
        Self::MmsImsi,
        Self::MmsModem,
        Self::Ready,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid-changed",
            Self::EnabledModems => "enabled-modems-changed",
            Self::DataImsi => "data-imsi-changed",
            Self::DataModem => "data-modem-changed",
            Self::VoiceImsi => "voice-imsi-changed",
            Self::VoiceModem => "voice-modem-changed",
            Self::PresentSims => "present-sims-changed",
            Self::SimCount => "sim-count-changed",
            Self::ActiveSimCount => "active-sim-count-changed",
            Self::MmsImsi => "mms-imsi-changed",
            Self::MmsModem => "mms-modem-changed",
            Self::Ready => "ready-changed",
        }
    }
}

/// Change notification delivered to consumers. Each variant carries the
/// new value of the field it reports.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub enum ModemManagerEvent {
    Valid(bool),
    EnabledModems(Vec<ModemPath>),
    DataImsi(Option<Imsi>),
    DataModem(Option<ModemHandle>),
    VoiceImsi(Option<Imsi>),
    VoiceModem(Option<ModemHandle>),
    PresentSims {
        /// Slot that changed.
        index: usize,
        present: Vec<bool>,
    },
    SimCount(usize),
    ActiveSimCount(usize),
    MmsImsi(Option<Imsi>),
    MmsModem(Option<ModemHandle>),
    Ready(bool),
}

impl ModemManagerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Valid(_) => EventKind::Valid,
            Self::EnabledModems(_) => EventKind::EnabledModems,
            Self::DataImsi(_) => EventKind::DataImsi,
            Self::DataModem(_) => EventKind::DataModem,
            Self::VoiceImsi(_) => EventKind::VoiceImsi,
            Self::VoiceModem(_) => EventKind::VoiceModem,
            Self::PresentSims { .. } => EventKind::PresentSims,
            Self::SimCount(_) => EventKind::SimCount,
            Self::ActiveSimCount(_) => EventKind::ActiveSimCount,
            Self::MmsImsi(_) => EventKind::MmsImsi,
            Self::MmsModem(_) => EventKind::MmsModem,
            Self::Ready(_) => EventKind::Ready,
        }
    }
}

/// Negotiation progress, see [`crate::ModemManager::state`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncState {
    #[default]
    Invalid,
    Negotiating,
    RetryWait,
    Valid,
}
