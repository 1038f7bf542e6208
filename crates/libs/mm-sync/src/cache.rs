//! Cached modem manager state and its derived SIM counters.
//!
//! Every mutation returns the consumer events it implies, in delivery
//! order. Nothing is emitted from here; the caller delivers the events
//! once the whole mutation is visible.

use crate::negotiate::non_empty;
use crate::types::{ModemHandle, ModemManagerEvent, ModemSignal, Snapshot};

#[derive(Debug, Default)]
pub(crate) struct StateCache {
    snapshot: Snapshot,
    version: Option<u32>,
    sim_count: usize,
    active_sim_count: usize,
    valid: bool,
}

impl StateCache {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn sim_count(&self) -> usize {
        self.sim_count
    }

    pub fn active_sim_count(&self) -> usize {
        self.active_sim_count
    }

    /// Replace the whole snapshot with a freshly negotiated one.
    ///
    /// Counters are recomputed silently; the single `Valid(true)` event is
    /// the only notification of the replacement.
    pub fn commit(&mut self, version: u32, snapshot: Snapshot) -> Vec<ModemManagerEvent> {
        self.snapshot = snapshot;
        self.version = Some(version);
        self.sim_count = self.snapshot.sim_count();
        self.active_sim_count = self.snapshot.active_sim_count();
        self.set_valid(true)
    }

    /// Wipe every field, then drop validity.
    pub fn clear(&mut self) -> Vec<ModemManagerEvent> {
        self.snapshot = Snapshot::default();
        self.version = None;
        self.sim_count = 0;
        self.active_sim_count = 0;
        self.set_valid(false)
    }

    fn set_valid(&mut self, valid: bool) -> Vec<ModemManagerEvent> {
        if self.valid == valid {
            return Vec::new();
        }
        self.valid = valid;
        vec![ModemManagerEvent::Valid(valid)]
    }

    /// Apply one incremental update.
    pub fn apply(&mut self, signal: ModemSignal) -> Vec<ModemManagerEvent> {
        if !self.valid {
            log::debug!("dropping update while invalid: {:?}", signal);
            return Vec::new();
        }

        let mut events = Vec::new();
        let snap = &mut self.snapshot;
        match signal {
            ModemSignal::EnabledModemsChanged(enabled) => {
                snap.enabled = enabled;
                events.push(ModemManagerEvent::EnabledModems(snap.enabled.clone()));
                self.recount(&mut events);
            }
            ModemSignal::DefaultDataSimChanged(imsi) => {
                snap.data_imsi = non_empty(imsi);
                events.push(ModemManagerEvent::DataImsi(snap.data_imsi.clone()));
            }
            ModemSignal::DefaultDataModemChanged(path) => {
                snap.data_modem = ModemHandle::resolve(&path);
                events.push(ModemManagerEvent::DataModem(snap.data_modem.clone()));
            }
            ModemSignal::DefaultVoiceSimChanged(imsi) => {
                snap.voice_imsi = non_empty(imsi);
                events.push(ModemManagerEvent::VoiceImsi(snap.voice_imsi.clone()));
            }
            ModemSignal::DefaultVoiceModemChanged(path) => {
                snap.voice_modem = ModemHandle::resolve(&path);
                events.push(ModemManagerEvent::VoiceModem(snap.voice_modem.clone()));
            }
            ModemSignal::PresentSimsChanged { index, present } => {
                let modem_count = snap.modem_count();
                let Some(index) = usize::try_from(index).ok().filter(|i| *i < modem_count) else {
                    log::warn!(
                        "ignoring presence update for slot {} of {} modems",
                        index,
                        modem_count
                    );
                    return events;
                };
                // Services that never reported presence start from all-absent.
                if snap.present_sims.len() != modem_count {
                    snap.present_sims.resize(modem_count, false);
                }
                snap.present_sims[index] = present;
                events.push(ModemManagerEvent::PresentSims {
                    index,
                    present: snap.present_sims.clone(),
                });
                self.recount(&mut events);
            }
            ModemSignal::MmsSimChanged(imsi) => {
                snap.mms_imsi = non_empty(imsi);
                events.push(ModemManagerEvent::MmsImsi(snap.mms_imsi.clone()));
            }
            ModemSignal::MmsModemChanged(path) => {
                snap.mms_modem = ModemHandle::resolve(&path);
                events.push(ModemManagerEvent::MmsModem(snap.mms_modem.clone()));
            }
            ModemSignal::ReadyChanged(ready) => {
                snap.ready = ready;
                events.push(ModemManagerEvent::Ready(ready));
            }
        }
        events
    }

    fn recount(&mut self, events: &mut Vec<ModemManagerEvent>) {
        let sim_count = self.snapshot.sim_count();
        let active_sim_count = self.snapshot.active_sim_count();
        if sim_count != self.sim_count {
            self.sim_count = sim_count;
            events.push(ModemManagerEvent::SimCount(sim_count));
        }
        if active_sim_count != self.active_sim_count {
            self.active_sim_count = active_sim_count;
            events.push(ModemManagerEvent::ActiveSimCount(active_sim_count));
        }
    }
}
