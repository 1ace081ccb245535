//! Operator mutes: a muted instrument is left out of evaluation until its
//! unmute time passes.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::Instrument;

#[derive(Debug, Default)]
struct Inner {
    until: RwLock<BTreeMap<Instrument, DateTime<Utc>>>,
    changed: AtomicBool,
}

/// Shared handle; clones see the same mutes.
#[derive(Clone, Debug, Default)]
pub struct MuteList(Arc<Inner>);

impl MuteList {
    pub fn mute(&self, instrument: Instrument, until: DateTime<Utc>) {
        self.0.until.write().insert(instrument, until);
        self.0.changed.store(true, Ordering::SeqCst);
    }

    /// Returns whether a mute was present.
    pub fn unmute(&self, instrument: &Instrument) -> bool {
        let removed = self.0.until.write().remove(instrument).is_some();
        if removed {
            self.0.changed.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// Unmute time, if `instrument` is still muted at `now`.
    pub fn muted_until(&self, instrument: &Instrument, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.0
            .until
            .read()
            .get(instrument)
            .copied()
            .filter(|until| *until > now)
    }

    /// Mutes still in force at `now`.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<(Instrument, DateTime<Utc>)> {
        self.0
            .until
            .read()
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(i, until)| (i.clone(), *until))
            .collect()
    }

    /// Drop mutes that have run out. Returns how many went.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut until = self.0.until.write();
        let before = until.len();
        until.retain(|_, t| *t > now);
        let purged = before - until.len();
        if purged > 0 {
            self.0.changed.store(true, Ordering::SeqCst);
        }
        purged
    }

    pub fn entries(&self) -> Vec<(Instrument, DateTime<Utc>)> {
        self.0.until.read().iter().map(|(i, t)| (i.clone(), *t)).collect()
    }

    /// Replace every mute with restored entries.
    pub fn replace(&self, entries: impl IntoIterator<Item = (Instrument, DateTime<Utc>)>) {
        *self.0.until.write() = entries.into_iter().collect();
    }

    /// Whether mutes changed since the last call.
    pub fn take_changed(&self) -> bool {
        self.0.changed.swap(false, Ordering::SeqCst)
    }
}
