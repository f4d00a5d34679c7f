//! Gesehen-Ledger – begrenzte Menge bereits verarbeiteter IDs
//!
//! Garantiert hoechstens einmalige Verarbeitung pro ID, solange die ID
//! noch im Ledger steht. Ist die Kapazitaet erreicht, wird die aelteste ID
//! verdraengt (FIFO). Verwendet fuer Nachrichten-IDs (Dedup nach
//! Reconnect) und fuer angenommene Anruf-IDs.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Standard-Kapazitaet fuer Nachrichten-IDs
pub const STANDARD_KAPAZITAET: usize = 10_000;

/// FIFO-begrenzte Menge gesehener IDs
#[derive(Debug, Clone)]
pub struct GesehenLedger<T> {
    kapazitaet: usize,
    gesehen: HashSet<T>,
    reihenfolge: VecDeque<T>,
}

impl<T: Eq + Hash + Clone> GesehenLedger<T> {
    /// Erstellt ein leeres Ledger (Kapazitaet mindestens 1)
    pub fn neu(kapazitaet: usize) -> Self {
        let kapazitaet = kapazitaet.max(1);
        Self {
            kapazitaet,
            gesehen: HashSet::new(),
            reihenfolge: VecDeque::new(),
        }
    }

    /// Merkt sich die ID
    ///
    /// Gibt `true` zurueck wenn die ID neu war, `false` bei einem Duplikat.
    pub fn pruefen_und_merken(&mut self, id: &T) -> bool {
        if self.gesehen.contains(id) {
            return false;
        }
        if self.reihenfolge.len() >= self.kapazitaet {
            if let Some(aelteste) = self.reihenfolge.pop_front() {
                self.gesehen.remove(&aelteste);
            }
        }
        self.gesehen.insert(id.clone());
        self.reihenfolge.push_back(id.clone());
        true
    }

    pub fn enthaelt(&self, id: &T) -> bool {
        self.gesehen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.reihenfolge.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reihenfolge.is_empty()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }
}

impl<T: Eq + Hash + Clone> Default for GesehenLedger<T> {
    fn default() -> Self {
        Self::neu(STANDARD_KAPAZITAET)
    }
}
