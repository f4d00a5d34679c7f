//! Backoff-Scheduler
//!
//! Verzoegerung vor dem naechsten Reconnect:
//!
//! ```text
//! nominal(n) = min(basis * max_faktor, basis * 2^n)
//! delay(n)   = nominal(n) * U[0.8, 1.2]
//! ```
//!
//! Die Zufallsquelle wird hereingereicht, damit Tests deterministisch sind.
//! Der Versuchszaehler gehoert exklusiv der jeweiligen `Verbindung`.

use rand::Rng;
use std::time::Duration;

/// Untere Jitter-Grenze
pub const JITTER_MIN: f64 = 0.8;
/// Obere Jitter-Grenze
pub const JITTER_MAX: f64 = 1.2;

/// Parameter des Backoffs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffKonfig {
    /// Basisverzoegerung fuer den ersten Versuch
    pub basis: Duration,
    /// Deckel als Vielfaches der Basis
    pub max_faktor: u32,
}

impl Default for BackoffKonfig {
    fn default() -> Self {
        Self {
            basis: Duration::from_secs(1),
            max_faktor: 15,
        }
    }
}

impl BackoffKonfig {
    /// Gedeckelte Obergrenze ohne Jitter
    pub fn obergrenze(&self) -> Duration {
        self.basis * self.max_faktor.max(1)
    }

    /// `min(obergrenze, basis * 2^versuch)` ohne Jitter
    pub fn nominal(&self, versuch: u32) -> Duration {
        let deckel = u64::from(self.max_faktor.max(1));
        let faktor = if versuch >= 63 {
            deckel
        } else {
            (1u64 << versuch).min(deckel)
        };
        // faktor <= max_faktor, passt also in u32
        self.basis * faktor as u32
    }

    /// Verzoegerung fuer den gegebenen Versuch inklusive Jitter
    pub fn naechste_verzoegerung<R: Rng>(&self, versuch: u32, rng: &mut R) -> Duration {
        let jitter = rng.random_range(JITTER_MIN..=JITTER_MAX);
        self.nominal(versuch).mul_f64(jitter)
    }
}

/// Anzahl fehlgeschlagener Verbindungsversuche in Folge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffZaehler {
    versuche: u32,
}

impl BackoffZaehler {
    pub fn versuche(&self) -> u32 {
        self.versuche
    }

    /// Nach erfolgreichem Oeffnen
    pub fn zuruecksetzen(&mut self) {
        self.versuche = 0;
    }

    /// Nach jedem geplanten Reconnect
    pub fn erhoehen(&mut self) {
        self.versuche = self.versuche.saturating_add(1);
    }

    /// Bei einem Resume-Trigger: ein Versuch Nachlass
    pub fn nachlassen(&mut self) {
        self.versuche = self.versuche.saturating_sub(1);
    }
}
