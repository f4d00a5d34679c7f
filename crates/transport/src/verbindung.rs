//! Verbindung – Lebenszyklus genau eines physischen Kanals
//!
//! Sans-io: jede Methode aendert nur den Zustand und gibt die noetigen
//! Effekte zurueck. Der Sitzungs-Loop oeffnet Sockets, sendet Frames und
//! stellt Timer.
//!
//! ## State Machine
//! ```text
//! Geschlossen --verbinden--> Verbindet --geoeffnet--> Offen
//!     ^                          |                      |
//!     +------ geschlossen -------+----------------------+
//!             (Reconnect via Backoff, ausser unterdrueckt)
//! ```
//!
//! ## Unterdrueckung
//! - Offline oder verborgen: kein Reconnect, Zaehler bleibt stehen
//! - Resume-Trigger (online, sichtbar, Fokus) rufen `verbinden()` und
//!   lassen dem Zaehler einen Versuch nach

use plauderei_core::event::KanalArt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

use crate::backoff::{BackoffKonfig, BackoffZaehler};

// ---------------------------------------------------------------------------
// Zustand & Effekte
// ---------------------------------------------------------------------------

/// Zustand eines Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    Geschlossen,
    Verbindet,
    Offen,
}

/// Auszufuehrende Seiteneffekte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerbindungsEffekt {
    /// Neuen Socket oeffnen (neue Generation)
    SocketOeffnen,
    /// Aktuellen Socket schliessen, kein Reconnect
    SocketSchliessen,
    /// Textframe ueber den offenen Socket senden
    Senden(String),
    /// Reconnect-Timer stellen
    ReconnectPlanen(Duration),
    /// Geplanten Reconnect-Timer verwerfen
    ReconnectAbbrechen,
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

/// Verbindungszustand, Backoff-Zaehler und Unterdrueckungs-Flags eines Kanals
#[derive(Debug)]
pub struct Verbindung {
    kanal: KanalArt,
    zustand: VerbindungsZustand,
    zaehler: BackoffZaehler,
    konfig: BackoffKonfig,
    rng: StdRng,
    offline: bool,
    verborgen: bool,
    reconnect_geplant: bool,
    abgebaut: bool,
}

impl Verbindung {
    /// Erstellt eine geschlossene Verbindung mit OS-Zufallsquelle
    pub fn neu(kanal: KanalArt, konfig: BackoffKonfig) -> Self {
        Self::mit_rng(kanal, konfig, StdRng::from_os_rng())
    }

    /// Erstellt eine Verbindung mit vorgegebener Zufallsquelle
    pub fn mit_rng(kanal: KanalArt, konfig: BackoffKonfig, rng: StdRng) -> Self {
        Self {
            kanal,
            zustand: VerbindungsZustand::Geschlossen,
            zaehler: BackoffZaehler::default(),
            konfig,
            rng,
            offline: false,
            verborgen: false,
            reconnect_geplant: false,
            abgebaut: false,
        }
    }

    pub fn kanal(&self) -> KanalArt {
        self.kanal
    }

    pub fn zustand(&self) -> VerbindungsZustand {
        self.zustand
    }

    pub fn ist_offen(&self) -> bool {
        self.zustand == VerbindungsZustand::Offen
    }

    /// Anzahl fehlgeschlagener Versuche seit dem letzten Oeffnen
    pub fn versuche(&self) -> u32 {
        self.zaehler.versuche()
    }

    /// Offline oder verborgen
    pub fn ist_unterdrueckt(&self) -> bool {
        self.offline || self.verborgen
    }

    pub fn reconnect_geplant(&self) -> bool {
        self.reconnect_geplant
    }

    pub fn ist_abgebaut(&self) -> bool {
        self.abgebaut
    }

    /// Verbindungsaufbau anstossen
    ///
    /// No-op bei `Verbindet`/`Offen`, bei Unterdrueckung und nach dem Abbau.
    pub fn verbinden(&mut self) -> Vec<VerbindungsEffekt> {
        if self.abgebaut {
            return Vec::new();
        }
        if self.zustand != VerbindungsZustand::Geschlossen {
            tracing::trace!(kanal = %self.kanal, zustand = ?self.zustand, "verbinden ignoriert");
            return Vec::new();
        }
        if self.ist_unterdrueckt() {
            tracing::debug!(
                kanal = %self.kanal,
                offline = self.offline,
                verborgen = self.verborgen,
                "Verbindungsaufbau unterdrueckt"
            );
            return Vec::new();
        }

        self.zustand = VerbindungsZustand::Verbindet;
        let mut effekte = Vec::with_capacity(2);
        if self.reconnect_geplant {
            self.reconnect_geplant = false;
            effekte.push(VerbindungsEffekt::ReconnectAbbrechen);
        }
        effekte.push(VerbindungsEffekt::SocketOeffnen);
        tracing::debug!(kanal = %self.kanal, versuche = self.zaehler.versuche(), "Verbinde");
        effekte
    }

    /// Socket ist offen: Zaehler zuruecksetzen
    ///
    /// Gibt `false` zurueck wenn die Meldung nicht mehr zum Zustand passt.
    pub fn geoeffnet(&mut self) -> bool {
        if self.abgebaut || self.zustand == VerbindungsZustand::Offen {
            return false;
        }
        self.zustand = VerbindungsZustand::Offen;
        self.zaehler.zuruecksetzen();
        tracing::info!(kanal = %self.kanal, "Kanal offen");
        true
    }

    /// Socket geschlossen oder Fehler: Reconnect planen falls erlaubt
    pub fn geschlossen(&mut self, grund: &str) -> Vec<VerbindungsEffekt> {
        if self.abgebaut {
            return Vec::new();
        }
        let war = self.zustand;
        self.zustand = VerbindungsZustand::Geschlossen;

        if self.ist_unterdrueckt() {
            tracing::info!(
                kanal = %self.kanal,
                grund,
                "Kanal geschlossen, Reconnect ausgesetzt"
            );
            return Vec::new();
        }
        if self.reconnect_geplant {
            // onError + onClose fuer denselben Socket
            return Vec::new();
        }

        let verzoegerung = self
            .konfig
            .naechste_verzoegerung(self.zaehler.versuche(), &mut self.rng);
        self.zaehler.erhoehen();
        self.reconnect_geplant = true;
        tracing::warn!(
            kanal = %self.kanal,
            grund,
            vorher = ?war,
            versuche = self.zaehler.versuche(),
            verzoegerung_ms = verzoegerung.as_millis() as u64,
            "Kanal geschlossen, Reconnect geplant"
        );
        vec![VerbindungsEffekt::ReconnectPlanen(verzoegerung)]
    }

    /// Reconnect-Timer ist abgelaufen
    pub fn reconnect_faellig(&mut self) -> Vec<VerbindungsEffekt> {
        self.reconnect_geplant = false;
        self.verbinden()
    }

    /// Frame senden falls offen, sonst verwerfen (fire-and-forget)
    pub fn senden(&mut self, text: String) -> Option<VerbindungsEffekt> {
        if self.ist_offen() {
            Some(VerbindungsEffekt::Senden(text))
        } else {
            tracing::warn!(
                kanal = %self.kanal,
                zustand = ?self.zustand,
                "Kanal nicht offen, Frame verworfen"
            );
            None
        }
    }

    /// Netzwerkstatus des Hosts hat sich geaendert
    pub fn netzwerk_geaendert(&mut self, online: bool) -> Vec<VerbindungsEffekt> {
        self.offline = !online;
        if online {
            self.fortsetzen()
        } else {
            self.geplanten_reconnect_verwerfen()
        }
    }

    /// Sichtbarkeit der Oberflaeche hat sich geaendert
    pub fn sichtbarkeit_geaendert(&mut self, sichtbar: bool) -> Vec<VerbindungsEffekt> {
        self.verborgen = !sichtbar;
        if sichtbar {
            self.fortsetzen()
        } else {
            self.geplanten_reconnect_verwerfen()
        }
    }

    /// Resume-Trigger: einen Versuch nachlassen und verbinden
    pub fn fortsetzen(&mut self) -> Vec<VerbindungsEffekt> {
        if self.abgebaut || self.ist_unterdrueckt() {
            return Vec::new();
        }
        self.zaehler.nachlassen();
        self.verbinden()
    }

    /// Endgueltiger Abbau, danach keine Reconnects mehr
    pub fn abbauen(&mut self) -> Vec<VerbindungsEffekt> {
        if self.abgebaut {
            return Vec::new();
        }
        self.abgebaut = true;
        let mut effekte = self.geplanten_reconnect_verwerfen();
        if self.zustand != VerbindungsZustand::Geschlossen {
            effekte.push(VerbindungsEffekt::SocketSchliessen);
        }
        self.zustand = VerbindungsZustand::Geschlossen;
        tracing::debug!(kanal = %self.kanal, "Kanal abgebaut");
        effekte
    }

    fn geplanten_reconnect_verwerfen(&mut self) -> Vec<VerbindungsEffekt> {
        if self.reconnect_geplant {
            self.reconnect_geplant = false;
            vec![VerbindungsEffekt::ReconnectAbbrechen]
        } else {
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
