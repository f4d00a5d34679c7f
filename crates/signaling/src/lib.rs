//! plauderei-signaling – Echtzeit-Kern einer Benutzer-Sitzung
//!
//! Dieser Crate verbindet die Kanaele aus `plauderei-transport` mit der
//! Anruf-Signalisierung. Er routet und dedupliziert eingehende Frames,
//! fuehrt die Anruf-State-Machine und steuert die Mediensitzung.
//!
//! ## Architektur
//!
//! ```text
//! Sitzung (ein Task, besitzt allen Zustand)
//!     |
//!     +-- GlobalKanal / AnrufKanal   (plauderei-transport)
//!     |
//!     +-- EreignisRouter  – Frames dekodieren, Dedup-Ledger, Presence
//!     |
//!     +-- AnrufMaschine   – Leerlauf/Eingehend/Ausgehend/ImGespraech
//!     |
//!     +-- Medien-Worker   – MedienSitzung nacheinander bedienen
//!     |
//!     +-- TokenVerwaltung – Auffrischung mit Single-Flight
//! ```

pub mod anruf;
pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod medien;
pub mod presence;
pub mod session;

// Bequeme Re-Exporte
pub use anruf::{AnrufEffekt, AnrufEingabe, AnrufKontext, AnrufMaschine, AnrufZustand, Rolle};
pub use auth::{AuthFehler, TokenAuffrischer, TokenVerwaltung};
pub use dispatcher::{EreignisRouter, Weiterleitung};
pub use error::{SignalingFehler, SignalingResult};
pub use ledger::GesehenLedger;
pub use medien::{
    MedienEreignis, MedienFabrik, MedienFehler, MedienResult, MedienSitzung,
    MedienVerbindungsZustand, SdpArt,
};
pub use presence::PresenzCache;
pub use session::{Befehl, GestarteteSitzung, Sitzung, SitzungsHandle, SitzungsKonfig};
