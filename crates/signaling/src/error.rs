//! Fehlertypen fuer Router, Anruf-State-Machine und Sitzung

use plauderei_core::PlaudereiError;
use plauderei_protocol::WireFehler;
use plauderei_transport::TransportFehler;
use thiserror::Error;

use crate::auth::AuthFehler;
use crate::medien::MedienFehler;

/// Fehlertyp fuer den Signaling-Teil der Sitzung
#[derive(Debug, Error)]
pub enum SignalingFehler {
    /// Transportfehler (Socket, URL)
    #[error("Transportfehler: {0}")]
    Transport(#[from] TransportFehler),

    /// Frame nicht dekodierbar
    #[error("Wire-Fehler: {0}")]
    Wire(#[from] WireFehler),

    /// Mediensitzung fehlgeschlagen
    #[error("Medienfehler: {0}")]
    Medien(#[from] MedienFehler),

    /// Token-Auffrischung fehlgeschlagen
    #[error("Authentifizierungsfehler: {0}")]
    Auth(#[from] AuthFehler),

    /// Der Sitzungs-Loop laeuft nicht mehr
    #[error("Sitzung beendet")]
    SitzungBeendet,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingFehler {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Teil
pub type SignalingResult<T> = Result<T, SignalingFehler>;

impl From<SignalingFehler> for PlaudereiError {
    fn from(e: SignalingFehler) -> Self {
        match e {
            SignalingFehler::Transport(t) => t.into(),
            SignalingFehler::Wire(w) => PlaudereiError::UngueltigerFrame(w.to_string()),
            SignalingFehler::Medien(m) => PlaudereiError::Medien(m.to_string()),
            SignalingFehler::Auth(a) => PlaudereiError::Authentifizierung(a.to_string()),
            SignalingFehler::SitzungBeendet => PlaudereiError::intern("Sitzung beendet"),
            SignalingFehler::Intern(m) => PlaudereiError::Intern(m),
        }
    }
}
