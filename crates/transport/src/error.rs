//! Fehlertypen fuer die Transportschicht

use plauderei_core::PlaudereiError;
use plauderei_protocol::WireFehler;
use thiserror::Error;

/// Fehlertyp fuer Kanaele und Sockets
///
/// Verbindungsfehler sind nie fatal: die `Verbindung` plant immer einen
/// Reconnect, solange sie nicht unterdrueckt ist.
#[derive(Debug, Error)]
pub enum TransportFehler {
    /// Socket konnte nicht geoeffnet werden
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    /// Socket wurde waehrend des Betriebs getrennt
    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    /// Ungueltige Kanal-URL
    #[error("Ungueltige URL: {0}")]
    Url(String),

    /// Frame konnte nicht kodiert werden
    #[error("Wire-Fehler: {0}")]
    Wire(#[from] WireFehler),
}

/// Result-Typ fuer die Transportschicht
pub type TransportResult<T> = Result<T, TransportFehler>;

impl From<TransportFehler> for PlaudereiError {
    fn from(e: TransportFehler) -> Self {
        match e {
            TransportFehler::Verbindung(m) => PlaudereiError::Verbindung(m),
            TransportFehler::Getrennt(m) => PlaudereiError::Getrennt(m),
            TransportFehler::Url(m) => PlaudereiError::Konfiguration(m),
            TransportFehler::Wire(w) => PlaudereiError::UngueltigerFrame(w.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transportfehler_sind_wiederholbar() {
        let e: PlaudereiError = TransportFehler::Getrennt("close 1006".into()).into();
        assert!(e.ist_wiederholbar());
        let e: PlaudereiError = TransportFehler::Url("mailto:x".into()).into();
        assert!(!e.ist_wiederholbar());
    }
}
