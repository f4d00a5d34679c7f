//! Wire-Format fuer beide Kanaele
//!
//! Jeder Frame ist genau eine WebSocket-Textnachricht mit einem JSON-Objekt.
//! Die Laengenbegrenzung ersetzt das Laengenfeld eines Byte-Streams:
//! uebergrosse Frames werden weder gesendet noch dekodiert.
//!
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 256 KiB, genug fuer
//! SDP-Angebote mit vielen Codecs).

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse in Bytes
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler beim Kodieren oder Dekodieren eines Frames
#[derive(Debug, Error)]
pub enum WireFehler {
    #[error("Frame zu gross: {laenge} Bytes (Maximum: {maximum} Bytes)")]
    ZuGross { laenge: usize, maximum: usize },

    #[error("JSON-Verarbeitung fehlgeschlagen: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// TextCodec
// ---------------------------------------------------------------------------

/// JSON-Textcodec mit Groessenlimit
#[derive(Debug, Clone, Copy)]
pub struct TextCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl TextCodec {
    /// Erstellt einen neuen `TextCodec` mit Standard-Limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `TextCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Serialisiert einen Frame zu einer Textnachricht
    pub fn kodieren<T: Serialize>(&self, frame: &T) -> Result<String, WireFehler> {
        let text = serde_json::to_string(frame)?;
        self.laenge_pruefen(text.len())?;
        Ok(text)
    }

    /// Dekodiert eine Textnachricht
    ///
    /// # Fehler
    /// - `ZuGross` wenn der Text das Limit ueberschreitet
    /// - `Json` bei ungueltigem JSON oder unbekanntem `type`
    pub fn dekodieren<T: DeserializeOwned>(&self, text: &str) -> Result<T, WireFehler> {
        self.laenge_pruefen(text.len())?;
        Ok(serde_json::from_str(text)?)
    }

    fn laenge_pruefen(&self, laenge: usize) -> Result<(), WireFehler> {
        if laenge > self.max_frame_size {
            return Err(WireFehler::ZuGross {
                laenge,
                maximum: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
