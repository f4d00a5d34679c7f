//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, ohne Datei verbindet sich der Client mit einem lokalen
//! Server.

use anyhow::Context;
use plauderei_observability::logging::{log_format_gueltig, log_level_gueltig};
use plauderei_signaling::ledger::STANDARD_KAPAZITAET;
use plauderei_signaling::SitzungsKonfig;
use plauderei_transport::BackoffKonfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server-Adressen und Anmeldung
    pub verbindung: VerbindungsEinstellungen,
    /// Reconnect-Verhalten
    pub backoff: BackoffEinstellungen,
    /// Anruf-Einstellungen
    pub anruf: AnrufEinstellungen,
    /// Deduplizierung eingehender Nachrichten
    pub dedup: DedupEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Server-Adressen und Anmeldung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// URL des globalen Kanals
    pub server_url: String,
    /// Basis-URL des Anrufkanals (`<anruf_url>/<chatID>/<username>`)
    pub anruf_url: String,
    pub username: String,
    /// Session-Token (leer = ohne Anmeldung)
    pub token: Option<String>,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080/ws".into(),
            anruf_url: "ws://localhost:8080/calls".into(),
            username: "gast".into(),
            token: None,
        }
    }
}

/// Reconnect-Verhalten
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffEinstellungen {
    /// Basisverzoegerung in Millisekunden
    pub basis_ms: u64,
    /// Obergrenze als Vielfaches der Basis
    pub max_faktor: u32,
}

impl Default for BackoffEinstellungen {
    fn default() -> Self {
        Self {
            basis_ms: 1000,
            max_faktor: 15,
        }
    }
}

/// Anruf-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnrufEinstellungen {
    /// Timeout fuer den Anrufaufbau in Sekunden (0 = aus)
    pub setup_timeout_sek: u64,
}

impl Default for AnrufEinstellungen {
    fn default() -> Self {
        Self {
            setup_timeout_sek: 45,
        }
    }
}

/// Deduplizierung eingehender Nachrichten
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupEinstellungen {
    /// Maximale Anzahl gemerkter Nachrichten-IDs
    pub kapazitaet: usize,
}

impl Default for DedupEinstellungen {
    fn default() -> Self {
        Self {
            kapazitaet: STANDARD_KAPAZITAET,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde allein nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if self.verbindung.username.trim().is_empty() {
            anyhow::bail!("verbindung.username darf nicht leer sein");
        }
        if self.backoff.basis_ms == 0 || self.backoff.max_faktor == 0 {
            anyhow::bail!("backoff.basis_ms und backoff.max_faktor muessen > 0 sein");
        }
        if self.dedup.kapazitaet == 0 {
            anyhow::bail!("dedup.kapazitaet muss > 0 sein");
        }
        if !log_level_gueltig(&self.logging.level) {
            tracing::warn!(level = %self.logging.level, "Unbekanntes Log-Level");
        }
        if !log_format_gueltig(&self.logging.format) {
            tracing::warn!(format = %self.logging.format, "Unbekanntes Log-Format, nutze text");
        }
        Ok(())
    }

    /// Baut die Sitzungsparameter
    pub fn sitzungs_konfig(&self) -> anyhow::Result<SitzungsKonfig> {
        let server_url = Url::parse(&self.verbindung.server_url)
            .with_context(|| format!("verbindung.server_url '{}'", self.verbindung.server_url))?;
        let anruf_url = Url::parse(&self.verbindung.anruf_url)
            .with_context(|| format!("verbindung.anruf_url '{}'", self.verbindung.anruf_url))?;

        let mut konfig = SitzungsKonfig::neu(server_url, anruf_url, &self.verbindung.username);
        konfig.token = self.verbindung.token.clone().filter(|t| !t.is_empty());
        konfig.backoff = BackoffKonfig {
            basis: Duration::from_millis(self.backoff.basis_ms),
            max_faktor: self.backoff.max_faktor,
        };
        konfig.setup_timeout = match self.anruf.setup_timeout_sek {
            0 => None,
            sek => Some(Duration::from_secs(sek)),
        };
        konfig.dedup_kapazitaet = self.dedup.kapazitaet;
        Ok(konfig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ClientConfig::default();
        assert!(cfg.validieren().is_ok());
        assert_eq!(cfg.backoff.basis_ms, 1000);
        assert_eq!(cfg.backoff.max_faktor, 15);
        assert_eq!(cfg.anruf.setup_timeout_sek, 45);
        assert_eq!(cfg.dedup.kapazitaet, 10_000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [verbindung]
            server_url = "wss://chat.example.org/ws"
            username = "alice"
            token = "geheim"

            [anruf]
            setup_timeout_sek = 0
        "#;
        let cfg: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.verbindung.username, "alice");
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.verbindung.anruf_url, "ws://localhost:8080/calls");
        assert_eq!(cfg.backoff.max_faktor, 15);

        let konfig = cfg.sitzungs_konfig().unwrap();
        assert_eq!(konfig.server_url.as_str(), "wss://chat.example.org/ws");
        assert_eq!(konfig.token.as_deref(), Some("geheim"));
        assert_eq!(konfig.setup_timeout, None);
        assert_eq!(konfig.backoff.basis, Duration::from_secs(1));
    }

    #[test]
    fn leeres_token_zaehlt_als_keins() {
        let mut cfg = ClientConfig::default();
        cfg.verbindung.token = Some(String::new());
        assert_eq!(cfg.sitzungs_konfig().unwrap().token, None);
    }

    #[test]
    fn ungueltige_url_wird_gemeldet() {
        let mut cfg = ClientConfig::default();
        cfg.verbindung.server_url = "kein url".into();
        let fehler = cfg.sitzungs_konfig().unwrap_err();
        assert!(fehler.to_string().contains("server_url"));
    }

    #[test]
    fn leerer_username_ist_ungueltig() {
        let mut cfg = ClientConfig::default();
        cfg.verbindung.username = "  ".into();
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = ClientConfig::laden("/nicht/vorhanden/plauderei.toml").unwrap();
        assert_eq!(cfg.verbindung.username, "gast");
    }
}
