//! Sitzungsereignisse
//!
//! Alle Ereignisse die die Echtzeit-Sitzung an ihre Konsumenten (UI,
//! Benachrichtigungen, Chat-Ansicht) weiterreicht. Rohe Retry-Mechanik der
//! Kanaele ist hier bewusst nicht sichtbar, nur Offen/Geschlossen.

use crate::types::{CallId, ChatId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Art eines logischen Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KanalArt {
    /// Globaler Kanal pro Benutzer-Sitzung
    Global,
    /// Kanal des aktiven Anrufs
    Anruf,
}

impl std::fmt::Display for KanalArt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KanalArt::Global => write!(f, "global"),
            KanalArt::Anruf => write!(f, "anruf"),
        }
    }
}

/// Welcher Ton laeuft gerade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ton {
    /// Klingelton bei eingehendem Anruf
    Klingelton,
    /// Freizeichen waehrend ein ausgehender Anruf klingelt
    Freizeichen,
}

/// Benutzersichtbare Statusaenderungen eines Anrufs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "art", rename_all = "snake_case")]
pub enum AnrufEreignis {
    /// Ausgehender Anruf wurde gestartet
    Ausgehend { chat_id: ChatId },
    /// Eingehender Anruf, Annahme-Dialog anzeigen
    Eingehend {
        chat_id: ChatId,
        von: String,
        call_id: CallId,
    },
    /// Gespraech laeuft (Signalisierung begonnen)
    Verbunden { chat_id: ChatId },
    /// Gegenueber ist dem Anrufkanal beigetreten
    GegenueberBeigetreten { von: String },
    /// Medienverbindung steht
    MedienVerbunden,
    /// Medienverbindung kurz unterbrochen
    MedienUnterbrochen,
    /// Eingehende Audiospur vom Gegenueber
    SpurEmpfangen { spur_id: String },
    /// Ton starten
    TonStarten { ton: Ton },
    /// Laufenden Ton stoppen
    TonStoppen,
    /// Anruf wurde abgelehnt
    Abgelehnt { chat_id: ChatId },
    /// Anruf ist beendet
    Beendet { chat_id: ChatId, grund: String },
    /// Niemand hat reagiert
    Zeitueberschreitung { chat_id: ChatId },
    /// Medienfehler, Anruf zurueck in Leerlauf
    Fehler { grund: String },
}

/// Alle Ereignisse die aus der Sitzung an Konsumenten fliessen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum SitzungsEreignis {
    /// Neue Chat-Nachricht (hoechstens einmal pro MessageId)
    NeueNachricht {
        message_id: MessageId,
        chat_id: ChatId,
        username: String,
        text: String,
        zeitpunkt: DateTime<Utc>,
    },
    /// Jemand tippt in einem Chat
    Tippt { chat_id: ChatId, username: String },
    /// Online-Status eines Benutzers
    Status { username: String, online: bool },
    /// Ein neuer Chat wurde angelegt
    ChatErstellt { chat_id: ChatId, ersteller: String },
    /// Statusaenderung eines Anrufs
    Anruf(AnrufEreignis),
    /// Kanal hat den Zustand gewechselt
    Verbindung { kanal: KanalArt, offen: bool },
    /// Auch nach Token-Erneuerung abgelehnt
    AuthentifizierungFehlgeschlagen { grund: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ereignis_ist_serde_kompatibel() {
        let event = SitzungsEreignis::Anruf(AnrufEreignis::Eingehend {
            chat_id: ChatId(9),
            von: "bob".into(),
            call_id: CallId::neu("C"),
        });
        let json = serde_json::to_string(&event).unwrap();
        let zurueck: SitzungsEreignis = serde_json::from_str(&json).unwrap();
        assert_eq!(event, zurueck);
    }

    #[test]
    fn kanal_art_display() {
        assert_eq!(KanalArt::Global.to_string(), "global");
        assert_eq!(KanalArt::Anruf.to_string(), "anruf");
    }
}
