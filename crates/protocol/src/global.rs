//! Frames des globalen Kanals
//!
//! Ein globaler Kanal pro Benutzer-Sitzung. JSON-Textframes mit einem
//! `type`-Diskriminator, Feldnamen exakt wie auf dem Draht (`chatID`,
//! `messageID`, `call_id`).
//!
//! ## Design
//! - Ausgehend und Eingehend sind getrennte Enums, der Client sendet nie
//!   einen Server-Frame und umgekehrt
//! - Unbekannte `type`-Werte scheitern beim Dekodieren und werden vom
//!   Router als ungueltig verworfen
//! - Zeitstempel werden tolerant gelesen: RFC 3339, `YYYY-MM-DD HH:MM:SS`
//!   (als UTC) oder Unix-Zeit. Unlesbare Werte ersetzt die Empfangszeit,
//!   die Nachricht selbst geht nicht verloren

use chrono::{DateTime, NaiveDateTime, Utc};
use plauderei_core::types::{CallId, ChatId, MessageId};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Frames die der Client ueber den globalen Kanal sendet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AusgehenderFrame {
    /// Anmeldung mit Session-Token
    Auth { token: String },
    /// Praesenz ankuendigen (online, kein aktiver Chat)
    JoinIdle,
    /// Chat betreten
    JoinChat {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
    },
    /// Chat verlassen
    LeaveChat {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
    },
    /// Nachricht posten
    PostMsg {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        text: String,
    },
    /// Tipp-Indikator
    Typing {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
    },
    /// Anruf in einem Chat starten
    CallInvite {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
    },
    /// Eingehenden Anruf annehmen
    CallAccept {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        call_id: CallId,
    },
    /// Eingehenden Anruf ablehnen
    CallDecline {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        call_id: CallId,
    },
    /// Anruf beenden (auch vor Annahme)
    CallEnd {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<CallId>,
    },
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Anrufstatus in `call_state`-Broadcasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnrufStatusWert {
    Ringing,
    Accepted,
    Declined,
    Ended,
    #[serde(other)]
    Unbekannt,
}

/// Frames die der Server ueber den globalen Kanal sendet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EingehenderFrame {
    /// Neue Chat-Nachricht, kann nach Reconnect erneut zugestellt werden
    NewMessage {
        #[serde(rename = "messageID")]
        message_id: MessageId,
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        username: String,
        message: String,
        #[serde(deserialize_with = "zeitstempel_tolerant")]
        timestamp: DateTime<Utc>,
    },
    UserTyping {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        username: String,
    },
    UserStatus { username: String, online: bool },
    ChatCreated {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        creator: String,
    },
    CallIncoming {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        from: String,
        call_id: CallId,
    },
    /// Autoritativer Status-Broadcast eines Anrufs
    CallState {
        state: AnrufStatusWert,
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        #[serde(default)]
        from: Option<String>,
        call_id: CallId,
    },
    /// Sofortige Annahme-Bestaetigung
    CallAccepted {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        from: String,
        call_id: CallId,
    },
    CallDeclined {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        call_id: Option<CallId>,
    },
    CallEnded {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        #[serde(default)]
        call_id: Option<CallId>,
    },
    /// Token abgelehnt (401-Aequivalent)
    AuthError {
        #[serde(default)]
        message: Option<String>,
    },
}

impl EingehenderFrame {
    /// Kurzname fuer Logs und Metriken
    pub fn art(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStatus { .. } => "user_status",
            Self::ChatCreated { .. } => "chat_created",
            Self::CallIncoming { .. } => "call_incoming",
            Self::CallState { .. } => "call_state",
            Self::CallAccepted { .. } => "call_accepted",
            Self::CallDeclined { .. } => "call_declined",
            Self::CallEnded { .. } => "call_ended",
            Self::AuthError { .. } => "auth_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Zeitstempel
// ---------------------------------------------------------------------------

/// Formate ohne Zeitzone, gelesen als UTC
const NAIVE_FORMATE: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Ab hier wird eine Unix-Zeit als Millisekunden gelesen
const MILLIS_SCHWELLE: i64 = 100_000_000_000;

#[derive(Deserialize)]
#[serde(untagged)]
enum RoherZeitstempel {
    Zahl(i64),
    Text(String),
}

fn zeitstempel_tolerant<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let zeit = match RoherZeitstempel::deserialize(deserializer)? {
        RoherZeitstempel::Zahl(n) => unix_zeit(n),
        RoherZeitstempel::Text(text) => zeitstempel_parsen(&text),
    };
    Ok(zeit.unwrap_or_else(Utc::now))
}

/// Liest einen Zeitstempel in einem der unterstuetzten Formate
pub fn zeitstempel_parsen(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(zeit) = DateTime::parse_from_rfc3339(text) {
        return Some(zeit.with_timezone(&Utc));
    }
    NAIVE_FORMATE
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naiv| naiv.and_utc())
        .or_else(|| text.parse::<i64>().ok().and_then(unix_zeit))
}

fn unix_zeit(n: i64) -> Option<DateTime<Utc>> {
    if n.abs() >= MILLIS_SCHWELLE {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_idle_hat_nur_den_typ() {
        let json = serde_json::to_value(&AusgehenderFrame::JoinIdle).unwrap();
        assert_eq!(json, json!({"type": "join_idle"}));
    }

    #[test]
    fn post_msg_nutzt_drahtnamen() {
        let frame = AusgehenderFrame::PostMsg {
            chat_id: ChatId(7),
            text: "hallo".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, json!({"type": "post_msg", "chatID": 7, "text": "hallo"}));
    }

    #[test]
    fn call_end_ohne_call_id() {
        let frame = AusgehenderFrame::CallEnd {
            chat_id: ChatId(3),
            call_id: None,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, json!({"type": "call_end", "chatID": 3}));
    }

    #[test]
    fn new_message_dekodieren() {
        let roh = r#"{"type":"new_message","messageID":11,"chatID":7,
            "username":"alice","message":"hi","timestamp":"2024-05-01T10:00:00Z"}"#;
        let frame: EingehenderFrame = serde_json::from_str(roh).unwrap();
        match frame {
            EingehenderFrame::NewMessage {
                message_id,
                chat_id,
                username,
                ..
            } => {
                assert_eq!(message_id, MessageId(11));
                assert_eq!(chat_id, ChatId(7));
                assert_eq!(username, "alice");
            }
            other => panic!("Erwartet NewMessage, erhalten: {:?}", other),
        }
    }

    fn zeitstempel_von(wert: serde_json::Value) -> DateTime<Utc> {
        let frame: EingehenderFrame = serde_json::from_value(json!({
            "type": "new_message",
            "messageID": 1,
            "chatID": 1,
            "username": "bob",
            "message": "x",
            "timestamp": wert,
        }))
        .unwrap();
        match frame {
            EingehenderFrame::NewMessage { timestamp, .. } => timestamp,
            other => panic!("Erwartet NewMessage, erhalten: {:?}", other),
        }
    }

    #[test]
    fn zeitstempel_formate() {
        let erwartet = zeitstempel_parsen("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(zeitstempel_von(json!("2024-05-01T12:00:00+02:00")), erwartet);
        assert_eq!(zeitstempel_von(json!("2024-05-01 10:00:00")), erwartet);
        assert_eq!(zeitstempel_von(json!("2024-05-01T10:00:00.000")), erwartet);
        assert_eq!(zeitstempel_von(json!(1_714_557_600)), erwartet);
        assert_eq!(zeitstempel_von(json!(1_714_557_600_000_i64)), erwartet);
        assert_eq!(zeitstempel_von(json!("1714557600")), erwartet);
    }

    #[test]
    fn unlesbarer_zeitstempel_behaelt_die_nachricht() {
        let vorher = Utc::now();
        let zeit = zeitstempel_von(json!("gestern abend"));
        assert!(zeit >= vorher);
        assert_eq!(zeitstempel_parsen("gestern abend"), None);
    }

    #[test]
    fn call_state_mit_unbekanntem_status() {
        let roh = r#"{"type":"call_state","state":"on_hold","chatID":1,"call_id":"X"}"#;
        let frame: EingehenderFrame = serde_json::from_str(roh).unwrap();
        assert!(matches!(
            frame,
            EingehenderFrame::CallState {
                state: AnrufStatusWert::Unbekannt,
                from: None,
                ..
            }
        ));
    }

    #[test]
    fn call_declined_minimal() {
        let frame: EingehenderFrame =
            serde_json::from_str(r#"{"type":"call_declined","chatID":4}"#).unwrap();
        assert_eq!(frame.art(), "call_declined");
    }

    #[test]
    fn unbekannter_typ_ist_fehler() {
        let ergebnis: Result<EingehenderFrame, _> =
            serde_json::from_str(r#"{"type":"weather","chatID":1}"#);
        assert!(ergebnis.is_err());
    }
}
