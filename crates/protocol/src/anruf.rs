//! Frames des Anrufkanals
//!
//! Ein Anrufkanal pro aktivem Anruf, Pfad `<basis>/<chatID>/<username>`.
//! Transportiert ausschliesslich SDP- und ICE-Nutzlasten sowie `leave`.
//! Der Typ-Diskriminator ist kebab-case (`ice-candidate`, `call-started`).

use plauderei_core::types::ChatId;
use serde::{Deserialize, Serialize};

/// Ein ICE-Kandidat im Browser-kompatiblen JSON-Format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceKandidat {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

impl IceKandidat {
    pub fn neu(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Signalisierungs-Frames auf dem Anrufkanal (beide Richtungen)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalFrame {
    /// Anmeldung am Anrufkanal
    Auth {
        token: String,
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        username: String,
    },
    Offer {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        sdp: String,
    },
    Answer {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        sdp: String,
    },
    IceCandidate {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        candidate: IceKandidat,
    },
    Leave {
        #[serde(rename = "chatID")]
        chat_id: ChatId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Vom Server: Gegenueber ist dem Anruf beigetreten
    CallStarted { from: String },
}

impl SignalFrame {
    /// Kurzname fuer Logs
    pub fn art(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Leave { .. } => "leave",
            Self::CallStarted { .. } => "call-started",
        }
    }
}
