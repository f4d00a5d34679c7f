//! Globaler Kanal – ein Kanal pro Benutzer-Sitzung
//!
//! Beim Oeffnen: `auth` (falls Token vorhanden), dann `join_idle`, dann
//! erneut `join_chat` fuer den zuletzt betretenen Chat. Chat-Frames sind
//! fire-and-forget: ist der Kanal nicht offen, wird verworfen.

use plauderei_core::event::KanalArt;
use plauderei_core::types::ChatId;
use plauderei_protocol::{AusgehenderFrame, TextCodec};

use crate::backoff::BackoffKonfig;
use crate::verbindung::{Verbindung, VerbindungsEffekt};

/// Verbindung des globalen Kanals plus Anmeldedaten
#[derive(Debug)]
pub struct GlobalKanal {
    verbindung: Verbindung,
    codec: TextCodec,
    token: Option<String>,
    aktiver_chat: Option<ChatId>,
}

impl GlobalKanal {
    /// Erstellt den globalen Kanal
    pub fn neu(konfig: BackoffKonfig, token: Option<String>) -> Self {
        Self::mit_verbindung(Verbindung::neu(KanalArt::Global, konfig), token)
    }

    /// Erstellt den Kanal um eine vorbereitete Verbindung herum (Tests)
    pub fn mit_verbindung(verbindung: Verbindung, token: Option<String>) -> Self {
        Self {
            verbindung,
            codec: TextCodec::new(),
            token,
            aktiver_chat: None,
        }
    }

    pub fn verbindung(&self) -> &Verbindung {
        &self.verbindung
    }

    pub fn verbindung_mut(&mut self) -> &mut Verbindung {
        &mut self.verbindung
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn aktiver_chat(&self) -> Option<ChatId> {
        self.aktiver_chat
    }

    /// Socket offen: Begruessungsframes senden
    pub fn geoeffnet(&mut self) -> Vec<VerbindungsEffekt> {
        if !self.verbindung.geoeffnet() {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(3);
        if let Some(token) = &self.token {
            frames.push(AusgehenderFrame::Auth {
                token: token.clone(),
            });
        }
        frames.push(AusgehenderFrame::JoinIdle);
        if let Some(chat_id) = self.aktiver_chat {
            frames.push(AusgehenderFrame::JoinChat { chat_id });
        }

        frames
            .iter()
            .filter_map(|frame| self.kodieren(frame))
            .map(VerbindungsEffekt::Senden)
            .collect()
    }

    /// Frame senden (oder verwerfen falls nicht offen)
    ///
    /// `join_chat`/`leave_chat` werden auch ohne offenen Kanal gemerkt,
    /// damit der naechste Open den richtigen Chat betritt.
    pub fn senden(&mut self, frame: &AusgehenderFrame) -> Option<VerbindungsEffekt> {
        match frame {
            AusgehenderFrame::JoinChat { chat_id } => self.aktiver_chat = Some(*chat_id),
            AusgehenderFrame::LeaveChat { chat_id } if self.aktiver_chat == Some(*chat_id) => {
                self.aktiver_chat = None
            }
            _ => {}
        }
        let text = self.kodieren(frame)?;
        self.verbindung.senden(text)
    }

    /// Neues Token setzen, bei offenem Kanal sofort neu anmelden
    pub fn token_setzen(&mut self, token: String) -> Option<VerbindungsEffekt> {
        self.token = Some(token.clone());
        if self.verbindung.ist_offen() {
            let text = self.kodieren(&AusgehenderFrame::Auth { token })?;
            self.verbindung.senden(text)
        } else {
            None
        }
    }

    fn kodieren(&self, frame: &AusgehenderFrame) -> Option<String> {
        match self.codec.kodieren(frame) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(fehler = %e, "Frame konnte nicht kodiert werden");
                None
            }
        }
    }
}
