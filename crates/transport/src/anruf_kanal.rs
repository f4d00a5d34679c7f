//! Anrufkanal – Verbindung pro aktivem Anruf mit Signal-Warteschlange
//!
//! Signalisierungs-Frames duerfen nicht verloren gehen: solange der Kanal
//! nicht offen ist, landen sie in einer FIFO-Warteschlange. Beim Oeffnen
//! wird zuerst `auth` gesendet, dann die gesamte Warteschlange in
//! Einfuegereihenfolge, danach ist sie leer.
//!
//! `schliessen()` mit nicht leerer Warteschlange merkt sich den Wunsch und
//! schliesst erst nach dem Flush. In diesem Modus gibt es keinen Reconnect.

use plauderei_core::event::KanalArt;
use plauderei_core::types::ChatId;
use plauderei_protocol::{SignalFrame, TextCodec};
use std::collections::VecDeque;
use url::Url;

use crate::backoff::BackoffKonfig;
use crate::error::{TransportFehler, TransportResult};
use crate::verbindung::{Verbindung, VerbindungsEffekt};

/// Konversationsbezogener Kanal fuer SDP/ICE-Austausch
#[derive(Debug)]
pub struct AnrufKanal {
    verbindung: Verbindung,
    codec: TextCodec,
    chat_id: ChatId,
    username: String,
    token: Option<String>,
    warteschlange: VecDeque<String>,
    schliessen_nach_flush: bool,
}

impl AnrufKanal {
    /// Erstellt den Kanal fuer einen Chat (noch geschlossen)
    pub fn neu(
        chat_id: ChatId,
        username: impl Into<String>,
        token: Option<String>,
        konfig: BackoffKonfig,
    ) -> Self {
        Self::mit_verbindung(
            Verbindung::neu(KanalArt::Anruf, konfig),
            chat_id,
            username,
            token,
        )
    }

    /// Erstellt den Kanal um eine vorbereitete Verbindung herum (Tests)
    pub fn mit_verbindung(
        verbindung: Verbindung,
        chat_id: ChatId,
        username: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            verbindung,
            codec: TextCodec::new(),
            chat_id,
            username: username.into(),
            token,
            warteschlange: VecDeque::new(),
            schliessen_nach_flush: false,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn verbindung(&self) -> &Verbindung {
        &self.verbindung
    }

    pub fn verbindung_mut(&mut self) -> &mut Verbindung {
        &mut self.verbindung
    }

    /// Anzahl wartender Frames
    pub fn wartend(&self) -> usize {
        self.warteschlange.len()
    }

    pub fn schliesst_nach_flush(&self) -> bool {
        self.schliessen_nach_flush
    }

    /// URL des Kanals: `<basis>/<chatID>/<username>`
    pub fn url(&self, basis: &Url) -> TransportResult<Url> {
        let mut url = basis.clone();
        url.path_segments_mut()
            .map_err(|_| TransportFehler::Url(format!("{basis} kann keine Pfade tragen")))?
            .pop_if_empty()
            .push(&self.chat_id.inner().to_string())
            .push(&self.username);
        Ok(url)
    }

    /// Frame senden oder einreihen
    pub fn senden(&mut self, frame: &SignalFrame) -> Vec<VerbindungsEffekt> {
        let text = match self.codec.kodieren(frame) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(art = frame.art(), fehler = %e, "Signal konnte nicht kodiert werden");
                return Vec::new();
            }
        };

        if self.verbindung.ist_offen() {
            return self.verbindung.senden(text).into_iter().collect();
        }
        tracing::debug!(
            art = frame.art(),
            wartend = self.warteschlange.len() + 1,
            "Anrufkanal nicht offen, Signal eingereiht"
        );
        self.warteschlange.push_back(text);
        Vec::new()
    }

    /// Socket offen: `auth`, dann Warteschlange in Reihenfolge leeren
    pub fn geoeffnet(&mut self) -> Vec<VerbindungsEffekt> {
        if !self.verbindung.geoeffnet() {
            return Vec::new();
        }

        let mut effekte = Vec::with_capacity(self.warteschlange.len() + 2);
        if let Some(token) = &self.token {
            let auth = SignalFrame::Auth {
                token: token.clone(),
                chat_id: self.chat_id,
                username: self.username.clone(),
            };
            match self.codec.kodieren(&auth) {
                Ok(text) => effekte.push(VerbindungsEffekt::Senden(text)),
                Err(e) => tracing::warn!(fehler = %e, "Anruf-Auth konnte nicht kodiert werden"),
            }
        }

        let anzahl = self.warteschlange.len();
        effekte.extend(self.warteschlange.drain(..).map(VerbindungsEffekt::Senden));
        if anzahl > 0 {
            tracing::debug!(anzahl, chat_id = %self.chat_id, "Signal-Warteschlange geleert");
        }

        if self.schliessen_nach_flush {
            effekte.extend(self.verbindung.abbauen());
        }
        effekte
    }

    /// Socket geschlossen oder Fehler
    pub fn geschlossen(&mut self, grund: &str) -> Vec<VerbindungsEffekt> {
        if self.schliessen_nach_flush {
            self.verwerfen_mit_warnung();
            return self.verbindung.abbauen();
        }
        self.verbindung.geschlossen(grund)
    }

    /// Kanal schliessen, ausstehende Signale vorher noch zustellen
    pub fn schliessen(&mut self) -> Vec<VerbindungsEffekt> {
        if self.warteschlange.is_empty() || self.verbindung.ist_abgebaut() {
            self.warteschlange.clear();
            return self.verbindung.abbauen();
        }
        tracing::debug!(
            wartend = self.warteschlange.len(),
            "Anrufkanal schliesst nach dem Flush"
        );
        self.schliessen_nach_flush = true;
        Vec::new()
    }

    /// Sofortiger Abbau ohne Flush (Sitzungsende)
    pub fn abbauen(&mut self) -> Vec<VerbindungsEffekt> {
        self.verwerfen_mit_warnung();
        self.verbindung.abbauen()
    }

    fn verwerfen_mit_warnung(&mut self) {
        if !self.warteschlange.is_empty() {
            tracing::warn!(
                verworfen = self.warteschlange.len(),
                chat_id = %self.chat_id,
                "Ausstehende Signale verworfen"
            );
            self.warteschlange.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use plauderei_protocol::IceKandidat;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn kanal(token: Option<&str>) -> AnrufKanal {
        let verbindung = Verbindung::mit_rng(
            KanalArt::Anruf,
            BackoffKonfig::default(),
            StdRng::seed_from_u64(5),
        );
        AnrufKanal::mit_verbindung(verbindung, ChatId(7), "alice", token.map(String::from))
    }

    fn signale() -> [SignalFrame; 3] {
        [
            SignalFrame::Offer {
                chat_id: ChatId(7),
                sdp: "v=0 angebot".into(),
            },
            SignalFrame::IceCandidate {
                chat_id: ChatId(7),
                candidate: IceKandidat::neu("candidate:1"),
            },
            SignalFrame::Leave {
                chat_id: ChatId(7),
                reason: Some("aufgelegt".into()),
            },
        ]
    }

    fn gesendete_arten(effekte: &[VerbindungsEffekt]) -> Vec<String> {
        effekte
            .iter()
            .filter_map(|e| match e {
                VerbindungsEffekt::Senden(t) => {
                    let frame: SignalFrame = serde_json_frame(t);
                    Some(frame.art().to_string())
                }
                _ => None,
            })
            .collect()
    }

    fn serde_json_frame(text: &str) -> SignalFrame {
        TextCodec::new().dekodieren(text).expect("gueltiger Frame")
    }

    #[test]
    fn drei_signale_vor_dem_oeffnen_kommen_in_reihenfolge_an() {
        let mut k = kanal(None);
        for s in &signale() {
            assert!(k.senden(s).is_empty());
        }
        assert_eq!(k.wartend(), 3);

        k.verbindung_mut().verbinden();
        let effekte = k.geoeffnet();
        assert_eq!(effekte.len(), 3);
        assert_eq!(
            gesendete_arten(&effekte),
            vec!["offer", "ice-candidate", "leave"]
        );
        assert_eq!(k.wartend(), 0);

        // Kein zweiter Flush
        k.verbindung_mut().geschlossen("weg");
        k.verbindung_mut().reconnect_faellig();
        assert!(k.geoeffnet().is_empty());
    }

    #[test]
    fn auth_kommt_vor_der_warteschlange() {
        let mut k = kanal(Some("tok"));
        k.senden(&signale()[0]);
        k.verbindung_mut().verbinden();
        let effekte = k.geoeffnet();
        assert_eq!(gesendete_arten(&effekte), vec!["auth", "offer"]);
    }

    #[test]
    fn offener_kanal_sendet_sofort() {
        let mut k = kanal(None);
        k.verbindung_mut().verbinden();
        k.geoeffnet();
        let effekte = k.senden(&signale()[1]);
        assert_eq!(gesendete_arten(&effekte), vec!["ice-candidate"]);
        assert_eq!(k.wartend(), 0);
    }

    #[test]
    fn schliessen_wartet_auf_flush() {
        let mut k = kanal(None);
        k.verbindung_mut().verbinden();
        k.senden(&signale()[2]);
        assert!(k.schliessen().is_empty());
        assert!(k.schliesst_nach_flush());

        let effekte = k.geoeffnet();
        assert_eq!(
            effekte.last(),
            Some(&VerbindungsEffekt::SocketSchliessen)
        );
        assert_eq!(gesendete_arten(&effekte), vec!["leave"]);
        assert!(k.verbindung().ist_abgebaut());
    }

    #[test]
    fn schliessen_nach_flush_ohne_reconnect() {
        let mut k = kanal(None);
        k.verbindung_mut().verbinden();
        k.senden(&signale()[2]);
        k.schliessen();
        let effekte = k.geschlossen("refused");
        assert_eq!(effekte, vec![VerbindungsEffekt::SocketSchliessen]);
        assert_eq!(k.wartend(), 0);
        assert!(!k.verbindung().reconnect_geplant());
    }

    #[test]
    fn schliessen_ohne_warteschlange_baut_sofort_ab() {
        let mut k = kanal(None);
        k.verbindung_mut().verbinden();
        k.geoeffnet();
        assert_eq!(k.schliessen(), vec![VerbindungsEffekt::SocketSchliessen]);
    }

    #[test]
    fn url_enthaelt_chat_und_benutzer() {
        let k = kanal(None);
        let basis = Url::parse("wss://chat.example/call/").unwrap();
        assert_eq!(
            k.url(&basis).unwrap().as_str(),
            "wss://chat.example/call/7/alice"
        );
        let ohne_slash = Url::parse("wss://chat.example/call").unwrap();
        assert_eq!(
            k.url(&ohne_slash).unwrap().as_str(),
            "wss://chat.example/call/7/alice"
        );
    }
}
