//! Ereignis-Router – Klassifiziert eingehende Frames beider Kanaele
//!
//! Jeder Textframe wird dekodiert und an das richtige Ziel weitergeleitet:
//! Chat-Ereignisse an die Konsumenten, Anruf-Frames an die
//! Anruf-State-Machine, `auth_error` an die Token-Verwaltung.
//!
//! ## Regeln
//! - Nicht dekodierbare Frames werden mit Warnung verworfen und aendern
//!   keinen Verbindungszustand
//! - Nur `new_message` laeuft durch das Dedup-Ledger, Anruf-Frames haben
//!   ihre eigene Korrelation ueber `call_id`
//! - `user_status`/`user_typing` aktualisieren zusaetzlich den Presence-Cache

use plauderei_core::event::{KanalArt, SitzungsEreignis};
use plauderei_core::types::MessageId;
use plauderei_observability::SitzungsMetriken;
use plauderei_protocol::{
    AnrufStatusWert, EingehenderFrame, SignalFrame, TextCodec, WireFehler,
};

use crate::anruf::AnrufEingabe;
use crate::ledger::GesehenLedger;
use crate::presence::PresenzCache;

/// Ziel eines eingehenden Frames
#[derive(Debug, Clone, PartialEq)]
pub enum Weiterleitung {
    /// An die Konsumenten der Sitzung
    Ereignis(SitzungsEreignis),
    /// An die Anruf-State-Machine
    Anruf(AnrufEingabe),
    /// Token wurde abgelehnt
    AuthFehler(Option<String>),
}

/// Router mit Dedup-Ledger und Presence-Cache
#[derive(Debug)]
pub struct EreignisRouter {
    codec: TextCodec,
    gesehen: GesehenLedger<MessageId>,
    presenz: PresenzCache,
    metriken: Option<SitzungsMetriken>,
}

impl EreignisRouter {
    /// Erstellt einen Router
    pub fn neu(
        dedup_kapazitaet: usize,
        presenz: PresenzCache,
        metriken: Option<SitzungsMetriken>,
    ) -> Self {
        Self {
            codec: TextCodec::new(),
            gesehen: GesehenLedger::neu(dedup_kapazitaet),
            presenz,
            metriken,
        }
    }

    pub fn presenz(&self) -> &PresenzCache {
        &self.presenz
    }

    /// Anzahl gemerkter Nachrichten-IDs
    pub fn gesehen(&self) -> usize {
        self.gesehen.len()
    }

    /// Frame vom globalen Kanal
    pub fn global_frame(&mut self, text: &str) -> Option<Weiterleitung> {
        let frame: EingehenderFrame = match self.codec.dekodieren(text) {
            Ok(f) => f,
            Err(e) => {
                self.verwerfen(KanalArt::Global, &e);
                return None;
            }
        };
        tracing::trace!(art = frame.art(), "Globaler Frame");

        let weiterleitung = match frame {
            EingehenderFrame::NewMessage {
                message_id,
                chat_id,
                username,
                message,
                timestamp,
            } => {
                if !self.gesehen.pruefen_und_merken(&message_id) {
                    tracing::debug!(%message_id, %chat_id, "Doppelte Nachricht verworfen");
                    if let Some(m) = &self.metriken {
                        m.duplikat();
                    }
                    return None;
                }
                self.presenz.nachricht_erhalten(chat_id, &username);
                Weiterleitung::Ereignis(SitzungsEreignis::NeueNachricht {
                    message_id,
                    chat_id,
                    username,
                    text: message,
                    zeitpunkt: timestamp,
                })
            }
            EingehenderFrame::UserTyping { chat_id, username } => {
                self.presenz.tippen(chat_id, &username);
                Weiterleitung::Ereignis(SitzungsEreignis::Tippt { chat_id, username })
            }
            EingehenderFrame::UserStatus { username, online } => {
                self.presenz.status_setzen(&username, online);
                Weiterleitung::Ereignis(SitzungsEreignis::Status { username, online })
            }
            EingehenderFrame::ChatCreated { chat_id, creator } => {
                Weiterleitung::Ereignis(SitzungsEreignis::ChatErstellt {
                    chat_id,
                    ersteller: creator,
                })
            }
            EingehenderFrame::CallIncoming {
                chat_id,
                from,
                call_id,
            } => Weiterleitung::Anruf(AnrufEingabe::Eingehend {
                chat_id,
                von: from,
                call_id,
            }),
            EingehenderFrame::CallState {
                state,
                chat_id,
                from,
                call_id,
            } => Weiterleitung::Anruf(match state {
                AnrufStatusWert::Ringing => AnrufEingabe::Klingelt { chat_id, call_id },
                AnrufStatusWert::Accepted => AnrufEingabe::Angenommen {
                    chat_id,
                    call_id,
                    von: from,
                },
                AnrufStatusWert::Declined => AnrufEingabe::Abgelehnt {
                    chat_id,
                    call_id: Some(call_id),
                },
                AnrufStatusWert::Ended => AnrufEingabe::Beendet {
                    chat_id,
                    call_id: Some(call_id),
                },
                AnrufStatusWert::Unbekannt => {
                    tracing::debug!(%chat_id, %call_id, "Unbekannter Anrufstatus ignoriert");
                    return None;
                }
            }),
            EingehenderFrame::CallAccepted {
                chat_id,
                from,
                call_id,
            } => Weiterleitung::Anruf(AnrufEingabe::Angenommen {
                chat_id,
                call_id,
                von: Some(from),
            }),
            EingehenderFrame::CallDeclined {
                chat_id, call_id, ..
            } => Weiterleitung::Anruf(AnrufEingabe::Abgelehnt { chat_id, call_id }),
            EingehenderFrame::CallEnded { chat_id, call_id } => {
                Weiterleitung::Anruf(AnrufEingabe::Beendet { chat_id, call_id })
            }
            EingehenderFrame::AuthError { message } => Weiterleitung::AuthFehler(message),
        };
        Some(weiterleitung)
    }

    /// Frame vom Anrufkanal
    pub fn anruf_frame(&mut self, text: &str) -> Option<Weiterleitung> {
        let frame: SignalFrame = match self.codec.dekodieren(text) {
            Ok(f) => f,
            Err(e) => {
                self.verwerfen(KanalArt::Anruf, &e);
                return None;
            }
        };
        tracing::trace!(art = frame.art(), "Signal-Frame");

        let eingabe = match frame {
            SignalFrame::Offer { chat_id, sdp } => AnrufEingabe::AngebotEmpfangen { chat_id, sdp },
            SignalFrame::Answer { chat_id, sdp } => AnrufEingabe::AntwortEmpfangen { chat_id, sdp },
            SignalFrame::IceCandidate { chat_id, candidate } => AnrufEingabe::KandidatEmpfangen {
                chat_id,
                kandidat: candidate,
            },
            SignalFrame::Leave { chat_id, reason } => AnrufEingabe::GegenueberVerlassen {
                chat_id,
                grund: reason,
            },
            SignalFrame::CallStarted { from } => AnrufEingabe::GegenueberBeigetreten { von: from },
            SignalFrame::Auth { .. } => {
                tracing::debug!("auth vom Server auf dem Anrufkanal ignoriert");
                if let Some(m) = &self.metriken {
                    m.frame_verworfen("unerwartet");
                }
                return None;
            }
        };
        Some(Weiterleitung::Anruf(eingabe))
    }

    fn verwerfen(&self, kanal: KanalArt, fehler: &WireFehler) {
        tracing::warn!(%kanal, fehler = %fehler, "Ungueltiger Frame verworfen");
        if let Some(m) = &self.metriken {
            m.frame_verworfen("ungueltig");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
