//! Anruf-State-Machine
//!
//! Genau ein Anrufkontext pro Sitzung. Lokale Aktionen und Server-Frames
//! laufen durch dieselbe `verarbeiten`-Methode.
//!
//! ## Korrelation
//! - Server-Frames mit fremder `chatID` oder fremder `call_id` werden
//!   ignoriert (veraltete Signale eines abgeloesten Anrufs)
//! - Eine angenommene `call_id` wird gemerkt; jedes weitere
//!   `call_accepted`/`call_state accepted` mit derselben ID ist ein No-op
//! - Ein lokal gestarteter Anruf kennt seine `call_id` noch nicht und
//!   uebernimmt sie vom ersten passenden `ringing`/`accepted`. IDs bereits
//!   beendeter Anrufe passen dabei nie, ihr nachlaufendes `call_state`
//!   trifft sonst den neuen Anruf im selben Chat
//!
//! ## Angebot/Antwort
//! Der Anrufer erstellt das Angebot, sobald seine Mediensitzung bereit ist.
//! Beim Angerufenen wird ein Angebot gepuffert, bis der Beitritt scharf ist
//! (angenommen und Medien bereit). ICE-Kandidaten ohne bereite
//! Mediensitzung werden verworfen.

use plauderei_core::event::{AnrufEreignis, Ton};
use plauderei_core::types::{CallId, ChatId};
use plauderei_protocol::{AusgehenderFrame, IceKandidat, SignalFrame};
use std::time::Duration;

use super::{AnrufEffekt, AnrufEingabe, AnrufKontext, AnrufZustand, Rolle};
use crate::ledger::GesehenLedger;
use crate::medien::{MedienAuftrag, MedienVerbindungsZustand};

/// Wie viele angenommene bzw. beendete Anruf-IDs gemerkt werden
const ANGENOMMENE_KAPAZITAET: usize = 64;
const BEENDETE_KAPAZITAET: usize = 64;

const GRUND_AUFGELEGT: &str = "aufgelegt";
const GRUND_GEGENUEBER: &str = "vom Gegenueber beendet";
const GRUND_MEDIEN: &str = "medienfehler";

/// Zustandsautomat fuer den Anruf einer Sitzung
#[derive(Debug)]
pub struct AnrufMaschine {
    zustand: AnrufZustand,
    kontext: Option<AnrufKontext>,
    angenommene: GesehenLedger<CallId>,
    beendete: GesehenLedger<CallId>,
    generation: u64,
    setup_timeout: Option<Duration>,
}

impl AnrufMaschine {
    /// Erstellt die Maschine im Leerlauf
    ///
    /// `setup_timeout` begrenzt Ausgehend/Eingehend, `None` schaltet das ab.
    pub fn neu(setup_timeout: Option<Duration>) -> Self {
        Self {
            zustand: AnrufZustand::Leerlauf,
            kontext: None,
            angenommene: GesehenLedger::neu(ANGENOMMENE_KAPAZITAET),
            beendete: GesehenLedger::neu(BEENDETE_KAPAZITAET),
            generation: 0,
            setup_timeout: setup_timeout.filter(|d| !d.is_zero()),
        }
    }

    pub fn zustand(&self) -> AnrufZustand {
        self.zustand
    }

    pub fn kontext(&self) -> Option<&AnrufKontext> {
        self.kontext.as_ref()
    }

    /// Verarbeitet eine Eingabe und liefert die auszufuehrenden Effekte
    pub fn verarbeiten(&mut self, eingabe: AnrufEingabe) -> Vec<AnrufEffekt> {
        tracing::trace!(art = eingabe.art(), zustand = %self.zustand, "Anruf-Eingabe");

        match eingabe {
            AnrufEingabe::Starten { chat_id } => self.starten(chat_id),
            AnrufEingabe::Annehmen => self.annehmen(),
            AnrufEingabe::Ablehnen => self.ablehnen(),
            AnrufEingabe::Auflegen => self.auflegen(),

            AnrufEingabe::Eingehend {
                chat_id,
                von,
                call_id,
            } => self.eingehend(chat_id, von, call_id),
            AnrufEingabe::Klingelt { chat_id, call_id } => self.klingelt(chat_id, call_id),
            AnrufEingabe::Angenommen {
                chat_id,
                call_id,
                von,
            } => self.angenommen(chat_id, call_id, von),
            AnrufEingabe::Abgelehnt { chat_id, call_id } => {
                self.remote_ende(chat_id, call_id.as_ref(), true)
            }
            AnrufEingabe::Beendet { chat_id, call_id } => {
                self.remote_ende(chat_id, call_id.as_ref(), false)
            }

            AnrufEingabe::GegenueberBeigetreten { von } => self.gegenueber_beigetreten(von),
            AnrufEingabe::AngebotEmpfangen { chat_id, sdp } => self.angebot_empfangen(chat_id, sdp),
            AnrufEingabe::AntwortEmpfangen { chat_id, sdp } => self.antwort_empfangen(chat_id, sdp),
            AnrufEingabe::KandidatEmpfangen { chat_id, kandidat } => {
                self.kandidat_empfangen(chat_id, kandidat)
            }
            AnrufEingabe::GegenueberVerlassen { chat_id, grund } => {
                self.gegenueber_verlassen(chat_id, grund)
            }

            AnrufEingabe::MedienBereit { generation } => self.medien_bereit(generation),
            AnrufEingabe::LokalesAngebot { generation, sdp } => {
                self.signal_fuer(generation, |chat_id| SignalFrame::Offer { chat_id, sdp })
            }
            AnrufEingabe::LokaleAntwort { generation, sdp } => {
                self.signal_fuer(generation, |chat_id| SignalFrame::Answer { chat_id, sdp })
            }
            AnrufEingabe::LokalerKandidat {
                generation,
                kandidat,
            } => self.signal_fuer(generation, |chat_id| SignalFrame::IceCandidate {
                chat_id,
                candidate: kandidat,
            }),
            AnrufEingabe::MedienZustand {
                generation,
                zustand,
            } => self.medien_zustand(generation, zustand),
            AnrufEingabe::SpurEmpfangen {
                generation,
                spur_id,
            } => match self.aktiver_kontext(generation) {
                Some(_) => vec![AnrufEffekt::Melden(AnrufEreignis::SpurEmpfangen { spur_id })],
                None => Vec::new(),
            },
            AnrufEingabe::MedienFehlgeschlagen { generation, grund } => {
                self.medien_fehlgeschlagen(generation, grund)
            }

            AnrufEingabe::SetupZeitueberschreitung { generation } => {
                self.setup_zeitueberschreitung(generation)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lokale Aktionen
    // -----------------------------------------------------------------------

    fn starten(&mut self, chat_id: ChatId) -> Vec<AnrufEffekt> {
        if self.zustand != AnrufZustand::Leerlauf {
            tracing::debug!(%chat_id, zustand = %self.zustand, "Anruf laeuft bereits, Start ignoriert");
            return Vec::new();
        }

        let generation = self.naechste_generation();
        self.kontext = Some(AnrufKontext::neu(chat_id, Rolle::Anrufer, generation));
        self.zustand = AnrufZustand::Ausgehend;
        tracing::info!(%chat_id, "Ausgehender Anruf");

        let mut effekte = vec![
            AnrufEffekt::Global(AusgehenderFrame::CallInvite { chat_id }),
            AnrufEffekt::Melden(AnrufEreignis::TonStarten {
                ton: Ton::Freizeichen,
            }),
            AnrufEffekt::Melden(AnrufEreignis::Ausgehend { chat_id }),
        ];
        self.setup_timer_stellen(&mut effekte, generation);
        effekte
    }

    fn annehmen(&mut self) -> Vec<AnrufEffekt> {
        if self.zustand != AnrufZustand::Eingehend {
            tracing::debug!(zustand = %self.zustand, "Kein eingehender Anruf zum Annehmen");
            return Vec::new();
        }
        let Some(ctx) = self.kontext.as_mut() else {
            return Vec::new();
        };

        ctx.beitritt_bereit = true;
        let chat_id = ctx.chat_id;
        let generation = ctx.generation;
        let call_id = ctx.call_id.clone();
        self.zustand = AnrufZustand::ImGespraech;

        let mut effekte = vec![
            AnrufEffekt::SetupTimerAbbrechen,
            AnrufEffekt::Melden(AnrufEreignis::TonStoppen),
        ];
        if let Some(call_id) = call_id {
            // Echo der eigenen Annahme ist danach ein No-op
            self.angenommene.pruefen_und_merken(&call_id);
            effekte.push(AnrufEffekt::Global(AusgehenderFrame::CallAccept {
                chat_id,
                call_id,
            }));
        }
        tracing::info!(%chat_id, "Anruf angenommen");
        effekte.extend([
            AnrufEffekt::Melden(AnrufEreignis::Verbunden { chat_id }),
            AnrufEffekt::AnrufkanalOeffnen { chat_id },
            AnrufEffekt::Medien(MedienAuftrag::Anlegen { generation }),
        ]);
        effekte
    }

    fn ablehnen(&mut self) -> Vec<AnrufEffekt> {
        if self.zustand != AnrufZustand::Eingehend {
            tracing::debug!(zustand = %self.zustand, "Kein eingehender Anruf zum Ablehnen");
            return Vec::new();
        }
        let Some(ctx) = self.zuruecksetzen() else {
            return Vec::new();
        };

        let mut effekte = vec![
            AnrufEffekt::SetupTimerAbbrechen,
            AnrufEffekt::Melden(AnrufEreignis::TonStoppen),
        ];
        if let Some(call_id) = ctx.call_id {
            effekte.push(AnrufEffekt::Global(AusgehenderFrame::CallDecline {
                chat_id: ctx.chat_id,
                call_id,
            }));
        }
        effekte.push(AnrufEffekt::Melden(AnrufEreignis::Abgelehnt {
            chat_id: ctx.chat_id,
        }));
        effekte
    }

    fn auflegen(&mut self) -> Vec<AnrufEffekt> {
        match self.zustand {
            AnrufZustand::Leerlauf => Vec::new(),
            AnrufZustand::Eingehend => self.ablehnen(),
            AnrufZustand::Ausgehend => {
                let Some(ctx) = self.zuruecksetzen() else {
                    return Vec::new();
                };
                vec![
                    AnrufEffekt::SetupTimerAbbrechen,
                    AnrufEffekt::Melden(AnrufEreignis::TonStoppen),
                    AnrufEffekt::Global(AusgehenderFrame::CallEnd {
                        chat_id: ctx.chat_id,
                        call_id: ctx.call_id,
                    }),
                    AnrufEffekt::Melden(AnrufEreignis::Beendet {
                        chat_id: ctx.chat_id,
                        grund: GRUND_AUFGELEGT.into(),
                    }),
                ]
            }
            AnrufZustand::ImGespraech => self.gespraech_beenden(GRUND_AUFGELEGT, true, true),
        }
    }

    // -----------------------------------------------------------------------
    // Globaler Kanal
    // -----------------------------------------------------------------------

    fn eingehend(&mut self, chat_id: ChatId, von: String, call_id: CallId) -> Vec<AnrufEffekt> {
        if self.zustand != AnrufZustand::Leerlauf {
            tracing::debug!(
                %chat_id,
                %call_id,
                zustand = %self.zustand,
                "Eingehender Anruf waehrend aktivem Anruf ignoriert"
            );
            return Vec::new();
        }
        if self.veraltet(&call_id) {
            tracing::debug!(%call_id, "Eingehender Anruf bereits erledigt, ignoriert");
            return Vec::new();
        }

        let generation = self.naechste_generation();
        let mut ctx = AnrufKontext::neu(chat_id, Rolle::Angerufener, generation);
        ctx.gegenueber = Some(von.clone());
        ctx.call_id = Some(call_id.clone());
        self.kontext = Some(ctx);
        self.zustand = AnrufZustand::Eingehend;
        tracing::info!(%chat_id, %call_id, von = %von, "Eingehender Anruf");

        let mut effekte = vec![
            AnrufEffekt::Melden(AnrufEreignis::TonStarten {
                ton: Ton::Klingelton,
            }),
            AnrufEffekt::Melden(AnrufEreignis::Eingehend {
                chat_id,
                von,
                call_id,
            }),
        ];
        self.setup_timer_stellen(&mut effekte, generation);
        effekte
    }

    fn klingelt(&mut self, chat_id: ChatId, call_id: CallId) -> Vec<AnrufEffekt> {
        if self.zustand != AnrufZustand::Ausgehend {
            return Vec::new();
        }
        if let Some(ctx) = self.kontext.as_mut().filter(|c| c.chat_id == chat_id) {
            if ctx.call_id.is_none() {
                if self.beendete.enthaelt(&call_id) || self.angenommene.enthaelt(&call_id) {
                    tracing::debug!(%call_id, "Klingeln eines beendeten Anrufs ignoriert");
                    return Vec::new();
                }
                tracing::debug!(%chat_id, %call_id, "call_id vom Klingeln uebernommen");
                ctx.call_id = Some(call_id);
            } else if ctx.call_id.as_ref() != Some(&call_id) {
                tracing::debug!(%call_id, "Klingeln eines fremden Anrufs ignoriert");
            }
        }
        Vec::new()
    }

    fn angenommen(
        &mut self,
        chat_id: ChatId,
        call_id: CallId,
        von: Option<String>,
    ) -> Vec<AnrufEffekt> {
        if !self.korreliert(chat_id, Some(&call_id)) {
            tracing::debug!(%chat_id, %call_id, "Annahme eines fremden Anrufs ignoriert");
            return Vec::new();
        }
        if self.angenommene.enthaelt(&call_id) {
            tracing::debug!(%call_id, "Annahme bereits verarbeitet");
            return Vec::new();
        }

        match self.zustand {
            AnrufZustand::Ausgehend => {
                let Some(ctx) = self.kontext.as_mut() else {
                    return Vec::new();
                };
                self.angenommene.pruefen_und_merken(&call_id);
                ctx.call_id = Some(call_id.clone());
                if von.is_some() {
                    ctx.gegenueber = von;
                }
                ctx.beitritt_bereit = true;
                let generation = ctx.generation;
                self.zustand = AnrufZustand::ImGespraech;
                tracing::info!(%chat_id, %call_id, "Anruf angenommen vom Gegenueber");

                vec![
                    AnrufEffekt::SetupTimerAbbrechen,
                    AnrufEffekt::Melden(AnrufEreignis::TonStoppen),
                    AnrufEffekt::Melden(AnrufEreignis::Verbunden { chat_id }),
                    AnrufEffekt::AnrufkanalOeffnen { chat_id },
                    AnrufEffekt::Medien(MedienAuftrag::Anlegen { generation }),
                ]
            }
            AnrufZustand::Eingehend => {
                // Auf einem anderen Geraet desselben Benutzers angenommen
                self.angenommene.pruefen_und_merken(&call_id);
                self.zuruecksetzen();
                vec![
                    AnrufEffekt::SetupTimerAbbrechen,
                    AnrufEffekt::Melden(AnrufEreignis::TonStoppen),
                    AnrufEffekt::Melden(AnrufEreignis::Beendet {
                        chat_id,
                        grund: "anderswo angenommen".into(),
                    }),
                ]
            }
            AnrufZustand::ImGespraech | AnrufZustand::Leerlauf => Vec::new(),
        }
    }

    fn remote_ende(
        &mut self,
        chat_id: ChatId,
        call_id: Option<&CallId>,
        abgelehnt: bool,
    ) -> Vec<AnrufEffekt> {
        if !self.korreliert(chat_id, call_id) {
            tracing::debug!(%chat_id, ?call_id, "Ende eines fremden Anrufs ignoriert");
            return Vec::new();
        }

        match self.zustand {
            AnrufZustand::Leerlauf => Vec::new(),
            AnrufZustand::Eingehend | AnrufZustand::Ausgehend => {
                self.zuruecksetzen();
                let meldung = if abgelehnt {
                    AnrufEreignis::Abgelehnt { chat_id }
                } else {
                    AnrufEreignis::Beendet {
                        chat_id,
                        grund: GRUND_GEGENUEBER.into(),
                    }
                };
                vec![
                    AnrufEffekt::SetupTimerAbbrechen,
                    AnrufEffekt::Melden(AnrufEreignis::TonStoppen),
                    AnrufEffekt::Melden(meldung),
                ]
            }
            AnrufZustand::ImGespraech => self.gespraech_beenden(GRUND_GEGENUEBER, true, false),
        }
    }

    // -----------------------------------------------------------------------
    // Anrufkanal
    // -----------------------------------------------------------------------

    fn gegenueber_beigetreten(&mut self, von: String) -> Vec<AnrufEffekt> {
        if self.zustand != AnrufZustand::ImGespraech {
            return Vec::new();
        }
        if let Some(ctx) = self.kontext.as_mut() {
            ctx.gegenueber.get_or_insert_with(|| von.clone());
        }
        vec![AnrufEffekt::Melden(AnrufEreignis::GegenueberBeigetreten {
            von,
        })]
    }

    fn angebot_empfangen(&mut self, chat_id: ChatId, sdp: String) -> Vec<AnrufEffekt> {
        let Some(ctx) = self.kontext.as_mut().filter(|c| c.chat_id == chat_id) else {
            tracing::debug!(%chat_id, "Angebot ohne passenden Anruf verworfen");
            return Vec::new();
        };
        if ctx.rolle == Rolle::Anrufer {
            tracing::debug!(%chat_id, "Angebot als Anrufer ignoriert");
            return Vec::new();
        }
        if ctx.verhandelt {
            tracing::debug!(%chat_id, "Weiteres Angebot nach Verhandlung ignoriert");
            return Vec::new();
        }

        if ctx.beitritt_bereit && ctx.medien_bereit {
            ctx.verhandelt = true;
            return vec![AnrufEffekt::Medien(MedienAuftrag::AntwortErstellen {
                generation: ctx.generation,
                angebot: sdp,
            })];
        }
        if ctx.ausstehendes_angebot.replace(sdp).is_some() {
            tracing::debug!(%chat_id, "Gepuffertes Angebot ersetzt");
        } else {
            tracing::debug!(%chat_id, "Angebot gepuffert bis zum Beitritt");
        }
        Vec::new()
    }

    fn antwort_empfangen(&mut self, chat_id: ChatId, sdp: String) -> Vec<AnrufEffekt> {
        let ist_im_gespraech = self.zustand == AnrufZustand::ImGespraech;
        let Some(ctx) = self.kontext.as_mut().filter(|c| c.chat_id == chat_id) else {
            return Vec::new();
        };
        if !ist_im_gespraech || ctx.rolle != Rolle::Anrufer || !ctx.medien_bereit || ctx.verhandelt
        {
            tracing::debug!(%chat_id, "Unerwartete Antwort verworfen");
            return Vec::new();
        }
        ctx.verhandelt = true;
        vec![AnrufEffekt::Medien(MedienAuftrag::AntwortSetzen {
            generation: ctx.generation,
            sdp,
        })]
    }

    fn kandidat_empfangen(&mut self, chat_id: ChatId, kandidat: IceKandidat) -> Vec<AnrufEffekt> {
        let bereit = self.zustand == AnrufZustand::ImGespraech;
        match self.kontext.as_ref() {
            Some(ctx) if bereit && ctx.chat_id == chat_id && ctx.medien_bereit => {
                vec![AnrufEffekt::Medien(MedienAuftrag::KandidatHinzufuegen {
                    generation: ctx.generation,
                    kandidat,
                })]
            }
            _ => {
                tracing::debug!(%chat_id, "ICE-Kandidat vor der Mediensitzung verworfen");
                Vec::new()
            }
        }
    }

    fn gegenueber_verlassen(&mut self, chat_id: ChatId, grund: Option<String>) -> Vec<AnrufEffekt> {
        let passt = self
            .kontext
            .as_ref()
            .map(|c| c.chat_id == chat_id)
            .unwrap_or(false);
        if self.zustand != AnrufZustand::ImGespraech || !passt {
            return Vec::new();
        }
        let grund = grund.unwrap_or_else(|| GRUND_GEGENUEBER.to_string());
        self.gespraech_beenden(&grund, false, false)
    }

    // -----------------------------------------------------------------------
    // Medien
    // -----------------------------------------------------------------------

    fn medien_bereit(&mut self, generation: u64) -> Vec<AnrufEffekt> {
        let Some(ctx) = self.aktiver_kontext(generation) else {
            return Vec::new();
        };
        ctx.medien_bereit = true;

        match ctx.rolle {
            Rolle::Anrufer => vec![AnrufEffekt::Medien(MedienAuftrag::AngebotErstellen {
                generation,
            })],
            Rolle::Angerufener => {
                if !ctx.beitritt_bereit {
                    return Vec::new();
                }
                match ctx.ausstehendes_angebot.take() {
                    Some(angebot) => {
                        ctx.verhandelt = true;
                        vec![AnrufEffekt::Medien(MedienAuftrag::AntwortErstellen {
                            generation,
                            angebot,
                        })]
                    }
                    None => {
                        tracing::debug!(chat_id = %ctx.chat_id, "Warte auf Angebot");
                        Vec::new()
                    }
                }
            }
        }
    }

    fn signal_fuer(
        &mut self,
        generation: u64,
        frame: impl FnOnce(ChatId) -> SignalFrame,
    ) -> Vec<AnrufEffekt> {
        match self.aktiver_kontext(generation) {
            Some(ctx) => vec![AnrufEffekt::Signal(frame(ctx.chat_id))],
            None => Vec::new(),
        }
    }

    fn medien_zustand(
        &mut self,
        generation: u64,
        zustand: MedienVerbindungsZustand,
    ) -> Vec<AnrufEffekt> {
        if self.aktiver_kontext(generation).is_none() {
            return Vec::new();
        }
        match zustand {
            MedienVerbindungsZustand::Verbunden => {
                vec![AnrufEffekt::Melden(AnrufEreignis::MedienVerbunden)]
            }
            MedienVerbindungsZustand::Unterbrochen => {
                vec![AnrufEffekt::Melden(AnrufEreignis::MedienUnterbrochen)]
            }
            MedienVerbindungsZustand::Fehlgeschlagen => {
                self.medien_fehlgeschlagen(generation, "Peer-Verbindung fehlgeschlagen".into())
            }
            MedienVerbindungsZustand::Geschlossen => Vec::new(),
        }
    }

    fn medien_fehlgeschlagen(&mut self, generation: u64, grund: String) -> Vec<AnrufEffekt> {
        if self.aktiver_kontext(generation).is_none() {
            tracing::debug!(generation, "Medienfehler eines beendeten Anrufs ignoriert");
            return Vec::new();
        }
        tracing::warn!(generation, grund = %grund, "Medienfehler, Anruf wird beendet");
        let mut effekte = vec![AnrufEffekt::Melden(AnrufEreignis::Fehler { grund })];
        effekte.extend(self.gespraech_beenden(GRUND_MEDIEN, true, true));
        effekte
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    fn setup_zeitueberschreitung(&mut self, generation: u64) -> Vec<AnrufEffekt> {
        let vorher = self.zustand;
        let im_aufbau = matches!(vorher, AnrufZustand::Ausgehend | AnrufZustand::Eingehend);
        if !im_aufbau || self.aktiver_kontext(generation).is_none() {
            tracing::debug!(generation, zustand = %vorher, "Veralteter Setup-Timer ignoriert");
            return Vec::new();
        }
        let Some(ctx) = self.zuruecksetzen() else {
            return Vec::new();
        };
        tracing::info!(chat_id = %ctx.chat_id, zustand = %vorher, "Anrufaufbau abgelaufen");

        let frame = match (vorher, ctx.call_id) {
            (AnrufZustand::Eingehend, Some(call_id)) => AusgehenderFrame::CallDecline {
                chat_id: ctx.chat_id,
                call_id,
            },
            (_, call_id) => AusgehenderFrame::CallEnd {
                chat_id: ctx.chat_id,
                call_id,
            },
        };
        vec![
            AnrufEffekt::Global(frame),
            AnrufEffekt::Melden(AnrufEreignis::TonStoppen),
            AnrufEffekt::Melden(AnrufEreignis::Zeitueberschreitung {
                chat_id: ctx.chat_id,
            }),
        ]
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    fn naechste_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn setup_timer_stellen(&self, effekte: &mut Vec<AnrufEffekt>, generation: u64) {
        if let Some(dauer) = self.setup_timeout {
            effekte.push(AnrufEffekt::SetupTimerStellen { generation, dauer });
        }
    }

    /// Kontext zurueck auf Leerlauf, liefert den alten Kontext
    ///
    /// Die `call_id` des alten Anrufs gilt ab hier als beendet.
    fn zuruecksetzen(&mut self) -> Option<AnrufKontext> {
        self.zustand = AnrufZustand::Leerlauf;
        let ctx = self.kontext.take();
        if let Some(call_id) = ctx.as_ref().and_then(|c| c.call_id.as_ref()) {
            self.beendete.pruefen_und_merken(call_id);
        }
        ctx
    }

    /// Gehoert die ID zu einem bereits angenommenen oder beendeten Anruf
    fn veraltet(&self, call_id: &CallId) -> bool {
        self.angenommene.enthaelt(call_id) || self.beendete.enthaelt(call_id)
    }

    /// Passt ein Server-Frame zum aktiven Anruf
    fn korreliert(&self, chat_id: ChatId, call_id: Option<&CallId>) -> bool {
        let Some(ctx) = &self.kontext else {
            return false;
        };
        if ctx.chat_id != chat_id {
            return false;
        }
        match (&ctx.call_id, call_id) {
            (Some(aktiv), Some(neu)) => aktiv == neu,
            // Noch ohne eigene ID: nur unverbrauchte IDs uebernehmen
            (None, Some(neu)) => !self.veraltet(neu),
            (_, None) => true,
        }
    }

    fn aktiver_kontext(&mut self, generation: u64) -> Option<&mut AnrufKontext> {
        self.kontext.as_mut().filter(|c| c.generation == generation)
    }

    /// Laufendes Gespraech abbauen
    fn gespraech_beenden(&mut self, grund: &str, leave: bool, call_end: bool) -> Vec<AnrufEffekt> {
        let Some(ctx) = self.zuruecksetzen() else {
            return Vec::new();
        };
        tracing::info!(chat_id = %ctx.chat_id, grund, "Gespraech beendet");

        let mut effekte = Vec::with_capacity(5);
        if leave {
            effekte.push(AnrufEffekt::Signal(SignalFrame::Leave {
                chat_id: ctx.chat_id,
                reason: Some(grund.to_string()),
            }));
        }
        if call_end {
            effekte.push(AnrufEffekt::Global(AusgehenderFrame::CallEnd {
                chat_id: ctx.chat_id,
                call_id: ctx.call_id,
            }));
        }
        effekte.extend([
            AnrufEffekt::AnrufkanalSchliessen,
            AnrufEffekt::Medien(MedienAuftrag::Schliessen {
                generation: ctx.generation,
            }),
            AnrufEffekt::Melden(AnrufEreignis::Beendet {
                chat_id: ctx.chat_id,
                grund: grund.to_string(),
            }),
        ]);
        effekte
    }
}

impl Default for AnrufMaschine {
    fn default() -> Self {
        Self::neu(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
