//! Anruf-Signalisierung – Zustaende, Eingaben und Effekte
//!
//! ## State Machine
//! ```text
//! Leerlauf --Starten--------> Ausgehend --Angenommen(A)--> ImGespraech
//! Leerlauf --Eingehend(C)---> Eingehend --Annehmen-------> ImGespraech
//! Eingehend/Ausgehend --Abgelehnt/Beendet/Timeout--------> Leerlauf
//! ImGespraech --Auflegen/Beendet/Medienfehler------------> Leerlauf
//! ```
//!
//! Lokale Aktionen, Server-Frames beider Kanaele, Ergebnisse des
//! Medien-Workers und Timer sind gleichberechtigte `AnrufEingabe`n. Jede
//! Eingabe liefert eine Liste von `AnrufEffekt`en, die der Sitzungs-Loop
//! ausfuehrt.

mod maschine;

pub use maschine::AnrufMaschine;

use plauderei_core::event::AnrufEreignis;
use plauderei_core::types::{CallId, ChatId};
use plauderei_protocol::{AusgehenderFrame, IceKandidat, SignalFrame};
use std::time::Duration;

use crate::medien::{MedienAuftrag, MedienVerbindungsZustand};

// ---------------------------------------------------------------------------
// Zustand & Kontext
// ---------------------------------------------------------------------------

/// Zustand des (einzigen) Anrufs einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrufZustand {
    Leerlauf,
    Eingehend,
    Ausgehend,
    ImGespraech,
}

impl AnrufZustand {
    /// Label fuer Metriken und Logs
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Leerlauf => "leerlauf",
            Self::Eingehend => "eingehend",
            Self::Ausgehend => "ausgehend",
            Self::ImGespraech => "im_gespraech",
        }
    }
}

impl std::fmt::Display for AnrufZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Wer hat den Anruf begonnen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rolle {
    /// Lokal gestartet, erstellt das Angebot
    Anrufer,
    /// Von aussen angerufen, beantwortet das Angebot
    Angerufener,
}

/// Kontext des aktiven Anrufs, existiert genau ausserhalb von `Leerlauf`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnrufKontext {
    pub chat_id: ChatId,
    pub rolle: Rolle,
    pub gegenueber: Option<String>,
    /// Beim lokalen Start unbekannt, wird vom ersten passenden Server-Frame uebernommen
    pub call_id: Option<CallId>,
    /// Generation fuer Medien-Rueckmeldungen und Setup-Timer
    pub generation: u64,
    /// Lokale Mediensitzung angelegt und bereit
    pub medien_bereit: bool,
    /// Lokaler Beitritt scharf geschaltet (angenommen bzw. verbunden)
    pub beitritt_bereit: bool,
    /// Gepuffertes Remote-Angebot (PendingOffer)
    pub ausstehendes_angebot: Option<String>,
    /// Remote-Beschreibung ist gesetzt
    pub verhandelt: bool,
}

impl AnrufKontext {
    fn neu(chat_id: ChatId, rolle: Rolle, generation: u64) -> Self {
        Self {
            chat_id,
            rolle,
            gegenueber: None,
            call_id: None,
            generation,
            medien_bereit: false,
            beitritt_bereit: false,
            ausstehendes_angebot: None,
            verhandelt: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Eingaben
// ---------------------------------------------------------------------------

/// Alle Eingaben der Anruf-State-Machine
#[derive(Debug, Clone, PartialEq)]
pub enum AnrufEingabe {
    // --- Lokale Aktionen ---
    Starten { chat_id: ChatId },
    Annehmen,
    Ablehnen,
    Auflegen,

    // --- Globaler Kanal ---
    Eingehend {
        chat_id: ChatId,
        von: String,
        call_id: CallId,
    },
    Klingelt {
        chat_id: ChatId,
        call_id: CallId,
    },
    Angenommen {
        chat_id: ChatId,
        call_id: CallId,
        von: Option<String>,
    },
    Abgelehnt {
        chat_id: ChatId,
        call_id: Option<CallId>,
    },
    Beendet {
        chat_id: ChatId,
        call_id: Option<CallId>,
    },

    // --- Anrufkanal ---
    GegenueberBeigetreten { von: String },
    AngebotEmpfangen { chat_id: ChatId, sdp: String },
    AntwortEmpfangen { chat_id: ChatId, sdp: String },
    KandidatEmpfangen {
        chat_id: ChatId,
        kandidat: IceKandidat,
    },
    GegenueberVerlassen {
        chat_id: ChatId,
        grund: Option<String>,
    },

    // --- Medien-Worker ---
    MedienBereit { generation: u64 },
    LokalesAngebot { generation: u64, sdp: String },
    LokaleAntwort { generation: u64, sdp: String },
    LokalerKandidat {
        generation: u64,
        kandidat: IceKandidat,
    },
    MedienZustand {
        generation: u64,
        zustand: MedienVerbindungsZustand,
    },
    SpurEmpfangen { generation: u64, spur_id: String },
    MedienFehlgeschlagen { generation: u64, grund: String },

    // --- Timer ---
    SetupZeitueberschreitung { generation: u64 },
}

impl AnrufEingabe {
    /// Kurzname fuer Logs
    pub fn art(&self) -> &'static str {
        match self {
            Self::Starten { .. } => "starten",
            Self::Annehmen => "annehmen",
            Self::Ablehnen => "ablehnen",
            Self::Auflegen => "auflegen",
            Self::Eingehend { .. } => "eingehend",
            Self::Klingelt { .. } => "klingelt",
            Self::Angenommen { .. } => "angenommen",
            Self::Abgelehnt { .. } => "abgelehnt",
            Self::Beendet { .. } => "beendet",
            Self::GegenueberBeigetreten { .. } => "gegenueber_beigetreten",
            Self::AngebotEmpfangen { .. } => "angebot",
            Self::AntwortEmpfangen { .. } => "antwort",
            Self::KandidatEmpfangen { .. } => "kandidat",
            Self::GegenueberVerlassen { .. } => "gegenueber_verlassen",
            Self::MedienBereit { .. } => "medien_bereit",
            Self::LokalesAngebot { .. } => "lokales_angebot",
            Self::LokaleAntwort { .. } => "lokale_antwort",
            Self::LokalerKandidat { .. } => "lokaler_kandidat",
            Self::MedienZustand { .. } => "medien_zustand",
            Self::SpurEmpfangen { .. } => "spur",
            Self::MedienFehlgeschlagen { .. } => "medien_fehler",
            Self::SetupZeitueberschreitung { .. } => "setup_timeout",
        }
    }
}

// ---------------------------------------------------------------------------
// Effekte
// ---------------------------------------------------------------------------

/// Seiteneffekte, die der Sitzungs-Loop ausfuehrt
#[derive(Debug, Clone, PartialEq)]
pub enum AnrufEffekt {
    /// Frame auf dem globalen Kanal senden
    Global(AusgehenderFrame),
    /// Anrufkanal fuer den Chat oeffnen
    AnrufkanalOeffnen { chat_id: ChatId },
    /// Signal ueber den Anrufkanal (wird bis zum Oeffnen gepuffert)
    Signal(SignalFrame),
    /// Anrufkanal nach dem Flush schliessen
    AnrufkanalSchliessen,
    /// Auftrag an den Medien-Worker
    Medien(MedienAuftrag),
    SetupTimerStellen { generation: u64, dauer: Duration },
    SetupTimerAbbrechen,
    /// Ereignis an die Konsumenten
    Melden(AnrufEreignis),
}
