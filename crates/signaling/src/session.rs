//! Sitzung – Event-Loop einer Benutzer-Sitzung
//!
//! Ein einzelner tokio-Task besitzt den gesamten Zustand: globalen Kanal,
//! Anrufkanal, Anruf-State-Machine und Router. Alle Eingaben (Befehle der
//! Oberflaeche, Socket-Meldungen, Medien-Rueckmeldungen, Timer) kommen ueber
//! mpsc-Kanaele an und werden nacheinander verarbeitet. Dadurch braucht der
//! Zustand keine Locks.
//!
//! ```text
//! SitzungsHandle --Befehl--> +-----------------+ --SitzungsEreignis--> Konsument
//! Socket-Tasks --Meldung---> |  Sitzungs-Loop  |
//! Medien-Worker --Eingabe--> |  (ein Task)     | --MedienAuftrag--> Medien-Worker
//! Timer --------Intern-----> +-----------------+
//! ```

use plauderei_core::event::{KanalArt, SitzungsEreignis};
use plauderei_core::types::ChatId;
use plauderei_observability::SitzungsMetriken;
use plauderei_protocol::AusgehenderFrame;
use plauderei_transport::{
    socket_starten, AnrufKanal, BackoffKonfig, GlobalKanal, SocketMeldung, TransportFehler,
    Verbinder, Verbindung, VerbindungsEffekt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::anruf::{AnrufEffekt, AnrufEingabe, AnrufMaschine, AnrufZustand};
use crate::auth::{AuthFehler, AuthSchritt, TokenAuffrischer, TokenVerwaltung};
use crate::dispatcher::{EreignisRouter, Weiterleitung};
use crate::error::{SignalingFehler, SignalingResult};
use crate::ledger::STANDARD_KAPAZITAET;
use crate::medien::{medien_worker_starten, MedienAuftrag, MedienFabrik};
use crate::presence::PresenzCache;

/// Standard-Timeout fuer den Anrufaufbau
pub const STANDARD_SETUP_TIMEOUT: Duration = Duration::from_secs(45);

/// Intervall fuer das Aufraeumen abgelaufener Tipp-Indikatoren
const AUFRAEUMEN_INTERVALL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Parameter einer Sitzung
#[derive(Debug, Clone)]
pub struct SitzungsKonfig {
    /// URL des globalen Kanals
    pub server_url: Url,
    /// Basis-URL des Anrufkanals, erweitert um `/<chatID>/<username>`
    pub anruf_url: Url,
    pub username: String,
    pub token: Option<String>,
    pub backoff: BackoffKonfig,
    /// `None` schaltet den Setup-Timeout ab
    pub setup_timeout: Option<Duration>,
    pub dedup_kapazitaet: usize,
}

impl SitzungsKonfig {
    /// Konfiguration mit Standardwerten
    pub fn neu(server_url: Url, anruf_url: Url, username: impl Into<String>) -> Self {
        Self {
            server_url,
            anruf_url,
            username: username.into(),
            token: None,
            backoff: BackoffKonfig::default(),
            setup_timeout: Some(STANDARD_SETUP_TIMEOUT),
            dedup_kapazitaet: STANDARD_KAPAZITAET,
        }
    }
}

// ---------------------------------------------------------------------------
// Befehle & Handle
// ---------------------------------------------------------------------------

/// Befehle der Oberflaeche an die Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Befehl {
    ChatBetreten(ChatId),
    ChatVerlassen(ChatId),
    NachrichtSenden { chat_id: ChatId, text: String },
    Tippen(ChatId),
    AnrufStarten(ChatId),
    AnrufAnnehmen,
    AnrufAblehnen,
    Auflegen,
    /// Netzwerk des Hosts verfuegbar / weg
    NetzwerkGeaendert { online: bool },
    /// Oberflaeche sichtbar / verborgen
    SichtbarkeitGeaendert { sichtbar: bool },
    /// Resume-Trigger ohne Zustandswechsel (z.B. Fokus)
    Fortsetzen,
    /// Vom Benutzer gesetztes Token
    TokenSetzen(String),
    Beenden,
}

impl Befehl {
    /// Kurzname fuer Logs (ohne Nutzdaten)
    pub fn art(&self) -> &'static str {
        match self {
            Self::ChatBetreten(_) => "chat_betreten",
            Self::ChatVerlassen(_) => "chat_verlassen",
            Self::NachrichtSenden { .. } => "nachricht_senden",
            Self::Tippen(_) => "tippen",
            Self::AnrufStarten(_) => "anruf_starten",
            Self::AnrufAnnehmen => "anruf_annehmen",
            Self::AnrufAblehnen => "anruf_ablehnen",
            Self::Auflegen => "auflegen",
            Self::NetzwerkGeaendert { .. } => "netzwerk",
            Self::SichtbarkeitGeaendert { .. } => "sichtbarkeit",
            Self::Fortsetzen => "fortsetzen",
            Self::TokenSetzen(_) => "token_setzen",
            Self::Beenden => "beenden",
        }
    }
}

/// Handle zur laufenden Sitzung, beliebig klonbar
#[derive(Debug, Clone)]
pub struct SitzungsHandle {
    befehle: mpsc::UnboundedSender<Befehl>,
    presenz: PresenzCache,
}

impl SitzungsHandle {
    /// Befehl an den Sitzungs-Loop
    pub fn senden(&self, befehl: Befehl) -> SignalingResult<()> {
        self.befehle
            .send(befehl)
            .map_err(|_| SignalingFehler::SitzungBeendet)
    }

    /// Presence-Cache der Sitzung
    pub fn presenz(&self) -> &PresenzCache {
        &self.presenz
    }

    pub fn ist_beendet(&self) -> bool {
        self.befehle.is_closed()
    }
}

/// Ergebnis von [`Sitzung::starten`]
#[derive(Debug)]
pub struct GestarteteSitzung {
    pub handle: SitzungsHandle,
    pub ereignisse: mpsc::UnboundedReceiver<SitzungsEreignis>,
    pub task: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// Interne Typen
// ---------------------------------------------------------------------------

/// Timer- und Hintergrund-Ergebnisse
enum Intern {
    ReconnectFaellig { kanal: KanalArt, token: u64 },
    TokenAufgefrischt(Result<String, AuthFehler>),
}

/// Laufzeitzustand eines physischen Sockets
#[derive(Default)]
struct SocketSlot {
    /// Generation des aktuellen Sockets, aeltere Meldungen werden verworfen
    generation: u64,
    sender: Option<mpsc::UnboundedSender<String>>,
    /// Offen-Zustand wie zuletzt an Konsumenten gemeldet
    gemeldet_offen: bool,
    reconnect: Option<(u64, JoinHandle<()>)>,
}

impl SocketSlot {
    fn reconnect_abbrechen(&mut self) {
        if let Some((_, handle)) = self.reconnect.take() {
            handle.abort();
        }
    }
}

struct Empfaenger {
    befehle: mpsc::UnboundedReceiver<Befehl>,
    sockets: mpsc::UnboundedReceiver<SocketMeldung>,
    anruf: mpsc::UnboundedReceiver<AnrufEingabe>,
    intern: mpsc::UnboundedReceiver<Intern>,
}

// ---------------------------------------------------------------------------
// Sitzung
// ---------------------------------------------------------------------------

/// Zustand des Sitzungs-Loops
pub struct Sitzung {
    konfig: SitzungsKonfig,
    verbinder: Arc<dyn Verbinder>,

    global: GlobalKanal,
    global_slot: SocketSlot,
    anruf_kanal: Option<AnrufKanal>,
    anruf_slot: SocketSlot,
    generationen: u64,
    timer_token: u64,
    offline: bool,
    verborgen: bool,

    maschine: AnrufMaschine,
    router: EreignisRouter,
    auth: TokenVerwaltung,
    medien_tx: mpsc::UnboundedSender<MedienAuftrag>,
    medien_worker: JoinHandle<()>,
    setup_timer: Option<JoinHandle<()>>,
    metriken: Option<SitzungsMetriken>,

    ereignisse: mpsc::UnboundedSender<SitzungsEreignis>,
    socket_tx: mpsc::UnboundedSender<SocketMeldung>,
    anruf_tx: mpsc::UnboundedSender<AnrufEingabe>,
    intern_tx: mpsc::UnboundedSender<Intern>,
}

impl Sitzung {
    /// Startet den Sitzungs-Loop und baut den globalen Kanal auf
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn starten(
        konfig: SitzungsKonfig,
        verbinder: Arc<dyn Verbinder>,
        medien: Arc<dyn MedienFabrik>,
        auffrischer: Option<Arc<dyn TokenAuffrischer>>,
        metriken: Option<SitzungsMetriken>,
    ) -> SignalingResult<GestarteteSitzung> {
        if konfig.anruf_url.cannot_be_a_base() {
            return Err(TransportFehler::Url(format!(
                "{} kann keine Pfade tragen",
                konfig.anruf_url
            ))
            .into());
        }

        let (befehl_tx, befehl_rx) = mpsc::unbounded_channel();
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (anruf_tx, anruf_rx) = mpsc::unbounded_channel();
        let (intern_tx, intern_rx) = mpsc::unbounded_channel();

        let presenz = PresenzCache::neu();
        let (medien_tx, medien_worker) = medien_worker_starten(medien, anruf_tx.clone());

        let sitzung = Sitzung {
            global: GlobalKanal::neu(konfig.backoff, konfig.token.clone()),
            global_slot: SocketSlot::default(),
            anruf_kanal: None,
            anruf_slot: SocketSlot::default(),
            generationen: 0,
            timer_token: 0,
            offline: false,
            verborgen: false,
            maschine: AnrufMaschine::neu(konfig.setup_timeout),
            router: EreignisRouter::neu(konfig.dedup_kapazitaet, presenz.clone(), metriken.clone()),
            auth: TokenVerwaltung::neu(auffrischer),
            medien_tx,
            medien_worker,
            setup_timer: None,
            metriken,
            ereignisse: ereignis_tx,
            socket_tx,
            anruf_tx,
            intern_tx,
            verbinder,
            konfig,
        };
        let empfaenger = Empfaenger {
            befehle: befehl_rx,
            sockets: socket_rx,
            anruf: anruf_rx,
            intern: intern_rx,
        };
        let task = tokio::spawn(sitzung.ausfuehren(empfaenger));

        Ok(GestarteteSitzung {
            handle: SitzungsHandle {
                befehle: befehl_tx,
                presenz,
            },
            ereignisse: ereignis_rx,
            task,
        })
    }

    async fn ausfuehren(mut self, mut rx: Empfaenger) {
        tracing::info!(
            username = %self.konfig.username,
            server = %self.konfig.server_url,
            "Sitzung gestartet"
        );
        let effekte = self.global.verbindung_mut().verbinden();
        self.verbindungs_effekte(KanalArt::Global, effekte);

        let mut aufraeumen = tokio::time::interval(AUFRAEUMEN_INTERVALL);
        aufraeumen.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                befehl = rx.befehle.recv() => match befehl {
                    Some(Befehl::Beenden) | None => break,
                    Some(befehl) => self.befehl(befehl),
                },
                Some(meldung) = rx.sockets.recv() => self.socket_meldung(meldung),
                Some(eingabe) = rx.anruf.recv() => self.anruf_eingabe(eingabe),
                Some(intern) = rx.intern.recv() => self.intern(intern),
                _ = aufraeumen.tick() => self.router.presenz().aufraeumen(),
            }
        }

        self.herunterfahren().await;
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    fn befehl(&mut self, befehl: Befehl) {
        tracing::debug!(art = befehl.art(), "Befehl");
        match befehl {
            Befehl::ChatBetreten(chat_id) => self.global_senden(AusgehenderFrame::JoinChat { chat_id }),
            Befehl::ChatVerlassen(chat_id) => {
                self.global_senden(AusgehenderFrame::LeaveChat { chat_id })
            }
            Befehl::NachrichtSenden { chat_id, text } => {
                self.global_senden(AusgehenderFrame::PostMsg { chat_id, text })
            }
            Befehl::Tippen(chat_id) => self.global_senden(AusgehenderFrame::Typing { chat_id }),
            Befehl::AnrufStarten(chat_id) => self.anruf_eingabe(AnrufEingabe::Starten { chat_id }),
            Befehl::AnrufAnnehmen => self.anruf_eingabe(AnrufEingabe::Annehmen),
            Befehl::AnrufAblehnen => self.anruf_eingabe(AnrufEingabe::Ablehnen),
            Befehl::Auflegen => self.anruf_eingabe(AnrufEingabe::Auflegen),
            Befehl::NetzwerkGeaendert { online } => {
                self.offline = !online;
                self.beide_kanaele(|v| v.netzwerk_geaendert(online));
            }
            Befehl::SichtbarkeitGeaendert { sichtbar } => {
                self.verborgen = !sichtbar;
                self.beide_kanaele(|v| v.sichtbarkeit_geaendert(sichtbar));
            }
            Befehl::Fortsetzen => self.beide_kanaele(Verbindung::fortsetzen),
            Befehl::TokenSetzen(token) => {
                self.auth.zuruecksetzen();
                self.token_uebernehmen(token);
            }
            Befehl::Beenden => {}
        }
    }

    fn beide_kanaele(&mut self, mut f: impl FnMut(&mut Verbindung) -> Vec<VerbindungsEffekt>) {
        let effekte = f(self.global.verbindung_mut());
        self.verbindungs_effekte(KanalArt::Global, effekte);
        if let Some(kanal) = self.anruf_kanal.as_mut() {
            let effekte = f(kanal.verbindung_mut());
            self.verbindungs_effekte(KanalArt::Anruf, effekte);
        }
    }

    fn global_senden(&mut self, frame: AusgehenderFrame) {
        match self.global.senden(&frame) {
            Some(effekt) => self.verbindungs_effekte(KanalArt::Global, vec![effekt]),
            None => {
                if !self.global.verbindung().ist_offen() {
                    self.verworfen("nicht_offen");
                }
            }
        }
    }

    fn token_uebernehmen(&mut self, token: String) {
        self.konfig.token = Some(token.clone());
        if let Some(effekt) = self.global.token_setzen(token) {
            self.verbindungs_effekte(KanalArt::Global, vec![effekt]);
        }
    }

    // -----------------------------------------------------------------------
    // Verbindungs-Effekte & Sockets
    // -----------------------------------------------------------------------

    fn verbindungs_effekte(&mut self, kanal: KanalArt, effekte: Vec<VerbindungsEffekt>) {
        for effekt in effekte {
            match effekt {
                VerbindungsEffekt::SocketOeffnen => self.socket_oeffnen(kanal),
                VerbindungsEffekt::SocketSchliessen => {
                    // Drop des Senders: Socket flusht und schliesst
                    self.slot_mut(kanal).sender = None;
                    self.verbindung_melden(kanal, false);
                }
                VerbindungsEffekt::Senden(text) => self.socket_senden(kanal, text),
                VerbindungsEffekt::ReconnectPlanen(verzoegerung) => {
                    self.reconnect_planen(kanal, verzoegerung)
                }
                VerbindungsEffekt::ReconnectAbbrechen => self.slot_mut(kanal).reconnect_abbrechen(),
            }
        }
    }

    fn socket_oeffnen(&mut self, kanal: KanalArt) {
        let url = match kanal {
            KanalArt::Global => self.konfig.server_url.clone(),
            KanalArt::Anruf => {
                let Some(anruf) = &self.anruf_kanal else {
                    return;
                };
                match anruf.url(&self.konfig.anruf_url) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::error!(fehler = %e, "Anrufkanal-URL ungueltig");
                        return;
                    }
                }
            }
        };

        self.generationen += 1;
        let generation = self.generationen;
        let slot = self.slot_mut(kanal);
        slot.generation = generation;
        slot.sender = None;
        socket_starten(
            self.verbinder.clone(),
            url,
            kanal,
            generation,
            self.socket_tx.clone(),
        );
    }

    fn socket_senden(&mut self, kanal: KanalArt, text: String) {
        let gesendet = self
            .slot(kanal)
            .sender
            .as_ref()
            .map(|tx| tx.send(text).is_ok())
            .unwrap_or(false);
        if !gesendet {
            tracing::warn!(%kanal, "Kein Socket, Frame verworfen");
            self.verworfen("nicht_offen");
        }
    }

    fn reconnect_planen(&mut self, kanal: KanalArt, verzoegerung: Duration) {
        if let Some(m) = &self.metriken {
            m.reconnect_geplant(&kanal.to_string(), verzoegerung);
        }
        self.timer_token += 1;
        let token = self.timer_token;
        let tx = self.intern_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(verzoegerung).await;
            let _ = tx.send(Intern::ReconnectFaellig { kanal, token });
        });

        let slot = self.slot_mut(kanal);
        slot.reconnect_abbrechen();
        slot.reconnect = Some((token, handle));
    }

    fn socket_meldung(&mut self, meldung: SocketMeldung) {
        let kanal = meldung.kanal();
        if self.slot(kanal).generation != meldung.generation() {
            // Geoeffnet: der mitgelieferte Sender wird hier gedroppt
            tracing::debug!(
                %kanal,
                generation = meldung.generation(),
                "Meldung eines veralteten Sockets ignoriert"
            );
            return;
        }

        match meldung {
            SocketMeldung::Geoeffnet { sender, .. } => {
                self.slot_mut(kanal).sender = Some(sender);
                let effekte = match kanal {
                    KanalArt::Global => self.global.geoeffnet(),
                    KanalArt::Anruf => self
                        .anruf_kanal
                        .as_mut()
                        .map(AnrufKanal::geoeffnet)
                        .unwrap_or_default(),
                };
                let offen = self.kanal_offen(kanal);
                if offen {
                    self.verbindung_melden(kanal, true);
                }
                self.verbindungs_effekte(kanal, effekte);
                if !offen {
                    self.slot_mut(kanal).sender = None;
                }
            }
            SocketMeldung::Frame { text, .. } => {
                let weiterleitung = match kanal {
                    KanalArt::Global => self.router.global_frame(&text),
                    KanalArt::Anruf => self.router.anruf_frame(&text),
                };
                let ohne_auth_fehler = matches!(
                    &weiterleitung,
                    Some(w) if !matches!(w, Weiterleitung::AuthFehler(_))
                );
                if kanal == KanalArt::Global && ohne_auth_fehler && self.auth.server_akzeptiert() {
                    tracing::debug!("Aufgefrischtes Token akzeptiert");
                }
                if let Some(w) = weiterleitung {
                    self.weiterleiten(w);
                }
            }
            SocketMeldung::Geschlossen { grund, .. } => {
                self.slot_mut(kanal).sender = None;
                self.verbindung_melden(kanal, false);
                let effekte = match kanal {
                    KanalArt::Global => self.global.verbindung_mut().geschlossen(&grund),
                    KanalArt::Anruf => self
                        .anruf_kanal
                        .as_mut()
                        .map(|k| k.geschlossen(&grund))
                        .unwrap_or_default(),
                };
                self.verbindungs_effekte(kanal, effekte);
            }
        }
    }

    fn weiterleiten(&mut self, weiterleitung: Weiterleitung) {
        match weiterleitung {
            Weiterleitung::Ereignis(ereignis) => self.melden(ereignis),
            Weiterleitung::Anruf(eingabe) => self.anruf_eingabe(eingabe),
            Weiterleitung::AuthFehler(grund) => self.auth_fehler(grund),
        }
    }

    // -----------------------------------------------------------------------
    // Anruf
    // -----------------------------------------------------------------------

    fn anruf_eingabe(&mut self, eingabe: AnrufEingabe) {
        let vorher = self.maschine.zustand();
        let effekte = self.maschine.verarbeiten(eingabe);
        let nachher = self.maschine.zustand();
        if vorher != nachher {
            tracing::debug!(von = %vorher, nach = %nachher, "Anrufzustand gewechselt");
            if let Some(m) = &self.metriken {
                m.anruf_uebergang(nachher.als_str());
            }
        }
        for effekt in effekte {
            self.anruf_effekt(effekt);
        }
    }

    fn anruf_effekt(&mut self, effekt: AnrufEffekt) {
        match effekt {
            AnrufEffekt::Global(frame) => self.global_senden(frame),
            AnrufEffekt::AnrufkanalOeffnen { chat_id } => self.anrufkanal_oeffnen(chat_id),
            AnrufEffekt::Signal(frame) => match self.anruf_kanal.as_mut() {
                Some(kanal) => {
                    let effekte = kanal.senden(&frame);
                    self.verbindungs_effekte(KanalArt::Anruf, effekte);
                }
                None => {
                    tracing::warn!(art = frame.art(), "Kein Anrufkanal, Signal verworfen");
                    self.verworfen("kein_anrufkanal");
                }
            },
            AnrufEffekt::AnrufkanalSchliessen => {
                if let Some(kanal) = self.anruf_kanal.as_mut() {
                    let effekte = kanal.schliessen();
                    self.verbindungs_effekte(KanalArt::Anruf, effekte);
                }
            }
            AnrufEffekt::Medien(auftrag) => {
                if self.medien_tx.send(auftrag).is_err() {
                    tracing::error!("Medien-Worker laeuft nicht mehr");
                }
            }
            AnrufEffekt::SetupTimerStellen { generation, dauer } => {
                self.setup_timer_abbrechen();
                let tx = self.anruf_tx.clone();
                self.setup_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(dauer).await;
                    let _ = tx.send(AnrufEingabe::SetupZeitueberschreitung { generation });
                }));
            }
            AnrufEffekt::SetupTimerAbbrechen => self.setup_timer_abbrechen(),
            AnrufEffekt::Melden(ereignis) => self.melden(SitzungsEreignis::Anruf(ereignis)),
        }
    }

    fn anrufkanal_oeffnen(&mut self, chat_id: ChatId) {
        if let Some(mut alt) = self.anruf_kanal.take() {
            let effekte = alt.abbauen();
            self.verbindungs_effekte(KanalArt::Anruf, effekte);
        }

        let mut kanal = AnrufKanal::neu(
            chat_id,
            self.konfig.username.clone(),
            self.konfig.token.clone(),
            self.konfig.backoff,
        );
        let verbindung = kanal.verbindung_mut();
        if self.offline {
            verbindung.netzwerk_geaendert(false);
        }
        if self.verborgen {
            verbindung.sichtbarkeit_geaendert(false);
        }
        let effekte = verbindung.verbinden();
        self.anruf_kanal = Some(kanal);
        tracing::debug!(%chat_id, "Anrufkanal wird aufgebaut");
        self.verbindungs_effekte(KanalArt::Anruf, effekte);
    }

    fn setup_timer_abbrechen(&mut self) {
        if let Some(timer) = self.setup_timer.take() {
            timer.abort();
        }
    }

    // -----------------------------------------------------------------------
    // Auth & Timer
    // -----------------------------------------------------------------------

    fn auth_fehler(&mut self, grund: Option<String>) {
        let grund = grund.unwrap_or_else(|| "Token abgelehnt".to_string());
        tracing::warn!(grund = %grund, "auth_error vom Server");

        match self.auth.auth_fehler() {
            AuthSchritt::Auffrischen(auffrischung) => {
                let tx = self.intern_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(Intern::TokenAufgefrischt(auffrischung.await));
                });
            }
            AuthSchritt::Laeuft => tracing::debug!("Auffrischung laeuft bereits"),
            AuthSchritt::Aufgeben => {
                self.melden(SitzungsEreignis::AuthentifizierungFehlgeschlagen { grund })
            }
        }
    }

    fn intern(&mut self, intern: Intern) {
        match intern {
            Intern::ReconnectFaellig { kanal, token } => {
                let slot = self.slot_mut(kanal);
                let aktuell = matches!(&slot.reconnect, Some((t, _)) if *t == token);
                if !aktuell {
                    tracing::debug!(%kanal, "Veralteter Reconnect-Timer ignoriert");
                    return;
                }
                slot.reconnect = None;

                let effekte = match kanal {
                    KanalArt::Global => self.global.verbindung_mut().reconnect_faellig(),
                    KanalArt::Anruf => self
                        .anruf_kanal
                        .as_mut()
                        .map(|k| k.verbindung_mut().reconnect_faellig())
                        .unwrap_or_default(),
                };
                self.verbindungs_effekte(kanal, effekte);
            }
            Intern::TokenAufgefrischt(Ok(token)) => {
                tracing::info!("Token aufgefrischt, melde neu an");
                self.auth.aufgefrischt_uebernommen();
                self.token_uebernehmen(token);
            }
            Intern::TokenAufgefrischt(Err(e)) => {
                tracing::warn!(fehler = %e, "Token-Auffrischung fehlgeschlagen");
                self.melden(SitzungsEreignis::AuthentifizierungFehlgeschlagen {
                    grund: e.to_string(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Hilfsmethoden
    // -----------------------------------------------------------------------

    fn slot(&self, kanal: KanalArt) -> &SocketSlot {
        match kanal {
            KanalArt::Global => &self.global_slot,
            KanalArt::Anruf => &self.anruf_slot,
        }
    }

    fn slot_mut(&mut self, kanal: KanalArt) -> &mut SocketSlot {
        match kanal {
            KanalArt::Global => &mut self.global_slot,
            KanalArt::Anruf => &mut self.anruf_slot,
        }
    }

    fn kanal_offen(&self, kanal: KanalArt) -> bool {
        match kanal {
            KanalArt::Global => self.global.verbindung().ist_offen(),
            KanalArt::Anruf => self
                .anruf_kanal
                .as_ref()
                .map(|k| k.verbindung().ist_offen())
                .unwrap_or(false),
        }
    }

    /// Offen/Geschlossen an Konsumenten und Gauge melden (nur Wechsel)
    fn verbindung_melden(&mut self, kanal: KanalArt, offen: bool) {
        let slot = self.slot_mut(kanal);
        if slot.gemeldet_offen == offen {
            return;
        }
        slot.gemeldet_offen = offen;
        if let Some(m) = &self.metriken {
            m.verbindung_setzen(&kanal.to_string(), offen);
        }
        self.melden(SitzungsEreignis::Verbindung { kanal, offen });
    }

    fn melden(&self, ereignis: SitzungsEreignis) {
        if self.ereignisse.send(ereignis).is_err() {
            tracing::trace!("Kein Konsument fuer Sitzungsereignisse");
        }
    }

    fn verworfen(&self, grund: &str) {
        if let Some(m) = &self.metriken {
            m.frame_verworfen(grund);
        }
    }

    async fn herunterfahren(mut self) {
        tracing::info!("Sitzung wird beendet");
        if self.maschine.zustand() != AnrufZustand::Leerlauf {
            self.anruf_eingabe(AnrufEingabe::Auflegen);
        }
        self.setup_timer_abbrechen();

        if let Some(mut kanal) = self.anruf_kanal.take() {
            let effekte = kanal.abbauen();
            self.verbindungs_effekte(KanalArt::Anruf, effekte);
        }
        let effekte = self.global.verbindung_mut().abbauen();
        self.verbindungs_effekte(KanalArt::Global, effekte);
        self.global_slot.reconnect_abbrechen();
        self.anruf_slot.reconnect_abbrechen();

        // Worker schliesst die aktive Mediensitzung, sobald der Auftragskanal zu ist
        let Sitzung {
            medien_tx,
            medien_worker,
            ..
        } = self;
        drop(medien_tx);
        if let Err(e) = medien_worker.await {
            tracing::warn!(fehler = %e, "Medien-Worker nicht sauber beendet");
        }
        tracing::info!("Sitzung beendet");
    }
}

impl std::fmt::Debug for Sitzung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sitzung")
            .field("username", &self.konfig.username)
            .field("anruf", &self.maschine.zustand())
            .field("global_offen", &self.global.verbindung().ist_offen())
            .finish_non_exhaustive()
    }
}
