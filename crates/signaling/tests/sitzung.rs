//! Integrationstests fuer den Sitzungs-Loop
//!
//! Ein In-Memory-Verbinder spielt den Server: jeder geoeffnete Socket wird
//! als `Gegenstelle` an den Test gereicht. Die Medien-Engine ist ein
//! geskriptetes Double, das alle Aufrufe protokolliert.

use async_trait::async_trait;
use plauderei_core::event::{AnrufEreignis, KanalArt, SitzungsEreignis};
use plauderei_core::types::{CallId, ChatId, MessageId};
use plauderei_protocol::IceKandidat;
use plauderei_signaling::auth::{AuthFehler, TokenAuffrischer};
use plauderei_signaling::medien::{
    MedienEreignis, MedienFabrik, MedienFehler, MedienResult, MedienSitzung, SdpArt,
};
use plauderei_signaling::{Befehl, GestarteteSitzung, Sitzung, SitzungsKonfig};
use plauderei_transport::{
    BackoffKonfig, TextQuelle, TextSenke, TransportFehler, TransportResult, Verbinder,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

const ZEIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// In-Memory-Server
// ---------------------------------------------------------------------------

/// Server-Seite eines geoeffneten Sockets
struct Gegenstelle {
    url: Url,
    vom_client: mpsc::UnboundedReceiver<String>,
    an_client: mpsc::UnboundedSender<TransportResult<String>>,
}

impl Gegenstelle {
    async fn empfangen(&mut self) -> Value {
        let text = timeout(ZEIT, self.vom_client.recv())
            .await
            .expect("kein Frame vom Client")
            .expect("Socket geschlossen");
        serde_json::from_str(&text).unwrap()
    }

    fn senden(&self, frame: Value) {
        self.an_client.send(Ok(frame.to_string())).unwrap();
    }

    /// Wartet bis der Client den Socket schliesst
    async fn geschlossen(&mut self) {
        loop {
            match timeout(ZEIT, self.vom_client.recv()).await {
                Ok(None) => return,
                Ok(Some(_)) => continue,
                Err(_) => panic!("Socket wurde nicht geschlossen"),
            }
        }
    }
}

struct SpeicherVerbinder {
    neue: mpsc::UnboundedSender<Gegenstelle>,
}

#[async_trait]
impl Verbinder for SpeicherVerbinder {
    async fn oeffnen(&self, url: &Url) -> TransportResult<(TextSenke, TextQuelle)> {
        let (zum_server, vom_client) = mpsc::unbounded_channel::<String>();
        let (an_client, vom_server) = mpsc::unbounded_channel::<TransportResult<String>>();
        self.neue
            .send(Gegenstelle {
                url: url.clone(),
                vom_client,
                an_client,
            })
            .map_err(|_| TransportFehler::Verbindung("Server weg".into()))?;

        let senke = futures_util::sink::unfold(zum_server, |tx, text: String| async move {
            tx.send(text)
                .map_err(|_| TransportFehler::Getrennt("Server weg".into()))?;
            Ok::<_, TransportFehler>(tx)
        });
        let quelle = futures_util::stream::unfold(vom_server, |mut rx| async move {
            rx.recv().await.map(|eintrag| (eintrag, rx))
        });
        Ok((Box::pin(senke), Box::pin(quelle)))
    }
}

struct Server {
    neue: mpsc::UnboundedReceiver<Gegenstelle>,
}

impl Server {
    async fn naechste(&mut self) -> Gegenstelle {
        timeout(ZEIT, self.neue.recv())
            .await
            .expect("keine neue Verbindung")
            .expect("Verbinder weg")
    }

    async fn keine_neue(&mut self, dauer: Duration) {
        if let Ok(Some(g)) = timeout(dauer, self.neue.recv()).await {
            panic!("unerwartete Verbindung zu {}", g.url);
        }
    }

    /// Globaler Kanal inklusive Begruessung
    async fn global_angemeldet(&mut self) -> Gegenstelle {
        let mut global = self.naechste().await;
        assert_eq!(global.url.path(), "/ws");
        assert_eq!(global.empfangen().await, json!({"type": "auth", "token": "t1"}));
        assert_eq!(global.empfangen().await, json!({"type": "join_idle"}));
        global
    }
}

// ---------------------------------------------------------------------------
// Geskriptete Medien
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SkriptMedien {
    protokoll: Arc<Mutex<Vec<String>>>,
}

impl SkriptMedien {
    fn protokoll(&self) -> Vec<String> {
        self.protokoll.lock().unwrap().clone()
    }
}

struct SkriptSitzung {
    protokoll: Arc<Mutex<Vec<String>>>,
    remote_angebot: Option<String>,
}

impl SkriptSitzung {
    fn notieren(&self, eintrag: String) {
        self.protokoll.lock().unwrap().push(eintrag);
    }
}

#[async_trait]
impl MedienSitzung for SkriptSitzung {
    async fn angebot_erstellen(&mut self) -> MedienResult<String> {
        self.notieren("angebot".into());
        Ok("sdp-angebot".into())
    }

    async fn antwort_erstellen(&mut self) -> MedienResult<String> {
        match &self.remote_angebot {
            Some(angebot) => Ok(format!("antwort auf {angebot}")),
            None => Err(MedienFehler::Verhandlung("kein Angebot".into())),
        }
    }

    async fn remote_beschreibung_setzen(&mut self, art: SdpArt, sdp: String) -> MedienResult<()> {
        self.notieren(format!("remote:{art:?}:{sdp}"));
        if art == SdpArt::Angebot {
            self.remote_angebot = Some(sdp);
        }
        Ok(())
    }

    async fn kandidat_hinzufuegen(&mut self, kandidat: IceKandidat) -> MedienResult<()> {
        self.notieren(format!("kandidat:{}", kandidat.candidate));
        Ok(())
    }

    async fn schliessen(&mut self) {
        self.notieren("geschlossen".into());
    }
}

#[async_trait]
impl MedienFabrik for SkriptMedien {
    async fn anlegen(
        &self,
        _ereignisse: mpsc::UnboundedSender<MedienEreignis>,
    ) -> MedienResult<Box<dyn MedienSitzung>> {
        self.protokoll.lock().unwrap().push("angelegt".into());
        Ok(Box::new(SkriptSitzung {
            protokoll: self.protokoll.clone(),
            remote_angebot: None,
        }))
    }
}

struct ZaehlenderAuffrischer {
    aufrufe: AtomicUsize,
}

#[async_trait]
impl TokenAuffrischer for ZaehlenderAuffrischer {
    async fn auffrischen(&self) -> Result<String, AuthFehler> {
        self.aufrufe.fetch_add(1, Ordering::SeqCst);
        Ok("t2".into())
    }
}

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

struct Aufbau {
    sitzung: GestarteteSitzung,
    server: Server,
    medien: Arc<SkriptMedien>,
}

fn konfig() -> SitzungsKonfig {
    let mut konfig = SitzungsKonfig::neu(
        Url::parse("ws://test/ws").unwrap(),
        Url::parse("ws://test/calls").unwrap(),
        "alice",
    );
    konfig.token = Some("t1".into());
    konfig.backoff = BackoffKonfig {
        basis: Duration::from_millis(10),
        max_faktor: 4,
    };
    konfig.setup_timeout = None;
    konfig
}

fn starten(konfig: SitzungsKonfig, auffrischer: Option<Arc<dyn TokenAuffrischer>>) -> Aufbau {
    let (neue_tx, neue_rx) = mpsc::unbounded_channel();
    let medien = Arc::new(SkriptMedien::default());
    let sitzung = Sitzung::starten(
        konfig,
        Arc::new(SpeicherVerbinder { neue: neue_tx }),
        medien.clone(),
        auffrischer,
        None,
    )
    .unwrap();
    Aufbau {
        sitzung,
        server: Server { neue: neue_rx },
        medien,
    }
}

impl Aufbau {
    fn befehl(&self, befehl: Befehl) {
        self.sitzung.handle.senden(befehl).unwrap();
    }

    /// Naechstes Ereignis, das `passt`
    async fn ereignis(&mut self, passt: impl Fn(&SitzungsEreignis) -> bool) -> SitzungsEreignis {
        loop {
            let ereignis = timeout(ZEIT, self.sitzung.ereignisse.recv())
                .await
                .expect("kein passendes Ereignis")
                .expect("Sitzung beendet");
            if passt(&ereignis) {
                return ereignis;
            }
        }
    }

    async fn medien_bis(&self, eintrag: &str) {
        timeout(ZEIT, async {
            while !self.medien.protokoll().iter().any(|e| e == eintrag) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{eintrag} fehlt in {:?}", self.medien.protokoll()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anmeldung_beim_oeffnen() {
    let mut a = starten(konfig(), None);
    let _global = a.server.global_angemeldet().await;
    a.ereignis(|e| {
        *e == SitzungsEreignis::Verbindung {
            kanal: KanalArt::Global,
            offen: true,
        }
    })
    .await;
}

#[tokio::test]
async fn doppelte_nachricht_wird_einmal_gemeldet() {
    let mut a = starten(konfig(), None);
    let global = a.server.global_angemeldet().await;

    let nachricht = |id: u64| {
        json!({
            "type": "new_message",
            "messageID": id,
            "chatID": 3,
            "username": "bob",
            "message": format!("nachricht {id}"),
            "timestamp": "2024-05-01T12:00:00Z"
        })
    };
    global.senden(nachricht(5));
    global.senden(nachricht(5));
    global.senden(nachricht(6));

    let ist_nachricht = |e: &SitzungsEreignis| matches!(e, SitzungsEreignis::NeueNachricht { .. });
    let erste = a.ereignis(ist_nachricht).await;
    let zweite = a.ereignis(ist_nachricht).await;
    assert!(matches!(
        erste,
        SitzungsEreignis::NeueNachricht { message_id: MessageId(5), .. }
    ));
    assert!(matches!(
        zweite,
        SitzungsEreignis::NeueNachricht { message_id: MessageId(6), .. }
    ));
}

#[tokio::test]
async fn reconnect_betritt_den_chat_erneut() {
    let mut a = starten(konfig(), None);
    let mut global = a.server.global_angemeldet().await;

    a.befehl(Befehl::ChatBetreten(ChatId(7)));
    assert_eq!(global.empfangen().await, json!({"type": "join_chat", "chatID": 7}));

    // Server trennt die Verbindung
    drop(global);
    let mut global = a.server.global_angemeldet().await;
    assert_eq!(global.empfangen().await, json!({"type": "join_chat", "chatID": 7}));

    a.befehl(Befehl::NachrichtSenden {
        chat_id: ChatId(7),
        text: "wieder da".into(),
    });
    assert_eq!(
        global.empfangen().await,
        json!({"type": "post_msg", "chatID": 7, "text": "wieder da"})
    );
}

#[tokio::test]
async fn offline_unterdrueckt_reconnect() {
    let mut a = starten(konfig(), None);
    let global = a.server.global_angemeldet().await;

    a.befehl(Befehl::NetzwerkGeaendert { online: false });
    a.ereignis(|e| matches!(e, SitzungsEreignis::Verbindung { offen: true, .. }))
        .await;
    // Befehl und Socket-Meldung laufen ueber getrennte Kanaele
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(global);
    a.ereignis(|e| matches!(e, SitzungsEreignis::Verbindung { offen: false, .. }))
        .await;
    a.server.keine_neue(Duration::from_millis(200)).await;

    a.befehl(Befehl::NetzwerkGeaendert { online: true });
    let _global = a.server.global_angemeldet().await;
    a.server.keine_neue(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn ausgehender_anruf_von_einladung_bis_auflegen() {
    let mut a = starten(konfig(), None);
    let mut global = a.server.global_angemeldet().await;

    a.befehl(Befehl::AnrufStarten(ChatId(7)));
    assert_eq!(global.empfangen().await, json!({"type": "call_invite", "chatID": 7}));
    a.ereignis(|e| *e == SitzungsEreignis::Anruf(AnrufEreignis::Ausgehend { chat_id: ChatId(7) }))
        .await;

    global.senden(json!({"type": "call_accepted", "chatID": 7, "from": "bob", "call_id": "A"}));
    let mut anruf = a.server.naechste().await;
    assert_eq!(anruf.url.path(), "/calls/7/alice");
    assert_eq!(
        anruf.empfangen().await,
        json!({"type": "auth", "token": "t1", "chatID": 7, "username": "alice"})
    );
    assert_eq!(
        anruf.empfangen().await,
        json!({"type": "offer", "chatID": 7, "sdp": "sdp-angebot"})
    );

    // Spaeterer Status-Broadcast derselben Annahme: kein zweiter Anrufkanal
    global.senden(json!({"type": "call_state", "state": "accepted", "chatID": 7, "call_id": "A"}));
    a.server.keine_neue(Duration::from_millis(150)).await;
    assert_eq!(
        a.medien.protokoll().iter().filter(|e| *e == "angebot").count(),
        1
    );

    anruf.senden(json!({"type": "answer", "chatID": 7, "sdp": "sdp-antwort"}));
    a.medien_bis("remote:Antwort:sdp-antwort").await;
    anruf.senden(json!({
        "type": "ice-candidate",
        "chatID": 7,
        "candidate": {"candidate": "candidate:9"}
    }));
    a.medien_bis("kandidat:candidate:9").await;

    a.befehl(Befehl::Auflegen);
    assert_eq!(
        anruf.empfangen().await,
        json!({"type": "leave", "chatID": 7, "reason": "aufgelegt"})
    );
    anruf.geschlossen().await;
    assert_eq!(
        global.empfangen().await,
        json!({"type": "call_end", "chatID": 7, "call_id": "A"})
    );
    a.ereignis(|e| {
        matches!(
            e,
            SitzungsEreignis::Anruf(AnrufEreignis::Beendet { chat_id: ChatId(7), .. })
        )
    })
    .await;
    a.medien_bis("geschlossen").await;
}

#[tokio::test]
async fn eingehender_anruf_beantwortet_das_angebot_einmal() {
    let mut a = starten(konfig(), None);
    let mut global = a.server.global_angemeldet().await;

    global.senden(json!({"type": "call_incoming", "chatID": 9, "from": "bob", "call_id": "C"}));
    a.ereignis(|e| {
        *e == SitzungsEreignis::Anruf(AnrufEreignis::Eingehend {
            chat_id: ChatId(9),
            von: "bob".into(),
            call_id: CallId::neu("C"),
        })
    })
    .await;

    a.befehl(Befehl::AnrufAnnehmen);
    assert_eq!(
        global.empfangen().await,
        json!({"type": "call_accept", "chatID": 9, "call_id": "C"})
    );

    let mut anruf = a.server.naechste().await;
    assert_eq!(anruf.url.path(), "/calls/9/alice");
    assert_eq!(anruf.empfangen().await["type"], "auth");

    // Angebot kommt evtl. bevor die Mediensitzung steht
    anruf.senden(json!({"type": "call-started", "from": "bob"}));
    anruf.senden(json!({"type": "offer", "chatID": 9, "sdp": "o1"}));
    anruf.senden(json!({"type": "offer", "chatID": 9, "sdp": "o1"}));
    assert_eq!(
        anruf.empfangen().await,
        json!({"type": "answer", "chatID": 9, "sdp": "antwort auf o1"})
    );
    a.ereignis(|e| {
        *e == SitzungsEreignis::Anruf(AnrufEreignis::GegenueberBeigetreten { von: "bob".into() })
    })
    .await;

    // Kein zweites Answer
    assert!(timeout(Duration::from_millis(150), anruf.vom_client.recv())
        .await
        .is_err());

    anruf.senden(json!({"type": "leave", "chatID": 9}));
    a.ereignis(|e| {
        matches!(
            e,
            SitzungsEreignis::Anruf(AnrufEreignis::Beendet { chat_id: ChatId(9), .. })
        )
    })
    .await;
    anruf.geschlossen().await;
}

#[tokio::test]
async fn auth_error_frischt_genau_einmal_auf() {
    let auffrischer = Arc::new(ZaehlenderAuffrischer {
        aufrufe: AtomicUsize::new(0),
    });
    let mut a = starten(konfig(), Some(auffrischer.clone()));
    let mut global = a.server.global_angemeldet().await;

    global.senden(json!({"type": "auth_error", "message": "abgelaufen"}));
    assert_eq!(global.empfangen().await, json!({"type": "auth", "token": "t2"}));

    global.senden(json!({"type": "auth_error"}));
    a.ereignis(|e| matches!(e, SitzungsEreignis::AuthentifizierungFehlgeschlagen { .. }))
        .await;
    assert_eq!(auffrischer.aufrufe.load(Ordering::SeqCst), 1);

    // Neues Token vom Benutzer erlaubt wieder eine Auffrischung
    a.befehl(Befehl::TokenSetzen("t3".into()));
    assert_eq!(global.empfangen().await, json!({"type": "auth", "token": "t3"}));
    global.senden(json!({"type": "auth_error"}));
    assert_eq!(global.empfangen().await, json!({"type": "auth", "token": "t2"}));
    assert_eq!(auffrischer.aufrufe.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zweiter_ablauf_nach_akzeptiertem_token_frischt_erneut_auf() {
    let auffrischer = Arc::new(ZaehlenderAuffrischer {
        aufrufe: AtomicUsize::new(0),
    });
    let mut a = starten(konfig(), Some(auffrischer.clone()));
    let mut global = a.server.global_angemeldet().await;

    global.senden(json!({"type": "auth_error", "message": "abgelaufen"}));
    assert_eq!(global.empfangen().await, json!({"type": "auth", "token": "t2"}));

    // Server arbeitet mit dem neuen Token weiter
    global.senden(json!({"type": "user_status", "username": "bob", "online": true}));
    a.ereignis(|e| matches!(e, SitzungsEreignis::Status { .. })).await;
    assert_eq!(a.sitzung.handle.presenz().online_benutzer(), vec!["bob"]);

    // Spaeter laeuft auch dieses Token ab
    global.senden(json!({"type": "auth_error", "message": "abgelaufen"}));
    assert_eq!(global.empfangen().await, json!({"type": "auth", "token": "t2"}));
    assert_eq!(auffrischer.aufrufe.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn setup_timeout_beendet_unbeantworteten_anruf() {
    let mut konfig = konfig();
    konfig.setup_timeout = Some(Duration::from_millis(50));
    let mut a = starten(konfig, None);
    let mut global = a.server.global_angemeldet().await;

    a.befehl(Befehl::AnrufStarten(ChatId(3)));
    assert_eq!(global.empfangen().await, json!({"type": "call_invite", "chatID": 3}));
    assert_eq!(global.empfangen().await, json!({"type": "call_end", "chatID": 3}));
    a.ereignis(|e| {
        *e == SitzungsEreignis::Anruf(AnrufEreignis::Zeitueberschreitung { chat_id: ChatId(3) })
    })
    .await;

    // Danach ist ein neuer Anruf moeglich
    a.befehl(Befehl::AnrufStarten(ChatId(4)));
    assert_eq!(global.empfangen().await, json!({"type": "call_invite", "chatID": 4}));
}

#[tokio::test]
async fn beenden_schliesst_alle_kanaele() {
    let a = starten(konfig(), None);
    let Aufbau {
        sitzung, mut server, ..
    } = a;
    let mut global = server.global_angemeldet().await;

    sitzung.handle.senden(Befehl::Beenden).unwrap();
    timeout(ZEIT, sitzung.task).await.unwrap().unwrap();
    global.geschlossen().await;
    assert!(sitzung.handle.senden(Befehl::Auflegen).is_err());
}

#[tokio::test]
async fn ungueltige_anruf_url_wird_abgelehnt() {
    let mut konfig = konfig();
    konfig.anruf_url = Url::parse("mailto:alice@example.com").unwrap();
    let (neue_tx, _neue_rx) = mpsc::unbounded_channel();
    let ergebnis = Sitzung::starten(
        konfig,
        Arc::new(SpeicherVerbinder { neue: neue_tx }),
        Arc::new(SkriptMedien::default()),
        None,
        None,
    );
    assert!(ergebnis.is_err());
}
