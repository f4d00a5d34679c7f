//! Mediensitzung – Vertrag zur Peer-to-Peer-Medien-Engine
//!
//! Die Engine selbst (Codecs, Audio-Capture, ICE) liegt ausserhalb dieses
//! Crates. Die Sitzung kennt nur `MedienSitzung` und `MedienFabrik`.
//!
//! Alle Medienoperationen laufen nacheinander im Medien-Worker. Ergebnisse
//! und Ereignisse kommen als `AnrufEingabe` mit der Generation des Anrufs
//! zurueck, damit Rueckmeldungen eines beendeten Anrufs verworfen werden.

use async_trait::async_trait;
use plauderei_protocol::IceKandidat;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::anruf::AnrufEingabe;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler der Medien-Engine
#[derive(Debug, Clone, Error)]
pub enum MedienFehler {
    /// Mikrofon o.ae. nicht verfuegbar oder verweigert
    #[error("Geraet nicht verfuegbar: {0}")]
    GeraetNichtVerfuegbar(String),

    /// SDP/ICE-Verhandlung fehlgeschlagen
    #[error("Verhandlung fehlgeschlagen: {0}")]
    Verhandlung(String),

    /// Sitzung wurde bereits geschlossen
    #[error("Mediensitzung geschlossen")]
    Geschlossen,
}

/// Result-Typ fuer Medienoperationen
pub type MedienResult<T> = Result<T, MedienFehler>;

// ---------------------------------------------------------------------------
// Vertrag
// ---------------------------------------------------------------------------

/// Verbindungszustand der Peer-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedienVerbindungsZustand {
    Verbunden,
    Unterbrochen,
    Fehlgeschlagen,
    Geschlossen,
}

/// Art einer Session-Description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpArt {
    Angebot,
    Antwort,
}

/// Beobachtbare Ereignisse einer Mediensitzung
#[derive(Debug, Clone, PartialEq)]
pub enum MedienEreignis {
    LokalerKandidat(IceKandidat),
    Zustand(MedienVerbindungsZustand),
    Spur { spur_id: String },
}

/// Eine Peer-Verbindung
#[async_trait]
pub trait MedienSitzung: Send {
    async fn angebot_erstellen(&mut self) -> MedienResult<String>;
    async fn antwort_erstellen(&mut self) -> MedienResult<String>;
    async fn remote_beschreibung_setzen(&mut self, art: SdpArt, sdp: String) -> MedienResult<()>;
    async fn kandidat_hinzufuegen(&mut self, kandidat: IceKandidat) -> MedienResult<()>;
    async fn schliessen(&mut self);
}

/// Legt Mediensitzungen an (Geraete holen, Peer-Verbindung erzeugen)
#[async_trait]
pub trait MedienFabrik: Send + Sync {
    /// Ereignisse der neuen Sitzung gehen an `ereignisse`
    async fn anlegen(
        &self,
        ereignisse: mpsc::UnboundedSender<MedienEreignis>,
    ) -> MedienResult<Box<dyn MedienSitzung>>;
}

// ---------------------------------------------------------------------------
// Auftraege
// ---------------------------------------------------------------------------

/// Auftrag an den Medien-Worker
#[derive(Debug, Clone, PartialEq)]
pub enum MedienAuftrag {
    Anlegen { generation: u64 },
    AngebotErstellen { generation: u64 },
    /// Remote-Angebot setzen und Antwort erstellen
    AntwortErstellen { generation: u64, angebot: String },
    /// Remote-Antwort setzen
    AntwortSetzen { generation: u64, sdp: String },
    KandidatHinzufuegen {
        generation: u64,
        kandidat: IceKandidat,
    },
    Schliessen { generation: u64 },
}

impl MedienAuftrag {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Anlegen { generation }
            | Self::AngebotErstellen { generation }
            | Self::AntwortErstellen { generation, .. }
            | Self::AntwortSetzen { generation, .. }
            | Self::KandidatHinzufuegen { generation, .. }
            | Self::Schliessen { generation } => *generation,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct AktiveSitzung {
    generation: u64,
    sitzung: Box<dyn MedienSitzung>,
    weiterleitung: JoinHandle<()>,
}

impl AktiveSitzung {
    async fn schliessen(mut self) {
        self.sitzung.schliessen().await;
        self.weiterleitung.abort();
        tracing::debug!(generation = self.generation, "Mediensitzung geschlossen");
    }
}

/// Startet den Medien-Worker
///
/// Gibt den Auftragskanal zurueck. Der Worker endet, wenn alle Sender
/// gedroppt sind, und schliesst dann die aktive Sitzung.
pub fn medien_worker_starten(
    fabrik: Arc<dyn MedienFabrik>,
    rueckmeldung: mpsc::UnboundedSender<AnrufEingabe>,
) -> (mpsc::UnboundedSender<MedienAuftrag>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(worker_loop(fabrik, rx, rueckmeldung));
    (tx, handle)
}

async fn worker_loop(
    fabrik: Arc<dyn MedienFabrik>,
    mut auftraege: mpsc::UnboundedReceiver<MedienAuftrag>,
    rueck: mpsc::UnboundedSender<AnrufEingabe>,
) {
    let mut aktiv: Option<AktiveSitzung> = None;

    while let Some(auftrag) = auftraege.recv().await {
        let generation = auftrag.generation();

        if let MedienAuftrag::Anlegen { .. } = auftrag {
            if let Some(alt) = aktiv.take() {
                alt.schliessen().await;
            }
            let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();
            let antwort = match fabrik.anlegen(ereignis_tx).await {
                Ok(sitzung) => {
                    let weiterleitung = tokio::spawn(ereignisse_weiterleiten(
                        generation,
                        ereignis_rx,
                        rueck.clone(),
                    ));
                    aktiv = Some(AktiveSitzung {
                        generation,
                        sitzung,
                        weiterleitung,
                    });
                    AnrufEingabe::MedienBereit { generation }
                }
                Err(e) => {
                    tracing::warn!(generation, fehler = %e, "Mediensitzung konnte nicht angelegt werden");
                    AnrufEingabe::MedienFehlgeschlagen {
                        generation,
                        grund: e.to_string(),
                    }
                }
            };
            let _ = rueck.send(antwort);
            continue;
        }

        let passend = aktiv
            .as_ref()
            .map(|a| a.generation == generation)
            .unwrap_or(false);
        if !passend {
            tracing::debug!(generation, ?auftrag, "Medienauftrag ohne passende Sitzung verworfen");
            continue;
        }

        if let MedienAuftrag::Schliessen { .. } = auftrag {
            if let Some(a) = aktiv.take() {
                a.schliessen().await;
            }
            continue;
        }

        let Some(a) = aktiv.as_mut() else { continue };
        let antwort = auftrag_ausfuehren(a.sitzung.as_mut(), auftrag).await;
        if let Some(eingabe) = antwort {
            let _ = rueck.send(eingabe);
        }
    }

    if let Some(a) = aktiv.take() {
        a.schliessen().await;
    }
    tracing::debug!("Medien-Worker beendet");
}

async fn auftrag_ausfuehren(
    sitzung: &mut dyn MedienSitzung,
    auftrag: MedienAuftrag,
) -> Option<AnrufEingabe> {
    let generation = auftrag.generation();
    let fehlgeschlagen = |e: MedienFehler| AnrufEingabe::MedienFehlgeschlagen {
        generation,
        grund: e.to_string(),
    };

    match auftrag {
        MedienAuftrag::AngebotErstellen { .. } => Some(match sitzung.angebot_erstellen().await {
            Ok(sdp) => AnrufEingabe::LokalesAngebot { generation, sdp },
            Err(e) => fehlgeschlagen(e),
        }),
        MedienAuftrag::AntwortErstellen { angebot, .. } => {
            if let Err(e) = sitzung
                .remote_beschreibung_setzen(SdpArt::Angebot, angebot)
                .await
            {
                return Some(fehlgeschlagen(e));
            }
            Some(match sitzung.antwort_erstellen().await {
                Ok(sdp) => AnrufEingabe::LokaleAntwort { generation, sdp },
                Err(e) => fehlgeschlagen(e),
            })
        }
        MedienAuftrag::AntwortSetzen { sdp, .. } => sitzung
            .remote_beschreibung_setzen(SdpArt::Antwort, sdp)
            .await
            .err()
            .map(fehlgeschlagen),
        MedienAuftrag::KandidatHinzufuegen { kandidat, .. } => {
            // Einzelne Kandidaten duerfen scheitern
            if let Err(e) = sitzung.kandidat_hinzufuegen(kandidat).await {
                tracing::warn!(generation, fehler = %e, "ICE-Kandidat abgelehnt");
            }
            None
        }
        MedienAuftrag::Anlegen { .. } | MedienAuftrag::Schliessen { .. } => None,
    }
}

async fn ereignisse_weiterleiten(
    generation: u64,
    mut ereignisse: mpsc::UnboundedReceiver<MedienEreignis>,
    rueck: mpsc::UnboundedSender<AnrufEingabe>,
) {
    while let Some(ereignis) = ereignisse.recv().await {
        let eingabe = match ereignis {
            MedienEreignis::LokalerKandidat(kandidat) => AnrufEingabe::LokalerKandidat {
                generation,
                kandidat,
            },
            MedienEreignis::Zustand(zustand) => AnrufEingabe::MedienZustand {
                generation,
                zustand,
            },
            MedienEreignis::Spur { spur_id } => AnrufEingabe::SpurEmpfangen {
                generation,
                spur_id,
            },
        };
        if rueck.send(eingabe).is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Zaehler {
        angelegt: AtomicUsize,
        geschlossen: Arc<AtomicUsize>,
    }

    struct TestSitzung {
        ereignisse: mpsc::UnboundedSender<MedienEreignis>,
        geschlossen: Arc<AtomicUsize>,
        remote: Option<(SdpArt, String)>,
    }

    #[async_trait]
    impl MedienSitzung for TestSitzung {
        async fn angebot_erstellen(&mut self) -> MedienResult<String> {
            let _ = self
                .ereignisse
                .send(MedienEreignis::LokalerKandidat(IceKandidat::neu("candidate:lokal")));
            Ok("sdp-angebot".into())
        }
        async fn antwort_erstellen(&mut self) -> MedienResult<String> {
            match &self.remote {
                Some((SdpArt::Angebot, sdp)) => Ok(format!("antwort auf {sdp}")),
                _ => Err(MedienFehler::Verhandlung("kein Angebot gesetzt".into())),
            }
        }
        async fn remote_beschreibung_setzen(&mut self, art: SdpArt, sdp: String) -> MedienResult<()> {
            self.remote = Some((art, sdp));
            Ok(())
        }
        async fn kandidat_hinzufuegen(&mut self, _kandidat: IceKandidat) -> MedienResult<()> {
            Err(MedienFehler::Verhandlung("ungueltig".into()))
        }
        async fn schliessen(&mut self) {
            self.geschlossen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl MedienFabrik for Zaehler {
        async fn anlegen(
            &self,
            ereignisse: mpsc::UnboundedSender<MedienEreignis>,
        ) -> MedienResult<Box<dyn MedienSitzung>> {
            if self.angelegt.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(MedienFehler::GeraetNichtVerfuegbar("Mikrofon belegt".into()));
            }
            Ok(Box::new(TestSitzung {
                ereignisse,
                geschlossen: self.geschlossen.clone(),
                remote: None,
            }))
        }
    }

    #[tokio::test]
    async fn worker_meldet_ergebnisse_mit_generation() {
        let fabrik = Arc::new(Zaehler::default());
        let (rueck_tx, mut rueck) = mpsc::unbounded_channel();
        let (auftraege, handle) = medien_worker_starten(fabrik.clone(), rueck_tx);

        auftraege.send(MedienAuftrag::Anlegen { generation: 1 }).unwrap();
        auftraege.send(MedienAuftrag::AngebotErstellen { generation: 1 }).unwrap();
        // Veraltete Generation wird ignoriert
        auftraege.send(MedienAuftrag::AngebotErstellen { generation: 0 }).unwrap();
        auftraege
            .send(MedienAuftrag::AntwortErstellen {
                generation: 1,
                angebot: "fremd".into(),
            })
            .unwrap();

        assert_eq!(rueck.recv().await, Some(AnrufEingabe::MedienBereit { generation: 1 }));
        let mut gesehen = Vec::new();
        for _ in 0..3 {
            gesehen.push(rueck.recv().await.unwrap());
        }
        assert!(gesehen.contains(&AnrufEingabe::LokalesAngebot {
            generation: 1,
            sdp: "sdp-angebot".into()
        }));
        assert!(gesehen.contains(&AnrufEingabe::LokalerKandidat {
            generation: 1,
            kandidat: IceKandidat::neu("candidate:lokal")
        }));
        assert!(gesehen.contains(&AnrufEingabe::LokaleAntwort {
            generation: 1,
            sdp: "antwort auf fremd".into()
        }));

        drop(auftraege);
        handle.await.unwrap();
        assert_eq!(fabrik.geschlossen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn anlegen_fehlgeschlagen_wird_gemeldet() {
        let fabrik = Arc::new(Zaehler::default());
        let (rueck_tx, mut rueck) = mpsc::unbounded_channel();
        let (auftraege, _handle) = medien_worker_starten(fabrik.clone(), rueck_tx);

        auftraege.send(MedienAuftrag::Anlegen { generation: 1 }).unwrap();
        auftraege.send(MedienAuftrag::Anlegen { generation: 2 }).unwrap();
        assert_eq!(rueck.recv().await, Some(AnrufEingabe::MedienBereit { generation: 1 }));
        match rueck.recv().await {
            Some(AnrufEingabe::MedienFehlgeschlagen { generation, grund }) => {
                assert_eq!(generation, 2);
                assert!(grund.contains("Mikrofon"));
            }
            andere => panic!("unerwartet: {andere:?}"),
        }
        // Alte Sitzung wurde vor dem neuen Anlegen geschlossen
        assert_eq!(fabrik.geschlossen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn kandidatenfehler_ist_nicht_fatal() {
        let fabrik = Arc::new(Zaehler::default());
        let (rueck_tx, mut rueck) = mpsc::unbounded_channel();
        let (auftraege, handle) = medien_worker_starten(fabrik, rueck_tx);

        auftraege.send(MedienAuftrag::Anlegen { generation: 3 }).unwrap();
        auftraege
            .send(MedienAuftrag::KandidatHinzufuegen {
                generation: 3,
                kandidat: IceKandidat::neu("candidate:x"),
            })
            .unwrap();
        auftraege.send(MedienAuftrag::Schliessen { generation: 3 }).unwrap();
        drop(auftraege);
        handle.await.unwrap();

        assert_eq!(rueck.recv().await, Some(AnrufEingabe::MedienBereit { generation: 3 }));
        assert!(rueck.recv().await.is_none());
    }
}
