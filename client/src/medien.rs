//! Stumme Mediensitzung
//!
//! Platzhalter bis eine echte Audio-Engine angebunden ist: handelt SDP aus
//! und meldet die Verbindung, uebertraegt aber keine Daten.

use async_trait::async_trait;
use plauderei_protocol::IceKandidat;
use plauderei_signaling::medien::{
    MedienEreignis, MedienFabrik, MedienFehler, MedienResult, MedienSitzung,
    MedienVerbindungsZustand, SdpArt,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Legt `StummeSitzung`en an
#[derive(Debug, Default)]
pub struct StummeMedienFabrik {
    zaehler: AtomicU64,
}

#[async_trait]
impl MedienFabrik for StummeMedienFabrik {
    async fn anlegen(
        &self,
        ereignisse: mpsc::UnboundedSender<MedienEreignis>,
    ) -> MedienResult<Box<dyn MedienSitzung>> {
        let id = self.zaehler.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(sitzung = id, "Stumme Mediensitzung angelegt");
        Ok(Box::new(StummeSitzung {
            id,
            ereignisse,
            remote_angebot: None,
            geschlossen: false,
        }))
    }
}

/// Mediensitzung ohne Audio
#[derive(Debug)]
pub struct StummeSitzung {
    id: u64,
    ereignisse: mpsc::UnboundedSender<MedienEreignis>,
    remote_angebot: Option<String>,
    geschlossen: bool,
}

impl StummeSitzung {
    fn sdp(&self, rolle: &str) -> String {
        format!("v=0\r\no=plauderei {} 1 IN IP4 0.0.0.0\r\ns={rolle}\r\nt=0 0\r\n", self.id)
    }

    fn offen(&self) -> MedienResult<()> {
        if self.geschlossen {
            Err(MedienFehler::Geschlossen)
        } else {
            Ok(())
        }
    }

    fn verbunden_melden(&self) {
        let _ = self
            .ereignisse
            .send(MedienEreignis::Zustand(MedienVerbindungsZustand::Verbunden));
    }
}

#[async_trait]
impl MedienSitzung for StummeSitzung {
    async fn angebot_erstellen(&mut self) -> MedienResult<String> {
        self.offen()?;
        Ok(self.sdp("angebot"))
    }

    async fn antwort_erstellen(&mut self) -> MedienResult<String> {
        self.offen()?;
        if self.remote_angebot.is_none() {
            return Err(MedienFehler::Verhandlung("kein Remote-Angebot gesetzt".into()));
        }
        self.verbunden_melden();
        Ok(self.sdp("antwort"))
    }

    async fn remote_beschreibung_setzen(&mut self, art: SdpArt, sdp: String) -> MedienResult<()> {
        self.offen()?;
        match art {
            SdpArt::Angebot => self.remote_angebot = Some(sdp),
            SdpArt::Antwort => self.verbunden_melden(),
        }
        Ok(())
    }

    async fn kandidat_hinzufuegen(&mut self, kandidat: IceKandidat) -> MedienResult<()> {
        self.offen()?;
        tracing::trace!(sitzung = self.id, kandidat = %kandidat.candidate, "Kandidat ignoriert");
        Ok(())
    }

    async fn schliessen(&mut self) {
        if !self.geschlossen {
            self.geschlossen = true;
            let _ = self
                .ereignisse
                .send(MedienEreignis::Zustand(MedienVerbindungsZustand::Geschlossen));
        }
    }
}
