//! plauderei-client – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Sitzung und Konsole. Die Module sind als
//! Bibliothek exportiert, damit Tests sie ohne Binary erreichen.

pub mod config;
pub mod konsole;
pub mod medien;

use anyhow::Result;
use config::ClientConfig;
use konsole::Eingabe;
use medien::StummeMedienFabrik;
use plauderei_observability::SitzungsMetriken;
use plauderei_signaling::{Befehl, GestarteteSitzung, Sitzung};
use plauderei_transport::WebSocketVerbinder;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Haelt den Client-Zustand zusammen
pub struct Client {
    pub config: ClientConfig,
}

impl Client {
    /// Erstellt einen neuen Client aus der gegebenen Konfiguration
    pub fn neu(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Startet die Sitzung und bedient die Konsole bis `/ende`, EOF oder Ctrl-C
    pub async fn starten(self) -> Result<()> {
        self.config.validieren()?;
        let konfig = self.config.sitzungs_konfig()?;
        let metriken = SitzungsMetriken::neu()?;

        tracing::info!(
            server = %konfig.server_url,
            anruf = %konfig.anruf_url,
            username = %konfig.username,
            token = konfig.token.is_some(),
            "Client startet"
        );

        let GestarteteSitzung {
            handle,
            mut ereignisse,
            task,
        } = Sitzung::starten(
            konfig,
            Arc::new(WebSocketVerbinder),
            Arc::new(StummeMedienFabrik::default()),
            None,
            Some(metriken.clone()),
        )?;

        let mut zeilen = BufReader::new(tokio::io::stdin()).lines();
        println!("Plauderei bereit, /hilfe zeigt alle Befehle");

        loop {
            tokio::select! {
                zeile = zeilen.next_line() => {
                    let Some(zeile) = zeile? else {
                        tracing::info!("Eingabe beendet");
                        handle.senden(Befehl::Beenden)?;
                        break;
                    };
                    match konsole::zeile_parsen(&zeile) {
                        Ok(Some(Eingabe::Befehl(befehl))) => {
                            let ende = befehl == Befehl::Beenden;
                            handle.senden(befehl)?;
                            if ende {
                                break;
                            }
                        }
                        Ok(Some(Eingabe::Wer(chat_id))) => {
                            println!("{}", konsole::presenz_beschreiben(handle.presenz(), chat_id));
                        }
                        Ok(Some(Eingabe::Metriken)) => print!("{}", metriken.text_export()?),
                        Ok(Some(Eingabe::Hilfe)) => println!("{}", konsole::HILFE),
                        Ok(None) => {}
                        Err(e) => eprintln!("{e}"),
                    }
                }
                Some(ereignis) = ereignisse.recv() => {
                    tracing::debug!(?ereignis, "Sitzungsereignis");
                    println!("{}", konsole::ereignis_beschreiben(&ereignis));
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown-Signal empfangen, Client wird beendet");
                    handle.senden(Befehl::Beenden)?;
                    break;
                }
            }
        }

        task.await?;
        tracing::info!("Client beendet");
        Ok(())
    }
}
