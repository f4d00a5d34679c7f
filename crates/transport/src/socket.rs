//! Socket-Pumpe
//!
//! Jeder physische Socket laeuft in einem eigenen Task. Der Task meldet
//! `Geoeffnet`, eingehende Textframes und genau ein `Geschlossen` an den
//! Sitzungs-Loop, jeweils mit der Generation des Sockets. Meldungen einer
//! veralteten Generation verwirft der Loop.
//!
//! Das Droppen des `sender` aus `Geoeffnet` schliesst den Socket, nachdem
//! alle bereits gepufferten Frames gesendet wurden.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use plauderei_core::event::KanalArt;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::{TransportFehler, TransportResult};

/// Ausgehende Textframes eines Sockets
pub type TextSenke = Pin<Box<dyn Sink<String, Error = TransportFehler> + Send>>;
/// Eingehende Textframes eines Sockets
pub type TextQuelle = Pin<Box<dyn Stream<Item = TransportResult<String>> + Send>>;

// ---------------------------------------------------------------------------
// Verbinder
// ---------------------------------------------------------------------------

/// Oeffnet Text-Sockets
///
/// Produktiv: [`WebSocketVerbinder`]. Tests setzen einen In-Memory-Verbinder ein.
#[async_trait]
pub trait Verbinder: Send + Sync {
    async fn oeffnen(&self, url: &Url) -> TransportResult<(TextSenke, TextQuelle)>;
}

/// WebSocket ueber tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketVerbinder;

#[async_trait]
impl Verbinder for WebSocketVerbinder {
    async fn oeffnen(&self, url: &Url) -> TransportResult<(TextSenke, TextQuelle)> {
        let (ws, _antwort) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportFehler::Verbindung(format!("{url}: {e}")))?;
        let (ws_tx, ws_rx) = ws.split();

        let senke = ws_tx
            .sink_map_err(|e| TransportFehler::Getrennt(e.to_string()))
            .with(|text: String| {
                futures_util::future::ready(Ok::<_, TransportFehler>(Message::Text(text.into())))
            });

        // Binaer/Ping/Pong werden ignoriert, Close beendet den Stream
        let quelle = ws_rx
            .take_while(|nachricht| {
                futures_util::future::ready(!matches!(nachricht, Ok(Message::Close(_))))
            })
            .filter_map(|nachricht| {
                futures_util::future::ready(match nachricht {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportFehler::Getrennt(e.to_string()))),
                })
            });

        Ok((Box::pin(senke), Box::pin(quelle)))
    }
}

// ---------------------------------------------------------------------------
// Meldungen an den Sitzungs-Loop
// ---------------------------------------------------------------------------

/// Meldung eines Socket-Tasks
#[derive(Debug)]
pub enum SocketMeldung {
    Geoeffnet {
        kanal: KanalArt,
        generation: u64,
        sender: mpsc::UnboundedSender<String>,
    },
    Frame {
        kanal: KanalArt,
        generation: u64,
        text: String,
    },
    Geschlossen {
        kanal: KanalArt,
        generation: u64,
        grund: String,
    },
}

impl SocketMeldung {
    pub fn kanal(&self) -> KanalArt {
        match self {
            Self::Geoeffnet { kanal, .. }
            | Self::Frame { kanal, .. }
            | Self::Geschlossen { kanal, .. } => *kanal,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            Self::Geoeffnet { generation, .. }
            | Self::Frame { generation, .. }
            | Self::Geschlossen { generation, .. } => *generation,
        }
    }
}

/// Startet den Task fuer einen Socket der gegebenen Generation
pub fn socket_starten(
    verbinder: Arc<dyn Verbinder>,
    url: Url,
    kanal: KanalArt,
    generation: u64,
    meldungen: mpsc::UnboundedSender<SocketMeldung>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(%kanal, generation, %url, "Socket wird geoeffnet");

        let (mut senke, mut quelle) = match verbinder.oeffnen(&url).await {
            Ok(paar) => paar,
            Err(e) => {
                let _ = meldungen.send(SocketMeldung::Geschlossen {
                    kanal,
                    generation,
                    grund: e.to_string(),
                });
                return;
            }
        };

        let (sender, mut ausgang) = mpsc::unbounded_channel::<String>();
        if meldungen
            .send(SocketMeldung::Geoeffnet {
                kanal,
                generation,
                sender,
            })
            .is_err()
        {
            return;
        }

        let grund = loop {
            tokio::select! {
                biased;

                ausgehend = ausgang.recv() => {
                    let Some(text) = ausgehend else {
                        let _ = senke.close().await;
                        break "lokal geschlossen".to_string();
                    };
                    if let Err(e) = senke.send(text).await {
                        break e.to_string();
                    }
                }
                eingehend = quelle.next() => match eingehend {
                    Some(Ok(text)) => {
                        if meldungen
                            .send(SocketMeldung::Frame { kanal, generation, text })
                            .is_err()
                        {
                            break "Sitzung beendet".to_string();
                        }
                    }
                    Some(Err(e)) => break e.to_string(),
                    None => break "Gegenstelle hat geschlossen".to_string(),
                },
            }
        };

        tracing::debug!(%kanal, generation, grund = %grund, "Socket-Task beendet");
        let _ = meldungen.send(SocketMeldung::Geschlossen {
            kanal,
            generation,
            grund,
        });
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
