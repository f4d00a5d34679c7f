//! plauderei-transport – Dauerhafte Kanaele zum Messaging-Backend
//!
//! Alle Zustandsuebergaenge sind sans-io: jede Eingabe liefert eine Liste
//! von Effekten, die der Sitzungs-Loop ausfuehrt. Nur `socket` beruehrt
//! das Netzwerk.
//!
//! ## Architektur
//!
//! ```text
//! Backoff (naechste_verzoegerung)
//!     |
//!     v
//! Verbindung  – Closed -> Connecting -> Open, Reconnect, Unterdrueckung
//!     |
//!     +-- GlobalKanal  (auth + join_idle beim Oeffnen, Chat erneut betreten)
//!     +-- AnrufKanal   (SignalQueue, FIFO-Flush beim Oeffnen)
//!
//! socket – Verbinder-Trait, WebSocketVerbinder, Socket-Pumpe pro Generation
//! ```

pub mod anruf_kanal;
pub mod backoff;
pub mod error;
pub mod global_kanal;
pub mod socket;
pub mod verbindung;

// Bequeme Re-Exporte
pub use anruf_kanal::AnrufKanal;
pub use backoff::{BackoffKonfig, BackoffZaehler};
pub use error::{TransportFehler, TransportResult};
pub use global_kanal::GlobalKanal;
pub use socket::{
    socket_starten, SocketMeldung, TextQuelle, TextSenke, Verbinder, WebSocketVerbinder,
};
pub use verbindung::{Verbindung, VerbindungsEffekt, VerbindungsZustand};
