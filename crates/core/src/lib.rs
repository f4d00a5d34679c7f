//! plauderei-core – Gemeinsame Typen, Fehlertypen und Ereignisse
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Plauderei-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{PlaudereiError, Result};
pub use event::{AnrufEreignis, KanalArt, SitzungsEreignis, Ton};
pub use types::{CallId, ChatId, MessageId};
