//! plauderei-protocol – Frame-Definitionen beider Kanaele
//!
//! Dieses Crate definiert alle Frames die zwischen Client und Server
//! ausgetauscht werden: den globalen Kanal (`global`), den Anrufkanal
//! (`anruf`) und den gemeinsamen JSON-Textcodec (`wire`).

pub mod anruf;
pub mod global;
pub mod wire;

pub use anruf::{IceKandidat, SignalFrame};
pub use global::{AnrufStatusWert, AusgehenderFrame, EingehenderFrame};
pub use wire::{TextCodec, WireFehler};
