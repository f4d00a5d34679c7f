//! Gemeinsame Identifikationstypen fuer Plauderei
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Auf dem Draht
//! erscheinen sie transparent als Zahl bzw. String.

use serde::{Deserialize, Serialize};

/// ID einer Konversation (Chat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub u64);

impl ChatId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chat:{}", self.0)
    }
}

/// ID einer Chat-Nachricht, Grundlage der Deduplizierung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg:{}", self.0)
    }
}

/// Korrelations-ID eines Anrufversuchs
///
/// Opak: wird vom Server vergeben und nur auf Gleichheit verglichen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_display() {
        assert_eq!(ChatId(7).to_string(), "chat:7");
    }

    #[test]
    fn ids_sind_transparent_auf_dem_draht() {
        assert_eq!(serde_json::to_string(&ChatId(9)).unwrap(), "9");
        assert_eq!(serde_json::to_string(&CallId::neu("A")).unwrap(), "\"A\"");
        let mid: MessageId = serde_json::from_str("42").unwrap();
        assert_eq!(mid, MessageId(42));
    }

    #[test]
    fn call_id_vergleich() {
        assert_eq!(CallId::neu("abc"), CallId::neu(String::from("abc")));
        assert_ne!(CallId::neu("A"), CallId::neu("B"));
    }
}
