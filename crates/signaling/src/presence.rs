//! Presence-Cache – Online-Status und Tipp-Indikatoren
//!
//! Haelt den ephemeren Zustand aus `user_status`- und `user_typing`-Frames,
//! damit UI-Code ihn jederzeit abfragen kann. Tipp-Indikatoren verfallen
//! nach `tipp_dauer`, eine neue Nachricht des Benutzers beendet sie sofort.
//! Aenderungen meldet der Router als `SitzungsEreignis`, der Cache selbst
//! wird nur abgefragt.

use dashmap::DashMap;
use plauderei_core::types::ChatId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Standard-Dauer eines Tipp-Indikators
pub const STANDARD_TIPP_DAUER: Duration = Duration::from_secs(5);

/// Online-Status und Tipp-Indikatoren aller bekannten Benutzer
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenzCache {
    inner: Arc<PresenzCacheInner>,
}

struct PresenzCacheInner {
    /// Username -> online
    status: DashMap<String, bool>,
    /// Chat -> (Username, Zeitpunkt des letzten `user_typing`)
    tippend: DashMap<ChatId, Vec<(String, Instant)>>,
    tipp_dauer: Duration,
}

impl PresenzCache {
    /// Erstellt einen leeren Cache
    pub fn neu() -> Self {
        Self::mit_tipp_dauer(STANDARD_TIPP_DAUER)
    }

    pub fn mit_tipp_dauer(tipp_dauer: Duration) -> Self {
        Self {
            inner: Arc::new(PresenzCacheInner {
                status: DashMap::new(),
                tippend: DashMap::new(),
                tipp_dauer,
            }),
        }
    }

    /// Uebernimmt einen `user_status`-Frame
    pub fn status_setzen(&self, username: &str, online: bool) {
        let vorher = self.inner.status.insert(username.to_string(), online);
        if vorher == Some(online) {
            return;
        }
        if !online {
            self.tippen_beenden_ueberall(username);
        }

        tracing::debug!(username, online, "Presence geaendert");
    }

    /// Uebernimmt einen `user_typing`-Frame
    pub fn tippen(&self, chat_id: ChatId, username: &str) {
        let jetzt = Instant::now();
        let mut eintraege = self.inner.tippend.entry(chat_id).or_default();
        match eintraege.iter_mut().find(|(name, _)| name == username) {
            Some(eintrag) => eintrag.1 = jetzt,
            None => eintraege.push((username.to_string(), jetzt)),
        }
    }

    /// Nachricht von `username` in `chat_id` erhalten: Tipp-Indikator endet
    pub fn nachricht_erhalten(&self, chat_id: ChatId, username: &str) {
        self.tippen_beenden(chat_id, username);
    }

    /// Prueft ob ein Benutzer online ist
    pub fn ist_online(&self, username: &str) -> bool {
        self.inner
            .status
            .get(username)
            .map(|e| *e.value())
            .unwrap_or(false)
    }

    /// Alle online Benutzer, alphabetisch
    pub fn online_benutzer(&self) -> Vec<String> {
        let mut namen: Vec<String> = self
            .inner
            .status
            .iter()
            .filter(|e| *e.value())
            .map(|e| e.key().clone())
            .collect();
        namen.sort();
        namen
    }

    pub fn online_anzahl(&self) -> usize {
        self.inner.status.iter().filter(|e| *e.value()).count()
    }

    /// Benutzer die in einem Chat gerade tippen (abgelaufene ausgenommen)
    pub fn tippende(&self, chat_id: ChatId) -> Vec<String> {
        let jetzt = Instant::now();
        self.inner
            .tippend
            .get(&chat_id)
            .map(|eintraege| {
                eintraege
                    .iter()
                    .filter(|(_, seit)| jetzt.duration_since(*seit) < self.inner.tipp_dauer)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entfernt abgelaufene Tipp-Indikatoren
    pub fn aufraeumen(&self) {
        let jetzt = Instant::now();
        let dauer = self.inner.tipp_dauer;
        self.inner.tippend.retain(|_, eintraege| {
            eintraege.retain(|(_, seit)| jetzt.duration_since(*seit) < dauer);
            !eintraege.is_empty()
        });
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsmethoden
    // -----------------------------------------------------------------------

    fn tippen_beenden(&self, chat_id: ChatId, username: &str) {
        if let Some(mut eintraege) = self.inner.tippend.get_mut(&chat_id) {
            eintraege.retain(|(name, _)| name != username);
            let ist_leer = eintraege.is_empty();
            drop(eintraege);
            if ist_leer {
                self.inner.tippend.remove(&chat_id);
            }
        }
    }

    fn tippen_beenden_ueberall(&self, username: &str) {
        self.inner.tippend.retain(|_, eintraege| {
            eintraege.retain(|(name, _)| name != username);
            !eintraege.is_empty()
        });
    }
}

impl Default for PresenzCache {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Debug for PresenzCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenzCache")
            .field("online", &self.online_anzahl())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
