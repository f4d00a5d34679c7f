//! Token-Auffrischung mit Single-Flight
//!
//! Das erste `auth_error` einer Sitzung loest genau eine Auffrischung aus.
//! Gleichzeitige Anfragen haengen sich an die laufende Auffrischung an
//! (`Shared`-Future) statt eine zweite zu starten. Ein `auth_error` direkt
//! nach der Neuanmeldung gibt auf. Erst wenn der Server das aufgefrischte
//! Token akzeptiert hat (irgendein anderes Frame folgt) oder der Benutzer
//! ein Token setzt, ist wieder eine Auffrischung erlaubt.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Fehler beim Auffrischen des Tokens
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFehler {
    /// Server hat die Auffrischung abgelehnt
    #[error("Auffrischung abgelehnt: {0}")]
    Abgelehnt(String),

    /// Auffrischung nicht erreichbar
    #[error("Auffrischung nicht erreichbar: {0}")]
    Netzwerk(String),

    /// Kein Auffrischer konfiguriert
    #[error("Kein Token-Auffrischer konfiguriert")]
    KeinAuffrischer,
}

/// Holt ein neues Token (z.B. per Refresh-Token beim Backend)
#[async_trait]
pub trait TokenAuffrischer: Send + Sync {
    async fn auffrischen(&self) -> Result<String, AuthFehler>;
}

/// Gemeinsam genutzte, laufende Auffrischung
pub type Auffrischung = Shared<BoxFuture<'static, Result<String, AuthFehler>>>;

/// Entscheidung nach einem `auth_error`
pub enum AuthSchritt {
    /// Neue Auffrischung gestartet, Ergebnis abwarten
    Auffrischen(Auffrischung),
    /// Eine Auffrischung laeuft bereits
    Laeuft,
    /// Auffrischung verbraucht oder nicht moeglich
    Aufgeben,
}

impl std::fmt::Debug for AuthSchritt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auffrischen(_) => f.write_str("Auffrischen"),
            Self::Laeuft => f.write_str("Laeuft"),
            Self::Aufgeben => f.write_str("Aufgeben"),
        }
    }
}

/// Verwaltet Auffrischungen einer Sitzung
pub struct TokenVerwaltung {
    auffrischer: Option<Arc<dyn TokenAuffrischer>>,
    laufend: Mutex<Option<Auffrischung>>,
    verbraucht: AtomicBool,
    unbestaetigt: AtomicBool,
}

impl TokenVerwaltung {
    pub fn neu(auffrischer: Option<Arc<dyn TokenAuffrischer>>) -> Self {
        Self {
            auffrischer,
            laufend: Mutex::new(None),
            verbraucht: AtomicBool::new(false),
            unbestaetigt: AtomicBool::new(false),
        }
    }

    /// Startet eine Auffrischung oder haengt sich an die laufende an
    pub fn auffrischen(&self) -> Auffrischung {
        let mut laufend = self.laufend.lock();
        if let Some(f) = laufend.as_ref() {
            if f.peek().is_none() {
                return f.clone();
            }
        }

        let auffrischer = self.auffrischer.clone();
        let future = async move {
            match auffrischer {
                Some(a) => {
                    tracing::info!("Token wird aufgefrischt");
                    a.auffrischen().await
                }
                None => Err(AuthFehler::KeinAuffrischer),
            }
        }
        .boxed()
        .shared();
        *laufend = Some(future.clone());
        future
    }

    /// Reaktion auf ein `auth_error` des Servers
    pub fn auth_fehler(&self) -> AuthSchritt {
        // Aufgefrischtes Token wurde abgelehnt
        self.unbestaetigt.store(false, Ordering::SeqCst);
        if self.auffrischer.is_none() {
            return AuthSchritt::Aufgeben;
        }
        if self.laeuft() {
            return AuthSchritt::Laeuft;
        }
        if self.verbraucht.swap(true, Ordering::SeqCst) {
            return AuthSchritt::Aufgeben;
        }
        AuthSchritt::Auffrischen(self.auffrischen())
    }

    /// Benutzer hat ein neues Token gesetzt: Auffrischung wieder erlaubt
    pub fn zuruecksetzen(&self) {
        self.unbestaetigt.store(false, Ordering::SeqCst);
        self.verbraucht.store(false, Ordering::SeqCst);
    }

    /// Aufgefrischtes Token wurde uebernommen, Bestaetigung steht aus
    pub fn aufgefrischt_uebernommen(&self) {
        self.unbestaetigt.store(true, Ordering::SeqCst);
    }

    /// Server hat nach der Neuanmeldung mit etwas anderem als `auth_error`
    /// geantwortet
    ///
    /// Gibt das Budget fuer die naechste Auffrischung frei. Liefert `true`,
    /// wenn damit eine ausstehende Bestaetigung erledigt wurde.
    pub fn server_akzeptiert(&self) -> bool {
        if self.unbestaetigt.swap(false, Ordering::SeqCst) {
            self.verbraucht.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Laeuft gerade eine Auffrischung
    pub fn laeuft(&self) -> bool {
        self.laufend
            .lock()
            .as_ref()
            .map(|f| f.peek().is_none())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for TokenVerwaltung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerwaltung")
            .field("auffrischer", &self.auffrischer.is_some())
            .field("laeuft", &self.laeuft())
            .field("verbraucht", &self.verbraucht.load(Ordering::SeqCst))
            .field("unbestaetigt", &self.unbestaetigt.load(Ordering::SeqCst))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct LangsamerAuffrischer {
        aufrufe: AtomicUsize,
    }

    #[async_trait]
    impl TokenAuffrischer for LangsamerAuffrischer {
        async fn auffrischen(&self) -> Result<String, AuthFehler> {
            let n = self.aufrufe.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(format!("token-{n}"))
        }
    }

    fn verwaltung() -> (TokenVerwaltung, Arc<LangsamerAuffrischer>) {
        let auffrischer = Arc::new(LangsamerAuffrischer {
            aufrufe: AtomicUsize::new(0),
        });
        (TokenVerwaltung::neu(Some(auffrischer.clone())), auffrischer)
    }

    #[tokio::test(start_paused = true)]
    async fn gleichzeitige_auffrischungen_teilen_sich_einen_aufruf() {
        let (v, auffrischer) = verwaltung();
        let a = v.auffrischen();
        let b = v.auffrischen();
        assert!(v.laeuft());

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra, Ok("token-1".to_string()));
        assert_eq!(rb, Ok("token-1".to_string()));
        assert_eq!(auffrischer.aufrufe.load(Ordering::SeqCst), 1);
        assert!(!v.laeuft());

        // Nach Abschluss startet die naechste Anfrage neu
        assert_eq!(v.auffrischen().await, Ok("token-2".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn nur_eine_auffrischung_pro_token() {
        let (v, _) = verwaltung();
        let AuthSchritt::Auffrischen(f) = v.auth_fehler() else {
            panic!("Auffrischung erwartet");
        };
        assert!(matches!(v.auth_fehler(), AuthSchritt::Laeuft));
        assert_eq!(f.await, Ok("token-1".to_string()));

        assert!(matches!(v.auth_fehler(), AuthSchritt::Aufgeben));

        v.zuruecksetzen();
        assert!(matches!(v.auth_fehler(), AuthSchritt::Auffrischen(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn akzeptiertes_token_erlaubt_die_naechste_auffrischung() {
        let (v, auffrischer) = verwaltung();
        let AuthSchritt::Auffrischen(f) = v.auth_fehler() else {
            panic!("Auffrischung erwartet");
        };
        assert_eq!(f.await, Ok("token-1".to_string()));
        v.aufgefrischt_uebernommen();

        // Server antwortet normal: Token ist akzeptiert
        assert!(v.server_akzeptiert());
        assert!(!v.server_akzeptiert());

        // Spaeterer Ablauf frischt erneut auf
        let AuthSchritt::Auffrischen(f) = v.auth_fehler() else {
            panic!("zweite Auffrischung erwartet");
        };
        assert_eq!(f.await, Ok("token-2".to_string()));
        assert_eq!(auffrischer.aufrufe.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abgelehntes_aufgefrischtes_token_gibt_auf() {
        let (v, _) = verwaltung();
        let AuthSchritt::Auffrischen(f) = v.auth_fehler() else {
            panic!("Auffrischung erwartet");
        };
        f.await.unwrap();
        v.aufgefrischt_uebernommen();

        assert!(matches!(v.auth_fehler(), AuthSchritt::Aufgeben));
        // Spaetere Frames geben das Budget nicht mehr frei
        assert!(!v.server_akzeptiert());
        assert!(matches!(v.auth_fehler(), AuthSchritt::Aufgeben));
    }

    #[tokio::test]
    async fn ohne_auffrischer_wird_aufgegeben() {
        let v = TokenVerwaltung::neu(None);
        assert!(matches!(v.auth_fehler(), AuthSchritt::Aufgeben));
        assert_eq!(v.auffrischen().await, Err(AuthFehler::KeinAuffrischer));
    }
}
