//! Konsolen-Befehle und Ereignisanzeige
//!
//! Eine Zeile von stdin wird zu einer `Eingabe`. Zeilen ohne fuehrenden
//! Schraegstrich sind ungueltig, leere Zeilen werden ignoriert.

use plauderei_core::event::{AnrufEreignis, SitzungsEreignis};
use plauderei_core::types::ChatId;
use plauderei_signaling::{Befehl, PresenzCache};
use thiserror::Error;

/// Kurzhilfe fuer `/hilfe`
pub const HILFE: &str = "\
/chat <id>            Chat betreten
/verlassen <id>       Chat verlassen
/senden <id> <text>   Nachricht senden
/tippen <id>          Tipp-Indikator senden
/anruf <id>           Anruf starten
/annehmen             Eingehenden Anruf annehmen
/ablehnen             Eingehenden Anruf ablehnen
/auflegen             Anruf beenden
/offline | /online    Netzwerkwechsel simulieren
/verbergen | /zeigen  Sichtbarkeitswechsel simulieren
/token <wert>         Neues Session-Token setzen
/wer [id]             Online-Benutzer, mit id auch wer dort tippt
/metriken             Prometheus-Metriken ausgeben
/ende                 Client beenden";

/// Fehler beim Parsen einer Konsolenzeile
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KonsolenFehler {
    #[error("Befehle beginnen mit '/', siehe /hilfe")]
    KeinBefehl,

    #[error("Unbekannter Befehl: /{0}")]
    Unbekannt(String),

    #[error("/{befehl} erwartet <{argument}>")]
    FehlendesArgument {
        befehl: &'static str,
        argument: &'static str,
    },

    #[error("Ungueltige Chat-ID: {0}")]
    UngueltigeChatId(String),
}

/// Ergebnis einer geparsten Zeile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eingabe {
    /// Wird an die Sitzung weitergereicht
    Befehl(Befehl),
    /// Presence abfragen, optional mit Tipp-Indikatoren eines Chats
    Wer(Option<ChatId>),
    Metriken,
    Hilfe,
}

/// Parst eine Zeile, `Ok(None)` fuer Leerzeilen
pub fn zeile_parsen(zeile: &str) -> Result<Option<Eingabe>, KonsolenFehler> {
    let zeile = zeile.trim();
    if zeile.is_empty() {
        return Ok(None);
    }
    let Some(rest) = zeile.strip_prefix('/') else {
        return Err(KonsolenFehler::KeinBefehl);
    };

    let (name, argumente) = match rest.split_once(char::is_whitespace) {
        Some((name, argumente)) => (name, argumente.trim()),
        None => (rest, ""),
    };

    let befehl = match name {
        "chat" => Befehl::ChatBetreten(chat_id("chat", argumente)?),
        "verlassen" => Befehl::ChatVerlassen(chat_id("verlassen", argumente)?),
        "senden" => {
            let (id, text) = argumente
                .split_once(char::is_whitespace)
                .map(|(id, text)| (id, text.trim()))
                .unwrap_or((argumente, ""));
            let chat_id = chat_id("senden", id)?;
            if text.is_empty() {
                return Err(KonsolenFehler::FehlendesArgument {
                    befehl: "senden",
                    argument: "text",
                });
            }
            Befehl::NachrichtSenden {
                chat_id,
                text: text.to_string(),
            }
        }
        "tippen" => Befehl::Tippen(chat_id("tippen", argumente)?),
        "anruf" => Befehl::AnrufStarten(chat_id("anruf", argumente)?),
        "annehmen" => Befehl::AnrufAnnehmen,
        "ablehnen" => Befehl::AnrufAblehnen,
        "auflegen" => Befehl::Auflegen,
        "offline" => Befehl::NetzwerkGeaendert { online: false },
        "online" => Befehl::NetzwerkGeaendert { online: true },
        "verbergen" => Befehl::SichtbarkeitGeaendert { sichtbar: false },
        "zeigen" => Befehl::SichtbarkeitGeaendert { sichtbar: true },
        "token" => {
            if argumente.is_empty() {
                return Err(KonsolenFehler::FehlendesArgument {
                    befehl: "token",
                    argument: "wert",
                });
            }
            Befehl::TokenSetzen(argumente.to_string())
        }
        "ende" => Befehl::Beenden,
        "wer" if argumente.is_empty() => return Ok(Some(Eingabe::Wer(None))),
        "wer" => return Ok(Some(Eingabe::Wer(Some(chat_id("wer", argumente)?)))),
        "metriken" => return Ok(Some(Eingabe::Metriken)),
        "hilfe" => return Ok(Some(Eingabe::Hilfe)),
        andere => return Err(KonsolenFehler::Unbekannt(andere.to_string())),
    };
    Ok(Some(Eingabe::Befehl(befehl)))
}

fn chat_id(befehl: &'static str, argument: &str) -> Result<ChatId, KonsolenFehler> {
    if argument.is_empty() {
        return Err(KonsolenFehler::FehlendesArgument {
            befehl,
            argument: "id",
        });
    }
    argument
        .parse::<u64>()
        .map(ChatId)
        .map_err(|_| KonsolenFehler::UngueltigeChatId(argument.to_string()))
}

/// Antwort auf `/wer`
pub fn presenz_beschreiben(presenz: &PresenzCache, chat_id: Option<ChatId>) -> String {
    let online = presenz.online_benutzer();
    let mut text = if online.is_empty() {
        "Niemand online".to_string()
    } else {
        format!("Online: {}", online.join(", "))
    };
    if let Some(chat_id) = chat_id {
        let tippende = presenz.tippende(chat_id);
        if !tippende.is_empty() {
            text.push_str(&format!("\n[{chat_id}] tippt: {}", tippende.join(", ")));
        }
    }
    text
}

/// Einzeilige Darstellung eines Sitzungsereignisses
pub fn ereignis_beschreiben(ereignis: &SitzungsEreignis) -> String {
    match ereignis {
        SitzungsEreignis::NeueNachricht {
            chat_id,
            username,
            text,
            zeitpunkt,
            ..
        } => format!("[{chat_id}] {} {username}: {text}", zeitpunkt.format("%H:%M")),
        SitzungsEreignis::Tippt { chat_id, username } => {
            format!("[{chat_id}] {username} tippt...")
        }
        SitzungsEreignis::Status { username, online } => {
            format!("{username} ist {}", if *online { "online" } else { "offline" })
        }
        SitzungsEreignis::ChatErstellt { chat_id, ersteller } => {
            format!("[{chat_id}] neuer Chat von {ersteller}")
        }
        SitzungsEreignis::Verbindung { kanal, offen } => {
            format!("Kanal {kanal} {}", if *offen { "offen" } else { "getrennt" })
        }
        SitzungsEreignis::AuthentifizierungFehlgeschlagen { grund } => {
            format!("Anmeldung fehlgeschlagen: {grund} (neues Token mit /token)")
        }
        SitzungsEreignis::Anruf(anruf) => anruf_beschreiben(anruf),
    }
}

fn anruf_beschreiben(ereignis: &AnrufEreignis) -> String {
    match ereignis {
        AnrufEreignis::Ausgehend { chat_id } => format!("[{chat_id}] Anruf wird aufgebaut"),
        AnrufEreignis::Eingehend { chat_id, von, .. } => {
            format!("[{chat_id}] Anruf von {von} (/annehmen oder /ablehnen)")
        }
        AnrufEreignis::Verbunden { chat_id } => format!("[{chat_id}] Anruf verbunden"),
        AnrufEreignis::GegenueberBeigetreten { von } => format!("{von} ist im Anruf"),
        AnrufEreignis::MedienVerbunden => "Audio steht".into(),
        AnrufEreignis::MedienUnterbrochen => "Audio unterbrochen".into(),
        AnrufEreignis::SpurEmpfangen { spur_id } => format!("Audiospur {spur_id} empfangen"),
        AnrufEreignis::TonStarten { ton } => format!("Ton: {ton:?}"),
        AnrufEreignis::TonStoppen => "Ton aus".into(),
        AnrufEreignis::Abgelehnt { chat_id } => format!("[{chat_id}] Anruf abgelehnt"),
        AnrufEreignis::Beendet { chat_id, grund } => {
            format!("[{chat_id}] Anruf beendet ({grund})")
        }
        AnrufEreignis::Zeitueberschreitung { chat_id } => {
            format!("[{chat_id}] Niemand hat reagiert")
        }
        AnrufEreignis::Fehler { grund } => format!("Anruffehler: {grund}"),
    }
}
