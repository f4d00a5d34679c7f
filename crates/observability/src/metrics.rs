//! Prometheus-kompatible Metriken einer Client-Sitzung
//!
//! Registrierte Metriken:
//! - `plauderei_reconnects_total{kanal}` – Counter: Geplante Reconnects
//! - `plauderei_reconnect_verzoegerung_sekunden{kanal}` – Histogram: Backoff-Verzoegerungen
//! - `plauderei_frames_verworfen_total{grund}` – Counter: Verworfene Frames
//! - `plauderei_duplikate_total` – Counter: Vom Dedup-Ledger unterdrueckte Nachrichten
//! - `plauderei_anruf_uebergaenge_total{zustand}` – Counter: Eintritte in Anrufzustaende
//! - `plauderei_verbindung_offen{kanal}` – Gauge: 1 wenn der Kanal offen ist

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Alle Metriken einer Sitzung in einer eigenen Registry
#[derive(Clone)]
pub struct SitzungsMetriken {
    pub registry: Arc<Registry>,

    pub reconnects_total: IntCounterVec,
    pub reconnect_verzoegerung_sekunden: HistogramVec,
    pub frames_verworfen_total: IntCounterVec,
    pub duplikate_total: IntCounter,
    pub anruf_uebergaenge_total: IntCounterVec,
    pub verbindung_offen: IntGaugeVec,
}

impl SitzungsMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Verbindungen ---
        let reconnects_total = IntCounterVec::new(
            Opts::new("plauderei_reconnects_total", "Anzahl geplanter Reconnects"),
            &["kanal"],
        )?;
        registry.register(Box::new(reconnects_total.clone()))?;

        let reconnect_verzoegerung_sekunden = HistogramVec::new(
            HistogramOpts::new(
                "plauderei_reconnect_verzoegerung_sekunden",
                "Backoff-Verzoegerung vor dem Reconnect in Sekunden",
            )
            .buckets(vec![0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0]),
            &["kanal"],
        )?;
        registry.register(Box::new(reconnect_verzoegerung_sekunden.clone()))?;

        let verbindung_offen = IntGaugeVec::new(
            Opts::new("plauderei_verbindung_offen", "1 wenn der Kanal offen ist"),
            &["kanal"],
        )?;
        registry.register(Box::new(verbindung_offen.clone()))?;

        // --- Frames ---
        let frames_verworfen_total = IntCounterVec::new(
            Opts::new(
                "plauderei_frames_verworfen_total",
                "Verworfene Frames nach Grund",
            ),
            &["grund"],
        )?;
        registry.register(Box::new(frames_verworfen_total.clone()))?;

        let duplikate_total = IntCounter::with_opts(Opts::new(
            "plauderei_duplikate_total",
            "Vom Dedup-Ledger unterdrueckte Nachrichten",
        ))?;
        registry.register(Box::new(duplikate_total.clone()))?;

        // --- Anrufe ---
        let anruf_uebergaenge_total = IntCounterVec::new(
            Opts::new(
                "plauderei_anruf_uebergaenge_total",
                "Eintritte in Anrufzustaende",
            ),
            &["zustand"],
        )?;
        registry.register(Box::new(anruf_uebergaenge_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            reconnects_total,
            reconnect_verzoegerung_sekunden,
            frames_verworfen_total,
            duplikate_total,
            anruf_uebergaenge_total,
            verbindung_offen,
        })
    }

    /// Reconnect fuer einen Kanal geplant
    pub fn reconnect_geplant(&self, kanal: &str, verzoegerung: Duration) {
        self.reconnects_total.with_label_values(&[kanal]).inc();
        self.reconnect_verzoegerung_sekunden
            .with_label_values(&[kanal])
            .observe(verzoegerung.as_secs_f64());
    }

    pub fn frame_verworfen(&self, grund: &str) {
        self.frames_verworfen_total.with_label_values(&[grund]).inc();
    }

    pub fn duplikat(&self) {
        self.duplikate_total.inc();
    }

    pub fn anruf_uebergang(&self, zustand: &str) {
        self.anruf_uebergaenge_total
            .with_label_values(&[zustand])
            .inc();
    }

    pub fn verbindung_setzen(&self, kanal: &str, offen: bool) {
        self.verbindung_offen
            .with_label_values(&[kanal])
            .set(i64::from(offen));
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn text_export(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl std::fmt::Debug for SitzungsMetriken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitzungsMetriken").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = SitzungsMetriken::neu().unwrap();
        metriken.duplikat();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn zwei_sitzungen_haben_getrennte_registries() {
        let a = SitzungsMetriken::neu().unwrap();
        let b = SitzungsMetriken::neu().unwrap();
        a.duplikat();
        assert_eq!(a.duplikate_total.get(), 1);
        assert_eq!(b.duplikate_total.get(), 0);
    }

    #[test]
    fn counter_mit_labels() {
        let metriken = SitzungsMetriken::neu().unwrap();
        metriken.frame_verworfen("ungueltig");
        metriken.frame_verworfen("ungueltig");
        metriken.frame_verworfen("nicht_offen");
        assert_eq!(
            metriken
                .frames_verworfen_total
                .with_label_values(&["ungueltig"])
                .get(),
            2
        );
    }

    #[test]
    fn reconnect_zaehlt_und_beobachtet() {
        let metriken = SitzungsMetriken::neu().unwrap();
        metriken.reconnect_geplant("global", Duration::from_millis(900));
        metriken.reconnect_geplant("global", Duration::from_millis(1900));
        assert_eq!(
            metriken.reconnects_total.with_label_values(&["global"]).get(),
            2
        );
        let histogramm = metriken
            .reconnect_verzoegerung_sekunden
            .with_label_values(&["global"]);
        assert_eq!(histogramm.get_sample_count(), 2);
    }

    #[test]
    fn gauge_verbindung() {
        let metriken = SitzungsMetriken::neu().unwrap();
        metriken.verbindung_setzen("anruf", true);
        assert_eq!(metriken.verbindung_offen.with_label_values(&["anruf"]).get(), 1);
        metriken.verbindung_setzen("anruf", false);
        assert_eq!(metriken.verbindung_offen.with_label_values(&["anruf"]).get(), 0);
    }

    #[test]
    fn export_prometheus_format() {
        let metriken = SitzungsMetriken::neu().unwrap();
        metriken.anruf_uebergang("im_gespraech");
        metriken.verbindung_setzen("global", true);

        let output = metriken.text_export().unwrap();
        assert!(output.contains("plauderei_anruf_uebergaenge_total{zustand=\"im_gespraech\"} 1"));
        assert!(output.contains("plauderei_verbindung_offen{kanal=\"global\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
