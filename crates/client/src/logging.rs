//! Logging der eingebetteten Engine (tracing-subscriber)
//!
//! `logging.level` ist eine EnvFilter-Direktive (`info` oder
//! `info,chorus_client=debug`). `CHORUS_LOG_LEVEL` und `CHORUS_LOG_FORMAT`
//! ueberschreiben die Konfiguration. Ein bereits installierter Subscriber der
//! Host-Anwendung bleibt aktiv.

use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingEinstellungen;

pub const LOG_LEVEL_ENV: &str = "CHORUS_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "CHORUS_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            anders => Err(format!("unbekanntes Format '{anders}'")),
        }
    }
}

/// Prueft eine Level-Direktive: jede kommagetrennte Angabe ist entweder ein
/// Level oder `ziel=level`.
pub fn level_pruefen(direktive: &str) -> Result<(), String> {
    if direktive.trim().is_empty() {
        return Err("darf nicht leer sein".into());
    }
    for teil in direktive.split(',').map(str::trim) {
        let level = teil.rsplit_once('=').map_or(teil, |(_, level)| level);
        if LevelFilter::from_str(level).is_err() {
            return Err(format!("unbekanntes Level in '{teil}'"));
        }
    }
    Ok(())
}

fn filter_fuer(einstellungen: &LoggingEinstellungen) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_LEVEL_ENV) {
        return filter;
    }
    EnvFilter::try_new(&einstellungen.level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn format_fuer(einstellungen: &LoggingEinstellungen) -> LogFormat {
    std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|wert| wert.parse().ok())
        .or_else(|| einstellungen.format.parse().ok())
        .unwrap_or_default()
}

/// Installiert den globalen Subscriber.
///
/// false, wenn schon einer gesetzt war.
pub fn init_logging(einstellungen: &LoggingEinstellungen) -> bool {
    let builder = fmt().with_env_filter(filter_fuer(einstellungen)).with_target(true);
    let ergebnis = match format_fuer(einstellungen) {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        LogFormat::Text => builder.compact().try_init(),
    };
    ergebnis.is_ok()
}
