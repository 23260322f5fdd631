//! Voice Activity Detection (VAD)
//!
//! Zwei unabhaengige Detektoren ueber normalisierte Samples:
//!
//! - Spitzenwert: irgendein |Sample| liegt ueber `peak_threshold`
//! - Energie: der mittlere quadrierte Wert liegt ueber `energy_threshold`
//!
//! Ein Frame gilt als Sprache, sobald einer der beiden anschlaegt.
//! Kein Hangover, keine Glaettung: jeder Frame wird fuer sich bewertet.

/// Konfiguration fuer die VAD
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Bei false gilt jeder Frame als Sprache
    pub enabled: bool,
    /// Schwellenwert fuer den Spitzenwert (normalisiert, 0.0..1.0)
    pub peak_threshold: f32,
    /// Schwellenwert fuer die mittlere Energie (normalisiert, 0.0..1.0)
    pub energy_threshold: f32,
}

impl VadConfig {
    /// Beide Detektoren mit demselben Schwellenwert
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            enabled: true,
            peak_threshold: threshold,
            energy_threshold: threshold,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::with_threshold(0.02)
    }
}

/// Voice Activity Detector
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Gibt zurueck ob der Frame Sprache enthaelt.
    /// Veraendert die Samples nicht.
    pub fn is_active(&self, samples: &[i16]) -> bool {
        if !self.config.enabled {
            return true;
        }
        if samples.is_empty() {
            return false;
        }
        peak_level(samples) > self.config.peak_threshold
            || mean_square(samples) > self.config.energy_threshold
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

/// Groesster Betrag eines normalisierten Samples
pub fn peak_level(samples: &[i16]) -> f32 {
    samples
        .iter()
        .map(|&s| crate::format::normalize(s).abs())
        .fold(0.0, f32::max)
}

/// Mittlerer quadrierter Wert der normalisierten Samples
pub fn mean_square(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let x = crate::format::normalize(s) as f64;
            x * x
        })
        .sum();
    (sum / samples.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinus(amplitude: f32, samples: usize) -> Vec<i16> {
        (0..samples)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48_000.0;
                (phase.sin() * amplitude * i16::MAX as f32) as i16
            })
            .collect()
    }

    #[test]
    fn vollaussteuerung_ist_aktiv() {
        let vad = VoiceActivityDetector::default();
        assert!(vad.is_active(&sinus(1.0, 960)));
    }

    #[test]
    fn stille_ist_inaktiv() {
        let vad = VoiceActivityDetector::default();
        assert!(!vad.is_active(&vec![0i16; 960]));
    }

    #[test]
    fn energie_detektor_allein() {
        // Gleichmaessige Amplitude 0.3: Spitze 0.3 < 0.5, Energie 0.09 > 0.05
        let config = VadConfig {
            enabled: true,
            peak_threshold: 0.5,
            energy_threshold: 0.05,
        };
        let samples = vec![(0.3 * 32768.0) as i16; 960];
        assert!(peak_level(&samples) < config.peak_threshold);
        assert!(mean_square(&samples) > config.energy_threshold);
        assert!(VoiceActivityDetector::new(config).is_active(&samples));
    }

    #[test]
    fn spitzen_detektor_allein() {
        // Ein einzelner Ausreisser: Energie winzig, Spitze hoch
        let config = VadConfig::with_threshold(0.1);
        let mut samples = vec![0i16; 960];
        samples[500] = -20_000;
        assert!(mean_square(&samples) < config.energy_threshold);
        assert!(VoiceActivityDetector::new(config).is_active(&samples));
    }

    #[test]
    fn negative_spitze_zaehlt() {
        let vad = VoiceActivityDetector::new(VadConfig::with_threshold(0.5));
        assert!(vad.is_active(&[0, -30_000, 0]));
    }

    #[test]
    fn leises_rauschen_ist_inaktiv() {
        let vad = VoiceActivityDetector::default();
        assert!(!vad.is_active(&sinus(0.01, 960)));
    }

    #[test]
    fn deaktivierte_vad_laesst_alles_durch() {
        let vad = VoiceActivityDetector::new(VadConfig::disabled());
        assert!(vad.is_active(&vec![0i16; 960]));
    }
}
