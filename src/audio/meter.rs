use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Level reported when no audio has been seen yet, or the line is dead quiet.
pub(crate) const METER_FLOOR_DB: f32 = -100.0;

/// Shared microphone level in decibels.
///
/// Written by the capture callback, read by the energy monitor poller and any
/// UI that wants a live mic meter. Cloning shares the same cell.
#[derive(Clone, Debug)]
pub struct LiveMeter {
    level_bits: Arc<AtomicU32>,
}

impl LiveMeter {
    pub fn new() -> Self {
        Self {
            level_bits: Arc::new(AtomicU32::new(METER_FLOOR_DB.to_bits())),
        }
    }

    pub fn set_db(&self, db: f32) {
        self.level_bits.store(db.to_bits(), Ordering::Relaxed);
    }

    pub fn level_db(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

impl Default for LiveMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// RMS energy of a frame in decibels relative to full scale.
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return METER_FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    20.0 * rms.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_meter_defaults_to_floor() {
        let meter = LiveMeter::new();
        assert_eq!(meter.level_db(), METER_FLOOR_DB);
    }

    #[test]
    fn live_meter_updates_level() {
        let meter = LiveMeter::new();
        meter.set_db(-20.0);
        assert_eq!(meter.level_db(), -20.0);
    }

    #[test]
    fn clones_share_the_same_cell() {
        let meter = LiveMeter::new();
        let tap = meter.clone();
        meter.set_db(-35.0);
        assert_eq!(tap.level_db(), -35.0);
    }

    #[test]
    fn rms_db_handles_empty() {
        assert_eq!(rms_db(&[]), METER_FLOOR_DB);
    }

    #[test]
    fn rms_db_full_scale_sine_is_near_minus_three() {
        let samples: Vec<f32> = (0..1600)
            .map(|i| (i as f32 * 0.1).sin())
            .collect();
        let db = rms_db(&samples);
        assert!((-4.0..=-2.0).contains(&db), "got {db}");
    }
}
