use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Below this linear volume the output is silenced completely.
const SILENCE_THRESHOLD: f32 = 0.01;

/// Largest volume accepted from users (200%).
pub const MAX_VOLUME: f32 = 2.0;

/// Volume setting shared by every [`PacketSource`](super::packet_source::PacketSource)
/// created from the same handle.
///
/// Cloning the handle shares the value: a write through any clone is seen by
/// every source on its next audio frame.
#[derive(Debug, Clone)]
pub struct Volume {
    level: Arc<RwLock<f32>>,
}

impl Volume {
    pub fn new(level: f32) -> Self {
        Self {
            level: Arc::new(RwLock::new(level.clamp(0.0, MAX_VOLUME))),
        }
    }

    pub fn get(&self) -> f32 {
        *self.level.read()
    }

    /// Sets the linear volume, clamped to `0.0..=MAX_VOLUME`.
    pub fn set(&self, level: f32) -> f32 {
        let clamped = level.clamp(0.0, MAX_VOLUME);
        *self.level.write() = clamped;
        info!("🔊 Volumen ajustado a {}%", (clamped * 100.0).round() as u32);
        clamped
    }

    /// Gain in decibels for the current level.
    pub fn db_gain(&self) -> f64 {
        db_gain(self.get())
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Converts a linear volume into a decibel adjustment using the VLC curve:
/// `25 * ln(v)`, or negative infinity below 0.01.
pub fn db_gain(volume: f32) -> f64 {
    if volume < SILENCE_THRESHOLD {
        f64::NEG_INFINITY
    } else {
        25.0 * f64::from(volume).ln()
    }
}

/// Scales interleaved 16-bit samples in place by `gain_db`, saturating at the
/// sample range.
pub fn apply_gain(samples: &mut [i16], gain_db: f64) {
    if gain_db == f64::NEG_INFINITY {
        samples.fill(0);
        return;
    }

    let factor = 10f64.powf(gain_db / 20.0);
    for sample in samples.iter_mut() {
        let scaled = (f64::from(*sample) * factor).round();
        *sample = scaled.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    }
}
