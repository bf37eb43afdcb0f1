//! Volume units.
//!
//! The engine accumulates volume in native units: a base-2 exponent where
//! 0.0 is unity gain and every 10 percent on the human scale is one unit.
//! Percent 0 maps to `MIN_VOLUME`, which is treated as silence.

/// Native volume at 100 percent.
pub const MAX_VOLUME: f64 = 0.0;
/// Native volume at 0 percent (silent).
pub const MIN_VOLUME: f64 = -10.0;

const PERCENT_PER_UNIT: f64 = 10.0;

pub fn percent_to_volume(percent: i64) -> f64 {
    let percent = percent.clamp(0, 100) as f64;
    (percent - 100.0) / PERCENT_PER_UNIT
}

pub fn volume_to_percent(volume: f64) -> i64 {
    (volume * PERCENT_PER_UNIT + 100.0).round().clamp(0.0, 100.0) as i64
}

/// Linear gain for a native volume.
pub fn gain(volume: f64) -> f32 {
    if volume <= MIN_VOLUME {
        0.0
    } else {
        2f64.powf(volume.min(MAX_VOLUME)) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_endpoints() {
        assert_eq!(percent_to_volume(100), MAX_VOLUME);
        assert_eq!(percent_to_volume(0), MIN_VOLUME);
        assert_eq!(percent_to_volume(250), MAX_VOLUME);
        assert_eq!(volume_to_percent(percent_to_volume(80)), 80);
    }

    #[test]
    fn gain_is_unity_at_full_and_silent_at_zero() {
        assert_eq!(gain(MAX_VOLUME), 1.0);
        assert_eq!(gain(MIN_VOLUME), 0.0);
        assert!((gain(-1.0) - 0.5).abs() < 1e-6);
    }
}
