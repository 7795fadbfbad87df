//! The mini-world verification judge (§4.6): five criteria, all of which
//! must hold at the moment of judgement for a PASS.

use std::time::Duration;

use crate::config::AntiBotConfig;
use crate::error::VerificationError;

const MIN_ELAPSED: Duration = Duration::from_secs(3);
/// Below this horizontal delta a movement is treated as a no-op (vertical
/// jitter, looking around in place) and contributes no octant.
const OCTANT_EPSILON: f64 = 1e-3;
/// A timing sample this uniform reads as scripted rather than human.
const TIMING_STDDEV_EPSILON_MS: f64 = 5.0;

/// One recorded movement's horizontal displacement, in world blocks.
#[derive(Debug, Clone, Copy)]
pub struct MovementDelta {
    pub dx: f64,
    pub dz: f64,
}

/// Buckets a horizontal delta into one of 8 compass octants, or `None` for
/// a vertical-only/no-op movement (§4.6.2).
fn octant(d: MovementDelta) -> Option<u8> {
    if d.dx.abs() < OCTANT_EPSILON && d.dz.abs() < OCTANT_EPSILON {
        return None;
    }
    let angle = d.dz.atan2(d.dx); // (-pi, pi]
    let step = std::f64::consts::PI / 4.0;
    let normalized = (((angle + std::f64::consts::PI) / step).floor() as i64).rem_euclid(8);
    Some(normalized as u8)
}

/// Counts direction changes between consecutive non-"none" octants,
/// skipping no-op movements entirely rather than treating them as a
/// direction change.
fn direction_changes(deltas: &[MovementDelta]) -> u32 {
    let mut last: Option<u8> = None;
    let mut changes = 0u32;
    for d in deltas {
        let Some(o) = octant(*d) else { continue };
        if let Some(prev) = last {
            if prev != o {
                changes += 1;
            }
        }
        last = Some(o);
    }
    changes
}

/// Standard deviation of a sample of millisecond intervals.
fn stddev_ms(intervals_ms: &[f64]) -> f64 {
    if intervals_ms.len() < 2 {
        return 0.0;
    }
    let mean = intervals_ms.iter().sum::<f64>() / intervals_ms.len() as f64;
    let variance = intervals_ms
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / intervals_ms.len() as f64;
    variance.sqrt()
}

/// Evaluates the five PASS criteria against one mini-world sample.
/// Returns the first failing criterion, or `Ok(())` on a full PASS.
pub fn judge(
    deltas: &[MovementDelta],
    total_distance: f64,
    elapsed: Duration,
    interval_samples_ms: &[f64],
    cfg: &AntiBotConfig,
) -> Result<(), VerificationError> {
    let movements = deltas.len() as u32;
    if movements < cfg.mini_world_min_movements {
        return Err(VerificationError::TooFewMovements {
            got: movements,
            min: cfg.mini_world_min_movements,
        });
    }

    if total_distance < cfg.mini_world_min_distance {
        return Err(VerificationError::DistanceTooShort {
            got: total_distance,
            min: cfg.mini_world_min_distance,
        });
    }

    if elapsed < MIN_ELAPSED {
        return Err(VerificationError::InsufficientElapsed);
    }

    let floor = (cfg.mini_world_min_movements / 2).max(2);
    if direction_changes(deltas) < floor {
        return Err(VerificationError::MovementTooSimple);
    }

    if stddev_ms(interval_samples_ms) <= TIMING_STDDEV_EPSILON_MS {
        return Err(VerificationError::UnnaturalTiming);
    }

    Ok(())
}
