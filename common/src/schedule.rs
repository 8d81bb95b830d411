use std::f64::consts::FRAC_PI_2;

use chrono::Timelike;

use crate::{
    config::PersistedSettings,
    types::{SolarPoint, MINUTES_PER_DAY},
};

pub fn minutes_since_midnight<T: Timelike>(time: &T) -> u16 {
    (time.hour() * 60 + time.minute()) as u16
}

/// Maps a minute of the day onto the solar curve.
///
/// Morning eases from the sun-up anchor towards solar noon, afternoon eases
/// back towards sun-down, both along a quarter sine. Outside
/// `[sun_up, sun_down]` the night values hold. A zero-length half of the day
/// (noon on an edge anchor) resolves to the solar-noon values at that minute.
pub fn schedule_for(minutes: u16, settings: &PersistedSettings) -> SolarPoint {
    let t = minutes as f64;
    let up = settings.sun_up.minutes() as f64;
    let noon = settings.solar_noon.minutes() as f64;
    let down = settings.sun_down.minutes() as f64;

    if t < up || t > down {
        return SolarPoint {
            cct: settings.night_cct,
            dim: settings.sun_down_dim,
        };
    }

    let (progress, edge_dim) = if t < noon {
        (ease(t - up, noon - up), settings.sun_up_dim)
    } else {
        (ease(down - t, down - noon), settings.sun_down_dim)
    };

    let cct = (progress * 255.0).round().clamp(0.0, 255.0) as u8;
    let blended =
        progress * settings.solar_noon_dim as f64 + (1.0 - progress) * edge_dim as f64;
    let dim = blended
        .round()
        .clamp(0.0, settings.solar_noon_dim as f64) as u8;

    SolarPoint { cct, dim }
}

fn ease(elapsed: f64, span: f64) -> f64 {
    if span <= 0.0 {
        return 1.0;
    }
    (elapsed / span * FRAC_PI_2).sin().clamp(0.0, 1.0)
}

/// Synthetic clock for the cycle review: walks from two hours before sun-up
/// to two hours after sun-down (by default) in fixed steps, clamped to the
/// day.
#[derive(Debug, Clone)]
pub struct CycleReview {
    cursor: u16,
    end: u16,
    step: u16,
    done: bool,
}

impl CycleReview {
    pub fn new(settings: &PersistedSettings, margin_minutes: u16, step_minutes: u16) -> Self {
        let start = settings.sun_up.minutes().saturating_sub(margin_minutes);
        let end = settings
            .sun_down
            .minutes()
            .saturating_add(margin_minutes)
            .min(MINUTES_PER_DAY - 1);

        Self {
            cursor: start,
            end,
            step: step_minutes.max(1),
            done: start > end,
        }
    }
}

impl Iterator for CycleReview {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        if self.done {
            return None;
        }

        let current = self.cursor;
        if current >= self.end {
            self.done = true;
            return Some(self.end);
        }

        self.cursor = current.saturating_add(self.step).min(self.end);
        Some(current)
    }
}
