//! Hit pacing.
//!
//! A [`Pacer`] decides *when* the next hit should be issued as a pure function
//! of the elapsed run time and the number of hits already issued. It never
//! looks at what is executed. The runner sleeps for whatever [`Pacer::pace`]
//! returns, so a pacer that falls behind simply returns zero until the
//! schedule has caught up.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::utils::parse_duration_string;

/// Errors raised while building a pacer. All of them are fatal configuration
/// errors: a run never starts with an invalid schedule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacerError {
    #[error("rate frequency can't be negative (got {0})")]
    NegativeRate(i64),

    #[error("rate period must be greater than zero when the frequency is {0}")]
    ZeroPeriod(u64),

    #[error("ramp needs at least one control point")]
    EmptyRamp,

    #[error("ramp control points must be sorted by offset (point {index} at {offset:?} comes before {previous:?})")]
    UnsortedPoints {
        index: usize,
        offset: Duration,
        previous: Duration,
    },

    #[error("invalid rate '{0}': expected '<count>/<period>', e.g. '30/1m' or '2/s'")]
    InvalidRate(String),
}

/// Defines the rate of hits during a run.
pub trait Pacer: Send + Sync {
    /// Returns how long to wait before issuing the next hit, given the
    /// elapsed run time and the number of hits issued so far.
    fn pace(&self, elapsed: Duration, hits: u64) -> Duration;

    /// Returns the instantaneous hit rate (hits per second) at `elapsed`.
    /// A constant rate of zero means unbounded.
    fn rate(&self, elapsed: Duration) -> f64;
}

/// Target throughput: `freq` hits every `per`.
///
/// A frequency of zero means "unbounded": hits are issued as fast as workers
/// accept them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    freq: u64,
    per: Duration,
}

impl Rate {
    pub fn new(freq: i64, per: Duration) -> Result<Self, PacerError> {
        if freq < 0 {
            return Err(PacerError::NegativeRate(freq));
        }
        let freq = freq as u64;
        if freq > 0 && per.is_zero() {
            return Err(PacerError::ZeroPeriod(freq));
        }
        Ok(Self { freq, per })
    }

    pub fn per_second(freq: u64) -> Self {
        Self {
            freq,
            per: Duration::from_secs(1),
        }
    }

    pub fn per_minute(freq: u64) -> Self {
        Self {
            freq,
            per: Duration::from_secs(60),
        }
    }

    /// A rate with no upper bound.
    pub fn unbounded() -> Self {
        Self {
            freq: 0,
            per: Duration::ZERO,
        }
    }

    pub fn freq(&self) -> u64 {
        self.freq
    }

    pub fn per(&self) -> Duration {
        self.per
    }

    pub fn is_unbounded(&self) -> bool {
        self.freq == 0 || self.per.is_zero()
    }

    /// Hits per second, or 0.0 for an unbounded rate.
    pub fn hits_per_sec(&self) -> f64 {
        if self.is_unbounded() {
            return 0.0;
        }
        self.freq as f64 / self.per.as_nanos() as f64 * 1e9
    }
}

impl FromStr for Rate {
    type Err = PacerError;

    /// Parses `"<count>/<period>"`. The period is either a bare unit
    /// (`s`, `m`, `h`, `d`) or a duration string such as `"10s"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PacerError::InvalidRate(s.to_string());
        let (count, period) = s.trim().split_once('/').ok_or_else(invalid)?;
        let count: i64 = count.trim().parse().map_err(|_| invalid())?;

        let period = period.trim();
        let per = match period {
            "ms" => Duration::from_millis(1),
            "s" | "m" | "h" | "d" => {
                parse_duration_string(&format!("1{}", period)).map_err(|_| invalid())?
            }
            _ => parse_duration_string(period).map_err(|_| invalid())?,
        };

        Rate::new(count, per)
    }
}

/// Longest wait a pacer hands out, `i64::MAX` nanoseconds. Anything longer
/// stops pacing instead.
const MAX_WAIT_SECS: f64 = i64::MAX as f64 / 1e9;

/// Wait formula of the constant pacer once the rate and the expected hit
/// count are known.
fn wait_for(rate: f64, expected_hits: f64, hits: u64) -> Duration {
    if rate <= 0.0 || !rate.is_finite() {
        // Zero rate = unbounded
        return Duration::ZERO;
    }

    if hits == 0 || hits < expected_hits as u64 {
        // Running behind, send the next hit immediately.
        return Duration::ZERO;
    }

    let interval = (1e9 / rate).round();
    let n = interval as u64;
    if n != 0 && (i64::MAX as u64) / n < hits {
        // The wait would overflow, stop pacing instead of wrapping around.
        return Duration::ZERO;
    }

    let delta = (hits + 1) as f64 - expected_hits;
    Duration::from_nanos((interval * delta) as u64)
}

/// Issues hits at one fixed rate for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct ConstantPacer {
    rate: Rate,
}

impl ConstantPacer {
    pub fn new(rate: Rate) -> Self {
        Self { rate }
    }

    fn expected_hits(&self, elapsed: Duration) -> f64 {
        self.rate.hits_per_sec() * elapsed.as_secs_f64()
    }
}

impl Pacer for ConstantPacer {
    fn pace(&self, elapsed: Duration, hits: u64) -> Duration {
        wait_for(self.rate(elapsed), self.expected_hits(elapsed), hits)
    }

    fn rate(&self, _elapsed: Duration) -> f64 {
        self.rate.hits_per_sec()
    }
}

/// One control point of a ramp: from `offset` on, the target rate is `rate`
/// (linearly interpolated towards the next point).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampPoint {
    pub offset: Duration,
    pub rate: Rate,
}

impl RampPoint {
    pub fn new(offset: Duration, rate: Rate) -> Self {
        Self { offset, rate }
    }
}

/// Piecewise-linear rate curve over a list of control points.
///
/// Before the first point the first point's rate applies, after the last one
/// the last point's rate. Between two points the rate changes linearly, and
/// the expected hit count is the exact area under that curve.
#[derive(Debug, Clone)]
pub struct RampPacer {
    points: Vec<RampPoint>,
    secs: Vec<f64>,
    rates: Vec<f64>,
}

impl RampPacer {
    pub fn new(points: Vec<RampPoint>) -> Result<Self, PacerError> {
        if points.is_empty() {
            return Err(PacerError::EmptyRamp);
        }

        for (index, pair) in points.windows(2).enumerate() {
            if pair[1].offset < pair[0].offset {
                return Err(PacerError::UnsortedPoints {
                    index: index + 1,
                    offset: pair[1].offset,
                    previous: pair[0].offset,
                });
            }
        }

        let secs = points.iter().map(|p| p.offset.as_secs_f64()).collect();
        let rates = points.iter().map(|p| p.rate.hits_per_sec()).collect();

        Ok(Self {
            points,
            secs,
            rates,
        })
    }

    /// Continuous ramp from `start` to `target` over `ramp_up`, holding
    /// `target` afterwards.
    pub fn linear(start: Rate, target: Rate, ramp_up: Duration) -> Result<Self, PacerError> {
        Self::new(vec![
            RampPoint::new(Duration::ZERO, start),
            RampPoint::new(ramp_up, target),
        ])
    }

    /// Step schedule expressed as `(minute, requests per minute)` pairs.
    pub fn from_rpm_steps(steps: &[(u32, u64)]) -> Result<Self, PacerError> {
        let points = steps
            .iter()
            .map(|&(minute, rpm)| {
                RampPoint::new(
                    Duration::from_secs(u64::from(minute) * 60),
                    Rate::per_minute(rpm),
                )
            })
            .collect();
        Self::new(points)
    }

    pub fn points(&self) -> &[RampPoint] {
        &self.points
    }

    /// Area under the rate curve between 0 and `elapsed`.
    fn expected_hits(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        let first = self.secs[0];

        let mut hits = self.rates[0] * t.min(first);
        if t <= first {
            return hits;
        }

        for i in 0..self.secs.len() - 1 {
            let (a, b) = (self.secs[i], self.secs[i + 1]);
            let (ra, rb) = (self.rates[i], self.rates[i + 1]);

            if t >= b {
                hits += (ra + rb) / 2.0 * (b - a);
                continue;
            }

            let x = t - a;
            let slope = (rb - ra) / (b - a);
            return hits + ra * x + slope * x * x / 2.0;
        }

        let last = self.secs.len() - 1;
        hits + self.rates[last] * (t - self.secs[last])
    }

    /// Inverse of [`RampPacer::expected_hits`]: the run time, in seconds, at
    /// which the area under the curve reaches `target`. `None` when the curve
    /// never gets there, i.e. the rate stays zero from some point on.
    fn due_at(&self, target: f64) -> Option<f64> {
        let first = self.secs[0];
        let mut hits = self.rates[0] * first;
        if target <= hits && self.rates[0] > 0.0 {
            return Some(target / self.rates[0]);
        }

        for i in 0..self.secs.len() - 1 {
            let (a, b) = (self.secs[i], self.secs[i + 1]);
            let (ra, rb) = (self.rates[i], self.rates[i + 1]);
            let area = (ra + rb) / 2.0 * (b - a);

            if area > 0.0 && target <= hits + area {
                // Solve ra*x + slope*x^2/2 = need for the offset into the
                // segment, in the form that stays stable when ra is zero.
                let need = target - hits;
                let slope = (rb - ra) / (b - a);
                let root = (ra * ra + 2.0 * slope * need).max(0.0).sqrt();
                return Some(a + 2.0 * need / (ra + root));
            }
            hits += area;
        }

        let last = self.secs.len() - 1;
        let rate = self.rates[last];
        (rate > 0.0).then(|| self.secs[last] + (target - hits).max(0.0) / rate)
    }

    /// Floor-rounded integer requests per minute at `minute`, the way step
    /// schedules have always been reported.
    pub fn rpm_at_minute(&self, minute: u32) -> u64 {
        let at = Duration::from_secs(u64::from(minute) * 60);
        let rpm = |i: usize| (self.rates[i] * 60.0).round() as i128;

        if let Some(i) = self.points.iter().position(|p| p.offset == at) {
            return rpm(i).max(0) as u64;
        }
        if at < self.points[0].offset {
            return rpm(0).max(0) as u64;
        }

        for (i, pair) in self.points.windows(2).enumerate() {
            if pair[0].offset < at && at < pair[1].offset {
                let span = (pair[1].offset - pair[0].offset).as_millis() as i128;
                let into = (at - pair[0].offset).as_millis() as i128;
                let diff = rpm(i + 1) - rpm(i);
                return (rpm(i) + (diff * into).div_euclid(span)).max(0) as u64;
            }
        }

        rpm(self.points.len() - 1).max(0) as u64
    }
}

impl Pacer for RampPacer {
    /// Same catch-up rule as [`ConstantPacer`]. Otherwise the wait runs to the
    /// moment the curve's integral reaches `hits + 1`, so ramps through zero
    /// and steep segments are paced exactly. Zero from here on is unbounded.
    fn pace(&self, elapsed: Duration, hits: u64) -> Duration {
        let expected = self.expected_hits(elapsed);
        if hits == 0 || hits < expected as u64 {
            return Duration::ZERO;
        }

        let Some(due) = self.due_at((hits + 1) as f64) else {
            return Duration::ZERO;
        };
        let wait = due - elapsed.as_secs_f64();
        if !wait.is_finite() || wait <= 0.0 || wait >= MAX_WAIT_SECS {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(wait)
    }

    fn rate(&self, elapsed: Duration) -> f64 {
        if elapsed < self.points[0].offset {
            return self.rates[0];
        }

        if let Some(i) = self.points.iter().position(|p| p.offset == elapsed) {
            return self.rates[i];
        }

        for (i, pair) in self.points.windows(2).enumerate() {
            if pair[0].offset < elapsed && elapsed < pair[1].offset {
                let (a, b) = (self.secs[i], self.secs[i + 1]);
                let (ra, rb) = (self.rates[i], self.rates[i + 1]);
                let x = elapsed.as_secs_f64();
                return ra + (rb - ra) * (x - a) / (b - a);
            }
        }

        self.rates[self.rates.len() - 1]
    }
}
