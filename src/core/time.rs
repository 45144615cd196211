//! Time, frequency, power and energy newtypes.
//!
//! `Duration` and `TimePoint` both wrap an `f64` count of seconds rather than
//! an integral tick count: the platforms this simulator models run clock
//! domains with arbitrary MHz steps and DVFS transitions land at arbitrary
//! fractional instants, so a fixed-point representation would just move the
//! rounding problem rather than remove it.

/// Values within this distance of zero are treated as zero when clamping
/// (budget exhaustion, remaining work, etc). Guards against floating-point
/// drift accumulated over many arithmetic operations, not a simulation
/// parameter.
pub const ZERO_EPSILON: f64 = 1e-7;

#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct Duration(f64);

#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct TimePoint(f64);

impl Duration {
    pub const ZERO: Duration = Duration(0.0);

    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub fn as_seconds(self) -> f64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.abs() <= ZERO_EPSILON
    }

    pub fn is_positive(self) -> bool {
        self.0 > ZERO_EPSILON
    }

    /// Clamp small negative drift (from repeated subtraction) back to zero.
    pub fn round_zero(self) -> Self {
        if self.0.abs() <= ZERO_EPSILON { Duration::ZERO } else { self }
    }

    pub fn max(self, other: Self) -> Self {
        Duration(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Duration(self.0.min(other.0))
    }
}

impl TimePoint {
    pub const ZERO: TimePoint = TimePoint(0.0);

    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    pub fn as_seconds(self) -> f64 {
        self.0
    }

    pub fn max(self, other: Self) -> Self {
        TimePoint(self.0.max(other.0))
    }
}

impl Eq for TimePoint {}

impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        ordered_float::OrderedFloat(self.0).cmp(&ordered_float::OrderedFloat(other.0))
    }
}

impl std::ops::Add<Duration> for TimePoint {
    type Output = TimePoint;
    fn add(self, rhs: Duration) -> TimePoint { TimePoint(self.0 + rhs.0) }
}

impl std::ops::AddAssign<Duration> for TimePoint {
    fn add_assign(&mut self, rhs: Duration) { self.0 += rhs.0; }
}

impl std::ops::Sub for TimePoint {
    type Output = Duration;
    fn sub(self, rhs: TimePoint) -> Duration { Duration(self.0 - rhs.0) }
}

impl std::ops::Sub<Duration> for TimePoint {
    type Output = TimePoint;
    fn sub(self, rhs: Duration) -> TimePoint { TimePoint(self.0 - rhs.0) }
}

impl std::ops::Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration { Duration(self.0 + rhs.0) }
}

impl std::ops::AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) { self.0 += rhs.0; }
}

impl std::ops::Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration { Duration(self.0 - rhs.0) }
}

impl std::ops::SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Duration) { self.0 -= rhs.0; }
}

impl std::ops::Mul<f64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: f64) -> Duration { Duration(self.0 * rhs) }
}

impl std::ops::Div<f64> for Duration {
    type Output = Duration;
    fn div(self, rhs: f64) -> Duration { Duration(self.0 / rhs) }
}

impl std::ops::Div for Duration {
    type Output = f64;
    fn div(self, rhs: Duration) -> f64 { self.0 / rhs.0 }
}

impl Eq for Duration {}

impl Ord for Duration {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        ordered_float::OrderedFloat(self.0).cmp(&ordered_float::OrderedFloat(other.0))
    }
}

impl std::iter::Sum for Duration {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Duration::ZERO, |acc, val| acc + val)
    }
}

impl serde::Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        f64::deserialize(deserializer).map(Duration)
    }
}

/// Clock-domain frequency, stored in MHz.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Frequency(pub f64);

impl Frequency {
    pub fn mhz(value: f64) -> Self { Frequency(value) }
    pub fn as_mhz(self) -> f64 { self.0 }
    pub fn as_ghz(self) -> f64 { self.0 / 1000.0 }
    pub fn max(self, other: Self) -> Self { Frequency(self.0.max(other.0)) }
    pub fn min(self, other: Self) -> Self { Frequency(self.0.min(other.0)) }
}

impl Eq for Frequency {}
impl Ord for Frequency {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        ordered_float::OrderedFloat(self.0).cmp(&ordered_float::OrderedFloat(other.0))
    }
}

/// Instantaneous power draw, in milliwatts.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Power(pub f64);

impl Power {
    pub fn mw(value: f64) -> Self { Power(value) }
    pub fn as_mw(self) -> f64 { self.0 }
}

/// Accumulated energy, in millijoules.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Energy(pub f64);

impl Energy {
    pub fn mj(value: f64) -> Self { Energy(value) }
    pub fn as_mj(self) -> f64 { self.0 }
}

impl std::ops::Add for Energy {
    type Output = Energy;
    fn add(self, rhs: Energy) -> Energy { Energy(self.0 + rhs.0) }
}

impl std::ops::AddAssign for Energy {
    fn add_assign(&mut self, rhs: Energy) { self.0 += rhs.0; }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamps_small_negatives_to_zero() {
        let d = Duration::from_seconds(-5e-8);
        assert!(d.round_zero().is_zero());
    }

    #[test]
    fn time_point_arithmetic() {
        let t0 = TimePoint::from_seconds(1.0);
        let t1 = t0 + Duration::from_seconds(0.5);
        assert_eq!((t1 - t0).as_seconds(), 0.5);
    }

    #[test]
    fn frequency_ratio_matches_speed_formula() {
        let f = Frequency::mhz(1800.0);
        let f_max = Frequency::mhz(2400.0);
        assert!((f.as_mhz() / f_max.as_mhz() - 0.75).abs() < 1e-12);
    }
}
