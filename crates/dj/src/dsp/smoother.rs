//! One-pole parameter smoothing.

/// Exponential ramp toward a target value.
///
/// The time constant is the time to cover ~63% of the distance to the target.
/// A zero time constant makes every change instant.
#[derive(Debug, Clone, Copy)]
pub struct Smoother {
    value: f32,
    target: f32,
    coeff: f32,
}

const SETTLE_EPSILON: f32 = 1e-5;

impl Smoother {
    pub fn new(initial: f32, time_constant: f32, rate: f32) -> Self {
        let coeff = if time_constant > 0.0 && rate > 0.0 {
            (-1.0 / (time_constant * rate)).exp()
        } else {
            0.0
        };
        Self {
            value: initial,
            target: initial,
            coeff,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        if target.is_finite() {
            self.target = target;
        }
    }

    /// Jump straight to `value` with no ramp.
    pub fn jump_to(&mut self, value: f32) {
        self.value = value;
        self.target = value;
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let delta = self.value - self.target;
        if delta.abs() < SETTLE_EPSILON {
            self.value = self.target;
        } else {
            self.value = self.target + delta * self.coeff;
        }
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.value == self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaches_63_percent_after_one_time_constant() {
        let mut s = Smoother::new(0.0, 0.05, 1000.0);
        s.set_target(1.0);
        let mut v = 0.0;
        for _ in 0..50 {
            v = s.next();
        }
        assert!((v - 0.632).abs() < 0.01, "value {v}");
    }

    #[test]
    fn test_settles_exactly() {
        let mut s = Smoother::new(1.0, 0.005, 44_100.0);
        s.set_target(0.0);
        for _ in 0..10_000 {
            s.next();
        }
        assert!(s.is_settled());
        assert_eq!(s.value(), 0.0);
    }

    #[test]
    fn test_zero_time_constant_is_instant() {
        let mut s = Smoother::new(0.0, 0.0, 44_100.0);
        s.set_target(0.7);
        assert_eq!(s.next(), 0.7);
    }

    #[test]
    fn test_ignores_non_finite_targets() {
        let mut s = Smoother::new(0.3, 0.02, 100.0);
        s.set_target(f32::NAN);
        assert_eq!(s.target(), 0.3);
    }
}
