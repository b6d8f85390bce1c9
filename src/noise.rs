//! Sensor noise and response smoothing
//!
//! Each server owns its own [`NoiseGenerator`], so concurrent simulation
//! loops never contend on a shared random source, and tests can seed them
//! for reproducible output.

use std::collections::VecDeque;
use std::ops::{Add, Div};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use sense_emu_registers::Vector3;

/// Standard deviation of the noise, as a fraction of the error band
const NOISE_SIGMA: f64 = 0.2;

/// Gaussian perturbation source
#[derive(Clone)]
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Create a new noise generator
    ///
    /// A seed of 0 draws from system entropy; anything else is reproducible.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Sample from N(0, 1)
    #[inline]
    pub fn standard(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    /// `value` plus noise scaled by the sensor's error band
    #[inline]
    pub fn perturb(&mut self, value: f64, error: f64) -> f64 {
        value + self.standard() * NOISE_SIGMA * error
    }

    /// Perturb every component independently
    pub fn perturb_vector(&mut self, value: Vector3, error: f64) -> Vector3 {
        Vector3::new(
            self.perturb(value.x, error),
            self.perturb(value.y, error),
            self.perturb(value.z, error),
        )
    }
}

/// Fixed-length window of the most recent samples
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RollingWindow<T> {
    /// Window of `capacity` samples, all equal to `initial`
    pub fn filled(capacity: usize, initial: T) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: std::iter::repeat(initial).take(capacity).collect(),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest once full
    pub fn push(&mut self, sample: T) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Replace every sample with `value`
    pub fn fill(&mut self, value: T) {
        self.samples.clear();
        self.samples.extend(std::iter::repeat(value).take(self.capacity));
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<T> {
        self.samples.back().copied()
    }
}

impl<T> RollingWindow<T>
where
    T: Copy + Default + Add<Output = T> + Div<f64, Output = T>,
{
    /// Arithmetic mean of the samples
    pub fn mean(&self) -> T {
        let sum = self
            .samples
            .iter()
            .fold(T::default(), |acc, &sample| acc + sample);
        sum / self.samples.len().max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_seed() {
        let mut a = NoiseGenerator::new(42);
        let mut b = NoiseGenerator::new(42);
        for _ in 0..100 {
            assert_eq!(a.perturb(1013.0, 0.2), b.perturb(1013.0, 0.2));
        }
    }

    #[test]
    fn test_zero_error_is_exact() {
        let mut noise = NoiseGenerator::new(1);
        for _ in 0..10 {
            assert_eq!(noise.perturb(20.0, 0.0), 20.0);
        }
    }

    #[test]
    fn test_perturbation_spread() {
        let mut noise = NoiseGenerator::new(7);
        let n = 10_000;
        let samples: Vec<f64> = (0..n).map(|_| noise.perturb(100.0, 5.0)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 100.0).abs() < 0.05, "mean {mean}");
        // sigma = 0.2 * 5.0
        assert!((var.sqrt() - 1.0).abs() < 0.05, "sigma {}", var.sqrt());
    }

    #[test]
    fn test_window_mean_tracks_recent_samples() {
        let mut window = RollingWindow::filled(4, 0.0);
        assert_eq!(window.len(), 4);
        assert_eq!(window.mean(), 0.0);
        for v in [4.0, 8.0] {
            window.push(v);
        }
        assert_eq!(window.mean(), 3.0);
        for v in [1.0, 1.0, 1.0, 1.0] {
            window.push(v);
        }
        assert_eq!(window.mean(), 1.0);
        assert_eq!(window.len(), 4);
    }

    #[test]
    fn test_vector_window() {
        let mut window = RollingWindow::filled(2, Vector3::ZERO);
        window.push(Vector3::new(2.0, 4.0, 6.0));
        assert_eq!(window.mean(), Vector3::new(1.0, 2.0, 3.0));
        window.fill(Vector3::X);
        assert_eq!(window.mean(), Vector3::X);
        assert_eq!(window.latest(), Some(Vector3::X));
    }
}
