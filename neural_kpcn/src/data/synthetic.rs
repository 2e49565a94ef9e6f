//! Seeded synthetic completion samples.

use kpcn_core::{Point3, PointSet};

use super::CompletionSample;

/// Generator of sphere completion samples.
///
/// Each sample is a sphere of random radius and center. The complete cloud
/// covers the whole sphere; the partial cloud covers the upper hemisphere
/// only. Objects with radius above 0.75 get label 1, others label 0.
#[derive(Debug, Clone)]
pub struct SyntheticShapes {
    partial_points: usize,
    complete_points: usize,
    seed: u64,
}

impl SyntheticShapes {
    /// Create a generator.
    pub fn new(partial_points: usize, complete_points: usize) -> Self {
        Self {
            partial_points,
            complete_points,
            seed: 12345,
        }
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Generate `count` samples.
    pub fn generate(&self, count: usize) -> Vec<CompletionSample> {
        let mut seed = self.seed;
        // Simple LCG for reproducible randomness
        let mut rng = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            (seed >> 33) as f32 / (1u64 << 31) as f32
        };

        (0..count)
            .map(|i| {
                let radius = 0.5 + 0.5 * rng();
                let center = Point3::new(
                    (rng() - 0.5) * 0.4,
                    (rng() - 0.5) * 0.4,
                    (rng() - 0.5) * 0.4,
                );

                let place = |p: Point3| center + p * radius;
                let complete = fibonacci_sphere(self.complete_points)
                    .into_iter()
                    .map(place)
                    .collect::<Vec<_>>();
                // Fibonacci points run from +z to -z; the first half is the upper hemisphere.
                let partial = fibonacci_sphere(self.partial_points * 2)
                    .into_iter()
                    .take(self.partial_points)
                    .map(place)
                    .collect::<Vec<_>>();

                CompletionSample::new(PointSet::new(partial), PointSet::new(complete))
                    .with_label(usize::from(radius > 0.75))
                    .with_group(i % 2)
            })
            .collect()
    }
}

/// `n` points evenly spread on the unit sphere, ordered by decreasing z.
pub(crate) fn fibonacci_sphere(n: usize) -> Vec<Point3> {
    let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let theta = golden * i as f32;
            Point3::new(r * theta.cos(), r * theta.sin(), z)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_on_unit_sphere() {
        let points = fibonacci_sphere(20);
        assert_eq!(points.len(), 20);
        for p in &points {
            assert!((p.length_squared() - 1.0).abs() < 2e-5);
        }
        assert!(points[0].z > points[19].z);
    }

    #[test]
    fn test_generate_is_seeded() {
        let shapes = SyntheticShapes::new(6, 10).with_seed(7);
        let a = shapes.generate(3);
        let b = shapes.generate(3);
        assert_eq!(a.len(), 3);
        assert_eq!(a[2].complete, b[2].complete);
        assert_eq!(a[0].partial.len(), 6);
        assert_eq!(a[0].complete.len(), 10);
        assert!(a.iter().all(|s| s.label.is_some()));
    }
}
