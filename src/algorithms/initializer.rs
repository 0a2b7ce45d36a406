use rand::Rng;
use std::f32::consts::PI;

/// Samples `size` values from N(mean, std_dev) with the Box-Muller transform.
pub fn gaussian<R: Rng + ?Sized>(size: usize, mean: f32, std_dev: f32, rng: &mut R) -> Vec<f32> {
    (0..size)
        .map(|_| {
            // gen() is in [0, 1); keep u1 away from 0 so ln stays finite
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen();
            let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            mean + z0 * std_dev
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gaussian_moments() {
        let mut rng = StdRng::seed_from_u64(5);
        let samples = gaussian(20_000, 0.0, 0.1, &mut rng);
        assert_eq!(samples.len(), 20_000);
        assert!(samples.iter().all(|x| x.is_finite()));

        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        let variance =
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / samples.len() as f32;
        assert!(mean.abs() < 0.01);
        assert!((variance.sqrt() - 0.1).abs() < 0.01);
    }
}
