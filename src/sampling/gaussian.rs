use rand::Rng;

/// Above this deviation a CDT would be too large; samples come from a rounded
/// continuous Gaussian instead.
const CDT_MAX_SIGMA: f64 = 64.0;

/// Cumulative distribution table of the discrete Gaussian over [-6σ, 6σ].
///
/// The scan in [`CdtSampler::sample`] visits every entry and selects with
/// integer masks, so its running time does not depend on the sample.
#[derive(Clone, Debug)]
pub struct CdtSampler {
    tail: i64,
    cdf: Vec<f64>,
}

impl CdtSampler {
    pub fn new(sigma: f64) -> Self {
        let tail = (6.0 * sigma).ceil() as i64;
        let two_sigma_sq = 2.0 * sigma * sigma;
        let mut cumulative = 0.0;
        let cdf = (-tail..=tail)
            .map(|x| {
                cumulative += (-((x * x) as f64) / two_sigma_sq).exp();
                cumulative
            })
            .collect();
        Self { tail, cdf }
    }

    pub fn tail(&self) -> i64 {
        self.tail
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        let total = self.cdf.last().copied().unwrap_or(1.0);
        let u: f64 = rng.random::<f64>() * total;
        let mut result = self.tail;
        for (i, &c) in self.cdf.iter().enumerate().rev() {
            let mask = ((u < c) as i64).wrapping_neg();
            let candidate = i as i64 - self.tail;
            result = (candidate & mask) | (result & !mask);
        }
        result
    }
}

/// n independent samples of the discrete Gaussian with deviation `sigma`.
pub fn sample_gaussian_signed<R: Rng + ?Sized>(n: usize, sigma: f64, rng: &mut R) -> Vec<i64> {
    if sigma > CDT_MAX_SIGMA {
        return (0..n).map(|_| sample_gaussian_box_muller(sigma, rng)).collect();
    }
    let cdt = CdtSampler::new(sigma);
    (0..n).map(|_| cdt.sample(rng)).collect()
}

/// Rounded Box-Muller sample (not constant time). Used for the wide
/// smudging distributions of the threshold protocols.
pub fn sample_gaussian_box_muller<R: Rng + ?Sized>(sigma: f64, rng: &mut R) -> i64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    (z * sigma).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn moments(samples: &[i64]) -> (f64, f64) {
        let n = samples.len() as f64;
        let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
        let var = samples.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn test_cdt_distribution() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let sigma = 3.2;
        let samples = sample_gaussian_signed(10_000, sigma, &mut rng);
        let (mean, var) = moments(&samples);
        assert!(mean.abs() < 0.5, "mean = {mean}");
        assert!((var - sigma * sigma).abs() < 2.0, "var = {var}");
        let tail = CdtSampler::new(sigma).tail();
        assert!(samples.iter().all(|s| s.abs() <= tail));
    }

    #[test]
    fn test_wide_distribution() {
        let mut rng = ChaCha20Rng::seed_from_u64(43);
        let sigma = 1024.0;
        let samples = sample_gaussian_signed(10_000, sigma, &mut rng);
        let (mean, var) = moments(&samples);
        assert!(mean.abs() < 50.0, "mean = {mean}");
        let rel = (var.sqrt() - sigma).abs() / sigma;
        assert!(rel < 0.05, "std = {}", var.sqrt());
    }
}
