use crate::error::{HeError, Result};
use crate::ring::modular::is_prime;

/// Largest `count` primes below 2^bits with q ≡ 1 (mod 2n), in descending
/// order, skipping anything in `exclude`.
pub fn generate_ntt_primes(bits: usize, count: usize, n: usize, exclude: &[u64]) -> Result<Vec<u64>> {
    if !(10..=61).contains(&bits) {
        return Err(HeError::ParameterInvalid(format!(
            "prime size must be between 10 and 61 bits, got {bits}"
        )));
    }
    let two_n = 2 * n as u64;
    let upper = 1u64 << bits;
    let lower = 1u64 << (bits - 1);
    let mut candidate = (upper - 1) / two_n * two_n + 1;
    if candidate >= upper {
        candidate -= two_n;
    }

    let mut primes = Vec::with_capacity(count);
    while primes.len() < count {
        if candidate <= lower {
            return Err(HeError::ParameterInvalid(format!(
                "not enough {bits}-bit primes ≡ 1 mod {two_n} (found {})",
                primes.len()
            )));
        }
        if is_prime(candidate) && !exclude.contains(&candidate) {
            primes.push(candidate);
        }
        candidate -= two_n;
    }
    Ok(primes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primes_are_ntt_friendly() {
        let n = 1 << 11;
        let primes = generate_ntt_primes(40, 4, n, &[]).unwrap();
        assert_eq!(primes.len(), 4);
        for w in primes.windows(2) {
            assert!(w[0] > w[1]);
        }
        for &q in &primes {
            assert!(is_prime(q));
            assert_eq!(q % (2 * n as u64), 1);
            assert_eq!(64 - q.leading_zeros(), 40);
        }
    }

    #[test]
    fn test_exclusion_and_errors() {
        let n = 1 << 10;
        let first = generate_ntt_primes(50, 2, n, &[]).unwrap();
        let next = generate_ntt_primes(50, 2, n, &first[..1]).unwrap();
        assert_eq!(next[0], first[1]);
        assert!(generate_ntt_primes(62, 1, n, &[]).is_err());
        // 12-bit window holds no prime ≡ 1 mod 2^12
        assert!(generate_ntt_primes(12, 1, 1 << 11, &[]).is_err());
    }
}
