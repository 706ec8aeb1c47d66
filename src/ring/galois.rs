/// Generator of the rotation subgroup of (Z/2N)^*.
pub const GALOIS_GENERATOR: u64 = 5;

/// Galois element 5^k mod 2N for a (possibly negative) slot rotation by k.
///
/// Rotations are taken modulo N/2, the order of 5 in (Z/2N)^*.
pub fn galois_element(k: i64, ring_degree: usize) -> usize {
    let two_n = 2 * ring_degree as u64;
    let order = (ring_degree / 2) as i64;
    let mut e = k.rem_euclid(order) as u64;
    let mut base = GALOIS_GENERATOR;
    let mut g = 1u64;
    while e > 0 {
        if e & 1 == 1 {
            g = g * base % two_n;
        }
        base = base * base % two_n;
        e >>= 1;
    }
    g as usize
}

/// Galois element of complex conjugation, X -> X^{-1}.
pub fn conjugation_element(ring_degree: usize) -> usize {
    2 * ring_degree - 1
}

/// NTT-domain index table for X -> X^g: `permuted[k] = original[table[k]]`.
///
/// `order` is the evaluation order of the forward transform (see
/// [`evaluation_order`](crate::ring::ntt::evaluation_order)): slot k holds
/// the evaluation at ω^order[k]. The automorphism reads slot k from the slot
/// evaluated at ω^(order[k]·g). The table only depends on the order and g,
/// so one table serves every modulus of a basis.
pub fn ntt_permutation(order: &[usize], g: usize) -> Vec<usize> {
    let two_n = 2 * order.len();
    let mut pos = vec![0usize; two_n];
    for (k, &e) in order.iter().enumerate() {
        pos[e] = k;
    }
    order.iter().map(|&e| pos[e * g % two_n]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::ntt::{evaluation_order, make_plan, NttPoly};
    use crate::ring::poly::CoeffPoly;
    use crate::sampling::sample_uniform_poly;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_galois_elements() {
        let n = 16;
        assert_eq!(galois_element(0, n), 1);
        assert_eq!(galois_element(1, n), 5);
        assert_eq!(galois_element(2, n), 25);
        // order of 5 mod 32 is 8 = N/2
        assert_eq!(galois_element(8, n), 1);
        assert_eq!(galois_element(-1, n), galois_element(7, n));
        assert_eq!(conjugation_element(n), 31);
    }

    #[test]
    fn test_permutation_matches_coefficient_automorphism() {
        let n = 64;
        let q = 7681;
        let plan = make_plan(n, q).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let poly: CoeffPoly = sample_uniform_poly(n, q, &mut rng);
        let ntt = NttPoly::from_coeff_poly(&poly, plan.clone()).unwrap();
        let order = evaluation_order(&plan).unwrap();
        for g in [galois_element(1, n), galois_element(5, n), conjugation_element(n)] {
            let table = ntt_permutation(&order, g);
            let expected = NttPoly::from_coeff_poly(&poly.automorphism(g), plan.clone()).unwrap();
            assert_eq!(ntt.permute(&table), expected, "g = {g}");
        }
    }
}
