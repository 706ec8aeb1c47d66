/// Barrett reduction: compute a mod m using precomputed Barrett constant.
///
/// Barrett constant k = floor(2^64 / m). For moduli ≤ 2^32 the single-word
/// Barrett trick is exact for inputs a < m^2. Larger moduli fall back to u128
/// division.
#[inline(always)]
pub fn barrett_reduce(a: u128, m: u64, barrett_k: u64) -> u64 {
    if m > (1u64 << 32) {
        (a % m as u128) as u64
    } else {
        let q_hat = ((a * barrett_k as u128) >> 64) as u64;
        let r = (a as u64).wrapping_sub(q_hat.wrapping_mul(m));
        if r >= m { r.wrapping_sub(m) } else { r }
    }
}

/// Barrett constant for modulus m: floor(2^64 / m).
#[inline]
pub fn barrett_constant(m: u64) -> u64 {
    debug_assert!(m > 1, "modulus must be > 1");
    ((1u128 << 64) / m as u128) as u64
}

/// Montgomery reduction: given T < m·R (R = 2^64), compute T·R^{-1} mod m.
///
/// Requires m odd, m < 2^63 and `m_inv_neg = -m^{-1} mod 2^64`.
#[inline(always)]
pub fn montgomery_reduce(t: u128, m: u64, m_inv_neg: u64) -> u64 {
    let k = (t as u64).wrapping_mul(m_inv_neg);
    let km = k as u128 * m as u128;
    let r = (t.wrapping_add(km) >> 64) as u64;
    if r >= m { r.wrapping_sub(m) } else { r }
}

/// Compute -m^{-1} mod 2^64 for Montgomery reduction.
pub fn montgomery_inv_neg(m: u64) -> u64 {
    debug_assert!(m & 1 == 1, "Montgomery requires odd modulus");
    // Newton iteration, each step doubles the number of correct low bits.
    let mut inv = m;
    for _ in 0..6 {
        inv = inv.wrapping_mul(2u64.wrapping_sub(m.wrapping_mul(inv)));
    }
    inv.wrapping_neg()
}

/// Montgomery form of `a`: a·2^64 mod m.
#[inline]
pub fn to_montgomery(a: u64, m: u64) -> u64 {
    (((a as u128) << 64) % m as u128) as u64
}

/// Montgomery product: a·b·2^{-64} mod m. With `b` in Montgomery form this
/// is the plain product a·b mod m.
#[inline(always)]
pub fn mul_montgomery(a: u64, b: u64, m: u64, m_inv_neg: u64) -> u64 {
    montgomery_reduce(a as u128 * b as u128, m, m_inv_neg)
}

/// Shoup precomputation for a fixed multiplicand w: floor(w·2^64 / m).
#[inline]
pub fn shoup_precompute(w: u64, m: u64) -> u64 {
    (((w as u128) << 64) / m as u128) as u64
}

/// a·w mod m using the Shoup quotient of w. Valid for any a < 2^64 when m < 2^63.
#[inline(always)]
pub fn mul_shoup(a: u64, w: u64, w_shoup: u64, m: u64) -> u64 {
    let q_hat = ((a as u128 * w_shoup as u128) >> 64) as u64;
    let r = a.wrapping_mul(w).wrapping_sub(q_hat.wrapping_mul(m));
    if r >= m { r - m } else { r }
}

/// Modular addition: (a + b) mod m, assumes a, b < m
#[inline(always)]
pub fn mod_add(a: u64, b: u64, m: u64) -> u64 {
    let sum = a as u128 + b as u128;
    let r = sum as u64;
    if sum >= m as u128 { r.wrapping_sub(m) } else { r }
}

/// Modular subtraction: (a - b) mod m, assumes a, b < m
#[inline(always)]
pub fn mod_sub(a: u64, b: u64, m: u64) -> u64 {
    if a >= b { a - b } else { m - b + a }
}

/// Modular negation: (-a) mod m, assumes a < m
#[inline(always)]
pub fn mod_neg(a: u64, m: u64) -> u64 {
    if a == 0 { 0 } else { m - a }
}

/// Modular multiplication: (a * b) mod m using Barrett reduction
#[inline(always)]
pub fn mod_mul(a: u64, b: u64, m: u64, barrett_k: u64) -> u64 {
    barrett_reduce(a as u128 * b as u128, m, barrett_k)
}

/// Modular exponentiation: a^exp mod m
pub fn mod_pow(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let bk = barrett_constant(m);
    let mut result = 1u64 % m;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mod_mul(result, base, m, bk);
        }
        exp >>= 1;
        base = mod_mul(base, base, m, bk);
    }
    result
}

/// Modular inverse via the extended Euclidean algorithm.
pub fn mod_inv(a: u64, m: u64) -> Option<u64> {
    let (mut old_r, mut r) = (a as i128, m as i128);
    let (mut old_s, mut s) = (1i128, 0i128);

    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
    }

    if old_r != 1 {
        return None;
    }
    Some(old_s.rem_euclid(m as i128) as u64)
}

/// Centered representative of a ∈ [0, m) in (-m/2, m/2].
#[inline(always)]
pub fn center(a: u64, m: u64) -> i64 {
    if a > m / 2 { a as i64 - m as i64 } else { a as i64 }
}

/// Reduce a signed integer into [0, m).
#[inline(always)]
pub fn reduce_i64(x: i64, m: u64) -> u64 {
    (x as i128).rem_euclid(m as i128) as u64
}

/// Deterministic Miller-Rabin for 64-bit integers.
pub fn is_prime(n: u64) -> bool {
    const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for &p in &WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }
    let bk = barrett_constant(n);
    'witness: for &a in &WITNESSES {
        let mut x = mod_pow(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mod_mul(x, x, n, bk);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}
