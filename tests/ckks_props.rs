use num_complex::Complex64;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use mkckks::ckks::encoder::Encoder;
use mkckks::ckks::encrypt::{decrypt, encrypt_pk_with_rng, encrypt_sk_with_rng};
use mkckks::ckks::eval::{EvaluationKeySet, Evaluator};
use mkckks::ckks::keys::{
    gen_public_key_with_rng, gen_relin_key_with_rng, gen_rotation_keys_with_rng, gen_secret_key_with_rng,
};
use mkckks::ckks::{Ciphertext, Marshal, RotationKeys};
use mkckks::error::HeError;
use mkckks::params::presets::{ckks_test, ckks_tiny};

const MIN_PRECISION_BITS: f64 = 15.0;

/// -log2 of the mean absolute coordinate error.
fn precision_bits(got: &[f64], want: &[f64]) -> f64 {
    let mean = got.iter().zip(want).map(|(g, w)| (g - w).abs()).sum::<f64>() / want.len() as f64;
    -mean.max(f64::MIN_POSITIVE).log2()
}

fn complex_precision_bits(got: &[Complex64], want: &[Complex64]) -> f64 {
    let mean = got.iter().zip(want).map(|(g, w)| (g - w).norm()).sum::<f64>() / want.len() as f64;
    -mean.max(f64::MIN_POSITIVE).log2()
}

fn values(len: usize) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(-1.0f64..1.0, len)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_encode_decode_precision(v in values(512)) {
        let params = ckks_tiny().unwrap();
        let encoder = Encoder::new(&params);
        let pt = encoder.encode_real(&v, params.max_level(), params.scale).unwrap();
        let got = encoder.decode_real(&pt).unwrap();
        prop_assert!(precision_bits(&got, &v) >= MIN_PRECISION_BITS);
    }

    #[test]
    fn prop_add_sub_const(a in values(512), b in values(512), c in -4.0f64..4.0, seed in any::<u64>()) {
        let params = ckks_tiny().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let encoder = Encoder::new(&params);
        let sk = gen_secret_key_with_rng(&params, &mut rng).unwrap();
        let pk = gen_public_key_with_rng(&sk, &mut rng).unwrap();
        let eval = Evaluator::new(&params, EvaluationKeySet::default()).unwrap();
        let level = params.max_level();

        let pa = encoder.encode_real(&a, level, params.scale).unwrap();
        let pb = encoder.encode_real(&b, level, params.scale).unwrap();
        let ca = encrypt_pk_with_rng(&pa, &pk, &mut rng).unwrap();
        let cb = encrypt_pk_with_rng(&pb, &pk, &mut rng).unwrap();

        let sum = ca.fresh(|ct| eval.add(ct, &cb)).unwrap();
        let want: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
        let got = encoder.decode_real(&decrypt(&sum, &sk).unwrap()).unwrap();
        prop_assert!(precision_bits(&got, &want) >= MIN_PRECISION_BITS);

        let diff = ca.fresh(|ct| eval.sub(ct, &pb)).unwrap();
        let want: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x - y).collect();
        let got = encoder.decode_real(&decrypt(&diff, &sk).unwrap()).unwrap();
        prop_assert!(precision_bits(&got, &want) >= MIN_PRECISION_BITS);

        let mut scaled = ca.clone();
        eval.add_const(&mut scaled, Complex64::new(c, 0.0)).unwrap();
        eval.mult_by_const(&mut scaled, Complex64::new(c, 0.0)).unwrap();
        eval.rescale(&mut scaled).unwrap();
        let want: Vec<f64> = a.iter().map(|x| (x + c) * c).collect();
        let got = encoder.decode_real(&decrypt(&scaled, &sk).unwrap()).unwrap();
        prop_assert!(precision_bits(&got, &want) >= MIN_PRECISION_BITS);
    }

    #[test]
    fn prop_mul_relin_and_rescale_bookkeeping(a in values(512), b in values(512), seed in any::<u64>()) {
        let params = ckks_tiny().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let encoder = Encoder::new(&params);
        let sk = gen_secret_key_with_rng(&params, &mut rng).unwrap();
        let keys = EvaluationKeySet {
            relin: Some(gen_relin_key_with_rng(&sk, &mut rng).unwrap()),
            rotations: None,
        };
        let eval = Evaluator::new(&params, keys).unwrap();
        let level = params.max_level();
        let ca = encrypt_sk_with_rng(&encoder.encode_real(&a, level, params.scale).unwrap(), &sk, &mut rng).unwrap();
        let cb = encrypt_sk_with_rng(&encoder.encode_real(&b, level, params.scale).unwrap(), &sk, &mut rng).unwrap();

        let mut prod = ca.fresh(|ct| eval.mul_relin(ct, &cb, false)).unwrap();
        prop_assert_eq!(prod.degree(), 2);
        eval.relinearize(&mut prod).unwrap();
        prop_assert_eq!(prod.degree(), 1);
        let again = eval.relinearize(&mut prod);
        prop_assert!(matches!(again, Err(HeError::DegreeMismatch { .. })), "second relinearize must fail");

        let q = params.q_moduli();
        let mut twice = prod.clone();
        eval.rescale_many(&mut twice, 2).unwrap();
        prop_assert_eq!(twice.level(), level - 2);
        prop_assert_eq!(twice.scale, prod.scale / q[level] as f64 / q[level - 1] as f64);

        eval.rescale(&mut prod).unwrap();
        let want: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
        let got = encoder.decode_real(&decrypt(&prod, &sk).unwrap()).unwrap();
        prop_assert!(precision_bits(&got, &want) >= MIN_PRECISION_BITS);
    }

    #[test]
    fn prop_rotation_inverse_and_double_conjugate(
        re in values(1024),
        im in values(1024),
        n in 1i64..16,
        seed in any::<u64>()
    ) {
        let params = ckks_test().unwrap();
        let slots = params.slots() as i64;
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let encoder = Encoder::new(&params);
        let sk = gen_secret_key_with_rng(&params, &mut rng).unwrap();
        let rotations: RotationKeys = gen_rotation_keys_with_rng(&sk, &[n, slots - n], true, &mut rng).unwrap();
        let eval = Evaluator::new(&params, EvaluationKeySet { relin: None, rotations: Some(rotations) }).unwrap();

        let v: Vec<Complex64> = re.iter().zip(&im).map(|(&r, &i)| Complex64::new(r, i)).collect();
        let pt = encoder.encode_plaintext(&v, params.max_level(), params.scale).unwrap();
        let mut ct = encrypt_sk_with_rng(&pt, &sk, &mut rng).unwrap();

        eval.rotate(&mut ct, n).unwrap();
        eval.rotate(&mut ct, slots - n).unwrap();
        let got = encoder.decode(&decrypt(&ct, &sk).unwrap()).unwrap();
        prop_assert!(complex_precision_bits(&got, &v) >= MIN_PRECISION_BITS);

        eval.conjugate(&mut ct).unwrap();
        eval.conjugate(&mut ct).unwrap();
        let got = encoder.decode(&decrypt(&ct, &sk).unwrap()).unwrap();
        prop_assert!(complex_precision_bits(&got, &v) >= MIN_PRECISION_BITS);
    }

    #[test]
    fn prop_ciphertext_marshal_exact(level in 0usize..4, degree in 1usize..3, seed in any::<u64>()) {
        let params = ckks_tiny().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut ct = Ciphertext::zero(&params, degree, level, params.scale);
        for c in ct.value.iter_mut() {
            *c = mkckks::sampling::sample_uniform_rns(&params.ring_q, level + 1, &mut rng);
        }
        let bytes = ct.to_bytes();
        let back = Ciphertext::from_bytes(&params, &bytes).unwrap();
        prop_assert_eq!(back.level(), level);
        prop_assert_eq!(back.degree(), degree);
        prop_assert_eq!(back, ct);
    }
}

#[test]
fn empty_buffer_is_rejected() {
    let params = ckks_tiny().unwrap();
    assert!(matches!(
        Ciphertext::from_bytes(&params, &[]),
        Err(HeError::Serialization(_))
    ));
}

#[test]
fn zero_ciphertext_round_trips() {
    let params = ckks_tiny().unwrap();
    let ct = Ciphertext::zero(&params, 1, 0, params.scale);
    assert_eq!(Ciphertext::from_bytes(&params, &ct.to_bytes()).unwrap(), ct);
}

#[test]
fn truncated_ciphertext_is_a_serialization_error() {
    let params = ckks_tiny().unwrap();
    let bytes = Ciphertext::zero(&params, 1, 2, params.scale).to_bytes();
    for cut in [1, bytes.len() / 2, bytes.len() - 8] {
        assert!(
            matches!(Ciphertext::from_bytes(&params, &bytes[..cut]), Err(HeError::Serialization(_))),
            "cut at {cut}"
        );
    }
}
