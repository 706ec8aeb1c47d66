use std::sync::Arc;

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use mkckks::ckks::encrypt::{decrypt, encrypt_pk_with_rng, encrypt_sk_with_rng};
use mkckks::ckks::eval::{EvaluationKeySet, Evaluator};
use mkckks::ckks::keys::{gen_secret_key_with_rng, SecretKey};
use mkckks::ckks::Encoder;
use mkckks::dkg::{
    Aggregate, CkgProtocol, CkgShare, CksProtocol, CksShare, RkgProtocol, RkgShareOne, RkgShareThree, RkgShareTwo,
    DEFAULT_SMUDGING_SIGMA,
};
use mkckks::multikey::{
    encrypt_with_rng, gen_mk_keys_with_rng, gen_shared_row_with_rng, merge, partial_decrypt_with_rng, Crs,
    MkCiphertext, MkEvaluator, MkPublicKey, MkRelinearizationKey, MkSecretKey,
};
use mkckks::params::presets::multiparty_test;
use mkckks::params::CkksParams;
use mkckks::sampling::CrpGenerator;

fn max_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

fn random_values(rng: &mut ChaCha20Rng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.random_range(-1.0..1.0)).collect()
}

fn shards(params: &Arc<CkksParams>, n: usize, rng: &mut ChaCha20Rng) -> (Vec<SecretKey>, SecretKey) {
    let sks: Vec<SecretKey> = (0..n).map(|_| gen_secret_key_with_rng(params, rng).unwrap()).collect();
    let mut joint = sks[0].clone();
    for sk in &sks[1..] {
        joint.value.add_assign(&sk.value).unwrap();
    }
    (sks, joint)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(4))]

    #[test]
    fn prop_collective_public_key_any_order(parties in 2usize..5, seed in any::<u64>()) {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let (sks, joint) = shards(&params, parties, &mut rng);
        let ckg = CkgProtocol::new(&params);
        let crp = CrpGenerator::from_u64(seed).read_qp(&params);

        let mut shares: Vec<CkgShare> = sks
            .iter()
            .map(|sk| ckg.gen_share_with_rng(sk, &crp, &mut rng).unwrap())
            .collect();
        let forward = CkgShare::aggregate_all(&shares).unwrap();
        shares.shuffle(&mut rng);
        let shuffled = CkgShare::aggregate_all(&shares).unwrap();
        prop_assert_eq!(&forward, &shuffled);

        let pk = ckg.gen_public_key(&forward, &crp);
        let encoder = Encoder::new(&params);
        let values = random_values(&mut rng, params.slots());
        let pt = encoder.encode_real(&values, params.max_level(), params.scale).unwrap();
        let ct = encrypt_pk_with_rng(&pt, &pk, &mut rng).unwrap();
        let got = encoder.decode_real(&decrypt(&ct, &joint).unwrap()).unwrap();
        prop_assert!(max_error(&got, &values) < 1e-5);
    }

    #[test]
    fn prop_three_round_relinearization_key(parties in 2usize..4, seed in any::<u64>()) {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let (sks, joint) = shards(&params, parties, &mut rng);
        let rkg = RkgProtocol::new(&params);
        let crp = CrpGenerator::from_u64(seed ^ 1).read_gadget_vector(&params);

        let mut ephemerals = Vec::new();
        let mut round_one = Vec::new();
        for sk in &sks {
            let (u, share) = rkg.gen_share_round_one_with_rng(sk, &crp, &mut rng).unwrap();
            ephemerals.push(u);
            round_one.push(share);
        }
        let agg1 = RkgShareOne::aggregate_all(&round_one).unwrap();
        let round_two: Vec<_> = sks
            .iter()
            .map(|sk| rkg.gen_share_round_two_with_rng(sk, &agg1, &crp, &mut rng).unwrap())
            .collect();
        let agg2 = RkgShareTwo::aggregate_all(&round_two).unwrap();
        let round_three: Vec<_> = ephemerals
            .iter()
            .zip(&sks)
            .map(|(u, sk)| rkg.gen_share_round_three_with_rng(u, sk, &agg2, &mut rng).unwrap())
            .collect();
        let agg3 = RkgShareThree::aggregate_all(&round_three).unwrap();
        let rlk = rkg.gen_relin_key(&agg2, &agg3).unwrap();

        let eval = Evaluator::new(&params, EvaluationKeySet { relin: Some(rlk), rotations: None }).unwrap();
        let encoder = Encoder::new(&params);
        let a = random_values(&mut rng, params.slots());
        let b = random_values(&mut rng, params.slots());
        let level = params.max_level();
        let ca = encrypt_sk_with_rng(&encoder.encode_real(&a, level, params.scale).unwrap(), &joint, &mut rng).unwrap();
        let cb = encrypt_sk_with_rng(&encoder.encode_real(&b, level, params.scale).unwrap(), &joint, &mut rng).unwrap();
        let mut prod = ca.fresh(|ct| eval.mul_relin(ct, &cb, true)).unwrap();
        eval.rescale(&mut prod).unwrap();

        let cks = CksProtocol::new(&params, DEFAULT_SMUDGING_SIGMA).unwrap();
        let shares: Vec<CksShare> = sks
            .iter()
            .map(|sk| cks.gen_decryption_share_with_rng(sk, &prod, &mut rng).unwrap())
            .collect();
        let got = encoder
            .decode_real(&cks.decrypt(&prod, &CksShare::aggregate_all(&shares).unwrap()).unwrap())
            .unwrap();
        let want: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
        prop_assert!(max_error(&got, &want) < 1e-3);
    }

    #[test]
    fn prop_shared_and_on_the_fly_relin_agree(seed in any::<u64>()) {
        let params = multiparty_test().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let crs = Crs::new(&params, &mut CrpGenerator::from_u64(seed));
        let ids = [2u64, 5, 11];

        let mut on_the_fly = MkEvaluator::new(&params).unwrap();
        let mut sks: Vec<MkSecretKey> = Vec::new();
        let mut pks: Vec<MkPublicKey> = Vec::new();
        let mut evks = Vec::new();
        for &id in &ids {
            let (sk, pk, evk) = gen_mk_keys_with_rng(&params, id, &crs, &mut rng).unwrap();
            on_the_fly.add_party(pk.clone(), evk.clone()).unwrap();
            sks.push(sk);
            pks.push(pk);
            evks.push(evk);
        }
        let mut rlk = MkRelinearizationKey::new();
        for (sk, evk) in sks.iter().zip(&evks) {
            rlk.insert_row(sk.peer, gen_shared_row_with_rng(sk, evk, &pks, &mut rng).unwrap());
        }
        prop_assert!(rlk.covers(&ids));
        let mut shared = on_the_fly.clone();
        shared.set_relin_key(rlk);

        let encoder = Encoder::new(&params);
        let slots = params.slots();
        let level = params.max_level();
        let inputs: Vec<Vec<f64>> = (0..ids.len()).map(|_| random_values(&mut rng, slots)).collect();
        let cts: Vec<MkCiphertext> = inputs
            .iter()
            .zip(&pks)
            .map(|(v, pk)| {
                let pt = encoder.encode_real(v, level, params.scale).unwrap();
                encrypt_with_rng(&pt, pk, &mut rng).unwrap()
            })
            .collect();

        // (x0 + x2) * x1
        let mut lhs = cts[0].clone();
        on_the_fly.add(&mut lhs, &cts[2]).unwrap();
        let mut via_fly = lhs.clone();
        on_the_fly.mul_relin(&mut via_fly, &cts[1]).unwrap();
        let mut via_shared = lhs;
        shared.mul_relin(&mut via_shared, &cts[1]).unwrap();
        prop_assert_eq!(via_fly.num_peers(), ids.len());
        prop_assert!(!via_fly.is_tensored() && !via_shared.is_tensored());

        let want: Vec<f64> = (0..slots).map(|i| (inputs[0][i] + inputs[2][i]) * inputs[1][i]).collect();
        let mut outputs = Vec::new();
        for mut ct in [via_fly, via_shared] {
            shared.rescale(&mut ct).unwrap();
            let partials: Vec<_> = sks
                .iter()
                .map(|sk| partial_decrypt_with_rng(&ct, sk, DEFAULT_SMUDGING_SIGMA, &mut rng).unwrap())
                .collect();
            let got = encoder.decode_real(&merge(&ct, &partials).unwrap()).unwrap();
            prop_assert!(max_error(&got, &want) < 1e-3);
            outputs.push(got);
        }
        prop_assert!(max_error(&outputs[0], &outputs[1]) < 1e-3);
    }
}
