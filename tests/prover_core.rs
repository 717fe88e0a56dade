//! End-to-end exercises of the prover core: polynomial products through the
//! transform pair, commitment homomorphism through the MSM, and randomized
//! round trips.

use bn254_core::{fft::FftEngine, msm};
use ff::{Field, PrimeField};
use halo2curves::{
  bn256::{Fr, G1, G1Affine},
  group::{Curve, Group},
};
use proptest::prelude::*;
use rand::{SeedableRng, rngs::StdRng};

fn random_scalars(n: usize, seed: u64) -> Vec<Fr> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n).map(|_| Fr::random(&mut rng)).collect()
}

fn random_bases(n: usize, seed: u64) -> Vec<G1Affine> {
  let mut rng = StdRng::seed_from_u64(seed);
  (0..n).map(|_| G1::random(&mut rng).to_affine()).collect()
}

fn scalar_bytes(scalars: &[Fr]) -> Vec<u8> {
  scalars
    .iter()
    .flat_map(|s| s.to_repr().as_ref().to_vec())
    .collect()
}

#[test]
fn polynomial_product_via_ntt() {
  let n = 1usize << 10;
  let engine = FftEngine::<Fr>::new(n).unwrap();
  let a = random_scalars(n / 2, 1);
  let b = random_scalars(n / 2, 2);

  // evaluate, multiply pointwise, interpolate
  let mut ea = a.clone();
  ea.resize(n, Fr::ZERO);
  let mut eb = b.clone();
  eb.resize(n, Fr::ZERO);
  engine.fft(&mut ea).unwrap();
  engine.fft(&mut eb).unwrap();
  let mut product: Vec<Fr> = ea.iter().zip(eb.iter()).map(|(x, y)| x * y).collect();
  engine.ifft(&mut product).unwrap();

  let mut expected = vec![Fr::ZERO; n];
  for (i, x) in a.iter().enumerate() {
    for (j, y) in b.iter().enumerate() {
      expected[i + j] += x * y;
    }
  }
  assert_eq!(product, expected);
}

#[test]
fn commitment_homomorphism() {
  let bases = random_bases(512, 3);
  let s = random_scalars(512, 4);
  let t = random_scalars(512, 5);
  let sum: Vec<Fr> = s.iter().zip(t.iter()).map(|(a, b)| a + b).collect();

  let com_s = msm::multiexp(&bases, &scalar_bytes(&s), 32).unwrap();
  let com_t = msm::multiexp(&bases, &scalar_bytes(&t), 32).unwrap();
  let com_sum = msm::multiexp(&bases, &scalar_bytes(&sum), 32).unwrap();
  assert_eq!(com_sum, com_s + com_t);
}

proptest! {
  #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]
  #[test]
  fn ntt_round_trip(p in 0usize..=9, seed in any::<u64>()) {
    let n = 1usize << p;
    let engine = FftEngine::<Fr>::new(n).unwrap();
    let v = random_scalars(n, seed);
    let mut a = v.clone();
    engine.fft(&mut a).unwrap();
    engine.ifft(&mut a).unwrap();
    prop_assert_eq!(a, v);
  }

  #[test]
  fn msm_matches_naive(n in 1usize..48, seed in any::<u64>()) {
    let bases = random_bases(n, seed);
    let scalars = random_scalars(n, seed.wrapping_add(1));
    let res = msm::multiexp(&bases, &scalar_bytes(&scalars), 32).unwrap();
    let naive = bases
      .iter()
      .zip(scalars.iter())
      .fold(G1::identity(), |acc, (base, scalar)| acc + *base * *scalar);
    prop_assert_eq!(res, naive);
  }
}
