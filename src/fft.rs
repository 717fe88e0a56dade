//! In-place radix-2 number-theoretic transforms over a prime scalar field.
//!
//! [`FftEngine`] precomputes a table of roots of unity for a maximum domain
//! size and then runs forward and inverse transforms over any power-of-two
//! length up to that size. The root-table construction and the butterfly
//! stages are parallelized with rayon; every stage is a synchronous barrier,
//! so callers block until a transform completes.

use crate::{
  errors::EngineError,
  gpu::{NttDevice, NullDevice},
  start_span,
};
use ff::PrimeField;
use num_bigint::BigUint;
use num_traits::Num;
use rayon::prelude::*;
use tracing::info;

/// Power of the enclosing power-of-two domain: the smallest `p` with
/// `2^p >= n`.
fn domain_pow(n: usize) -> u32 {
  assert_ne!(n, 0);
  n.next_power_of_two().trailing_zeros()
}

/// Precomputed transform state for domains of size up to `2^s`.
///
/// Construction is the expensive step; a constructed engine is immutable and
/// may be shared across threads for any number of transforms. No per-call
/// allocations are made.
pub struct FftEngine<Scalar: PrimeField> {
  /// `roots[i] = ω^i` for ω a primitive `2^s`-th root of unity.
  roots: Vec<Scalar>,
  /// `pow_two_inv[k] = 2^{-k}`, used to normalize the inverse transform.
  pow_two_inv: Vec<Scalar>,
  /// The engine supports transforms of length up to `2^s`.
  s: u32,
  /// The quadratic non-residue ω was derived from.
  nqr: Scalar,
  device: Box<dyn NttDevice<Scalar>>,
}

impl<Scalar: PrimeField> FftEngine<Scalar> {
  /// Builds an engine for domains up to `max_domain_size` (rounded up to a
  /// power of two), with no device offload.
  ///
  /// # Errors
  /// Returns `EngineError::DomainTooLarge` if the requested domain exceeds
  /// the two-adicity of the scalar field.
  pub fn new(max_domain_size: usize) -> Result<Self, EngineError> {
    Self::with_device(max_domain_size, Box::new(NullDevice))
  }

  /// Builds an engine that offers every transform to `device` before running
  /// the CPU path.
  ///
  /// # Errors
  /// Returns `EngineError::DomainTooLarge` if the requested domain exceeds
  /// the two-adicity of the scalar field.
  pub fn with_device(
    max_domain_size: usize,
    device: Box<dyn NttDevice<Scalar>>,
  ) -> Result<Self, EngineError> {
    let (_setup_span, setup_t) = start_span!("fft_setup", max_domain_size);
    let requested = domain_pow(max_domain_size);

    let modulus = BigUint::from_str_radix(Scalar::MODULUS.trim_start_matches("0x"), 16)
      .expect("PrimeField::MODULUS is a hexadecimal string");
    let q_minus_1 = &modulus - 1u32;

    let s = requested.max(1);
    let two_adicity = q_minus_1.trailing_zeros().unwrap_or(0) as u32;
    if s > two_adicity {
      return Err(EngineError::DomainTooLarge {
        requested,
        two_adicity,
      });
    }

    // Smallest non-residue: the Euler-criterion power lands on -1.
    let legendre_exp = (&q_minus_1 >> 1usize).to_u64_digits();
    let mut nqr = Scalar::from(2);
    while nqr.pow_vartime(&legendre_exp) == Scalar::ONE {
      nqr += Scalar::ONE;
    }

    let omega = nqr.pow_vartime((&q_minus_1 >> (s as usize)).to_u64_digits());

    // Spans are seeded independently by direct exponentiation, so the fill is
    // embarrassingly parallel; within a span each entry costs one
    // multiplication.
    let n_roots = 1usize << s;
    let mut roots = vec![Scalar::ZERO; n_roots];
    let n_spans = 10 * rayon::current_num_threads();
    let span_len = n_roots.div_ceil(n_spans).max(1);
    roots
      .par_chunks_mut(span_len)
      .enumerate()
      .for_each(|(span, chunk)| {
        let start = span * span_len;
        let (filled, mut prev) = if start == 0 {
          chunk[0] = Scalar::ONE;
          if chunk.len() > 1 {
            chunk[1] = omega;
          }
          (2, omega)
        } else {
          chunk[0] = omega.pow_vartime([start as u64]);
          (1, chunk[0])
        };
        for slot in chunk.iter_mut().skip(filled) {
          prev *= omega;
          *slot = prev;
        }
      });
    debug_assert_eq!(roots[n_roots - 1] * omega, Scalar::ONE);

    let two_inv = Scalar::from(2).pow_vartime((&q_minus_1 - 1u32).to_u64_digits());
    let mut pow_two_inv = Vec::with_capacity(s as usize + 1);
    pow_two_inv.push(Scalar::ONE);
    for k in 1..=s as usize {
      pow_two_inv.push(pow_two_inv[k - 1] * two_inv);
    }

    info!(elapsed_ms = %setup_t.elapsed().as_millis(), domain = n_roots, "fft_setup");
    Ok(Self {
      roots,
      pow_two_inv,
      s,
      nqr,
      device,
    })
  }

  /// In-place forward transform: `a[i] ← Σ_j a[j] · ω^(ij)`.
  ///
  /// # Errors
  /// Returns `EngineError::InvalidTransformSize` if `a.len()` is not a power
  /// of two, or `EngineError::TransformTooLarge` if it exceeds the engine's
  /// domain.
  pub fn fft(&self, a: &mut [Scalar]) -> Result<(), EngineError> {
    let n = a.len();
    self.check_len(n)?;
    if self.device.ntt_forward(a) {
      return Ok(());
    }
    let (_fft_span, fft_t) = start_span!("fft", size = n);
    Self::reverse_permutation(a);
    for stage in 1..=n.trailing_zeros() as usize {
      let m = 1usize << stage;
      let half = m >> 1;
      let stride = 1usize << (self.s as usize - stage);
      a.par_chunks_mut(m).for_each(|group| {
        let (lo, hi) = group.split_at_mut(half);
        lo.par_iter_mut()
          .zip(hi.par_iter_mut())
          .enumerate()
          .for_each(|(j, (u, v))| {
            let t = self.roots[j * stride] * *v;
            let x = *u;
            *u = x + t;
            *v = x - t;
          });
      });
    }
    info!(elapsed_ms = %fft_t.elapsed().as_millis(), size = n, "fft");
    Ok(())
  }

  /// In-place inverse transform; inverts [`Self::fft`] including the `1/n`
  /// normalization.
  ///
  /// # Errors
  /// Same length constraints as [`Self::fft`].
  pub fn ifft(&self, a: &mut [Scalar]) -> Result<(), EngineError> {
    let n = a.len();
    self.check_len(n)?;
    if self.device.ntt_inverse(a) {
      return Ok(());
    }
    let (_ifft_span, ifft_t) = start_span!("ifft", size = n);
    self.fft(a)?;
    // IFFT(x) = (1/n) · reverse(FFT(x)) with index 0 fixed; indices 0 and n/2
    // are their own mirror images.
    let scale = self.pow_two_inv[n.trailing_zeros() as usize];
    if n > 1 {
      let half = n >> 1;
      let (lo, hi) = a.split_at_mut(half);
      lo[1..]
        .par_iter_mut()
        .zip(hi[1..].par_iter_mut().rev())
        .for_each(|(x, y)| {
          let t = *x;
          *x = *y * scale;
          *y = t * scale;
        });
      lo[0] *= scale;
      hi[0] *= scale;
    }
    info!(elapsed_ms = %ifft_t.elapsed().as_millis(), size = n, "ifft");
    Ok(())
  }

  /// The largest transform length this engine supports.
  pub fn max_domain_size(&self) -> usize {
    1 << self.s
  }

  /// A primitive `n`-th root of unity, for any supported transform length.
  ///
  /// # Errors
  /// Same length constraints as [`Self::fft`].
  pub fn root_of_unity(&self, n: usize) -> Result<Scalar, EngineError> {
    self.check_len(n)?;
    if n == 1 {
      return Ok(Scalar::ONE);
    }
    Ok(self.roots[(1usize << self.s) / n])
  }

  /// The quadratic non-residue the engine's roots of unity were derived from.
  pub fn quadratic_nonresidue(&self) -> Scalar {
    self.nqr
  }

  fn check_len(&self, n: usize) -> Result<(), EngineError> {
    if !n.is_power_of_two() {
      return Err(EngineError::InvalidTransformSize { size: n });
    }
    let max = 1usize << self.s;
    if n > max {
      return Err(EngineError::TransformTooLarge { size: n, max });
    }
    Ok(())
  }

  /// Swaps `a[i]` with `a[rev(i)]`, where `rev` reverses the low `log2(n)`
  /// bits. Each pair is visited from its smaller index, so every swap happens
  /// exactly once and the permutation is an involution.
  fn reverse_permutation(a: &mut [Scalar]) {
    let n = a.len();
    if n <= 2 {
      return;
    }
    let bits = n.trailing_zeros();
    for i in 0..n {
      let r = ((i as u64).reverse_bits() >> (64 - bits)) as usize;
      if i < r {
        a.swap(i, r);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ff::Field;
  use halo2curves::bn256::Fr;
  use rand::{SeedableRng, rngs::StdRng};

  fn random_vector(n: usize, seed: u64) -> Vec<Fr> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| Fr::random(&mut rng)).collect()
  }

  fn naive_dft(engine: &FftEngine<Fr>, v: &[Fr]) -> Vec<Fr> {
    let omega = engine.root_of_unity(v.len()).unwrap();
    (0..v.len())
      .map(|i| {
        v.iter().enumerate().fold(Fr::ZERO, |acc, (j, x)| {
          acc + *x * omega.pow_vartime([(i * j) as u64])
        })
      })
      .collect()
  }

  #[test]
  fn test_domain_pow_rounds_up() {
    assert_eq!(domain_pow(1), 0);
    assert_eq!(domain_pow(2), 1);
    assert_eq!(domain_pow(1024), 10);
    assert_eq!(domain_pow(1000), 10);
    assert_eq!(domain_pow(1025), 11);
  }

  #[test]
  fn test_root_table_identities() {
    let engine = FftEngine::<Fr>::new(1 << 10).unwrap();
    let n = engine.max_domain_size();
    assert_eq!(engine.roots[0], Fr::ONE);
    assert_eq!(engine.roots[1].pow_vartime([n as u64]), Fr::ONE);
    assert_ne!(engine.roots[1].pow_vartime([(n / 2) as u64]), Fr::ONE);
    for i in 1..n {
      assert_eq!(engine.roots[i] * engine.roots[n - i], Fr::ONE);
    }
  }

  #[test]
  fn test_pow_two_inv_table() {
    let engine = FftEngine::<Fr>::new(1 << 8).unwrap();
    for (k, inv) in engine.pow_two_inv.iter().enumerate() {
      assert_eq!(*inv * Fr::from(1u64 << k), Fr::ONE);
    }
  }

  #[test]
  fn test_construction_respects_two_adicity() {
    // BN254's scalar field has two-adicity 28
    assert!(FftEngine::<Fr>::new(1 << 16).is_ok());
    assert!(matches!(
      FftEngine::<Fr>::new(1 << 29),
      Err(EngineError::DomainTooLarge {
        requested: 29,
        two_adicity: 28
      })
    ));
  }

  #[test]
  fn test_reverse_permutation_is_involution() {
    for n in [4usize, 16, 1024] {
      let v = random_vector(n, 3);
      let mut a = v.clone();
      FftEngine::<Fr>::reverse_permutation(&mut a);
      assert_ne!(a, v);
      FftEngine::<Fr>::reverse_permutation(&mut a);
      assert_eq!(a, v);
    }
  }

  #[test]
  fn test_fft_single_element_is_identity() {
    let engine = FftEngine::<Fr>::new(1 << 4).unwrap();
    let v = random_vector(1, 5);
    let mut a = v.clone();
    engine.fft(&mut a).unwrap();
    assert_eq!(a, v);
    engine.ifft(&mut a).unwrap();
    assert_eq!(a, v);
  }

  #[test]
  fn test_fft_matches_naive_evaluation() {
    let engine = FftEngine::<Fr>::new(1 << 10).unwrap();
    for n in [2usize, 4, 8, 16, 64] {
      let v = random_vector(n, n as u64);
      let mut a = v.clone();
      engine.fft(&mut a).unwrap();
      assert_eq!(a, naive_dft(&engine, &v));
    }
  }

  #[test]
  fn test_fft_four_points() {
    let engine = FftEngine::<Fr>::new(1 << 10).unwrap();
    let v: Vec<Fr> = (1u64..=4).map(Fr::from).collect();
    let mut a = v.clone();
    engine.fft(&mut a).unwrap();
    // X(0) = 1 + 2 + 3 + 4; X(2) evaluates at ω² = -1
    assert_eq!(a[0], Fr::from(10));
    assert_eq!(a[2], -Fr::from(2));
    assert_eq!(a, naive_dft(&engine, &v));
  }

  #[test]
  fn test_round_trip() {
    let engine = FftEngine::<Fr>::new(1 << 12).unwrap();
    let v = random_vector(1024, 7);
    let mut a = v.clone();
    engine.fft(&mut a).unwrap();
    assert_ne!(a, v);
    engine.ifft(&mut a).unwrap();
    assert_eq!(a, v);
  }

  #[test]
  fn test_ifft_then_fft() {
    let engine = FftEngine::<Fr>::new(1 << 8).unwrap();
    let v = random_vector(256, 11);
    let mut a = v.clone();
    engine.ifft(&mut a).unwrap();
    engine.fft(&mut a).unwrap();
    assert_eq!(a, v);
  }

  #[test]
  fn test_rejects_bad_lengths() {
    let engine = FftEngine::<Fr>::new(1 << 6).unwrap();
    let mut a = random_vector(12, 13);
    assert_eq!(
      engine.fft(&mut a),
      Err(EngineError::InvalidTransformSize { size: 12 })
    );
    let mut a = random_vector(128, 17);
    assert_eq!(
      engine.ifft(&mut a),
      Err(EngineError::TransformTooLarge { size: 128, max: 64 })
    );
  }

  #[test]
  fn test_quadratic_nonresidue_has_no_square_root() {
    let engine = FftEngine::<Fr>::new(1 << 4).unwrap();
    assert!(bool::from(engine.quadratic_nonresidue().sqrt().is_none()));
  }
}
