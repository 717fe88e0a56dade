//! Device offload hooks for the transform and multi-scalar engines.
//!
//! The engines consume the narrow [`NttDevice`] and [`MsmDevice`] traits: a
//! device either accepts a call and produces the result, or declines it and
//! the caller runs the CPU path. [`NullDevice`] declines everything and is the
//! default. [`DeviceShim`] adapts a loaded backend library
//! ([`DeviceBackend`]) to those traits and owns the dispatch policy: one
//! idempotent initialization, a per-size twiddle-domain cache for transforms,
//! and canonical scalar staging for MSM. A device result must be bit-identical
//! to the CPU result for any valid input; a mismatch is a correctness bug in
//! the backend.

use ff::PrimeField;
use halo2curves::{
  CurveAffine,
  bn256::{Fr, G1, G1Affine, G2, G2Affine},
  group::Group,
};
use once_cell::sync::OnceCell;
use std::{collections::HashSet, sync::Mutex};
use tracing::debug;

/// Transform offload hooks consumed by the FFT engine.
pub trait NttDevice<Scalar>: Send + Sync {
  /// Attempts the forward transform on the device; `false` means "run on CPU".
  fn ntt_forward(&self, _values: &mut [Scalar]) -> bool {
    false
  }

  /// Attempts the inverse transform on the device; `false` means "run on CPU".
  fn ntt_inverse(&self, _values: &mut [Scalar]) -> bool {
    false
  }
}

/// MSM offload hook consumed by the multiexp entry points.
pub trait MsmDevice<C: CurveAffine>: Send + Sync {
  /// Attempts the product on the device; `None` means "run on CPU".
  fn multiexp(&self, _bases: &[C], _scalars: &[u8], _scalar_size: usize) -> Option<C::Curve> {
    None
  }
}

/// The no-device default: declines every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDevice;

impl<Scalar> NttDevice<Scalar> for NullDevice {}

impl<C: CurveAffine> MsmDevice<C> for NullDevice {}

/// Transform direction requested from a backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NttDirection {
  /// Coefficients to evaluations.
  Forward,
  /// Evaluations to coefficients, including the `1/n` normalization.
  Inverse,
}

/// Raw entry points of a loaded device library.
///
/// Implementations stage host buffers on and off the device themselves.
/// Scalars are handed over in canonical (non-Montgomery) form. `ntt` is
/// natural-order in and out, matching the CPU transforms, and is only called
/// after the twiddle domain for that size has been installed. A backend that
/// cannot complete an operation reports failure and leaves the caller to the
/// CPU path; it must never return an incorrect result.
pub trait DeviceBackend: Send + Sync {
  /// Loads the library and selects a device. Called at most once per shim.
  fn load(&self) -> bool;

  /// Installs the twiddle domain for transforms of size `2^logn`.
  fn init_ntt_domain(&self, logn: u32) -> bool;

  /// Runs an in-place transform over Fr.
  fn ntt(&self, values: &mut [Fr], direction: NttDirection) -> bool;

  /// Computes a G1 product; `None` reports failure.
  fn msm_g1(&self, bases: &[G1Affine], scalars: &[Fr]) -> Option<G1>;

  /// Computes a G2 product; `None` reports failure.
  fn msm_g2(&self, bases: &[G2Affine], scalars: &[Fr]) -> Option<G2>;
}

/// Adapts a [`DeviceBackend`] to the engine-facing hook traits.
pub struct DeviceShim<B: DeviceBackend> {
  backend: B,
  loaded: OnceCell<bool>,
  domains: Mutex<HashSet<u32>>,
}

impl<B: DeviceBackend> DeviceShim<B> {
  /// Wraps `backend`; nothing is loaded until the first offload attempt.
  pub fn new(backend: B) -> Self {
    Self {
      backend,
      loaded: OnceCell::new(),
      domains: Mutex::new(HashSet::new()),
    }
  }

  /// Loads the backend on first use; later calls return the cached outcome.
  /// Safe under concurrent callers.
  pub fn initialize(&self) -> bool {
    *self.loaded.get_or_init(|| self.backend.load())
  }

  fn ensure_domain(&self, logn: u32) -> bool {
    let mut domains = match self.domains.lock() {
      Ok(domains) => domains,
      Err(_) => return false,
    };
    if domains.contains(&logn) {
      return true;
    }
    if !self.backend.init_ntt_domain(logn) {
      return false;
    }
    domains.insert(logn);
    true
  }

  fn run_ntt(&self, values: &mut [Fr], direction: NttDirection) -> bool {
    if !values.len().is_power_of_two() {
      return false;
    }
    if !self.initialize() {
      debug!("device backend unavailable, transform stays on CPU");
      return false;
    }
    let logn = values.len().trailing_zeros();
    if !self.ensure_domain(logn) {
      return false;
    }
    self.backend.ntt(values, direction)
  }

  fn stage_scalars(scalars: &[u8], scalar_size: usize) -> Option<Vec<Fr>> {
    if scalar_size != 32 || scalars.len() % 32 != 0 {
      return None;
    }
    scalars
      .chunks(scalar_size)
      .map(|bytes| {
        let mut repr = <Fr as PrimeField>::Repr::default();
        repr.as_mut().copy_from_slice(bytes);
        Option::<Fr>::from(Fr::from_repr(repr))
      })
      .collect()
  }
}

impl<B: DeviceBackend> NttDevice<Fr> for DeviceShim<B> {
  fn ntt_forward(&self, values: &mut [Fr]) -> bool {
    self.run_ntt(values, NttDirection::Forward)
  }

  fn ntt_inverse(&self, values: &mut [Fr]) -> bool {
    self.run_ntt(values, NttDirection::Inverse)
  }
}

impl<B: DeviceBackend> MsmDevice<G1Affine> for DeviceShim<B> {
  fn multiexp(&self, bases: &[G1Affine], scalars: &[u8], scalar_size: usize) -> Option<G1> {
    if bases.is_empty() {
      return Some(G1::identity());
    }
    if !self.initialize() {
      return None;
    }
    let staged = Self::stage_scalars(scalars, scalar_size)?;
    self.backend.msm_g1(bases, &staged)
  }
}

impl<B: DeviceBackend> MsmDevice<G2Affine> for DeviceShim<B> {
  fn multiexp(&self, bases: &[G2Affine], scalars: &[u8], scalar_size: usize) -> Option<G2> {
    if bases.is_empty() {
      return Some(G2::identity());
    }
    if !self.initialize() {
      return None;
    }
    let staged = Self::stage_scalars(scalars, scalar_size)?;
    self.backend.msm_g2(bases, &staged)
  }
}
