//! Parallel windowed multi-scalar multiplication over byte-encoded scalars.
//!
//! This module implements the bucket ("Pippenger") method: scalars are cut
//! into fixed-width bit windows, bases are scattered into per-worker bucket
//! stripes, the stripes are packed and reduced per window, and the window
//! results are combined Horner-style. Scalars arrive as a contiguous
//! little-endian byte buffer of `scalar_size` bytes per term — the layout in
//! which witness data reaches the prover — and are treated as plain integers;
//! they need not be reduced.

use crate::{
  errors::EngineError,
  gpu::{MsmDevice, NullDevice},
  start_span,
};
use halo2curves::group::Group;
use halo2curves::CurveAffine;
use rayon::prelude::*;
use tracing::info;

// Window-width selection: aim for PACK_FACTOR scalars per bucket, bounded so
// the bucket table stays within workers · 2^16 points.
const PACK_FACTOR: usize = 2;
const MIN_CHUNK_BITS: u32 = 2;
const MAX_CHUNK_BITS: u32 = 16;

/// Bucket slot padded out to a cache line so neighboring slots do not
/// false-share when the pack phase walks stripe zero in parallel.
#[derive(Clone, Copy)]
#[repr(align(64))]
struct Bucket<T>(T);

/// Computes `Σ scalars[i] · bases[i]` on the CPU.
///
/// `scalars` holds `scalar_size` little-endian bytes per base; `scalar_size`
/// must be at least 8 so window loads stay inside each scalar.
///
/// # Errors
/// Returns `EngineError::InvalidInputLength` if the scalar buffer does not
/// match the bases or `scalar_size < 8`.
pub fn multiexp<C: CurveAffine>(
  bases: &[C],
  scalars: &[u8],
  scalar_size: usize,
) -> Result<C::Curve, EngineError> {
  multiexp_with_device(bases, scalars, scalar_size, &NullDevice)
}

/// Computes `Σ scalars[i] · bases[i]`, offering the call to `device` first.
///
/// A declined or failed offload falls back to the CPU path; which path ran is
/// not visible in the result.
///
/// # Errors
/// Returns `EngineError::InvalidInputLength` if the scalar buffer does not
/// match the bases or `scalar_size < 8`.
pub fn multiexp_with_device<C: CurveAffine>(
  bases: &[C],
  scalars: &[u8],
  scalar_size: usize,
  device: &dyn MsmDevice<C>,
) -> Result<C::Curve, EngineError> {
  validate(bases.len(), scalars.len(), scalar_size)?;
  if let Some(res) = device.multiexp(bases, scalars, scalar_size) {
    return Ok(res);
  }
  let (_msm_span, msm_t) = start_span!("msm", size = bases.len());
  let res = multiexp_inner(bases, scalars, scalar_size, None);
  info!(elapsed_ms = %msm_t.elapsed().as_millis(), size = bases.len(), "msm");
  Ok(res)
}

/// Computes a family of ragged sub-MSMs packed into one interleaved base
/// array.
///
/// Lane `m` of the `lane_sizes.len()`-way interleaving contributes indices
/// `m, m + nx, m + 2·nx, …`, `lane_sizes[m]` terms in total; a lane size of
/// zero contributes nothing. This form always runs on the CPU.
///
/// # Errors
/// Returns `EngineError::InvalidInputLength` if the scalar buffer does not
/// match the bases, `scalar_size < 8`, or `lane_sizes` is empty.
pub fn multiexp_interleaved<C: CurveAffine>(
  bases: &[C],
  scalars: &[u8],
  scalar_size: usize,
  lane_sizes: &[u64],
) -> Result<C::Curve, EngineError> {
  validate(bases.len(), scalars.len(), scalar_size)?;
  if lane_sizes.is_empty() {
    return Err(EngineError::InvalidInputLength);
  }
  let (_msm_span, msm_t) = start_span!("msm_interleaved", size = bases.len());
  let res = multiexp_inner(bases, scalars, scalar_size, Some(lane_sizes));
  info!(elapsed_ms = %msm_t.elapsed().as_millis(), size = bases.len(), "msm_interleaved");
  Ok(res)
}

fn validate(n: usize, scalar_bytes: usize, scalar_size: usize) -> Result<(), EngineError> {
  if scalar_size < 8 || scalar_bytes != n * scalar_size {
    return Err(EngineError::InvalidInputLength);
  }
  Ok(())
}

fn multiexp_inner<C: CurveAffine>(
  bases: &[C],
  scalars: &[u8],
  scalar_size: usize,
  lane_sizes: Option<&[u64]>,
) -> C::Curve {
  let n = bases.len();
  if n == 0 {
    return C::Curve::identity();
  }
  if n == 1 {
    return scalar_mul_bytes(&bases[0], &scalars[..scalar_size]);
  }

  let bits_per_chunk = (n / PACK_FACTOR)
    .max(1)
    .ilog2()
    .clamp(MIN_CHUNK_BITS, MAX_CHUNK_BITS) as usize;
  let n_chunks = (scalar_size * 8 - 1) / bits_per_chunk + 1;
  let accs_per_chunk = 1usize << bits_per_chunk;

  // One bucket stripe per scatter worker; workers own disjoint index spans,
  // so phase 1 writes are contention-free.
  let span = n.div_ceil(rayon::current_num_threads());
  let n_stripes = n.div_ceil(span);
  let mut stripes: Vec<Vec<Bucket<C::Curve>>> = (0..n_stripes)
    .map(|_| vec![Bucket(C::Curve::identity()); accs_per_chunk])
    .collect();

  let mut chunk_results = Vec::with_capacity(n_chunks);
  for chunk in 0..n_chunks {
    scatter(
      &mut stripes,
      bases,
      scalars,
      scalar_size,
      bits_per_chunk,
      chunk,
      span,
      lane_sizes,
    );
    pack::<C>(&mut stripes);
    chunk_results.push(reduce::<C>(&mut stripes[0], bits_per_chunk));
  }

  // Horner over windows, most significant first.
  let mut res = chunk_results[n_chunks - 1];
  for chunk in (0..n_chunks - 1).rev() {
    for _ in 0..bits_per_chunk {
      res = res.double();
    }
    res += chunk_results[chunk];
  }
  res
}

// Phase 1: each worker adds its span's bases into its own bucket stripe,
// indexed by the scalar's window value. Stripes are re-zeroed here, which is
// what makes them reusable across windows.
fn scatter<C: CurveAffine>(
  stripes: &mut [Vec<Bucket<C::Curve>>],
  bases: &[C],
  scalars: &[u8],
  scalar_size: usize,
  bits_per_chunk: usize,
  chunk: usize,
  span: usize,
  lane_sizes: Option<&[u64]>,
) {
  stripes
    .par_iter_mut()
    .zip(bases.par_chunks(span))
    .zip(scalars.par_chunks(span * scalar_size))
    .enumerate()
    .for_each(|(worker, ((stripe, bases), scalars))| {
      stripe.fill(Bucket(C::Curve::identity()));
      for (i, base) in bases.iter().enumerate() {
        if let Some(sizes) = lane_sizes {
          let idx = worker * span + i;
          if (idx / sizes.len()) as u64 >= sizes[idx % sizes.len()] {
            continue;
          }
        }
        if bool::from(base.is_identity()) {
          continue;
        }
        let value = chunk_value(scalars, scalar_size, bits_per_chunk, i, chunk) as usize;
        if value != 0 {
          stripe[value].0 += *base;
        }
      }
    });
}

// Phase 2: fold every stripe into stripe zero, bucket by bucket. Workers own
// disjoint bucket indices, so no synchronization is needed.
fn pack<C: CurveAffine>(stripes: &mut [Vec<Bucket<C::Curve>>]) {
  if let Some((first, rest)) = stripes.split_first_mut() {
    let rest = &*rest;
    first.par_iter_mut().enumerate().for_each(|(bucket, acc)| {
      for stripe in rest {
        let p = stripe[bucket].0;
        if !bool::from(p.is_identity()) {
          acc.0 += p;
        }
      }
    });
  }
}

// Phase 3: collapse stripe zero to Σ_b b · bucket[b] by repeated halving.
// Each level folds the upper half of the live buckets onto the lower half
// while collecting the fold's side sum into the carry bucket at `ndiv2`,
// whose weight is then paid with `nbits - 1` doublings.
fn reduce<C: CurveAffine>(buckets: &mut [Bucket<C::Curve>], bits_per_chunk: usize) -> C::Curve {
  let mut res = C::Curve::identity();
  for nbits in (2..=bits_per_chunk).rev() {
    let ndiv2 = 1usize << (nbits - 1);
    let (lower, upper) = buckets[..2 * ndiv2].split_at_mut(ndiv2);
    let spill = lower[1..]
      .par_iter_mut()
      .zip(upper[1..].par_iter_mut())
      .map(|(lo, hi)| {
        let p = hi.0;
        if bool::from(p.is_identity()) {
          C::Curve::identity()
        } else {
          lo.0 += p;
          p
        }
      })
      .reduce(C::Curve::identity, |a, b| a + b);
    let mut carry = upper[0].0 + spill;
    for _ in 0..nbits - 1 {
      carry = carry.double();
    }
    res += carry;
  }
  res + buckets[1].0
}

// Plain double-and-add over the byte encoding; only used for single-term
// products.
fn scalar_mul_bytes<C: CurveAffine>(base: &C, scalar: &[u8]) -> C::Curve {
  let mut acc = C::Curve::identity();
  for byte in scalar.iter().rev() {
    for bit in (0..8).rev() {
      acc = acc.double();
      if (byte >> bit) & 1 == 1 {
        acc += *base;
      }
    }
  }
  acc
}

// Little-endian window load with the tail clamp: the window base is pulled
// back so the 8-byte read never leaves the scalar, and the mask trims the
// window to the bits that remain. The clamp is a correctness requirement at
// the scalar's tail, not an optimization.
fn chunk_value(
  scalars: &[u8],
  scalar_size: usize,
  bits_per_chunk: usize,
  idx: usize,
  chunk: usize,
) -> u64 {
  let bit_start = chunk * bits_per_chunk;
  let byte_start = (bit_start / 8).min(scalar_size - 8);
  let effective_bits = bits_per_chunk.min(scalar_size * 8 - bit_start);
  let mut window = [0u8; 8];
  let offset = idx * scalar_size + byte_start;
  window.copy_from_slice(&scalars[offset..offset + 8]);
  (u64::from_le_bytes(window) >> (bit_start - byte_start * 8)) & ((1u64 << effective_bits) - 1)
}
