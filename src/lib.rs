//! This library implements the numerical core of a Groth16-style prover over
//! BN254: an in-place radix-2 NTT over the scalar field ([`fft`]) and a
//! parallel windowed-bucket MSM over the curve groups ([`msm`]). Either engine
//! can hand a call to an optional device backend ([`gpu`]) and runs the CPU
//! path whenever the device declines.
#![deny(
  warnings,
  future_incompatible,
  nonstandard_style,
  rust_2018_idioms,
  missing_docs
)]
#![forbid(unsafe_code)]

pub mod errors;
pub mod fft;
pub mod gpu;
pub mod msm;

/// Starts a `tracing` span together with a wall-clock timer.
///
/// Returns the entered span guard and a [`std::time::Instant`]; callers report
/// `elapsed_ms` on completion.
#[macro_export]
macro_rules! start_span {
  ($name:expr) => {{
    let span = tracing::info_span!($name);
    (span.entered(), std::time::Instant::now())
  }};
  ($name:expr, $($fields:tt)*) => {{
    let span = tracing::info_span!($name, $($fields)*);
    (span.entered(), std::time::Instant::now())
  }};
}
