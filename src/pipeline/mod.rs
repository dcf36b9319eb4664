//! Pipeline stages for batch image processing.
//!
//! Each submodule implements exactly one transformation step. Keeping the
//! stages separate makes each independently testable and lets us swap
//! implementations (a different fetcher, another resampling filter) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! hash ──▶ gate ──▶ fetch ──▶ geometry ──▶ transform ──▶ storage
//! (HMAC)  (head)  (reqwest)   (pure)     (decode/resize)  (put)
//! ```
//!
//! 1. [`hash`]      — HMAC-SHA1 urlHash derivation and storage key layout
//! 2. [`fetch`]     — URL normalisation and byte retrieval with protocol
//!    fallback; the only stage with network I/O
//! 3. [`geometry`]  — pure scale/crop arithmetic for one target spec
//! 4. [`transform`] — decode, resample, crop, re-encode; runs in
//!    `spawn_blocking` because resampling is CPU-bound
//! 5. [`process`]   — composes the above into the per-image pipeline

pub mod fetch;
pub mod geometry;
pub mod hash;
pub mod process;
pub mod transform;
