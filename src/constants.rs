// SPDX-License-Identifier: Apache-2.0

//! Common constants used across implementations
//!
//! This module centralizes the chunk geometry, classification codes, lane
//! counts, and GPU launch constants shared by the scalar/SIMD/CUDA paths.

// =============================================================================
// CHUNK GEOMETRY
// =============================================================================

/// Stage 1 operates on fixed 64-byte windows on every backend; all bitmap
/// buffers are sized `ceil(input_len / CHUNK_SIZE)` u64s.
pub const CHUNK_SIZE: usize = 64;

// =============================================================================
// CLASSIFICATION CODES
// =============================================================================
// Byte-wise classification contract shared by both backends. Downstream
// Stage 2 consumers depend on these numeric values.

pub const CHAR_WHITESPACE: u8 = 0;
pub const CHAR_BRACE_OPEN: u8 = 1;
pub const CHAR_BRACE_CLOSE: u8 = 2;
pub const CHAR_BRACKET_OPEN: u8 = 3;
pub const CHAR_BRACKET_CLOSE: u8 = 4;
pub const CHAR_QUOTE: u8 = 5;
pub const CHAR_COLON: u8 = 6;
pub const CHAR_COMMA: u8 = 7;
pub const CHAR_BACKSLASH: u8 = 8;
pub const CHAR_OTHER: u8 = 9;

// =============================================================================
// BIT PARITY MASKS
// =============================================================================

/// Bits at even positions (0, 2, 4, ...). Used by the escape analyzer to
/// separate backslash runs by starting parity.
pub const EVEN_BITS: u64 = 0x5555_5555_5555_5555;
pub const ODD_BITS: u64 = !EVEN_BITS;

// =============================================================================
// SIMD Lane Counts by Architecture
// =============================================================================

// AVX-512 Constants (Nightly feature only)
#[cfg(all(feature = "jsix-nightly", target_arch = "x86_64"))]
pub use avx512_constants::*;
#[cfg(all(feature = "jsix-nightly", target_arch = "x86_64"))]
mod avx512_constants {
    pub const LANES_AVX512_BYTES: usize = 64; // 512/8 = one full chunk
}

// x86_64 Stable Constants (AVX2 only)
#[cfg(all(target_arch = "x86_64", not(feature = "jsix-nightly")))]
pub use x86_stable_constants::*;
#[cfg(all(target_arch = "x86_64", not(feature = "jsix-nightly")))]
mod x86_stable_constants {
    pub const LANES_AVX2_BYTES: usize = 32; // 256/8 = half a chunk
}

// NEON Constants (ARM64 only)
#[cfg(target_arch = "aarch64")]
pub use neon_constants::*;
#[cfg(target_arch = "aarch64")]
mod neon_constants {
    pub const LANES_NEON_BYTES: usize = 16; // 128/8 = quarter chunk
}

// =============================================================================
// GPU/CUDA Constants
// =============================================================================

pub use gpu_constants::*;

mod gpu_constants {
    // One GPU thread owns one 64-byte chunk; blocks of 256 threads cover
    // 16 KiB of input each.
    pub const GPU_BLOCK_SIZE: usize = 256;

    // Below this input size the kernel launch overhead dominates and the
    // CPU SIMD path wins; auto-dispatch only routes larger inputs to CUDA.
    pub const GPU_THRESHOLD_STAGE1: usize = 256 * 1024;
}

// =============================================================================
// Dispatch Thresholds
// =============================================================================

// When the disable-jsix feature is enabled, force the scalar implementations
// by making every accelerated path unreachable.
#[cfg(feature = "disable-jsix")]
mod thresholds {
    pub const SIMD_THRESHOLD_STAGE1: usize = usize::MAX;
}

#[cfg(not(feature = "disable-jsix"))]
mod thresholds {
    // SIMD classification pays off as soon as there is one full chunk.
    pub const SIMD_THRESHOLD_STAGE1: usize = 64;
}

pub use thresholds::*;
