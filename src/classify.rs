// SPDX-License-Identifier: Apache-2.0

//! Chunk classification
//!
//! Turns 64 raw input bytes into three bitmasks (`structural`, `quote`,
//! `backslash`) and provides the byte-wise classification codes shared with
//! downstream consumers. Implementations may use scalar code, SIMD, and
//! (when enabled) CUDA kernels; all paths produce bit-identical masks.
//!
//! ## Performance notes
//! The chunk classifier sits on the hottest path of Stage 1. When modifying
//! it, avoid introducing allocations or branches inside the per-lane loops.

#![allow(unsafe_op_in_unsafe_fn)]

// ARM NEON imports
#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::{
    uint8x16_t, vandq_u8, vceqq_u8, vdupq_n_u8, vgetq_lane_u16, vld1q_u8, vorrq_u8,
    vpaddq_u8, vreinterpretq_u16_u8,
};

// x86_64 SIMD intrinsics imports - AVX2 only (not when nightly AVX-512 is enabled)
#[cfg(all(target_arch = "x86_64", not(feature = "jsix-nightly")))]
use std::arch::x86_64::{
    __m256i, _mm256_cmpeq_epi8, _mm256_loadu_si256, _mm256_movemask_epi8, _mm256_or_si256,
    _mm256_set1_epi8,
};

// AVX-512 intrinsics (nightly only)
#[cfg(all(feature = "jsix-nightly", target_arch = "x86_64"))]
use std::arch::x86_64::{_mm512_cmpeq_epi8_mask, _mm512_loadu_si512, _mm512_set1_epi8};

#[cfg(target_arch = "aarch64")]
use std::arch::is_aarch64_feature_detected;

use crate::constants::*;
use crate::types::{ChunkMasks, JsixError, Result};

#[cfg(has_cuda)]
use crate::gpu::{
    cudaFree, cudaMalloc, cudaMemcpy, launch_ptx, CUDA_MEMCPY_DEVICE_TO_HOST,
    CUDA_MEMCPY_HOST_TO_DEVICE,
};
#[cfg(has_cuda)]
use std::ffi::c_void;
#[cfg(has_cuda)]
use std::ptr;

// =============================================================================
// BYTE-WISE CLASSIFICATION LOOKUP
// =============================================================================

/// Classification code per byte value. Codes are part of the external
/// contract: 0=whitespace, 1={, 2=}, 3=[, 4=], 5=", 6=:, 7=,, 8=\, 9=other.
pub const CLASS_LOOKUP: [u8; 256] = [
    /* 0x00-0x0F */ 9, 9, 9, 9, 9, 9, 9, 9, 9, 0, 0, 9, 9, 0, 9, 9,
    /* 0x10-0x1F */ 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    /* 0x20-0x2F */ 0, 9, 5, 9, 9, 9, 9, 9, 9, 9, 9, 9, 7, 9, 9, 9,
    /* 0x30-0x3F */ 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 6, 9, 9, 9, 9, 9,
    /* 0x40-0x4F */ 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    /* 0x50-0x5F */ 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 3, 8, 4, 9, 9,
    /* 0x60-0x6F */ 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    /* 0x70-0x7F */ 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 1, 9, 2, 9, 9,
    /* 0x80-0xFF all OTHER */
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
    9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9,
];

/// Byte-wise classification without string filtering.
///
/// Pure function of the input; calling twice yields identical bytes. The
/// output buffer must be at least as long as the input.
pub fn classify_bytes(input: &[u8], output: &mut [u8]) -> Result<()> {
    if input.is_empty() {
        return Err(JsixError::InvalidArgument("empty input".to_string()));
    }
    if output.len() < input.len() {
        return Err(JsixError::InvalidArgument(
            "output buffer shorter than input".to_string(),
        ));
    }

    for (out, &byte) in output.iter_mut().zip(input.iter()) {
        *out = CLASS_LOOKUP[byte as usize];
    }
    Ok(())
}

// =============================================================================
// CHUNK CLASSIFIER
// =============================================================================

/// Classify one 64-byte chunk into structural/quote/backslash masks.
///
/// Selects the widest SIMD path available at runtime; every path produces
/// the same masks as [`classify_chunk_scalar`].
#[inline]
pub fn classify_chunk(chunk: &[u8]) -> ChunkMasks {
    // Bounds-checked up front so the SIMD loads below stay in range.
    let chunk = &chunk[..CHUNK_SIZE];

    #[cfg(not(feature = "disable-jsix"))]
    {
        #[cfg(all(feature = "jsix-nightly", target_arch = "x86_64"))]
        if is_x86_feature_detected!("avx512bw") {
            return unsafe { classify_chunk_avx512(chunk) };
        }

        #[cfg(all(target_arch = "x86_64", not(feature = "jsix-nightly")))]
        if is_x86_feature_detected!("avx2") {
            return unsafe { classify_chunk_avx2(chunk) };
        }

        #[cfg(target_arch = "aarch64")]
        if is_aarch64_feature_detected!("neon") {
            return unsafe { classify_chunk_neon(chunk) };
        }
    }

    classify_chunk_scalar(chunk)
}

/// Scalar chunk classifier. Reference implementation for every SIMD path.
pub fn classify_chunk_scalar(chunk: &[u8]) -> ChunkMasks {
    let mut masks = ChunkMasks::default();
    for (k, &byte) in chunk[..CHUNK_SIZE].iter().enumerate() {
        let bit = 1u64 << k;
        match byte {
            b'{' | b'}' | b'[' | b']' | b':' | b',' => masks.structural |= bit,
            b'"' => {
                masks.structural |= bit;
                masks.quote |= bit;
            }
            b'\\' => masks.backslash |= bit,
            _ => {}
        }
    }
    masks
}

// =============================================================================
// NEON PATH
// =============================================================================

/// Pack a 16-byte comparison result (0xFF/0x00 per byte) into a 16-bit mask.
///
/// ARM has no PMOVMSKB: AND each byte with its bit weight, then three
/// pairwise adds collapse the weighted bytes into the low 16 bits.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn neon_movemask_16(v: uint8x16_t) -> u64 {
    const BIT_WEIGHTS: [u8; 16] = [
        0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40,
        0x80,
    ];
    let weights = vld1q_u8(BIT_WEIGHTS.as_ptr());
    let masked = vandq_u8(v, weights);

    let paired = vpaddq_u8(masked, masked);
    let paired = vpaddq_u8(paired, paired);
    let paired = vpaddq_u8(paired, paired);

    vgetq_lane_u16::<0>(vreinterpretq_u16_u8(paired)) as u64
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub unsafe fn classify_chunk_neon(chunk: &[u8]) -> ChunkMasks {
    let v_quote = vdupq_n_u8(b'"');
    let v_backslash = vdupq_n_u8(b'\\');
    let v_brace_open = vdupq_n_u8(b'{');
    let v_brace_close = vdupq_n_u8(b'}');
    let v_bracket_open = vdupq_n_u8(b'[');
    let v_bracket_close = vdupq_n_u8(b']');
    let v_colon = vdupq_n_u8(b':');
    let v_comma = vdupq_n_u8(b',');

    let mut masks = ChunkMasks::default();

    // Four 16-byte lanes shifted into bit positions 0/16/32/48.
    for lane in 0..CHUNK_SIZE / LANES_NEON_BYTES {
        let bytes = vld1q_u8(chunk.as_ptr().add(lane * LANES_NEON_BYTES));

        let is_quote = vceqq_u8(bytes, v_quote);
        let is_backslash = vceqq_u8(bytes, v_backslash);
        let is_brace_open = vceqq_u8(bytes, v_brace_open);
        let is_brace_close = vceqq_u8(bytes, v_brace_close);
        let is_bracket_open = vceqq_u8(bytes, v_bracket_open);
        let is_bracket_close = vceqq_u8(bytes, v_bracket_close);
        let is_colon = vceqq_u8(bytes, v_colon);
        let is_comma = vceqq_u8(bytes, v_comma);

        let mut structural = vorrq_u8(is_brace_open, is_brace_close);
        structural = vorrq_u8(structural, is_bracket_open);
        structural = vorrq_u8(structural, is_bracket_close);
        structural = vorrq_u8(structural, is_colon);
        structural = vorrq_u8(structural, is_comma);
        structural = vorrq_u8(structural, is_quote);

        let shift = lane * 16;
        masks.structural |= neon_movemask_16(structural) << shift;
        masks.quote |= neon_movemask_16(is_quote) << shift;
        masks.backslash |= neon_movemask_16(is_backslash) << shift;
    }

    masks
}

// =============================================================================
// AVX2 PATH
// =============================================================================

#[cfg(all(target_arch = "x86_64", not(feature = "jsix-nightly")))]
#[target_feature(enable = "avx2")]
pub unsafe fn classify_chunk_avx2(chunk: &[u8]) -> ChunkMasks {
    let mut masks = ChunkMasks::default();

    // Two 32-byte lanes; PMOVMSKB packs each directly.
    for half in 0..CHUNK_SIZE / LANES_AVX2_BYTES {
        let bytes =
            _mm256_loadu_si256(chunk.as_ptr().add(half * LANES_AVX2_BYTES) as *const __m256i);

        let is_quote = _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b'"' as i8));
        let is_backslash = _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b'\\' as i8));
        let braces = _mm256_or_si256(
            _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b'{' as i8)),
            _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b'}' as i8)),
        );
        let brackets = _mm256_or_si256(
            _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b'[' as i8)),
            _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b']' as i8)),
        );
        let delims = _mm256_or_si256(
            _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b':' as i8)),
            _mm256_cmpeq_epi8(bytes, _mm256_set1_epi8(b',' as i8)),
        );
        let structural =
            _mm256_or_si256(_mm256_or_si256(braces, brackets), _mm256_or_si256(delims, is_quote));

        let shift = half * 32;
        masks.structural |= (_mm256_movemask_epi8(structural) as u32 as u64) << shift;
        masks.quote |= (_mm256_movemask_epi8(is_quote) as u32 as u64) << shift;
        masks.backslash |= (_mm256_movemask_epi8(is_backslash) as u32 as u64) << shift;
    }

    masks
}

// =============================================================================
// AVX-512 PATH (nightly only)
// =============================================================================

#[cfg(all(feature = "jsix-nightly", target_arch = "x86_64"))]
#[target_feature(enable = "avx512f,avx512bw")]
pub unsafe fn classify_chunk_avx512(chunk: &[u8]) -> ChunkMasks {
    // One 64-byte lane; byte compares produce the u64 masks directly.
    let bytes = _mm512_loadu_si512(chunk.as_ptr() as *const _);

    let quote = _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b'"' as i8));
    let backslash = _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b'\\' as i8));
    let structural = _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b'{' as i8))
        | _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b'}' as i8))
        | _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b'[' as i8))
        | _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b']' as i8))
        | _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b':' as i8))
        | _mm512_cmpeq_epi8_mask(bytes, _mm512_set1_epi8(b',' as i8))
        | quote;

    ChunkMasks {
        structural,
        quote,
        backslash,
    }
}

// =============================================================================
// PTX KERNELS FOR GPU CLASSIFICATION
// =============================================================================

// Byte-wise classification codes; grid-stride, one thread per byte.
#[cfg(has_cuda)]
pub const PTX_CLASSIFY_BYTES: &str = r#"
  .version 7.5
  .target sm_70
  .address_size 64

  .visible .entry classify_bytes(
    .param .u64 input_ptr,
    .param .u64 output_ptr,
    .param .u32 len
  ) {
    .reg .u32 %r<16>;
    .reg .u64 %rd<8>;
    .reg .pred %p<12>;

    ld.param.u64 %rd0, [input_ptr];
    ld.param.u64 %rd1, [output_ptr];
    ld.param.u32 %r0, [len];

    mov.u32 %r1, %ctaid.x;
    mov.u32 %r2, %ntid.x;
    mov.u32 %r3, %tid.x;
    mad.lo.u32 %r4, %r1, %r2, %r3;   // idx
    mov.u32 %r5, %nctaid.x;
    mul.lo.u32 %r6, %r5, %r2;        // grid stride

  loop:
    setp.ge.u32 %p0, %r4, %r0;
    @%p0 bra done;

    cvt.u64.u32 %rd2, %r4;
    add.u64 %rd3, %rd0, %rd2;
    ld.global.u8 %r7, [%rd3];

    mov.u32 %r8, 9;                  // default: other
    setp.eq.u32 %p1, %r7, 32;        // space
    setp.eq.u32 %p2, %r7, 9;         // tab
    or.pred %p1, %p1, %p2;
    setp.eq.u32 %p2, %r7, 10;        // LF
    or.pred %p1, %p1, %p2;
    setp.eq.u32 %p2, %r7, 13;        // CR
    or.pred %p1, %p1, %p2;
    selp.u32 %r8, 0, %r8, %p1;

    setp.eq.u32 %p3, %r7, 123;       // {
    selp.u32 %r8, 1, %r8, %p3;
    setp.eq.u32 %p4, %r7, 125;       // }
    selp.u32 %r8, 2, %r8, %p4;
    setp.eq.u32 %p5, %r7, 91;        // [
    selp.u32 %r8, 3, %r8, %p5;
    setp.eq.u32 %p6, %r7, 93;        // ]
    selp.u32 %r8, 4, %r8, %p6;
    setp.eq.u32 %p7, %r7, 34;        // "
    selp.u32 %r8, 5, %r8, %p7;
    setp.eq.u32 %p8, %r7, 58;        // :
    selp.u32 %r8, 6, %r8, %p8;
    setp.eq.u32 %p9, %r7, 44;        // ,
    selp.u32 %r8, 7, %r8, %p9;
    setp.eq.u32 %p10, %r7, 92;       // backslash
    selp.u32 %r8, 8, %r8, %p10;

    add.u64 %rd4, %rd1, %rd2;
    st.global.u8 [%rd4], %r8;

    add.u32 %r4, %r4, %r6;
    bra loop;

  done:
    ret;
  }
"#;

// Newline bitmap for NDJSON; one thread per 64-byte chunk, same
// classify-to-mask shape as the quote bitmap kernel.
#[cfg(has_cuda)]
pub const PTX_FIND_NEWLINES: &str = r#"
  .version 7.5
  .target sm_70
  .address_size 64

  .visible .entry find_newlines(
    .param .u64 input_ptr,
    .param .u32 size,
    .param .u64 newline_bits_ptr
  ) {
    .reg .u32 %r<16>;
    .reg .u64 %rd<12>;
    .reg .pred %p<8>;

    ld.param.u64 %rd0, [input_ptr];
    ld.param.u32 %r0, [size];
    ld.param.u64 %rd1, [newline_bits_ptr];

    mov.u32 %r1, %ctaid.x;
    mov.u32 %r2, %ntid.x;
    mov.u32 %r3, %tid.x;
    mad.lo.u32 %r4, %r1, %r2, %r3;   // chunk index

    add.u32 %r5, %r0, 63;            // num_chunks = ceil(size / 64)
    shr.u32 %r5, %r5, 6;
    setp.ge.u32 %p0, %r4, %r5;
    @%p0 bra done;

    mul.lo.u32 %r6, %r4, 64;         // base offset
    mov.u64 %rd2, 0;                 // bits
    mov.u32 %r7, 0;                  // j

  scan:
    setp.ge.u32 %p1, %r7, 64;
    @%p1 bra store;
    add.u32 %r8, %r6, %r7;           // p = base + j
    setp.ge.u32 %p2, %r8, %r0;
    @%p2 bra store;

    cvt.u64.u32 %rd3, %r8;
    add.u64 %rd4, %rd0, %rd3;
    ld.global.u8 %r9, [%rd4];
    setp.ne.u32 %p3, %r9, 10;        // '\n'
    @%p3 bra next;
    mov.u64 %rd5, 1;
    shl.b64 %rd5, %rd5, %r7;
    or.b64 %rd2, %rd2, %rd5;

  next:
    add.u32 %r7, %r7, 1;
    bra scan;

  store:
    cvt.u64.u32 %rd6, %r4;
    shl.b64 %rd6, %rd6, 3;           // chunk * 8 bytes
    add.u64 %rd7, %rd1, %rd6;
    st.global.u64 [%rd7], %rd2;

  done:
    ret;
  }
"#;

// =============================================================================
// GPU WRAPPERS
// =============================================================================

/// GPU byte-wise classification. Same code contract as [`classify_bytes`].
#[cfg(has_cuda)]
pub unsafe fn classify_bytes_gpu(input: &[u8], output: &mut [u8]) -> Result<()> {
    let len = input.len();

    let mut d_input: *mut u8 = ptr::null_mut();
    if unsafe { cudaMalloc(&mut d_input as *mut *mut u8 as *mut *mut c_void, len) } != 0 {
        return Err(JsixError::Cuda("cudaMalloc(input) failed".to_string()));
    }
    let mut d_output: *mut u8 = ptr::null_mut();
    if unsafe { cudaMalloc(&mut d_output as *mut *mut u8 as *mut *mut c_void, len) } != 0 {
        unsafe { cudaFree(d_input as *mut c_void) };
        return Err(JsixError::Cuda("cudaMalloc(output) failed".to_string()));
    }

    let result = (|| {
        if unsafe {
            cudaMemcpy(
                d_input as *mut c_void,
                input.as_ptr() as *const c_void,
                len,
                CUDA_MEMCPY_HOST_TO_DEVICE,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(input) failed".to_string()));
        }

        let threads = GPU_BLOCK_SIZE as u32;
        let blocks = (len as u32).div_ceil(threads).max(1);
        let len_u32 = len as u32;
        launch_ptx(
            PTX_CLASSIFY_BYTES,
            "classify_bytes",
            blocks,
            threads,
            &[
                &d_input as *const *mut u8 as *const u8,
                &d_output as *const *mut u8 as *const u8,
                &len_u32 as *const u32 as *const u8,
            ],
        )?;

        if unsafe {
            cudaMemcpy(
                output.as_mut_ptr() as *mut c_void,
                d_output as *const c_void,
                len,
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(output) failed".to_string()));
        }
        Ok(())
    })();

    unsafe {
        cudaFree(d_input as *mut c_void);
        cudaFree(d_output as *mut c_void);
    }
    result
}

/// GPU newline finder: one u64 bitmap per 64-byte chunk, LSB = earliest byte.
#[cfg(has_cuda)]
pub unsafe fn find_newlines_gpu(input: &[u8], newline_bits: &mut [u64]) -> Result<()> {
    let len = input.len();
    let num_chunks = len.div_ceil(CHUNK_SIZE);
    if newline_bits.len() < num_chunks {
        return Err(JsixError::InvalidArgument(
            "newline bitmap shorter than ceil(len/64)".to_string(),
        ));
    }

    let mut d_input: *mut u8 = ptr::null_mut();
    if unsafe { cudaMalloc(&mut d_input as *mut *mut u8 as *mut *mut c_void, len) } != 0 {
        return Err(JsixError::Cuda("cudaMalloc(input) failed".to_string()));
    }
    let mut d_bits: *mut u64 = ptr::null_mut();
    if unsafe {
        cudaMalloc(
            &mut d_bits as *mut *mut u64 as *mut *mut c_void,
            num_chunks * std::mem::size_of::<u64>(),
        )
    } != 0
    {
        unsafe { cudaFree(d_input as *mut c_void) };
        return Err(JsixError::Cuda("cudaMalloc(bitmap) failed".to_string()));
    }

    let result = (|| {
        if unsafe {
            cudaMemcpy(
                d_input as *mut c_void,
                input.as_ptr() as *const c_void,
                len,
                CUDA_MEMCPY_HOST_TO_DEVICE,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(input) failed".to_string()));
        }

        let threads = GPU_BLOCK_SIZE as u32;
        let blocks = (num_chunks as u32).div_ceil(threads).max(1);
        let size_u32 = len as u32;
        launch_ptx(
            PTX_FIND_NEWLINES,
            "find_newlines",
            blocks,
            threads,
            &[
                &d_input as *const *mut u8 as *const u8,
                &size_u32 as *const u32 as *const u8,
                &d_bits as *const *mut u64 as *const u8,
            ],
        )?;

        if unsafe {
            cudaMemcpy(
                newline_bits.as_mut_ptr() as *mut c_void,
                d_bits as *const c_void,
                num_chunks * std::mem::size_of::<u64>(),
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(bitmap) failed".to_string()));
        }
        Ok(())
    })();

    unsafe {
        cudaFree(d_input as *mut c_void);
        cudaFree(d_bits as *mut c_void);
    }
    result
}

/// CPU newline finder with the same bitmap layout as the GPU kernel.
pub fn find_newlines_cpu(input: &[u8], newline_bits: &mut [u64]) -> Result<()> {
    let num_chunks = input.len().div_ceil(CHUNK_SIZE);
    if newline_bits.len() < num_chunks {
        return Err(JsixError::InvalidArgument(
            "newline bitmap shorter than ceil(len/64)".to_string(),
        ));
    }

    for (chunk_idx, chunk) in input.chunks(CHUNK_SIZE).enumerate() {
        let mut bits = 0u64;
        for (k, &byte) in chunk.iter().enumerate() {
            if byte == b'\n' {
                bits |= 1u64 << k;
            }
        }
        newline_bits[chunk_idx] = bits;
    }
    Ok(())
}
