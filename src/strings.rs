// SPDX-License-Identifier: Apache-2.0

//! String-region masking
//!
//! Converts per-chunk unescaped-quote masks into in-string masks via
//! prefix-XOR, propagating a one-bit carry across chunks. The raw mask is
//! the inclusive prefix-XOR (an opening quote's own bit is set, a closing
//! quote's is clear); the extractor re-adds unescaped quotes so the emitted
//! index follows the half-open convention with both delimiters outside.
//!
//! Three prefix-XOR realizations: carry-less multiply against all-ones on
//! x86 (PCLMULQDQ) and ARM (PMULL), and a log-depth shift-XOR ladder as the
//! portable fallback.

#![allow(unsafe_op_in_unsafe_fn)]

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::vmull_p64;

#[cfg(target_arch = "aarch64")]
use std::arch::is_aarch64_feature_detected;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{_mm_clmulepi64_si128, _mm_cvtsi128_si64, _mm_set1_epi8, _mm_set_epi64x};

#[cfg(has_cuda)]
use crate::constants::{CHUNK_SIZE, GPU_BLOCK_SIZE};
#[cfg(has_cuda)]
use crate::types::{JsixError, Result};

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
// PREFIX-XOR
// =============================================================================

/// Cumulative XOR of bits 0..=k for every k: each set input bit toggles all
/// later output bits. With quote bits as input, the result marks string
/// regions.
#[inline]
pub fn prefix_xor(bits: u64) -> u64 {
    #[cfg(not(feature = "disable-jsix"))]
    {
        #[cfg(target_arch = "x86_64")]
        if is_x86_feature_detected!("pclmulqdq") {
            return unsafe { prefix_xor_clmul(bits) };
        }

        #[cfg(target_arch = "aarch64")]
        if is_aarch64_feature_detected!("aes") {
            return unsafe { prefix_xor_pmull(bits) };
        }
    }

    prefix_xor_portable(bits)
}

/// Log-depth shift-XOR ladder; portable reference for the carry-less paths.
#[inline]
pub fn prefix_xor_portable(bits: u64) -> u64 {
    let mut x = bits;
    x ^= x << 1;
    x ^= x << 2;
    x ^= x << 4;
    x ^= x << 8;
    x ^= x << 16;
    x ^= x << 32;
    x
}

/// Carry-less multiply by all-ones; the low 64 bits of the 128-bit product
/// are the prefix-XOR.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "pclmulqdq")]
unsafe fn prefix_xor_clmul(bits: u64) -> u64 {
    let a = _mm_set_epi64x(0, bits as i64);
    let ones = _mm_set1_epi8(-1);
    let product = _mm_clmulepi64_si128::<0>(a, ones);
    _mm_cvtsi128_si64(product) as u64
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon,aes")]
unsafe fn prefix_xor_pmull(bits: u64) -> u64 {
    vmull_p64(bits, u64::MAX) as u64
}

// =============================================================================
// STRING MASK
// =============================================================================

/// Compute one chunk's in-string mask and advance the carry.
///
/// `in_string_carry` is all-ones while inside a string at the chunk
/// boundary, all-zeros outside; applied by XOR. The outgoing carry is the
/// sign-extension of the result, which equals the old carry XOR the parity
/// of `unescaped_quotes`.
#[inline]
pub fn string_mask(unescaped_quotes: u64, in_string_carry: &mut u64) -> u64 {
    let in_string = prefix_xor(unescaped_quotes) ^ *in_string_carry;
    *in_string_carry = (in_string as i64 >> 63) as u64;
    in_string
}

/// Fold the per-chunk quote parities into final string masks on the host.
///
/// `masks` holds segment-local prefix-XOR results; `parities` holds one
/// 0/1 byte per chunk. An exclusive scan of the parities decides which
/// segments get complemented. Shared by the GPU pipeline's second pass.
pub fn apply_string_carries(masks: &mut [u64], parities: &[u8]) {
    let mut carry = 0u8;
    for (mask, &parity) in masks.iter_mut().zip(parities.iter()) {
        if carry != 0 {
            *mask = !*mask;
        }
        carry ^= parity & 1;
    }
}

// =============================================================================
// PTX KERNELS FOR GPU STRING MASKING
// =============================================================================

// Unescaped-quote bitmap plus per-chunk parity byte. One thread per
// 64-byte chunk; the escape state at the chunk head is recovered by
// scanning backward over the contiguous backslash run preceding the chunk,
// so runs crossing chunk boundaries resolve identically to the CPU path.
#[cfg(has_cuda)]
pub const PTX_CREATE_QUOTE_BITMAP: &str = r#"
  .version 7.5
  .target sm_70
  .address_size 64

  .visible .entry create_quote_bitmap(
    .param .u64 input_ptr,
    .param .u32 size,
    .param .u64 quote_bits_ptr,
    .param .u64 quote_carry_ptr
  ) {
    .reg .u32 %r<20>;
    .reg .u64 %rd<16>;
    .reg .pred %p<12>;

    ld.param.u64 %rd0, [input_ptr];
    ld.param.u32 %r0, [size];
    ld.param.u64 %rd1, [quote_bits_ptr];
    ld.param.u64 %rd2, [quote_carry_ptr];

    mov.u32 %r1, %ctaid.x;
    mov.u32 %r2, %ntid.x;
    mov.u32 %r3, %tid.x;
    mad.lo.u32 %r4, %r1, %r2, %r3;   // chunk index

    add.u32 %r5, %r0, 63;            // num_chunks = ceil(size / 64)
    shr.u32 %r5, %r5, 6;
    setp.ge.u32 %p0, %r4, %r5;
    @%p0 bra done;

    mul.lo.u32 %r6, %r4, 64;         // base offset

    // Backward scan: length of the backslash run ending at base - 1.
    mov.u32 %r7, 0;                  // k
  lookback:
    setp.ge.u32 %p1, %r7, %r6;
    @%p1 bra lookback_done;
    sub.u32 %r8, %r6, %r7;
    sub.u32 %r8, %r8, 1;             // base - 1 - k
    cvt.u64.u32 %rd3, %r8;
    add.u64 %rd4, %rd0, %rd3;
    ld.global.u8 %r9, [%rd4];
    setp.ne.u32 %p2, %r9, 92;
    @%p2 bra lookback_done;
    add.u32 %r7, %r7, 1;
    bra lookback;
  lookback_done:
    and.u32 %r10, %r7, 1;            // escape state at chunk head

    mov.u64 %rd5, 0;                 // unescaped-quote bits
    mov.u32 %r11, 0;                 // j
  scan:
    setp.ge.u32 %p3, %r11, 64;
    @%p3 bra store;
    add.u32 %r12, %r6, %r11;         // p = base + j
    setp.ge.u32 %p4, %r12, %r0;
    @%p4 bra store;

    cvt.u64.u32 %rd6, %r12;
    add.u64 %rd7, %rd0, %rd6;
    ld.global.u8 %r13, [%rd7];

    setp.ne.u32 %p5, %r10, 0;        // escaped byte: consume flag
    @!%p5 bra not_escaped;
    mov.u32 %r10, 0;
    bra next;
  not_escaped:
    setp.ne.u32 %p6, %r13, 92;       // backslash arms the flag
    @%p6 bra not_backslash;
    mov.u32 %r10, 1;
    bra next;
  not_backslash:
    setp.ne.u32 %p7, %r13, 34;       // '"'
    @%p7 bra next;
    mov.u64 %rd8, 1;
    shl.b64 %rd8, %rd8, %r11;
    or.b64 %rd5, %rd5, %rd8;
  next:
    add.u32 %r11, %r11, 1;
    bra scan;

  store:
    cvt.u64.u32 %rd9, %r4;
    shl.b64 %rd10, %rd9, 3;          // chunk * 8 bytes
    add.u64 %rd11, %rd1, %rd10;
    st.global.u64 [%rd11], %rd5;

    popc.b64 %r14, %rd5;
    and.u32 %r14, %r14, 1;
    add.u64 %rd12, %rd2, %rd9;
    st.global.u8 [%rd12], %r14;

  done:
    ret;
  }
"#;

// Segment-local prefix-XOR, in place. The cross-chunk carry is folded in by
// the host-side exclusive scan of the parity bytes.
#[cfg(has_cuda)]
pub const PTX_CREATE_STRING_MASK: &str = r#"
  .version 7.5
  .target sm_70
  .address_size 64

  .visible .entry create_string_mask(
    .param .u64 mask_ptr,
    .param .u32 num_chunks
  ) {
    .reg .u32 %r<8>;
    .reg .u64 %rd<10>;
    .reg .pred %p<4>;

    ld.param.u64 %rd0, [mask_ptr];
    ld.param.u32 %r0, [num_chunks];

    mov.u32 %r1, %ctaid.x;
    mov.u32 %r2, %ntid.x;
    mov.u32 %r3, %tid.x;
    mad.lo.u32 %r4, %r1, %r2, %r3;
    setp.ge.u32 %p0, %r4, %r0;
    @%p0 bra done;

    cvt.u64.u32 %rd1, %r4;
    shl.b64 %rd1, %rd1, 3;
    add.u64 %rd2, %rd0, %rd1;
    ld.global.u64 %rd3, [%rd2];

    shl.b64 %rd4, %rd3, 1;
    xor.b64 %rd3, %rd3, %rd4;
    shl.b64 %rd4, %rd3, 2;
    xor.b64 %rd3, %rd3, %rd4;
    shl.b64 %rd4, %rd3, 4;
    xor.b64 %rd3, %rd3, %rd4;
    shl.b64 %rd4, %rd3, 8;
    xor.b64 %rd3, %rd3, %rd4;
    shl.b64 %rd4, %rd3, 16;
    xor.b64 %rd3, %rd3, %rd4;
    shl.b64 %rd4, %rd3, 32;
    xor.b64 %rd3, %rd3, %rd4;

    st.global.u64 [%rd2], %rd3;

  done:
    ret;
  }
"#;

// =============================================================================
// GPU WRAPPERS
// =============================================================================

/// GPU quote bitmap: unescaped-quote bits and one parity byte per chunk.
///
/// `quote_bits` and `quote_carry` must each hold `ceil(size / 64)` entries.
#[cfg(has_cuda)]
pub unsafe fn create_quote_bitmap_gpu(
    input: &[u8],
    quote_bits: &mut [u64],
    quote_carry: &mut [u8],
) -> Result<()> {
    let len = input.len();
    let num_chunks = len.div_ceil(CHUNK_SIZE);
    if quote_bits.len() < num_chunks || quote_carry.len() < num_chunks {
        return Err(JsixError::InvalidArgument(
            "bitmap buffers shorter than ceil(len/64)".to_string(),
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
        return Err(JsixError::Cuda("cudaMalloc(quote_bits) failed".to_string()));
    }
    let mut d_carry: *mut u8 = ptr::null_mut();
    if unsafe { cudaMalloc(&mut d_carry as *mut *mut u8 as *mut *mut c_void, num_chunks) } != 0 {
        unsafe {
            cudaFree(d_input as *mut c_void);
            cudaFree(d_bits as *mut c_void);
        }
        return Err(JsixError::Cuda("cudaMalloc(quote_carry) failed".to_string()));
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
            PTX_CREATE_QUOTE_BITMAP,
            "create_quote_bitmap",
            blocks,
            threads,
            &[
                &d_input as *const *mut u8 as *const u8,
                &size_u32 as *const u32 as *const u8,
                &d_bits as *const *mut u64 as *const u8,
                &d_carry as *const *mut u8 as *const u8,
            ],
        )?;

        if unsafe {
            cudaMemcpy(
                quote_bits.as_mut_ptr() as *mut c_void,
                d_bits as *const c_void,
                num_chunks * std::mem::size_of::<u64>(),
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(quote_bits) failed".to_string()));
        }
        if unsafe {
            cudaMemcpy(
                quote_carry.as_mut_ptr() as *mut c_void,
                d_carry as *const c_void,
                num_chunks,
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(quote_carry) failed".to_string()));
        }
        Ok(())
    })();

    unsafe {
        cudaFree(d_input as *mut c_void);
        cudaFree(d_bits as *mut c_void);
        cudaFree(d_carry as *mut c_void);
    }
    result
}

/// GPU string mask: segment-local prefix-XOR on device, then the host
/// exclusive scan of parity carries complements the affected segments.
/// Transforms `quote_bits` in place into in-string masks.
#[cfg(has_cuda)]
pub unsafe fn create_string_mask_gpu(quote_bits: &mut [u64], quote_carry: &[u8]) -> Result<()> {
    let num_chunks = quote_bits.len().min(quote_carry.len());
    if num_chunks == 0 {
        return Err(JsixError::InvalidArgument("empty bitmap".to_string()));
    }

    let bytes = num_chunks * std::mem::size_of::<u64>();
    let mut d_masks: *mut u64 = ptr::null_mut();
    if unsafe { cudaMalloc(&mut d_masks as *mut *mut u64 as *mut *mut c_void, bytes) } != 0 {
        return Err(JsixError::Cuda("cudaMalloc(masks) failed".to_string()));
    }

    let result = (|| {
        if unsafe {
            cudaMemcpy(
                d_masks as *mut c_void,
                quote_bits.as_ptr() as *const c_void,
                bytes,
                CUDA_MEMCPY_HOST_TO_DEVICE,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(masks) failed".to_string()));
        }

        let threads = GPU_BLOCK_SIZE as u32;
        let blocks = (num_chunks as u32).div_ceil(threads).max(1);
        let num_chunks_u32 = num_chunks as u32;
        launch_ptx(
            PTX_CREATE_STRING_MASK,
            "create_string_mask",
            blocks,
            threads,
            &[
                &d_masks as *const *mut u64 as *const u8,
                &num_chunks_u32 as *const u32 as *const u8,
            ],
        )?;

        if unsafe {
            cudaMemcpy(
                quote_bits.as_mut_ptr() as *mut c_void,
                d_masks as *const c_void,
                bytes,
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(masks) failed".to_string()));
        }
        Ok(())
    })();

    unsafe { cudaFree(d_masks as *mut c_void) };
    result?;

    apply_string_carries(&mut quote_bits[..num_chunks], &quote_carry[..num_chunks]);
    Ok(())
}
