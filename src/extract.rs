// SPDX-License-Identifier: Apache-2.0

//! Structural extraction
//!
//! Filters structural masks against string regions and enumerates the
//! surviving set bits into the caller's position/character arrays. Also
//! hosts the scalar tail pass both backends run over the final <64 bytes.

#[cfg(has_cuda)]
use crate::constants::{CHUNK_SIZE, GPU_BLOCK_SIZE};
#[cfg(has_cuda)]
use crate::types::{FindResult, JsixError, Result};

#[cfg(has_cuda)]
use crate::gpu::{
    cudaFree, cudaMalloc, cudaMemcpy, cudaMemset, launch_ptx, CUDA_MEMCPY_DEVICE_TO_HOST,
    CUDA_MEMCPY_HOST_TO_DEVICE,
};
#[cfg(has_cuda)]
use std::ffi::c_void;
#[cfg(has_cuda)]
use std::ptr;

/// Structural bits outside strings, with unescaped quotes re-added so both
/// string delimiters survive the filter.
#[inline]
pub fn filter_structural(structural: u64, in_string: u64, unescaped_quotes: u64) -> u64 {
    (structural & !in_string) | unescaped_quotes
}

/// Emit one chunk's filtered bits, lowest offset first.
///
/// Returns `false` when the caller's capacity ran out with bits left to
/// emit; `count` then sits at the truncation point.
#[inline]
pub fn extract_from_mask(
    base: usize,
    mut filtered: u64,
    input: &[u8],
    positions: &mut [u32],
    characters: &mut [u8],
    count: &mut usize,
    max_output: usize,
) -> bool {
    while filtered != 0 {
        if *count == max_output {
            return false;
        }
        let k = filtered.trailing_zeros() as usize;
        let offset = base + k;
        positions[*count] = offset as u32;
        characters[*count] = input[offset];
        *count += 1;
        filtered &= filtered - 1;
    }
    true
}

/// Scalar pass over the bytes after the last full chunk.
///
/// Inherits the in-string state from the chunked pass; backslash parity is
/// tracked with a local flag that starts clear. Quotes toggle the string
/// state and are always emitted when unescaped; the six other structurals
/// are emitted only outside strings.
pub fn scan_tail(
    input: &[u8],
    start: usize,
    mut in_string: bool,
    positions: &mut [u32],
    characters: &mut [u8],
    count: &mut usize,
    max_output: usize,
) -> bool {
    let mut prev_backslash = false;
    for (offset, &byte) in input.iter().enumerate().skip(start) {
        if *count == max_output {
            return false;
        }

        if byte == b'\\' && !prev_backslash {
            prev_backslash = true;
            continue;
        }

        if byte == b'"' && !prev_backslash {
            positions[*count] = offset as u32;
            characters[*count] = byte;
            *count += 1;
            in_string = !in_string;
        } else if !in_string
            && !prev_backslash
            && matches!(byte, b'{' | b'}' | b'[' | b']' | b':' | b',')
        {
            positions[*count] = offset as u32;
            characters[*count] = byte;
            *count += 1;
        }

        prev_backslash = false;
    }
    true
}

// =============================================================================
// PTX KERNEL FOR GPU EXTRACTION
// =============================================================================

// One thread per 64-byte chunk, compacting through a global atomic counter.
// Non-quote structurals are emitted when their in-string bit is clear.
// Quotes additionally check the preceding bit (bit 63 of the previous mask
// word across chunk boundaries): a 0->1 transition at a quote is an opening
// delimiter, which the inclusive prefix-XOR marks as inside.
#[cfg(has_cuda)]
pub const PTX_EXTRACT_STRUCTURAL: &str = r#"
  .version 7.5
  .target sm_70
  .address_size 64

  .visible .entry extract_structural(
    .param .u64 input_ptr,
    .param .u64 mask_ptr,
    .param .u32 size,
    .param .u64 pos_ptr,
    .param .u64 chars_ptr,
    .param .u64 count_ptr
  ) {
    .reg .u32 %r<24>;
    .reg .u64 %rd<20>;
    .reg .pred %p<14>;

    ld.param.u64 %rd0, [input_ptr];
    ld.param.u64 %rd1, [mask_ptr];
    ld.param.u32 %r0, [size];
    ld.param.u64 %rd2, [pos_ptr];
    ld.param.u64 %rd3, [chars_ptr];
    ld.param.u64 %rd4, [count_ptr];

    mov.u32 %r1, %ctaid.x;
    mov.u32 %r2, %ntid.x;
    mov.u32 %r3, %tid.x;
    mad.lo.u32 %r4, %r1, %r2, %r3;   // chunk index

    add.u32 %r5, %r0, 63;
    shr.u32 %r5, %r5, 6;             // num_chunks
    setp.ge.u32 %p0, %r4, %r5;
    @%p0 bra done;

    // This chunk's mask and the previous chunk's top bit.
    cvt.u64.u32 %rd5, %r4;
    shl.b64 %rd6, %rd5, 3;
    add.u64 %rd7, %rd1, %rd6;
    ld.global.u64 %rd8, [%rd7];      // in-string mask
    mov.u32 %r6, 0;                  // prev bit entering the chunk
    setp.eq.u32 %p1, %r4, 0;
    @%p1 bra head_ready;
    ld.global.u64 %rd9, [%rd7 + -8];
    shr.u64 %rd9, %rd9, 63;
    cvt.u32.u64 %r6, %rd9;
  head_ready:

    mul.lo.u32 %r7, %r4, 64;         // base offset
    mov.u32 %r8, 0;                  // j
  scan:
    setp.ge.u32 %p2, %r8, 64;
    @%p2 bra done;
    add.u32 %r9, %r7, %r8;           // p = base + j
    setp.ge.u32 %p3, %r9, %r0;
    @%p3 bra done;

    cvt.u64.u32 %rd10, %r9;
    add.u64 %rd11, %rd0, %rd10;
    ld.global.u8 %r10, [%rd11];

    // current in-string bit
    shr.u64 %rd12, %rd8, %r8;
    cvt.u32.u64 %r11, %rd12;
    and.u32 %r11, %r11, 1;

    // quote: emit on a clear current or preceding bit
    setp.ne.u32 %p4, %r10, 34;
    @%p4 bra check_struct;
    setp.eq.u32 %p5, %r11, 0;
    setp.eq.u32 %p6, %r6, 0;
    or.pred %p5, %p5, %p6;
    @%p5 bra emit;
    bra next;

  check_struct:
    setp.ne.u32 %p7, %r11, 0;        // inside string: skip
    @%p7 bra next;
    setp.eq.u32 %p8, %r10, 123;      // {
    setp.eq.u32 %p9, %r10, 125;      // }
    or.pred %p8, %p8, %p9;
    setp.eq.u32 %p9, %r10, 91;       // [
    or.pred %p8, %p8, %p9;
    setp.eq.u32 %p9, %r10, 93;       // ]
    or.pred %p8, %p8, %p9;
    setp.eq.u32 %p9, %r10, 58;       // :
    or.pred %p8, %p8, %p9;
    setp.eq.u32 %p9, %r10, 44;       // ,
    or.pred %p8, %p8, %p9;
    @!%p8 bra next;

  emit:
    atom.global.add.u32 %r12, [%rd4], 1;
    cvt.u64.u32 %rd13, %r12;
    shl.b64 %rd14, %rd13, 2;         // slot * 4
    add.u64 %rd15, %rd2, %rd14;
    st.global.u32 [%rd15], %r9;
    add.u64 %rd16, %rd3, %rd13;
    st.global.u8 [%rd16], %r10;

  next:
    mov.u32 %r6, %r11;               // current bit becomes prev
    add.u32 %r8, %r8, 1;
    bra scan;

  done:
    ret;
  }
"#;

// =============================================================================
// GPU WRAPPER
// =============================================================================

/// GPU structural extraction over precomputed in-string masks.
///
/// The kernel compacts hits through a device atomic counter into a
/// worst-case buffer (one slot per input byte); the host then sorts by
/// position and applies the caller's capacity, so truncation cuts the same
/// strictly-increasing prefix the CPU backend would produce.
#[cfg(has_cuda)]
pub unsafe fn extract_structural_gpu(
    input: &[u8],
    string_mask: &[u64],
    positions: &mut [u32],
    characters: &mut [u8],
) -> Result<FindResult> {
    let len = input.len();
    let num_chunks = len.div_ceil(CHUNK_SIZE);
    if string_mask.len() < num_chunks {
        return Err(JsixError::InvalidArgument(
            "string mask shorter than ceil(len/64)".to_string(),
        ));
    }
    let max_output = positions.len().min(characters.len());

    let mut d_input: *mut u8 = ptr::null_mut();
    if unsafe { cudaMalloc(&mut d_input as *mut *mut u8 as *mut *mut c_void, len) } != 0 {
        return Err(JsixError::Cuda("cudaMalloc(input) failed".to_string()));
    }
    let mut d_mask: *mut u64 = ptr::null_mut();
    if unsafe {
        cudaMalloc(
            &mut d_mask as *mut *mut u64 as *mut *mut c_void,
            num_chunks * std::mem::size_of::<u64>(),
        )
    } != 0
    {
        unsafe { cudaFree(d_input as *mut c_void) };
        return Err(JsixError::Cuda("cudaMalloc(mask) failed".to_string()));
    }
    // Worst case: every byte structural.
    let mut d_pos: *mut u32 = ptr::null_mut();
    if unsafe {
        cudaMalloc(
            &mut d_pos as *mut *mut u32 as *mut *mut c_void,
            len * std::mem::size_of::<u32>(),
        )
    } != 0
    {
        unsafe {
            cudaFree(d_input as *mut c_void);
            cudaFree(d_mask as *mut c_void);
        }
        return Err(JsixError::Cuda("cudaMalloc(positions) failed".to_string()));
    }
    let mut d_chars: *mut u8 = ptr::null_mut();
    if unsafe { cudaMalloc(&mut d_chars as *mut *mut u8 as *mut *mut c_void, len) } != 0 {
        unsafe {
            cudaFree(d_input as *mut c_void);
            cudaFree(d_mask as *mut c_void);
            cudaFree(d_pos as *mut c_void);
        }
        return Err(JsixError::Cuda("cudaMalloc(characters) failed".to_string()));
    }
    let mut d_count: *mut u32 = ptr::null_mut();
    if unsafe {
        cudaMalloc(
            &mut d_count as *mut *mut u32 as *mut *mut c_void,
            std::mem::size_of::<u32>(),
        )
    } != 0
    {
        unsafe {
            cudaFree(d_input as *mut c_void);
            cudaFree(d_mask as *mut c_void);
            cudaFree(d_pos as *mut c_void);
            cudaFree(d_chars as *mut c_void);
        }
        return Err(JsixError::Cuda("cudaMalloc(count) failed".to_string()));
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
        if unsafe {
            cudaMemcpy(
                d_mask as *mut c_void,
                string_mask.as_ptr() as *const c_void,
                num_chunks * std::mem::size_of::<u64>(),
                CUDA_MEMCPY_HOST_TO_DEVICE,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(mask) failed".to_string()));
        }
        if unsafe { cudaMemset(d_count as *mut c_void, 0, std::mem::size_of::<u32>()) } != 0 {
            return Err(JsixError::Cuda("cudaMemset(count) failed".to_string()));
        }

        let threads = GPU_BLOCK_SIZE as u32;
        let blocks = (num_chunks as u32).div_ceil(threads).max(1);
        let size_u32 = len as u32;
        launch_ptx(
            PTX_EXTRACT_STRUCTURAL,
            "extract_structural",
            blocks,
            threads,
            &[
                &d_input as *const *mut u8 as *const u8,
                &d_mask as *const *mut u64 as *const u8,
                &size_u32 as *const u32 as *const u8,
                &d_pos as *const *mut u32 as *const u8,
                &d_chars as *const *mut u8 as *const u8,
                &d_count as *const *mut u32 as *const u8,
            ],
        )?;

        let mut found: u32 = 0;
        if unsafe {
            cudaMemcpy(
                &mut found as *mut u32 as *mut c_void,
                d_count as *const c_void,
                std::mem::size_of::<u32>(),
                CUDA_MEMCPY_DEVICE_TO_HOST,
            )
        } != 0
        {
            return Err(JsixError::Cuda("cudaMemcpy(count) failed".to_string()));
        }
        let found = (found as usize).min(len);

        let mut host_pos = vec![0u32; found];
        let mut host_chars = vec![0u8; found];
        if found > 0 {
            if unsafe {
                cudaMemcpy(
                    host_pos.as_mut_ptr() as *mut c_void,
                    d_pos as *const c_void,
                    found * std::mem::size_of::<u32>(),
                    CUDA_MEMCPY_DEVICE_TO_HOST,
                )
            } != 0
            {
                return Err(JsixError::Cuda("cudaMemcpy(positions) failed".to_string()));
            }
            if unsafe {
                cudaMemcpy(
                    host_chars.as_mut_ptr() as *mut c_void,
                    d_chars as *const c_void,
                    found,
                    CUDA_MEMCPY_DEVICE_TO_HOST,
                )
            } != 0
            {
                return Err(JsixError::Cuda("cudaMemcpy(characters) failed".to_string()));
            }
        }

        // Atomic compaction is unordered; establish the total order here.
        let mut pairs: Vec<(u32, u8)> = host_pos
            .iter()
            .copied()
            .zip(host_chars.iter().copied())
            .collect();
        pairs.sort_unstable_by_key(|&(pos, _)| pos);

        let count = pairs.len().min(max_output);
        for (i, &(pos, ch)) in pairs.iter().take(count).enumerate() {
            positions[i] = pos;
            characters[i] = ch;
        }
        Ok(FindResult {
            count,
            truncated: pairs.len() > max_output,
        })
    })();

    unsafe {
        cudaFree(d_input as *mut c_void);
        cudaFree(d_mask as *mut c_void);
        cudaFree(d_pos as *mut c_void);
        cudaFree(d_chars as *mut c_void);
        cudaFree(d_count as *mut c_void);
    }
    result
}
