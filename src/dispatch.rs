// SPDX-License-Identifier: Apache-2.0

//! # jsix dispatch framework
//!
//! The orchestrator for Stage 1: it drives the chunk classifier, escape
//! analyzer, string-region masker, and structural extractor per 64-byte
//! window, and chooses between the CPU SIMD backend and the CUDA backend
//! based on target capabilities and input sizes. Both backends produce
//! bit-identical output; the only state crossing chunk boundaries is the
//! pair of carry registers (`in_string`, backslash run parity).

use log::trace;

use crate::constants::*;

#[cfg(target_arch = "aarch64")]
use std::arch::is_aarch64_feature_detected;

use crate::types::{Backend, FindResult, JsixError, Result};
use crate::classify as classify_mod;
use crate::{escape, extract, strings};

#[cfg(has_cuda)]
use crate::gpu;

// =============================================================================
//  HARDWARE DETECTION & SIMD CAPABILITIES
// =============================================================================

/// Hardware capability detection used by the jsix dispatch layer
pub struct HardwareCapabilities {
    pub has_avx512: bool,
    pub has_avx2: bool,
    pub has_neon: bool,
    pub has_cuda: bool,
}

impl HardwareCapabilities {
    #[inline]
    pub fn detect() -> Self {
        HardwareCapabilities {
            has_avx512: Self::detect_avx512(),
            has_avx2: Self::detect_avx2(),
            has_neon: Self::detect_neon(),
            has_cuda: Self::detect_cuda(),
        }
    }

    fn detect_avx512() -> bool {
        #[allow(unused_mut)]
        let mut detected_avx512 = false;

        #[cfg(target_arch = "x86_64")]
        #[cfg(feature = "jsix-nightly")]
        if is_x86_feature_detected!("avx512bw") {
            detected_avx512 = true;
        }

        detected_avx512
    }

    fn detect_avx2() -> bool {
        #[allow(unused_mut)]
        let mut detected_avx2 = false;

        #[cfg(target_arch = "x86_64")]
        #[cfg(not(feature = "jsix-nightly"))]
        if is_x86_feature_detected!("avx2") {
            detected_avx2 = true;
        }

        detected_avx2
    }

    fn detect_neon() -> bool {
        #[allow(unused_mut)]
        let mut detected_neon = false;

        #[cfg(target_arch = "aarch64")]
        if is_aarch64_feature_detected!("neon") {
            detected_neon = true;
        }

        detected_neon
    }

    fn detect_cuda() -> bool {
        // Use a static atomic for one-time detection and caching
        use std::sync::atomic::{AtomicU8, Ordering};
        static CUDA_DETECTED: AtomicU8 = AtomicU8::new(2); // 2 = unknown, 1 = true, 0 = false

        let cached = CUDA_DETECTED.load(Ordering::Relaxed);
        if cached != 2 {
            return cached == 1;
        }

        #[cfg(has_cuda)]
        let has_cuda = gpu::ensure_cuda_initialized().is_ok();
        #[cfg(not(has_cuda))]
        let has_cuda = false;

        CUDA_DETECTED.store(if has_cuda { 1 } else { 0 }, Ordering::Relaxed);
        has_cuda
    }
}

/// Get information about available hardware capabilities
#[inline]
pub fn get_hw_capabilities() -> HardwareCapabilities {
    HardwareCapabilities::detect()
}

/// Whether the given backend is usable on this host.
#[inline]
pub fn is_available(backend: Backend) -> bool {
    match backend {
        Backend::Cpu => true,
        Backend::Gpu => get_hw_capabilities().has_cuda,
    }
}

/// Rough sustained-throughput estimate in MB/s for a backend, for
/// benchmark sizing and diagnostics.
pub fn throughput_estimate(backend: Backend) -> f64 {
    match backend {
        // ~25 cycles per 64-byte chunk on recent cores, minus memory overhead
        Backend::Cpu => 3500.0,
        // Memory-bandwidth bound once past launch overhead
        Backend::Gpu => 6000.0,
    }
}

// =============================================================================
// STAGE 1 CONTEXT
// =============================================================================

/// Reusable Stage 1 context.
///
/// Owns the scratch bitmaps (`quote_bits`, `string_mask`), each sized
/// `ceil(N/64)` u64s and grown monotonically with the largest input seen.
/// Not safe for concurrent calls; give each thread its own context.
pub struct Stage1Context {
    backend: Backend,
    quote_bits: Vec<u64>,
    string_mask: Vec<u64>,
}

impl Stage1Context {
    /// CPU-backed context with empty scratch. Never fails.
    pub fn new() -> Self {
        Self {
            backend: Backend::Cpu,
            quote_bits: Vec::new(),
            string_mask: Vec::new(),
        }
    }

    /// Context pinned to a backend.
    ///
    /// Requesting [`Backend::Gpu`] on a host without a usable CUDA device
    /// fails with [`JsixError::Unsupported`]; callers are expected to fall
    /// back to the CPU backend.
    pub fn with_backend(backend: Backend) -> Result<Self> {
        if backend == Backend::Gpu && !is_available(Backend::Gpu) {
            return Err(JsixError::Unsupported(
                "no usable CUDA device".to_string(),
            ));
        }
        Ok(Self {
            backend,
            quote_bits: Vec::new(),
            string_mask: Vec::new(),
        })
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    fn ensure_buffers(&mut self, input_len: usize) {
        let num_chunks = input_len.div_ceil(CHUNK_SIZE);
        if self.quote_bits.len() < num_chunks {
            self.quote_bits.resize(num_chunks, 0);
            self.string_mask.resize(num_chunks, 0);
        }
    }

    /// Index the structural characters of `input` into the caller's arrays.
    ///
    /// Returns the number of entries written and whether output capacity
    /// ran out before the input was consumed. Empty input is an argument
    /// error; malformed JSON is tolerated best-effort.
    pub fn find_structural(
        &mut self,
        input: &[u8],
        positions: &mut [u32],
        characters: &mut [u8],
    ) -> Result<FindResult> {
        trace!(
            "STAGE1 DISPATCH: backend={:?} input.len()={}",
            self.backend,
            input.len()
        );

        if input.is_empty() {
            return Err(JsixError::InvalidArgument("empty input".to_string()));
        }

        self.ensure_buffers(input.len());

        match self.backend {
            Backend::Cpu => Ok(find_structural_cpu(input, positions, characters)),
            #[cfg(has_cuda)]
            Backend::Gpu => self.full_stage1(input, positions, characters),
            #[cfg(not(has_cuda))]
            Backend::Gpu => Err(JsixError::Unsupported(
                "jsix was built without CUDA support".to_string(),
            )),
        }
    }

    // =========================================================================
    // GPU pipeline: stepwise operations and the fused Stage 1
    // =========================================================================

    /// Whether the full GpJSON-style pipeline is usable from this context.
    #[cfg(has_cuda)]
    pub fn has_gpjson_pipeline(&self) -> bool {
        self.backend == Backend::Gpu && gpu::has_gpjson_pipeline()
    }

    /// GPU device name for diagnostics.
    #[cfg(has_cuda)]
    pub fn device_name(&self) -> Result<String> {
        gpu::device_name()
    }

    /// Unescaped-quote bitmaps plus one parity byte per 64-byte chunk.
    /// Caller allocates `ceil(len/64)` entries in both outputs.
    #[cfg(has_cuda)]
    pub fn create_quote_bitmap(
        &mut self,
        input: &[u8],
        quote_bits: &mut [u64],
        quote_carry: &mut [u8],
    ) -> Result<()> {
        self.require_gpu()?;
        if input.is_empty() {
            return Err(JsixError::InvalidArgument("empty input".to_string()));
        }
        unsafe { strings::create_quote_bitmap_gpu(input, quote_bits, quote_carry) }
    }

    /// Prefix-XOR quote bitmaps into in-string masks, in place.
    #[cfg(has_cuda)]
    pub fn create_string_mask(
        &mut self,
        quote_bits: &mut [u64],
        quote_carry: &[u8],
    ) -> Result<()> {
        self.require_gpu()?;
        unsafe { strings::create_string_mask_gpu(quote_bits, quote_carry) }
    }

    /// Extract structural positions against precomputed in-string masks.
    #[cfg(has_cuda)]
    pub fn extract_structural(
        &mut self,
        input: &[u8],
        string_mask: &[u64],
        positions: &mut [u32],
        characters: &mut [u8],
    ) -> Result<FindResult> {
        self.require_gpu()?;
        if input.is_empty() {
            return Err(JsixError::InvalidArgument("empty input".to_string()));
        }
        unsafe { extract::extract_structural_gpu(input, string_mask, positions, characters) }
    }

    /// Newline bitmaps for NDJSON record splitting.
    #[cfg(has_cuda)]
    pub fn find_newlines(&mut self, input: &[u8], newline_bits: &mut [u64]) -> Result<()> {
        self.require_gpu()?;
        if input.is_empty() {
            return Err(JsixError::InvalidArgument("empty input".to_string()));
        }
        unsafe { classify_mod::find_newlines_gpu(input, newline_bits) }
    }

    /// Full GPU Stage 1: quote bitmap, string mask, and extraction over all
    /// whole chunks in one pass, then the shared scalar tail on the host.
    ///
    /// The tail path and carry handling match the CPU backend bit for bit.
    #[cfg(has_cuda)]
    pub fn full_stage1(
        &mut self,
        input: &[u8],
        positions: &mut [u32],
        characters: &mut [u8],
    ) -> Result<FindResult> {
        if input.is_empty() {
            return Err(JsixError::InvalidArgument("empty input".to_string()));
        }

        let max_output = positions.len().min(characters.len());
        let chunked_len = (input.len() / CHUNK_SIZE) * CHUNK_SIZE;
        self.ensure_buffers(input.len());

        let mut count = 0usize;
        let mut in_string = false;

        if chunked_len > 0 {
            let num_chunks = chunked_len / CHUNK_SIZE;
            let mut quote_carry = vec![0u8; num_chunks];

            {
                let quote_bits = &mut self.quote_bits[..num_chunks];
                unsafe {
                    strings::create_quote_bitmap_gpu(
                        &input[..chunked_len],
                        quote_bits,
                        &mut quote_carry,
                    )?;
                }
                self.string_mask[..num_chunks].copy_from_slice(quote_bits);
            }
            unsafe {
                strings::create_string_mask_gpu(
                    &mut self.string_mask[..num_chunks],
                    &quote_carry,
                )?;
            }

            let chunk_result = unsafe {
                extract::extract_structural_gpu(
                    &input[..chunked_len],
                    &self.string_mask[..num_chunks],
                    positions,
                    characters,
                )?
            };
            count = chunk_result.count;
            if chunk_result.truncated {
                return Ok(chunk_result);
            }

            // String state entering the tail is the fold of all chunk parities.
            in_string = quote_carry.iter().fold(0u8, |acc, &p| acc ^ (p & 1)) != 0;
        }

        let truncated = !extract::scan_tail(
            input,
            chunked_len,
            in_string,
            positions,
            characters,
            &mut count,
            max_output,
        );
        Ok(FindResult { count, truncated })
    }

    #[cfg(has_cuda)]
    fn require_gpu(&self) -> Result<()> {
        if self.backend != Backend::Gpu {
            return Err(JsixError::Unsupported(
                "operation requires the GPU backend".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Stage1Context {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// CPU BACKEND
// =============================================================================

/// Single-threaded CPU Stage 1 over full 64-byte chunks plus the scalar
/// tail. Carry registers are the only state crossing chunk boundaries.
pub(crate) fn find_structural_cpu(
    input: &[u8],
    positions: &mut [u32],
    characters: &mut [u8],
) -> FindResult {
    let max_output = positions.len().min(characters.len());
    let mut count = 0usize;
    let mut in_string_carry = 0u64; // all-ones while inside a string
    let mut backslash_carry = 0u64; // 1 while an odd run spills over

    let mut base = 0usize;
    let mut truncated = false;

    // Below the threshold (or under disable-jsix) everything goes through
    // the scalar tail.
    if input.len() >= SIMD_THRESHOLD_STAGE1 {
        for chunk in input.chunks_exact(CHUNK_SIZE) {
            let masks = classify_mod::classify_chunk(chunk);
            let escaped = escape::find_escaped(masks.backslash, &mut backslash_carry);
            let (_, unescaped_quotes) = escape::split_quotes(masks.quote, escaped);
            let in_string = strings::string_mask(unescaped_quotes, &mut in_string_carry);
            let filtered =
                extract::filter_structural(masks.structural, in_string, unescaped_quotes);

            if !extract::extract_from_mask(
                base,
                filtered,
                input,
                positions,
                characters,
                &mut count,
                max_output,
            ) {
                truncated = true;
                break;
            }
            base += CHUNK_SIZE;
        }
    }

    if !truncated
        && !extract::scan_tail(
            input,
            base,
            in_string_carry != 0,
            positions,
            characters,
            &mut count,
            max_output,
        )
    {
        truncated = true;
    }

    FindResult { count, truncated }
}

// =============================================================================
// FREE-FUNCTION DISPATCH
// =============================================================================

/// One-shot structural indexing with automatic backend selection: CUDA for
/// large inputs when present, CPU SIMD otherwise.
pub fn find_structural(
    input: &[u8],
    positions: &mut [u32],
    characters: &mut [u8],
) -> Result<FindResult> {
    trace!("FIND_STRUCTURAL DISPATCH: input.len()={}", input.len());

    if input.is_empty() {
        return Err(JsixError::InvalidArgument("empty input".to_string()));
    }

    #[cfg(has_cuda)]
    {
        if input.len() >= GPU_THRESHOLD_STAGE1 && get_hw_capabilities().has_cuda {
            if let Ok(mut ctx) = Stage1Context::with_backend(Backend::Gpu) {
                if let Ok(result) = ctx.find_structural(input, positions, characters) {
                    return Ok(result);
                }
            }
            // Fall through to the CPU path on any GPU runtime failure.
        }
    }

    Ok(find_structural_cpu(input, positions, characters))
}

/// Byte-wise classification codes with automatic backend selection. Pure
/// function of the input regardless of the path taken.
pub fn classify(input: &[u8], output: &mut [u8]) -> Result<()> {
    if input.is_empty() {
        return Err(JsixError::InvalidArgument("empty input".to_string()));
    }
    if output.len() < input.len() {
        return Err(JsixError::InvalidArgument(
            "output buffer shorter than input".to_string(),
        ));
    }

    #[cfg(has_cuda)]
    {
        if input.len() >= GPU_THRESHOLD_STAGE1
            && get_hw_capabilities().has_cuda
            && unsafe { classify_mod::classify_bytes_gpu(input, output) }.is_ok()
        {
            return Ok(());
        }
    }

    classify_mod::classify_bytes(input, output)
}

/// Newline bitmaps for NDJSON with automatic backend selection.
pub fn find_newlines(input: &[u8], newline_bits: &mut [u64]) -> Result<()> {
    if input.is_empty() {
        return Err(JsixError::InvalidArgument("empty input".to_string()));
    }

    #[cfg(has_cuda)]
    {
        if input.len() >= GPU_THRESHOLD_STAGE1
            && get_hw_capabilities().has_cuda
            && unsafe { classify_mod::find_newlines_gpu(input, newline_bits) }.is_ok()
        {
            return Ok(());
        }
    }

    classify_mod::find_newlines_cpu(input, newline_bits)
}
