// SPDX-License-Identifier: Apache-2.0

//! CUDA support for jsix
//!
//! This module contains the CUDA-facing pieces used when `has_cuda` is
//! enabled (detected by `build.rs` when `nvcc` is available).
//!
//! It provides:
//! - Raw runtime/driver API bindings for buffer management and launches
//! - A PTX JIT module cache and the `launch_ptx` helper used by the
//!   Stage 1 kernels in `classify`, `strings`, and `extract`
//! - Device property queries for diagnostics (`device_name`)
//!
//! Every jsix kernel is a single self-contained `.entry`, so only the
//! direct `cuModuleLoadDataEx` JIT path exists; there is no linker step.

use crate::types::{JsixError, Result};
use log::debug;
use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::sync::Mutex;

// CUDA runtime API declarations
#[cfg(has_cuda)]
unsafe extern "C" {
    pub(crate) fn cudaMalloc(ptr: *mut *mut std::ffi::c_void, size: usize) -> i32;
    pub(crate) fn cudaMemcpy(
        dst: *mut std::ffi::c_void,
        src: *const std::ffi::c_void,
        size: usize,
        kind: i32,
    ) -> i32;
    pub(crate) fn cudaFree(ptr: *mut std::ffi::c_void) -> i32;
    pub(crate) fn cudaMemset(ptr: *mut std::ffi::c_void, value: i32, size: usize) -> i32;
}

// CUDA driver API declarations for raw FFI
#[repr(C)]
struct CUmod_st {
    _opaque: u8,
}
type CUmodule = *mut CUmod_st;

#[repr(C)]
struct CUfunc_st {
    _opaque: u8,
}
type CUfunction = *mut CUfunc_st;

#[repr(C)]
struct CUctx_st {
    _opaque: u8,
}
type CUcontext = *mut CUctx_st;

#[repr(C)]
struct CUstream_st {
    _opaque: u8,
}
type CUstream = *mut CUstream_st;

// Wrapper to make CUDA pointers Send - we know CUDA is thread-safe
struct SendModule(CUmodule);
unsafe impl Send for SendModule {}
unsafe impl Sync for SendModule {}

struct SendContext(CUcontext);
unsafe impl Send for SendContext {}
unsafe impl Sync for SendContext {}

#[allow(non_camel_case_types)]
type CUresult = i32;

// JIT option type and constants used
#[allow(non_camel_case_types)]
type CUjit_option = i32;

const CU_JIT_INFO_LOG_BUFFER: CUjit_option = 3;
const CU_JIT_INFO_LOG_BUFFER_SIZE_BYTES: CUjit_option = 4;
const CU_JIT_ERROR_LOG_BUFFER: CUjit_option = 5;
const CU_JIT_ERROR_LOG_BUFFER_SIZE_BYTES: CUjit_option = 6;
const CU_JIT_LOG_VERBOSE: CUjit_option = 12;

#[cfg(has_cuda)]
unsafe extern "C" {
    fn cuInit(flags: u32) -> CUresult;
    fn cuDeviceGet(device: *mut i32, ordinal: i32) -> CUresult;
    fn cuCtxCreate_v2(ctx: *mut CUcontext, flags: u32, dev: i32) -> CUresult;
    fn cuCtxSetCurrent(ctx: CUcontext) -> CUresult;
    fn cuModuleGetFunction(func: *mut CUfunction, module: CUmodule, name: *const i8) -> CUresult;
    fn cuLaunchKernel(
        f: CUfunction,
        grid_dim_x: u32,
        grid_dim_y: u32,
        grid_dim_z: u32,
        block_dim_x: u32,
        block_dim_y: u32,
        block_dim_z: u32,
        shared_mem_bytes: u32,
        stream: CUstream,
        kernel_params: *mut *mut c_void,
        extra: *mut *mut c_void,
    ) -> CUresult;
    fn cuStreamCreate(stream: *mut CUstream, flags: u32) -> CUresult;
    fn cuStreamSynchronize(stream: CUstream) -> CUresult;

    // Device property functions
    fn cuDeviceGetAttribute(pi: *mut i32, attrib: i32, dev: i32) -> CUresult;
    fn cuDeviceGetName(name: *mut i8, len: i32, dev: i32) -> CUresult;
    fn cuDeviceTotalMem_v2(bytes: *mut usize, dev: i32) -> CUresult;

    fn cuModuleLoadDataEx(
        module: *mut CUmodule,
        image: *const c_void,
        num_options: u32,
        options: *mut CUjit_option,
        option_values: *mut *mut c_void,
    ) -> CUresult;
}

// CUDA memory copy directions
pub(crate) const CUDA_MEMCPY_HOST_TO_DEVICE: i32 = 1;
pub(crate) const CUDA_MEMCPY_DEVICE_TO_HOST: i32 = 2;

// CUDA device attributes for cuDeviceGetAttribute
const CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT: i32 = 16;
const CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK: i32 = 1;
const CU_DEVICE_ATTRIBUTE_WARP_SIZE: i32 = 10;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: i32 = 75;
const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR: i32 = 76;

// GPU device properties
#[derive(Debug, Clone)]
pub struct GpuDeviceProperties {
    pub name: String,
    pub total_memory: usize,
    pub multiprocessor_count: i32,
    pub max_threads_per_block: i32,
    pub warp_size: i32,
    pub compute_capability_major: i32,
    pub compute_capability_minor: i32,
}

// Global module cache - can be accessed from any thread
lazy_static::lazy_static! {
  static ref MODULE_CACHE: Mutex<HashMap<String, SendModule>> = Mutex::new(HashMap::new());
  static ref CUDA_INITIALIZED: Mutex<bool> = Mutex::new(false);
  static ref GPU_PROPERTIES: Mutex<Option<GpuDeviceProperties>> = Mutex::new(None);
  static ref CUDA_CONTEXT: Mutex<Option<SendContext>> = Mutex::new(None);
  // Serialize context set and module cache/JIT to prevent race conditions
  static ref GPU_LAUNCH_MUTEX: Mutex<()> = Mutex::new(());
}

// Thread-local stream so concurrent callers don't share one
thread_local! {
  static THREAD_STREAM: std::cell::RefCell<Option<CUstream>> = const { std::cell::RefCell::new(None) };
}

// Initialize CUDA if not already done
pub(crate) fn ensure_cuda_initialized() -> Result<()> {
    let mut initialized = CUDA_INITIALIZED.lock().unwrap();
    if !*initialized {
        unsafe {
            let result = cuInit(0);
            if result != 0 {
                debug!("JSIX GPU: cuInit failed code={}", result);
                return Err(JsixError::Cuda(format!("cuInit failed: {}", result)));
            }

            let mut device = 0;
            let result = cuDeviceGet(&mut device, 0);
            if result != 0 {
                debug!("JSIX GPU: cuDeviceGet failed code={}", result);
                return Err(JsixError::Cuda(format!("cuDeviceGet failed: {}", result)));
            }

            let mut ctx = ptr::null_mut();
            let result = cuCtxCreate_v2(&mut ctx, 0, device);
            if result != 0 {
                debug!("JSIX GPU: cuCtxCreate_v2 failed code={}", result);
                return Err(JsixError::Cuda(format!("cuCtxCreate failed: {}", result)));
            }

            let mut ctx_cache = CUDA_CONTEXT.lock().unwrap();
            *ctx_cache = Some(SendContext(ctx));
        }
        *initialized = true;
    }
    // Always set context current for the calling thread
    unsafe {
        if let Some(ref ctx) = *CUDA_CONTEXT.lock().unwrap() {
            let result = cuCtxSetCurrent(ctx.0);
            if result != 0 {
                debug!("JSIX GPU: cuCtxSetCurrent (post-init) failed code={}", result);
                return Err(JsixError::Cuda(format!(
                    "cuCtxSetCurrent failed: {}",
                    result
                )));
            }
        }
    }

    Ok(())
}

/// Get GPU device properties (cached after first call)
pub fn get_gpu_properties() -> Result<GpuDeviceProperties> {
    ensure_cuda_initialized()?;

    let mut props_cache = GPU_PROPERTIES.lock().unwrap();
    if let Some(ref props) = *props_cache {
        return Ok(props.clone());
    }

    unsafe {
        let device = 0i32;

        let mut name_bytes = vec![0i8; 256];
        let result = cuDeviceGetName(name_bytes.as_mut_ptr(), 256, device);
        if result != 0 {
            return Err(JsixError::Cuda(format!(
                "cuDeviceGetName failed: {}",
                result
            )));
        }

        // Fixed-size buffer returned by CUDA; interpret as C string without taking ownership
        let name = CStr::from_ptr(name_bytes.as_ptr())
            .to_string_lossy()
            .to_string();

        let mut total_memory = 0usize;
        let result = cuDeviceTotalMem_v2(&mut total_memory, device);
        if result != 0 {
            return Err(JsixError::Cuda(format!(
                "cuDeviceTotalMem failed: {}",
                result
            )));
        }

        let get_attribute = |attr: i32| -> Result<i32> {
            let mut value = 0i32;
            let result = cuDeviceGetAttribute(&mut value, attr, device);
            if result != 0 {
                return Err(JsixError::Cuda(format!(
                    "cuDeviceGetAttribute failed: {}",
                    result
                )));
            }
            Ok(value)
        };

        let props = GpuDeviceProperties {
            name,
            total_memory,
            multiprocessor_count: get_attribute(CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)?,
            max_threads_per_block: get_attribute(CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)?,
            warp_size: get_attribute(CU_DEVICE_ATTRIBUTE_WARP_SIZE)?,
            compute_capability_major: get_attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?,
            compute_capability_minor: get_attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?,
        };

        *props_cache = Some(props.clone());
        Ok(props)
    }
}

/// GPU device name for diagnostics.
pub fn device_name() -> Result<String> {
    Ok(get_gpu_properties()?.name)
}

/// Whether the full GpJSON-style Stage 1 pipeline can run on this host.
pub fn has_gpjson_pipeline() -> bool {
    ensure_cuda_initialized().is_ok()
}

// Get or create a stream for this thread
fn get_thread_stream() -> Result<CUstream> {
    THREAD_STREAM.with(|stream_cell| {
        let mut stream_opt = stream_cell.borrow_mut();
        if stream_opt.is_none() {
            let mut stream = ptr::null_mut();
            unsafe {
                let result = cuStreamCreate(&mut stream, 0);
                if result != 0 {
                    return Err(JsixError::Cuda(format!(
                        "cuStreamCreate failed: {}",
                        result
                    )));
                }
            }
            *stream_opt = Some(stream);
        }
        Ok(stream_opt.unwrap())
    })
}

/// JIT-compile (or fetch from cache) a PTX module and launch one kernel.
///
/// `args` contains pointers to the parameter values (e.g. a pointer to a
/// device pointer, or a pointer to a u32 length), exactly as
/// `cuLaunchKernel` expects them.
pub fn launch_ptx(
    ptx_code: &'static str,
    kernel_name: &str,
    blocks: u32,
    threads: u32,
    args: &[*const u8],
) -> Result<()> {
    debug!("JSIX GPU: launch_ptx kernel={}", kernel_name);
    ensure_cuda_initialized()?;

    // Get or compile the module (cache by PTX content, not kernel name)
    let module = {
        // Acquire the GPU launch mutex only for context set and module cache/JIT
        let _gpu_lock = GPU_LAUNCH_MUTEX.lock().unwrap();

        unsafe {
            if let Some(ref ctx) = *CUDA_CONTEXT.lock().unwrap() {
                let result = cuCtxSetCurrent(ctx.0);
                if result != 0 {
                    return Err(JsixError::Cuda(format!(
                        "cuCtxSetCurrent failed: {}",
                        result
                    )));
                }
            }
        }

        let mut hash: u64 = 0xcbf29ce484222325; // FNV-1a 64-bit offset basis
        for &b in ptx_code.as_bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        let key = format!("ptx:{:016x}", hash);
        let mut cache = MODULE_CACHE.lock().unwrap();

        if !cache.contains_key(&key) {
            // Keep logs alive for the whole JIT scope
            let mut error_log: Vec<i8> = vec![0; 8192];
            let mut info_log: Vec<i8> = vec![0; 8192];
            let error_log_size_u32: u32 = error_log.len() as u32;
            let info_log_size_u32: u32 = info_log.len() as u32;
            let verbose_flag_u32: u32 = 1;
            let mut options: [CUjit_option; 5] = [
                CU_JIT_ERROR_LOG_BUFFER,
                CU_JIT_ERROR_LOG_BUFFER_SIZE_BYTES,
                CU_JIT_INFO_LOG_BUFFER,
                CU_JIT_INFO_LOG_BUFFER_SIZE_BYTES,
                CU_JIT_LOG_VERBOSE,
            ];
            let mut option_values: [*mut c_void; 5] = [
                error_log.as_mut_ptr() as *mut c_void,
                (error_log_size_u32 as usize) as *mut c_void,
                info_log.as_mut_ptr() as *mut c_void,
                (info_log_size_u32 as usize) as *mut c_void,
                (verbose_flag_u32 as usize) as *mut c_void,
            ];

            let mut module = ptr::null_mut();
            let ptx_cstring = CString::new(ptx_code)
                .map_err(|e| JsixError::InvalidPtx(format!("Invalid PTX code: {}", e)))?;
            unsafe {
                debug!("JSIX GPU: cuModuleLoadDataEx (direct PTX)");
                let result = cuModuleLoadDataEx(
                    &mut module,
                    ptx_cstring.as_ptr() as *const c_void,
                    options.len() as u32,
                    options.as_mut_ptr(),
                    option_values.as_mut_ptr(),
                );
                if result != 0 {
                    let len = error_log
                        .iter()
                        .position(|&c| c == 0)
                        .unwrap_or(error_log.len());
                    let err = {
                        let ptr = error_log.as_ptr() as *const u8;
                        let slice = std::slice::from_raw_parts(ptr, len);
                        String::from_utf8_lossy(slice).to_string()
                    };
                    debug!(
                        "JSIX GPU: cuModuleLoadDataEx failed (result={}) | error_log=\"{}\"",
                        result, err
                    );
                    return Err(JsixError::InvalidPtx(format!(
                        "cuModuleLoadDataEx (PTX) failed: {} | {}",
                        result, err
                    )));
                }
                // Log any JIT info output for diagnostics
                let info_len = info_log
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(info_log.len());
                if info_len > 0 {
                    let info_msg = {
                        let ptr = info_log.as_ptr() as *const u8;
                        let slice = std::slice::from_raw_parts(ptr, info_len);
                        String::from_utf8_lossy(slice).to_string()
                    };
                    debug!("JSIX GPU: load info: {}", info_msg);
                }
            }

            cache.insert(key.clone(), SendModule(module));
            module
        } else {
            debug!("JSIX GPU: module cache hit {}", key);
            cache[&key].0
        }
    };

    // Get the kernel function from module
    let kernel_cstring = CString::new(kernel_name)
        .map_err(|e| JsixError::Internal(format!("Invalid kernel name: {}", e)))?;

    let mut function = ptr::null_mut();
    unsafe {
        let result = cuModuleGetFunction(&mut function, module, kernel_cstring.as_ptr());
        if result != 0 {
            return Err(JsixError::Cuda(format!(
                "cuModuleGetFunction failed: {}",
                result
            )));
        }
    }

    let stream = get_thread_stream()?;

    unsafe {
        // CUDA expects an array of pointers to the actual parameters;
        // args already holds pointers to the parameter values.
        let mut kernel_params: Vec<*mut c_void> = Vec::with_capacity(args.len());
        for arg in args {
            kernel_params.push(*arg as *mut c_void);
        }

        debug!(
            "JSIX GPU: cuLaunchKernel blocks={} threads={} args={}",
            blocks,
            threads,
            kernel_params.len()
        );
        let result = cuLaunchKernel(
            function,
            blocks,
            1,
            1, // grid dimensions
            threads,
            1,
            1, // block dimensions
            0, // shared memory
            stream,
            kernel_params.as_mut_ptr(),
            ptr::null_mut(),
        );

        if result != 0 {
            return Err(JsixError::Cuda(format!(
                "cuLaunchKernel failed: {}",
                result
            )));
        }

        let result = cuStreamSynchronize(stream);
        if result != 0 {
            return Err(JsixError::Cuda(format!(
                "cuStreamSynchronize failed: {}",
                result
            )));
        }
    }

    Ok(())
}
