// SPDX-License-Identifier: Apache-2.0

//! jsix library
//!
//! Hardware-accelerated JSON structural indexing (Stage 1 of a two-stage
//! parser). Given a raw byte buffer, jsix produces parallel arrays of the
//! byte offsets and values of every structural token (`{ } [ ] : , "`)
//! outside string literals, plus all unescaped string-delimiting quotes.
//!
//! - Chunk classification, escape analysis, string-region masking, and
//!   extraction fused over 64-byte windows
//! - Byte-wise classification codes and NDJSON newline bitmaps
//!
//! ## Hardware support
//! - **AVX2 / NEON** are used on stable Rust where available
//! - **AVX-512** is available behind the `jsix-nightly` feature (nightly Rust)
//! - **CUDA** is enabled when detected by `build.rs` (requires `nvcc`)
//!
//! ## Usage
//!
//! ```rust
//! use jsix::dispatch::Stage1Context;
//!
//! let mut ctx = Stage1Context::new();
//! let input = br#"{"a":1}"#;
//! let mut positions = vec![0u32; input.len()];
//! let mut characters = vec![0u8; input.len()];
//!
//! let result = ctx
//!     .find_structural(input, &mut positions, &mut characters)
//!     .unwrap();
//! assert_eq!(result.count, 5);
//! assert_eq!(&positions[..result.count], &[0, 1, 3, 4, 6]);
//!
//! // Check available hardware capabilities
//! let caps = jsix::get_hw_capabilities();
//! println!("Has CUDA: {}", caps.has_cuda);
//! ```

#![allow(clippy::missing_safety_doc)]

pub mod classify;
pub mod constants;
pub mod dispatch;
pub mod escape;
pub mod extract;
#[cfg(has_cuda)]
pub mod gpu;
pub mod strings;
pub mod types;

pub use types::*;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
#[path = "tests/classify_tests.rs"]
mod classify_tests;
#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod dispatch_tests;
#[cfg(test)]
#[path = "tests/escape_tests.rs"]
mod escape_tests;
#[cfg(test)]
#[path = "tests/extract_tests.rs"]
mod extract_tests;
#[cfg(test)]
#[path = "tests/strings_tests.rs"]
mod strings_tests;

// Re-export the main API from core
pub use dispatch::*;
#[cfg(has_cuda)]
pub use gpu::{device_name, get_gpu_properties, has_gpjson_pipeline, GpuDeviceProperties};
