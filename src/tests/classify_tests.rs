// SPDX-License-Identifier: Apache-2.0

// =============================================================================
// CHUNK CLASSIFIER TESTS
// =============================================================================

#[cfg(test)]
mod tests {
  use crate::classify::{classify_chunk, classify_chunk_scalar, find_newlines_cpu, CLASS_LOOKUP};
  use crate::constants::*;
  use crate::test_utils::config_test_logger;
  use rand::{Rng, SeedableRng};
  use rand_chacha::ChaCha8Rng;

  /// Dispatch and scalar paths must agree bit for bit on every chunk.
  fn check_chunk(chunk: &[u8; 64]) {
    let scalar = classify_chunk_scalar(chunk);
    let dispatched = classify_chunk(chunk);
    assert_eq!(
      scalar, dispatched,
      "SIMD path diverged from scalar on chunk {:?}",
      chunk
    );

    // Mask invariants: quote is a subset of structural, backslash is disjoint
    // from neither by construction but never overlaps quote.
    assert_eq!(scalar.quote & scalar.structural, scalar.quote);
    assert_eq!(scalar.quote & scalar.backslash, 0);
  }

  #[test]
  fn test_classify_chunk_all_structural() {
    config_test_logger();
    let mut chunk = [0u8; 64];
    for (i, b) in [b'{', b'}', b'[', b']', b':', b',', b'"', b'\\']
      .iter()
      .cycle()
      .take(64)
      .enumerate()
    {
      chunk[i] = *b;
    }
    check_chunk(&chunk);

    let masks = classify_chunk_scalar(&chunk);
    // Pattern repeats every 8 bytes: 7 structural, 1 backslash.
    assert_eq!(masks.backslash.count_ones(), 8);
    assert_eq!(masks.structural.count_ones(), 56);
    assert_eq!(masks.quote.count_ones(), 8);
  }

  #[test]
  fn test_classify_chunk_plain_text() {
    let chunk = [b'a'; 64];
    let masks = classify_chunk_scalar(&chunk);
    assert_eq!(masks.structural, 0);
    assert_eq!(masks.quote, 0);
    assert_eq!(masks.backslash, 0);
    check_chunk(&chunk);
  }

  #[test]
  fn test_classify_chunk_bit_positions() {
    let mut chunk = [b' '; 64];
    chunk[0] = b'{';
    chunk[15] = b'"';
    chunk[16] = b':';
    chunk[31] = b'\\';
    chunk[32] = b',';
    chunk[47] = b'[';
    chunk[48] = b']';
    chunk[63] = b'}';
    let masks = classify_chunk_scalar(&chunk);

    assert_eq!(
      masks.structural,
      (1 << 0) | (1 << 15) | (1 << 16) | (1 << 32) | (1 << 47) | (1 << 48) | (1u64 << 63)
    );
    assert_eq!(masks.quote, 1 << 15);
    assert_eq!(masks.backslash, 1 << 31);
    check_chunk(&chunk);
  }

  #[test]
  fn test_classify_chunk_lane_boundaries() {
    // One structural straddling each 16-byte lane edge catches packing bugs.
    for pos in [0usize, 15, 16, 17, 31, 32, 33, 47, 48, 63] {
      let mut chunk = [b'x'; 64];
      chunk[pos] = b':';
      let masks = classify_chunk(&chunk);
      assert_eq!(masks.structural, 1u64 << pos, "lane packing broke at {}", pos);
    }
  }

  #[test]
  fn test_classify_chunk_random() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5157);
    for _ in 0..500 {
      let mut chunk = [0u8; 64];
      rng.fill(&mut chunk[..]);
      check_chunk(&chunk);
    }
  }

  // =============================================================================
  // BYTE-WISE CLASSIFICATION CODES
  // =============================================================================

  #[test]
  fn test_class_lookup_codes() {
    assert_eq!(CLASS_LOOKUP[b' ' as usize], CHAR_WHITESPACE);
    assert_eq!(CLASS_LOOKUP[b'\t' as usize], CHAR_WHITESPACE);
    assert_eq!(CLASS_LOOKUP[b'\n' as usize], CHAR_WHITESPACE);
    assert_eq!(CLASS_LOOKUP[b'\r' as usize], CHAR_WHITESPACE);
    assert_eq!(CLASS_LOOKUP[b'{' as usize], CHAR_BRACE_OPEN);
    assert_eq!(CLASS_LOOKUP[b'}' as usize], CHAR_BRACE_CLOSE);
    assert_eq!(CLASS_LOOKUP[b'[' as usize], CHAR_BRACKET_OPEN);
    assert_eq!(CLASS_LOOKUP[b']' as usize], CHAR_BRACKET_CLOSE);
    assert_eq!(CLASS_LOOKUP[b'"' as usize], CHAR_QUOTE);
    assert_eq!(CLASS_LOOKUP[b':' as usize], CHAR_COLON);
    assert_eq!(CLASS_LOOKUP[b',' as usize], CHAR_COMMA);
    assert_eq!(CLASS_LOOKUP[b'\\' as usize], CHAR_BACKSLASH);
    assert_eq!(CLASS_LOOKUP[b'a' as usize], CHAR_OTHER);
    assert_eq!(CLASS_LOOKUP[b'0' as usize], CHAR_OTHER);
    assert_eq!(CLASS_LOOKUP[0x00], CHAR_OTHER);
    assert_eq!(CLASS_LOOKUP[0xFF], CHAR_OTHER);
  }

  #[test]
  fn test_class_lookup_exhaustive() {
    // Every byte value maps to exactly the code its character deserves.
    for byte in 0u16..=255 {
      let b = byte as u8;
      let expected = match b {
        b' ' | b'\t' | b'\n' | b'\r' => CHAR_WHITESPACE,
        b'{' => CHAR_BRACE_OPEN,
        b'}' => CHAR_BRACE_CLOSE,
        b'[' => CHAR_BRACKET_OPEN,
        b']' => CHAR_BRACKET_CLOSE,
        b'"' => CHAR_QUOTE,
        b':' => CHAR_COLON,
        b',' => CHAR_COMMA,
        b'\\' => CHAR_BACKSLASH,
        _ => CHAR_OTHER,
      };
      assert_eq!(CLASS_LOOKUP[b as usize], expected, "byte 0x{:02x}", b);
    }
  }

  #[test]
  fn test_classify_bytes_idempotent() {
    let input = br#"{"key": [1, 2, "va\"lue"]}"#;
    let mut first = vec![0u8; input.len()];
    let mut second = vec![0u8; input.len()];
    crate::classify::classify_bytes(input, &mut first).unwrap();
    crate::classify::classify_bytes(input, &mut second).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_classify_bytes_rejects_bad_args() {
    let mut out = [0u8; 4];
    assert!(crate::classify::classify_bytes(b"", &mut out).is_err());
    assert!(crate::classify::classify_bytes(b"too long", &mut out).is_err());
  }

  // =============================================================================
  // NEWLINE BITMAPS
  // =============================================================================

  #[test]
  fn test_find_newlines_layout() {
    let mut input = vec![b'x'; 130];
    input[0] = b'\n';
    input[63] = b'\n';
    input[64] = b'\n';
    input[129] = b'\n';

    let mut bits = vec![0u64; 3];
    find_newlines_cpu(&input, &mut bits).unwrap();

    assert_eq!(bits[0], (1 << 0) | (1u64 << 63));
    assert_eq!(bits[1], 1 << 0);
    assert_eq!(bits[2], 1 << 1); // byte 129 = chunk 2, offset 1
  }

  #[test]
  fn test_find_newlines_short_buffer_rejected() {
    let input = vec![b'\n'; 65];
    let mut bits = vec![0u64; 1];
    assert!(find_newlines_cpu(&input, &mut bits).is_err());
  }
}
