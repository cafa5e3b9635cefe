// SPDX-License-Identifier: Apache-2.0

// =============================================================================
// STRUCTURAL EXTRACTOR TESTS
// =============================================================================

#[cfg(test)]
mod tests {
  use crate::extract::{extract_from_mask, filter_structural, scan_tail};

  #[test]
  fn test_filter_structural() {
    let structural = 0b1111_0000;
    let in_string = 0b0011_0000;
    let unescaped_quotes = 0b0000_0001;
    // Bits 4-5 are inside a string and drop out; the quote joins back in.
    assert_eq!(
      filter_structural(structural, in_string, unescaped_quotes),
      0b1100_0001
    );
  }

  #[test]
  fn test_extract_from_mask_orders_low_to_high() {
    let input: Vec<u8> = (0..64).map(|i| if i % 2 == 0 { b',' } else { b'x' }).collect();
    let mut positions = [0u32; 64];
    let mut characters = [0u8; 64];
    let mut count = 0;

    let filtered = 0b1_0000_0101; // bits 0, 2, 8
    let complete = extract_from_mask(
      0,
      filtered,
      &input,
      &mut positions,
      &mut characters,
      &mut count,
      64,
    );
    assert!(complete);
    assert_eq!(count, 3);
    assert_eq!(&positions[..3], &[0, 2, 8]);
    assert_eq!(&characters[..3], &[b',', b',', b',']);
  }

  #[test]
  fn test_extract_from_mask_applies_base_offset() {
    let input = vec![b'['; 200];
    let mut positions = [0u32; 8];
    let mut characters = [0u8; 8];
    let mut count = 0;

    extract_from_mask(
      128,
      0b1010,
      &input,
      &mut positions,
      &mut characters,
      &mut count,
      8,
    );
    assert_eq!(&positions[..2], &[129, 131]);
  }

  #[test]
  fn test_extract_from_mask_truncates() {
    let input = vec![b':'; 64];
    let mut positions = [0u32; 2];
    let mut characters = [0u8; 2];
    let mut count = 0;

    let complete = extract_from_mask(
      0,
      0b1111,
      &input,
      &mut positions,
      &mut characters,
      &mut count,
      2,
    );
    assert!(!complete);
    assert_eq!(count, 2);
    assert_eq!(&positions[..], &[0, 1]);
  }

  // =============================================================================
  // SCALAR TAIL
  // =============================================================================

  fn run_tail(input: &[u8], in_string: bool) -> (Vec<u32>, Vec<u8>, bool) {
    let mut positions = vec![0u32; input.len()];
    let mut characters = vec![0u8; input.len()];
    let mut count = 0;
    let complete = scan_tail(
      input,
      0,
      in_string,
      &mut positions,
      &mut characters,
      &mut count,
      input.len(),
    );
    positions.truncate(count);
    characters.truncate(count);
    (positions, characters, complete)
  }

  #[test]
  fn test_tail_simple_object() {
    let (positions, characters, complete) = run_tail(br#"{"a":1}"#, false);
    assert!(complete);
    assert_eq!(positions, vec![0, 1, 3, 4, 6]);
    assert_eq!(characters, b"{\"\":}".to_vec());
  }

  #[test]
  fn test_tail_array() {
    let (positions, characters, _) = run_tail(b"[1,2,3]", false);
    assert_eq!(positions, vec![0, 2, 4, 6]);
    assert_eq!(characters, b"[,,]".to_vec());
  }

  #[test]
  fn test_tail_comma_inside_string() {
    let (positions, characters, _) = run_tail(br#"{"s":"a,b"}"#, false);
    assert_eq!(positions, vec![0, 1, 3, 4, 5, 9, 10]);
    assert_eq!(characters, b"{\"\":\"\"}".to_vec());
  }

  #[test]
  fn test_tail_escaped_quote() {
    // {"x":"\""} - the quote at 7 is escaped, delimiters at 5 and 8.
    let (positions, _, _) = run_tail(br#"{"x":"\""}"#, false);
    assert_eq!(positions, vec![0, 1, 3, 4, 5, 8, 9]);
  }

  #[test]
  fn test_tail_even_backslash_run() {
    // \\" - the run has length 2, so the quote at 2 is unescaped.
    let (positions, characters, _) = run_tail(br#"\\""#, false);
    assert_eq!(positions, vec![2]);
    assert_eq!(characters, vec![b'"']);
  }

  #[test]
  fn test_tail_quad_backslash_string() {
    // "\\\\" - content is two escaped backslashes, closing quote at 5.
    let (positions, _, _) = run_tail(br#""\\\\""#, false);
    assert_eq!(positions, vec![0, 5]);
  }

  #[test]
  fn test_tail_inherits_in_string_state() {
    // Starting inside a string: the bracket at 2 is invisible, the quote at
    // 3 closes the string, the bracket at 5 emits.
    let (positions, characters, _) = run_tail(br#"ab["x]"#, true);
    assert_eq!(positions, vec![3, 5]);
    assert_eq!(characters, vec![b'"', b']']);

    // Same bytes from outside: the quote at 3 opens a string instead and
    // swallows everything after it.
    let (positions, characters, _) = run_tail(br#"ab["x]"#, false);
    assert_eq!(positions, vec![2, 3]);
    assert_eq!(characters, vec![b'[', b'"']);
  }

  #[test]
  fn test_tail_truncation_mid_stream() {
    let input = b"[1,2,3,4]";
    let mut positions = vec![0u32; 3];
    let mut characters = vec![0u8; 3];
    let mut count = 0;
    let complete = scan_tail(input, 0, false, &mut positions, &mut characters, &mut count, 3);
    assert!(!complete);
    assert_eq!(count, 3);
    assert_eq!(positions, vec![0, 2, 4]);
  }

  #[test]
  fn test_tail_exact_capacity_is_not_truncation() {
    let input = b"[1]";
    let mut positions = vec![0u32; 2];
    let mut characters = vec![0u8; 2];
    let mut count = 0;
    let complete = scan_tail(input, 0, false, &mut positions, &mut characters, &mut count, 2);
    assert!(complete);
    assert_eq!(count, 2);
  }

  #[test]
  fn test_tail_respects_start_offset() {
    let input = b"[[[[,,,,";
    let mut positions = vec![0u32; 8];
    let mut characters = vec![0u8; 8];
    let mut count = 0;
    scan_tail(input, 4, false, &mut positions, &mut characters, &mut count, 8);
    assert_eq!(count, 4);
    assert_eq!(&positions[..4], &[4, 5, 6, 7]);
  }
}
