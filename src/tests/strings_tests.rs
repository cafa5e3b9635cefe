// SPDX-License-Identifier: Apache-2.0

// =============================================================================
// STRING-REGION MASKER TESTS
// =============================================================================

#[cfg(test)]
mod tests {
  use crate::classify::classify_chunk_scalar;
  use crate::strings::{apply_string_carries, prefix_xor, prefix_xor_portable, string_mask};
  use rand::{Rng, SeedableRng};
  use rand_chacha::ChaCha8Rng;

  #[test]
  fn test_prefix_xor_known_values() {
    assert_eq!(prefix_xor_portable(0), 0);
    // Quotes at bits 2 and 5: inside-string bits are 2, 3, 4. The opening
    // quote's own bit is set (inclusive prefix-XOR), the closing one's clear.
    assert_eq!(prefix_xor_portable(0b0010_0100), 0b0001_1100);
    // Lone quote: everything after (and including) it is inside.
    assert_eq!(prefix_xor_portable(1), u64::MAX);
    assert_eq!(prefix_xor_portable(1 << 63), 1 << 63);
  }

  #[test]
  fn test_prefix_xor_bitwise_definition() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x9F);
    for _ in 0..200 {
      let x: u64 = rng.gen();
      let y = prefix_xor_portable(x);
      let mut acc = 0u64;
      for k in 0..64 {
        acc ^= (x >> k) & 1;
        assert_eq!((y >> k) & 1, acc, "prefix-XOR wrong at bit {} of {:#x}", k, x);
      }
    }
  }

  #[test]
  fn test_prefix_xor_paths_agree() {
    // Whatever path the dispatcher picks must match the portable ladder.
    let mut rng = ChaCha8Rng::seed_from_u64(0xC1);
    for _ in 0..2000 {
      let x: u64 = rng.gen();
      assert_eq!(prefix_xor(x), prefix_xor_portable(x));
    }
  }

  #[test]
  fn test_string_mask_carry_starts_outside() {
    let mut carry = 0u64;
    // No quotes: nothing inside, carry stays clear.
    assert_eq!(string_mask(0, &mut carry), 0);
    assert_eq!(carry, 0);
  }

  #[test]
  fn test_string_mask_carry_propagates() {
    let mut carry = 0u64;
    // One quote opens a string that never closes in this chunk.
    let mask = string_mask(1 << 10, &mut carry);
    assert_eq!(mask, u64::MAX << 10);
    assert_eq!(carry, u64::MAX);

    // Next chunk starts inside; a single quote at bit 0 closes it.
    let mask = string_mask(1, &mut carry);
    assert_eq!(mask, 0);
    assert_eq!(carry, 0);
  }

  #[test]
  fn test_string_mask_carry_complements() {
    // Entering a quote-free chunk while inside a string leaves every byte
    // inside and the carry set.
    let mut carry = u64::MAX;
    let mask = string_mask(0, &mut carry);
    assert_eq!(mask, u64::MAX);
    assert_eq!(carry, u64::MAX);
  }

  #[test]
  fn test_string_mask_parity_rule() {
    // Outgoing carry = incoming carry XOR quote parity.
    let mut rng = ChaCha8Rng::seed_from_u64(0x51);
    for _ in 0..500 {
      let quotes: u64 = rng.gen();
      for carry_in in [0u64, u64::MAX] {
        let mut carry = carry_in;
        string_mask(quotes, &mut carry);
        let expected_inside = (carry_in != 0) ^ (quotes.count_ones() % 2 == 1);
        assert_eq!(carry != 0, expected_inside);
      }
    }
  }

  #[test]
  fn test_string_mask_on_real_chunk() {
    // {"s":"a,b"} - the comma at offset 8 is inside the string.
    let doc = br#"{"s":"a,b"}"#;
    let mut chunk = [b' '; 64];
    chunk[..doc.len()].copy_from_slice(doc);
    let masks = classify_chunk_scalar(&chunk);

    let mut carry = 0u64;
    let in_string = string_mask(masks.quote, &mut carry);
    assert_ne!(in_string & (1 << 7), 0, "comma at 7 must be inside");
    assert_eq!(in_string & (1 << 4), 0, "colon at 4 must be outside");
    assert_ne!(in_string & (1 << 5), 0, "opening quote bit is inclusive");
    assert_eq!(in_string & (1 << 9), 0, "closing quote bit is outside");
    assert_eq!(carry, 0, "document closes all strings");
  }

  #[test]
  fn test_apply_string_carries() {
    // Segment-local masks for chunks [open, passthrough, close]:
    // parities decide which segments get complemented.
    let mut masks = [0u64, 0u64, 0u64];
    let parities = [1u8, 0, 1];
    apply_string_carries(&mut masks, &parities);
    assert_eq!(masks[0], 0); // before the scan reaches it
    assert_eq!(masks[1], u64::MAX); // inside the open string
    assert_eq!(masks[2], u64::MAX); // still inside until its own quote
  }

  #[test]
  fn test_apply_string_carries_matches_streaming() {
    // The host scan over segment-local results must equal the streaming
    // carry path chunk for chunk.
    let mut rng = ChaCha8Rng::seed_from_u64(0xAB);
    for _ in 0..200 {
      let quotes: Vec<u64> = (0..8).map(|_| rng.gen::<u64>() & rng.gen::<u64>()).collect();

      let mut streamed = Vec::new();
      let mut carry = 0u64;
      for &q in &quotes {
        streamed.push(string_mask(q, &mut carry));
      }

      let mut scanned: Vec<u64> = quotes.iter().map(|&q| prefix_xor(q)).collect();
      let parities: Vec<u8> = quotes.iter().map(|&q| (q.count_ones() & 1) as u8).collect();
      apply_string_carries(&mut scanned, &parities);

      assert_eq!(streamed, scanned);
    }
  }
}
