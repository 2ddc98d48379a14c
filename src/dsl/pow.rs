use md5::{Digest, Md5};

use crate::computation::{ComputationResult, HASH_LEN, PERSONALIZED_LEN};

/// Personalized ints mixed into the digest input.
pub const MIXED_PERSONALIZED: usize = 8;
pub const POW_INPUT_LEN: usize = 4 * (4 + MIXED_PERSONALIZED);

/// The four nonce words followed by the leading personalized ints, all
/// little-endian.
pub fn pow_input(words: [i32; 4], personalized: &[i32; PERSONALIZED_LEN]) -> [u8; POW_INPUT_LEN] {
    let mut buf = [0u8; POW_INPUT_LEN];
    let values = words
        .iter()
        .chain(personalized.iter().take(MIXED_PERSONALIZED));
    for (chunk, value) in buf.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    buf
}

/// MD5 of the input with each 32-bit word of the digest byte-reversed.
pub fn pow_hash(input: &[u8]) -> [u8; HASH_LEN] {
    let mut hash: [u8; HASH_LEN] = Md5::digest(input).into();
    for word in hash.chunks_exact_mut(4) {
        word.reverse();
    }
    hash
}

/// True when the first differing byte of `hash` is below `target`.
pub fn below_target(hash: &[u8; HASH_LEN], target: &[u8; HASH_LEN]) -> bool {
    hash.iter()
        .zip(target.iter())
        .find(|(h, t)| h != t)
        .is_some_and(|(h, t)| h < t)
}

/// Hash the nonce with the current personalized ints, record the hash and
/// report whether it beats the target. Without result state nothing is
/// recorded and the comparison is against an all-zero target.
pub fn check_pow(words: [i32; 4], result: Option<&mut ComputationResult>) -> i32 {
    match result {
        Some(result) => {
            let hash = pow_hash(&pow_input(words, &result.personalized_ints));
            result.pow_hash = hash;
            i32::from(below_target(&hash, &result.target_was))
        }
        None => {
            let hash = pow_hash(&pow_input(words, &[0; PERSONALIZED_LEN]));
            i32::from(below_target(&hash, &[0; HASH_LEN]))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ONE_ZERO_HASH: [u8; 16] = [
        237, 250, 9, 1, 32, 80, 112, 40, 79, 100, 235, 27, 80, 197, 49, 180,
    ];

    #[test]
    fn input_layout_is_little_endian() {
        let mut personalized = [0; 12];
        personalized[0] = 0x0102_0304;
        personalized[8] = 99;
        let input = pow_input([1, -1, 0, 0], &personalized);
        assert_eq!(&input[0..4], &[1, 0, 0, 0]);
        assert_eq!(&input[4..8], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&input[16..20], &[4, 3, 2, 1]);
        // only the first eight personalized ints are mixed in
        assert!(input[44..48].iter().all(|b| *b == 0));
    }

    #[test]
    fn known_digest() {
        let hash = pow_hash(&pow_input([1, 0, 0, 0], &[0; 12]));
        assert_eq!(hash, ONE_ZERO_HASH);
    }

    #[test]
    fn personalized_ints_change_the_digest() {
        let personalized = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let hash = pow_hash(&pow_input([7, -3, 1000, 42], &personalized));
        assert_eq!(
            hash,
            [18, 206, 47, 6, 76, 98, 88, 63, 246, 100, 6, 193, 176, 167, 231, 65]
        );
    }

    #[test]
    fn all_ff_target_always_succeeds() {
        let mut result = ComputationResult::new([0xFF; 16], [0; 12], Vec::new());
        assert_eq!(check_pow([1, 0, 0, 0], Some(&mut result)), 1);
        assert_eq!(result.pow_hash, ONE_ZERO_HASH);
    }

    #[test]
    fn comparison_resolves_at_first_differing_byte() {
        let mut target = ONE_ZERO_HASH;
        assert!(!below_target(&ONE_ZERO_HASH, &target));
        target[3] = 2;
        assert!(below_target(&ONE_ZERO_HASH, &target));
        target[3] = 0;
        target[15] = 255;
        assert!(!below_target(&ONE_ZERO_HASH, &target));
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let mut result = ComputationResult::new([0; 16], [3; 12], Vec::new());
        assert_eq!(check_pow([5, 6, 7, 8], Some(&mut result)), 0);
        let first = result.pow_hash;
        check_pow([5, 6, 7, 8], Some(&mut result));
        assert_eq!(result.pow_hash, first);
    }

    #[test]
    fn without_state_nothing_is_found() {
        assert_eq!(check_pow([1, 0, 0, 0], None), 0);
    }
}
