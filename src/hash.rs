//! Name hashing used for every property identity in Inibin files.
//!
//! The function folds each lower-cased character into the accumulator as
//! `hash = ch + 65599 * hash` with 32-bit wraparound.  Stored hashes are
//! compared for equality, so the arithmetic must be bit-exact.

/// Multiplier of the folding hash.
pub const PRIME: u32 = 65599;

/// Separator folded between a section and a property name.
pub const SECTION_SEPARATOR: &str = "*";

/// Hash `text` starting from zero.
#[inline]
pub fn hash(text: &str) -> u32 {
    hash_with_seed(text, 0)
}

/// Hash `text` starting from `seed`.  Empty text returns `seed` unchanged.
///
/// Folds UTF-16 code units, so characters outside the BMP contribute both
/// surrogates.
pub fn hash_with_seed(text: &str, seed: u32) -> u32 {
    text.encode_utf16()
        .map(fold_case)
        .fold(seed, |acc, unit| u32::from(unit).wrapping_add(PRIME.wrapping_mul(acc)))
}

/// Lower-case one code unit.  Surrogates, and characters whose lower case
/// is not a single BMP character, are kept as they are.
fn fold_case(unit: u16) -> u16 {
    let Some(ch) = char::from_u32(u32::from(unit)) else {
        return unit;
    };
    let mut lower = ch.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => u16::try_from(u32::from(l)).unwrap_or(unit),
        _ => unit,
    }
}

/// Composite `section*property` hash: the section hash is chained through
/// the `"*"` separator before the property name is folded in.
pub fn hash_pair(section: &str, property: &str) -> u32 {
    let section_hash = hash_with_seed(SECTION_SEPARATOR, hash(section));
    hash_with_seed(property, section_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_text_returns_seed() {
        assert_eq!(hash(""), 0);
        assert_eq!(hash_with_seed("", 0xDEAD_BEEF), 0xDEAD_BEEF);
    }

    #[test]
    fn single_char_is_its_code_point() {
        assert_eq!(hash("a"), 'a' as u32);
        assert_eq!(hash("A"), 'a' as u32);
        assert_eq!(hash("ab"), 'b' as u32 + PRIME * 'a' as u32);
    }

    #[test]
    fn pair_chains_through_separator() {
        let expected = hash_with_seed("BaseHP", hash_with_seed("*", hash("Data")));
        assert_eq!(hash_pair("Data", "BaseHP"), expected);
        assert_eq!(hash_pair("data", "basehp"), expected);
        assert_eq!(hash_pair("Data", "BaseHP"), hash("Data*BaseHP"));
    }

    #[test]
    fn folds_utf16_code_units() {
        assert_eq!(hash("\u{1F600}"), 3_631_420_675);
        assert_eq!(hash("\u{C9}t\u{E9}"), hash("\u{E9}T\u{C9}"));
        // Lower case of U+0130 is two characters; the unit is kept.
        assert_eq!(hash("\u{130}"), 0x130);
    }

    #[test]
    fn wraps_instead_of_overflowing() {
        let long = "z".repeat(64);
        // Must not panic in debug builds.
        let _ = hash(&long);
    }

    proptest! {
        #[test]
        fn case_insensitive(s in "[a-zA-Z0-9_]{0,32}") {
            prop_assert_eq!(hash(&s), hash(&s.to_uppercase()));
            prop_assert_eq!(hash(&s), hash(&s.to_lowercase()));
        }

        #[test]
        fn seed_is_a_prefix(a in "[a-z]{0,12}", b in "[a-z]{0,12}") {
            prop_assert_eq!(hash_with_seed(&b, hash(&a)), hash(&format!("{a}{b}")));
        }
    }
}
