/// Allele tokens derived from one combined genotype token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllelePair {
    pub allele1: String,
    pub allele2: String,
}

/// Splits a two-character genotype such as `AG` into `A` and `G`.
///
/// Anything else (absent, one character, `*1/*2`, `del/A`, ...) is passed
/// through untouched as `allele1` with an empty `allele2`. Compound notations
/// therefore never get split; downstream consumers rely on this exact output.
pub fn split_genotype(token: Option<&str>) -> AllelePair {
    let Some(token) = token else {
        return AllelePair::default();
    };

    let mut chars = token.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(first), Some(second), None) => AllelePair {
            allele1: first.to_string(),
            allele2: second.to_string(),
        },
        _ => AllelePair {
            allele1: token.to_string(),
            allele2: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_two_tokens() {
        let pair = split_genotype(Some("AG"));
        assert_eq!(pair.allele1, "A");
        assert_eq!(pair.allele2, "G");
    }

    #[test]
    fn passes_through_compound_notation() {
        let pair = split_genotype(Some("*1/*17"));
        assert_eq!(pair.allele1, "*1/*17");
        assert_eq!(pair.allele2, "");
    }

    #[test]
    fn passes_through_single_token() {
        let pair = split_genotype(Some("A"));
        assert_eq!(pair.allele1, "A");
        assert!(pair.allele2.is_empty());
    }

    #[test]
    fn absent_token_is_empty() {
        assert_eq!(split_genotype(None), AllelePair::default());
    }

    #[test]
    fn every_two_char_input_reconstructs() {
        for input in ["AA", "CT", "GG", "TA", "--", "AΔ"] {
            let pair = split_genotype(Some(input));
            assert!(!pair.allele1.is_empty());
            assert!(!pair.allele2.is_empty());
            assert_eq!(format!("{}{}", pair.allele1, pair.allele2), input);
        }
    }
}
