/// Edit distance between two serialized acoustic fingerprints.
///
/// Fingerprints are opaque strings; recordings of the same audio produce
/// strings that differ in few positions even across encodings. Cost is
/// O(len(a) * len(b)), so callers prune candidates before comparing.
pub fn distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_zero() {
        assert_eq!(distance("AQADtNIyRUkkZUqy", "AQADtNIyRUkkZUqy"), 0);
    }

    #[test]
    fn test_symmetric() {
        let pairs = [
            ("AQADtNIyRUkkZUqy", "AQADtNIyRUkkZVqz"),
            ("", "AQAD"),
            ("kitten", "sitting"),
            ("AQADtE", "tEAQAD"),
        ];
        for (a, b) in pairs {
            assert_eq!(distance(a, b), distance(b, a), "{a} vs {b}");
        }
    }

    #[test]
    fn test_nonzero_when_different() {
        assert_eq!(distance("kitten", "sitting"), 3);
        assert_eq!(distance("", "abc"), 3);
    }

    #[test]
    fn test_triangle_inequality() {
        let (a, b, c) = ("AQADtNIy", "AQBDtNJy", "XQBDtNJz");
        assert!(distance(a, c) <= distance(a, b) + distance(b, c));
    }
}
