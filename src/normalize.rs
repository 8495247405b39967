//! Name normalization: the canonical comparison key for duplicate detection.
//!
//! The normalized form is used ONLY for equality checks; the original
//! display-cased name is always what gets stored and rendered.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization as _};

/// Regex for whitespace runs (spaces, tabs, newlines) collapsed to one space.
static WHITESPACE_RE: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"\s+").unwrap());

/// Canonicalize a display name into a comparison key.
///
/// Steps, in order: trim leading/trailing whitespace, collapse internal
/// whitespace runs to a single space, strip diacritics (NFD decomposition,
/// combining marks dropped), uppercase case-fold.  Deterministic and
/// locale-insensitive: `"  Ana   García "` and `"ANA GARCIA"` produce the
/// same key.
pub fn normalize(name: &str) -> String {
    let trimmed = name.trim();
    let collapsed = WHITESPACE_RE.replace_all(trimmed, " ");
    collapsed
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_collapses_whitespace() {
        assert_eq!(normalize("  Ana   García "), "ANA GARCIA");
        assert_eq!(normalize("Jose\t\nLopez"), "JOSE LOPEZ");
    }

    #[test]
    fn strips_diacritics() {
        assert_eq!(normalize("Ana García"), "ANA GARCIA");
        assert_eq!(normalize("Zoë Müller-Łukasz"), normalize("Zoe Muller-Łukasz"));
        assert_eq!(normalize("Éloïse"), "ELOISE");
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(normalize("ana garcia"), normalize("ANA GARCIA"));
        assert_eq!(normalize("ßorn"), "SSORN");
    }

    #[test]
    fn equivalence_classes() {
        // Differing only in case, diacritics, or whitespace run-length must
        // normalize identically.
        let variants = ["José  Lopez", "jose lopez", " JOSE   LOPEZ ", "José\tLópez"];
        let keys: Vec<String> = variants.iter().map(|v| normalize(v)).collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]), "{keys:?}");
    }

    #[test]
    fn empty_and_whitespace_only() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t  "), "");
    }

    #[test]
    fn preserves_non_latin_text() {
        assert_eq!(normalize("山田 太郎"), "山田 太郎");
    }
}
