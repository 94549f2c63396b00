use regex::Regex;

lazy_static::lazy_static! {
    static ref TRAILING_PARENTHETICAL: Regex =
        Regex::new(r"\s*\([^)]*\)\s*$").expect("regex for trailing parenthetical");
    static ref TRAILING_VERSION: Regex = Regex::new(r"(?i)[_\-\s]*(v|version|rev|draft|final)\d*$")
        .expect("regex for trailing version suffix");
}

/// Normalized indel similarity: `1 - distance / (len(a) + len(b))`, where the
/// distance counts insertions and deletions only. Two empty strings are
/// identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let lcs = longest_common_subsequence(&a, &b);
    (2 * lcs) as f64 / total as f64
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Case-insensitive longest common prefix of `stems`, in the casing of the
/// first stem.
pub fn common_prefix(stems: &[&str]) -> String {
    let Some(first) = stems.first() else {
        return String::new();
    };
    let mut len = first.chars().count();
    for other in &stems[1..] {
        let shared = first
            .chars()
            .zip(other.chars())
            .take_while(|(x, y)| x.to_lowercase().eq(y.to_lowercase()))
            .count();
        len = len.min(shared);
    }
    first.chars().take(len).collect()
}

/// Display name for a cluster of similar stems.
pub fn extract_common_name(stems: &[&str]) -> String {
    let trim = |s: &str| s.trim_matches(|c: char| matches!(c, '_' | '-' | ' ' | '(' | ')')).to_string();

    let prefix = trim(&common_prefix(stems));
    if prefix.chars().count() >= 3 {
        return prefix;
    }

    let Some(first) = stems.first() else {
        return "document".to_string();
    };
    let stripped = TRAILING_PARENTHETICAL.replace(first, "");
    let stripped = TRAILING_VERSION.replace(&stripped, "");
    let name = trim(&stripped);
    if name.is_empty() {
        "document".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_bounds() {
        assert_eq!(ratio("", ""), 1.0);
        assert_eq!(ratio("report", "report"), 1.0);
        assert_eq!(ratio("abc", "xyz"), 0.0);
    }

    #[test]
    fn ratio_matches_indel_definition() {
        // lcs("kitten", "sitting") = 4 -> 8 / 13
        let r = ratio("kitten", "sitting");
        assert!((r - 8.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn near_identical_names_pass_default_threshold() {
        assert!(ratio("quarterly report", "quarterly report final") >= 0.7);
        assert!(ratio("invoice", "meeting notes") < 0.7);
    }

    #[test]
    fn common_name_uses_shared_prefix() {
        assert_eq!(
            extract_common_name(&["Project Plan (1)", "project plan draft"]),
            "Project Plan"
        );
    }

    #[test]
    fn common_name_falls_back_to_cleaned_first_stem() {
        assert_eq!(extract_common_name(&["ab_v2", "xy"]), "ab");
        assert_eq!(extract_common_name(&["notes (old)", "zz"]), "notes");
        assert_eq!(extract_common_name(&["(1)", "x"]), "document");
        assert_eq!(extract_common_name(&[]), "document");
    }
}
