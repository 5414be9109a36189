use std::collections::{BTreeMap, HashSet};

/// Produce lexical variants of `question` for multi-query retrieval.
///
/// The first entry is always the trimmed question. For every synonym key that
/// occurs in the lowercased question, one variant per synonym is added with the
/// key replaced, followed by a whitespace-normalized lowercase form. Duplicates
/// are dropped in insertion order and the result is capped at `limit` entries.
pub fn expand(question: &str, synonyms: &BTreeMap<String, Vec<String>>, limit: usize) -> Vec<String> {
    let trimmed = question.trim();
    let lowered = trimmed.to_lowercase();

    let mut variants = vec![trimmed.to_string()];

    for (key, replacements) in synonyms {
        let key = key.trim().to_lowercase();
        if key.is_empty() || !lowered.contains(&key) {
            continue;
        }
        for replacement in replacements {
            variants.push(lowered.replace(&key, replacement));
        }
    }

    variants.push(lowered.split_whitespace().collect::<Vec<_>>().join(" "));

    let mut seen = HashSet::new();
    variants.retain(|variant| seen.insert(variant.clone()));
    variants.truncate(limit.max(1));
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::default_query_synonyms;

    fn table(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(key, values)| {
                (
                    (*key).to_string(),
                    values.iter().map(|v| (*v).to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn first_variant_is_trimmed_question() {
        let variants = expand("  What are the MBA fees?  ", &default_query_synonyms(), 6);
        assert_eq!(variants[0], "What are the MBA fees?");
    }

    #[test]
    fn abbreviation_is_replaced_by_each_synonym() {
        let synonyms = table(&[("fees", &["fee structure", "tuition"])]);
        let variants = expand("BCA Fees", &synonyms, 6);

        assert_eq!(
            variants,
            vec!["BCA Fees", "bca fee structure", "bca tuition", "bca fees"]
        );
    }

    #[test]
    fn normalized_variant_collapses_whitespace() {
        let variants = expand("Hostel   \t rules", &BTreeMap::new(), 6);
        assert_eq!(variants, vec!["Hostel   \t rules", "hostel rules"]);
    }

    #[test]
    fn duplicates_collapse_and_output_is_bounded() {
        let synonyms = table(&[
            ("a", &["1", "2", "3"]),
            ("b", &["4", "5", "6"]),
        ]);
        let variants = expand("ab", &synonyms, 6);
        assert_eq!(variants.len(), 6);
        assert_eq!(variants[0], "ab");

        let lowercase = expand("plain", &BTreeMap::new(), 6);
        assert_eq!(lowercase, vec!["plain"]);
    }

    #[test]
    fn empty_question_yields_single_empty_variant() {
        assert_eq!(expand("   ", &default_query_synonyms(), 6), vec![String::new()]);
        assert_eq!(expand("", &default_query_synonyms(), 6), vec![String::new()]);
    }
}
