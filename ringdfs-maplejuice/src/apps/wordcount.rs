use std::collections::BTreeMap;

use super::{sum_counts, Juice, Maple};

/// Counts the whitespace separated words of the input.
pub struct WordCount;

impl Maple for WordCount {
    fn map(&self, lines: &[String]) -> BTreeMap<String, String> {
        let mut counts = BTreeMap::<&str, u64>::new();
        for word in lines.iter().flat_map(|line| line.split_whitespace()) {
            *counts.entry(word).or_default() += 1;
        }

        counts
            .into_iter()
            .map(|(word, count)| (word.to_string(), count.to_string()))
            .collect()
    }
}

impl Juice for WordCount {
    fn reduce(&self, _key: &str, values: &[String]) -> String {
        sum_counts(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_counts_words() {
        let lines = ["the cat saw\n", "the  dog\n", ""].map(String::from);
        let counts = WordCount.map(&lines);

        assert_eq!(counts.len(), 4);
        assert_eq!(counts["the"], "2");
        assert_eq!(counts["cat"], "1");
        assert_eq!(counts["dog"], "1");
    }

    #[test]
    fn test_reduce_sums() {
        let values = ["2", "3"].map(String::from);
        assert_eq!(WordCount.reduce("the", &values), "5");
    }
}
