use std::collections::BTreeMap;

use super::{Juice, Maple};

const ALL_URLS_KEY: &str = "allurl";
const SEPARATOR: &str = "___";

/// Turns the `url count` lines produced by `urlcount` into the share of
/// requests each URL received.
///
/// Every line is funnelled into a single key so one juice task sees all URLs.
pub struct UrlPercent;

impl Maple for UrlPercent {
    fn map(&self, lines: &[String]) -> BTreeMap<String, String> {
        let lines = lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();

        if lines.is_empty() {
            return BTreeMap::new();
        }

        BTreeMap::from([(ALL_URLS_KEY.to_string(), lines.join(SEPARATOR))])
    }
}

impl Juice for UrlPercent {
    fn reduce(&self, _key: &str, values: &[String]) -> String {
        let mut counts = BTreeMap::<&str, u64>::new();
        for pair in values.iter().flat_map(|v| v.split(SEPARATOR)) {
            let mut parts = pair.split_whitespace();
            let (Some(url), Some(count)) = (parts.next(), parts.next()) else {
                continue;
            };
            if let Ok(count) = count.parse::<u64>() {
                counts.insert(url, count);
            }
        }

        let total = counts.values().sum::<u64>();
        if total == 0 {
            return String::new();
        }

        counts
            .into_iter()
            .map(|(url, count)| format!("{url} {:.2}%", count as f64 / total as f64 * 100.0))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_joins_lines() {
        let lines = ["/a 3\n", "/b 1\n", "\n"].map(String::from);
        let mapped = UrlPercent.map(&lines);
        assert_eq!(mapped[ALL_URLS_KEY], "/a 3___/b 1");

        assert!(UrlPercent.map(&["\n".to_string()]).is_empty());
    }

    #[test]
    fn test_reduce_percentages() {
        let values = ["/b 1___/a 3", "/c 4"].map(String::from);
        assert_eq!(
            UrlPercent.reduce(ALL_URLS_KEY, &values),
            "/a 37.50%, /b 12.50%, /c 50.00%"
        );
    }
}
