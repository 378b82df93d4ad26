use std::collections::BTreeMap;

use super::Maple;

/// The space separated field of an access log line holding the requested URL.
const URL_FIELD: usize = 6;

/// Counts the requests per URL of an access log.
///
/// Reduced with the [WordCount](super::WordCount) juice.
pub struct UrlCount;

impl Maple for UrlCount {
    fn map(&self, lines: &[String]) -> BTreeMap<String, String> {
        let mut counts = BTreeMap::<&str, u64>::new();
        for line in lines {
            let Some(url) = line.trim_end().split(' ').nth(URL_FIELD) else {
                continue;
            };
            *counts.entry(url).or_default() += 1;
        }

        counts
            .into_iter()
            .map(|(url, count)| (url.to_string(), count.to_string()))
            .collect()
    }
}
