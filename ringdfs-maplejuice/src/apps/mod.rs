mod urlcount;
mod urlpercent;
mod wordcount;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub use urlcount::UrlCount;
pub use urlpercent::UrlPercent;
pub use wordcount::WordCount;

/// The map half of a job.
pub trait Maple: Send + Sync + 'static {
    /// Maps a batch of at most ten input lines onto key value pairs.
    fn map(&self, lines: &[String]) -> BTreeMap<String, String>;
}

/// The reduce half of a job.
pub trait Juice: Send + Sync + 'static {
    /// Folds every value emitted for the key into the final value.
    fn reduce(&self, key: &str, values: &[String]) -> String;
}

#[derive(Clone)]
/// A named pair of job functions.
pub struct App {
    maple: Arc<dyn Maple>,
    juice: Arc<dyn Juice>,
}

impl App {
    pub fn new(maple: impl Maple, juice: impl Juice) -> Self {
        Self {
            maple: Arc::new(maple),
            juice: Arc::new(juice),
        }
    }

    #[inline]
    pub fn maple(&self) -> &Arc<dyn Maple> {
        &self.maple
    }

    #[inline]
    pub fn juice(&self) -> &Arc<dyn Juice> {
        &self.juice
    }
}

#[derive(Clone, Default)]
/// The jobs a worker is able to run, looked up by the name given on submission.
pub struct AppRegistry {
    apps: HashMap<String, App>,
}

impl AppRegistry {
    /// A registry without any apps.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the built in `wordcount`, `urlcount` and `urlpercent` apps.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("wordcount", App::new(WordCount, WordCount));
        registry.register("urlcount", App::new(UrlCount, WordCount));
        registry.register("urlpercent", App::new(UrlPercent, UrlPercent));
        registry
    }

    /// Adds an app, replacing any app already registered under the name.
    pub fn register(&mut self, name: impl Into<String>, app: App) {
        self.apps.insert(name.into(), app);
    }

    pub fn get(&self, name: &str) -> Option<&App> {
        self.apps.get(name)
    }

    /// The registered app names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.apps.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

/// Sums the values as integers, any value which is not a number yields `-1`.
pub(crate) fn sum_counts(values: &[String]) -> String {
    values
        .iter()
        .map(|v| v.trim().parse::<i64>())
        .sum::<Result<i64, _>>()
        .unwrap_or(-1)
        .to_string()
}
