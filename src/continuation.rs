// src/continuation.rs

use once_cell::sync::Lazy;
use regex::Regex;

static PART_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"part(\d+)").expect("part pattern is valid"));

/// Placeholder left in a template where the part number was.
pub const PART_PLACEHOLDER: &str = "{}";

/// Finds the follow-up repository for ids like `org/model-part2-7B`.
pub struct ContinuationResolver;

impl ContinuationResolver {
    /// Returns the id with its first `part<N>` token replaced by
    /// `part{}`, along with `N`.
    pub fn detect(id: &str) -> Option<(String, u64)> {
        let caps = PART_TOKEN.captures(id)?;
        let digits = caps.get(1)?;
        let part = digits.as_str().parse::<u64>().ok()?;

        let mut template = String::with_capacity(id.len());
        template.push_str(&id[..digits.start()]);
        template.push_str(PART_PLACEHOLDER);
        template.push_str(&id[digits.end()..]);
        Some((template, part))
    }

    /// Increments the first `part<N>` token. `None` if there is none.
    pub fn next(id: &str) -> Option<String> {
        let digits = PART_TOKEN.captures(id)?.get(1)?;
        let next = digits.as_str().parse::<u64>().ok()?.checked_add(1)?;
        Some(format!("{}{}{}", &id[..digits.start()], next, &id[digits.end()..]))
    }
}
