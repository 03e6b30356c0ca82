// src/context.rs

//! Context snapshots and command-line value substitution.
//!
//! A [`Context`] is a plain ordered map of `%key%` -> value. It is passed by
//! value: merging produces a new snapshot instead of mutating a shared map,
//! so a job always sees the context as it was when the job was built.
//!
//! [`Replacements`] is the flattened lookup used when rendering command
//! templates. Placeholders have the form `%name%`; placeholders without a
//! value are left untouched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%[A-Za-z0-9_]+%").expect("placeholder regex is valid")
});

/// Ordered key -> value map carried by packages and job chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, String>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// New snapshot with `other` layered on top (later writes win).
    pub fn merged(&self, other: &Context) -> Context {
        let mut values = self.0.clone();
        values.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Context(values)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for Context {
    fn from(values: BTreeMap<String, String>) -> Self {
        Context(values)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Context(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Escape a value for insertion into a double-quoted shell argument.
///
/// Backslash, double quote and backtick are prefixed with a backslash.
pub fn escape_for_shell(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '\\' | '"' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Layered substitution map for one job (or one file of a files job).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacements {
    values: BTreeMap<String, String>,
}

impl Replacements {
    /// Package-level values with the chain context layered on top.
    pub fn new(package_values: &Context, chain_context: &Context) -> Self {
        Self {
            values: package_values.merged(chain_context).0,
        }
    }

    /// Copy with additional (e.g. file-level) values layered on top.
    pub fn with_overlay(&self, overlay: &Context) -> Self {
        let mut values = self.values.clone();
        values.extend(overlay.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Render a command-line template; substituted values are shell-escaped.
    pub fn render_arguments(&self, template: &str) -> String {
        self.render(template, true)
    }

    /// Render a path template; substituted values are inserted verbatim.
    pub fn render_path(&self, template: &str) -> String {
        self.render(template, false)
    }

    fn render(&self, template: &str, escape: bool) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                let token = &caps[0];
                match self.values.get(token) {
                    Some(value) if escape => escape_for_shell(value),
                    Some(value) => value.clone(),
                    None => token.to_string(),
                }
            })
            .into_owned()
    }

    pub fn as_context(&self) -> Context {
        Context(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_backslashes_and_backticks() {
        assert_eq!(escape_for_shell(r#"a"b\c`d"#), r#"a\"b\\c\`d"#);
        assert_eq!(escape_for_shell("plain $HOME"), "plain $HOME");
    }

    #[test]
    fn chain_context_overrides_package_values() {
        let package: Context = [("%SIPName%", "pkg"), ("%mode%", "default")].into_iter().collect();
        let chain: Context = [("%mode%", "thorough")].into_iter().collect();
        let replacements = Replacements::new(&package, &chain);

        assert_eq!(
            replacements.render_arguments(r#""%SIPName%" %mode% %unknown%"#),
            r#""pkg" thorough %unknown%"#
        );
    }

    #[test]
    fn paths_are_not_escaped() {
        let values: Context = [("%dir%", r#"/tmp/a"b/"#)].into_iter().collect();
        let replacements = Replacements::new(&values, &Context::new());
        assert_eq!(replacements.render_path("%dir%out.log"), r#"/tmp/a"b/out.log"#);
        assert_eq!(replacements.render_arguments("%dir%"), r#"/tmp/a\"b/"#);
    }

    #[test]
    fn merged_leaves_original_untouched() {
        let base: Context = [("a", "1")].into_iter().collect();
        let merged = base.merged(&[("a", "2"), ("b", "3")].into_iter().collect());
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(merged.get("a"), Some("2"));
        assert_eq!(merged.len(), 2);
    }
}
