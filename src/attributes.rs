//! Submit-description attributes and `$(macro)` resolution.
//!
//! An [`AttributeStore`] is the ordered key/value mapping behind one job's
//! submit description file. Insertion order is preserved because it
//! determines the line order of the rendered file; re-setting a key mutates
//! its value in place without moving it. Keys are matched
//! case-insensitively, following the scheduler's convention.
//!
//! Values may reference other attributes with `$(name)` macros. The special
//! `$(cluster)` pseudo-variable expands to the owning job's cluster id.
//! Resolution is recursive and guarded: a reference chain that revisits an
//! attribute fails with [`CondorError::MacroCycle`] instead of looping.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{CondorError, Result};

static MACRO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([^()]+)\)").expect("invalid macro regex"));

/// A typed attribute value, coerced to scheduler syntax when rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i64),
    List(Vec<String>),
}

impl AttrValue {
    /// Whether the rendered submit description drops this value.
    pub fn is_falsy(&self) -> bool {
        match self {
            AttrValue::Str(s) => s.is_empty(),
            AttrValue::Bool(b) => !b,
            AttrValue::Int(n) => *n == 0,
            AttrValue::List(items) => items.is_empty(),
        }
    }

    fn render(&self, quote_items: bool, separator: &str) -> String {
        match self {
            AttrValue::Str(s) => s.clone(),
            AttrValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            AttrValue::Int(n) => n.to_string(),
            AttrValue::List(items) => {
                if quote_items {
                    items
                        .iter()
                        .map(|item| quote_argument(item))
                        .collect::<Vec<_>>()
                        .join(separator)
                } else {
                    items.join(separator)
                }
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(value as i64)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        AttrValue::List(value)
    }
}

impl From<Vec<&str>> for AttrValue {
    fn from(value: Vec<&str>) -> Self {
        AttrValue::List(value.into_iter().map(str::to_string).collect())
    }
}

/// Quote one argument-list item: embedded double quotes are doubled, and
/// items containing whitespace or single quotes are wrapped in single quotes
/// with embedded single quotes doubled.
fn quote_argument(arg: &str) -> String {
    let escaped = arg.replace('"', "\"\"");
    if escaped.contains(char::is_whitespace) || escaped.contains('\'') {
        format!("'{}'", escaped.replace('\'', "''"))
    } else {
        escaped
    }
}

/// The `arguments` attribute family requires per-item quoting when a list
/// value is rendered.
fn is_arguments_attr(name: &str) -> bool {
    name.eq_ignore_ascii_case("arguments")
}

/// Ordered attribute map for one job's submit description.
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    entries: Vec<(String, AttrValue)>,
    list_separator: Option<String>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from ordered seed pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let mut store = Self::new();
        for (key, value) in pairs {
            store.set(key, value);
        }
        store
    }

    /// Override the separator used when rendering list values. The default
    /// is a single space.
    pub fn set_list_separator(&mut self, separator: impl Into<String>) {
        self.list_separator = Some(separator.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Set an attribute. First insertion fixes the position; later calls
    /// mutate the value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.position(name).map(|idx| &self.entries[idx].1)
    }

    /// The raw (unresolved) rendered value of an attribute.
    pub fn get_str(&self, name: &str) -> Option<String> {
        self.position(name).map(|idx| {
            let (key, value) = &self.entries[idx];
            self.render_value(key, value)
        })
    }

    pub fn delete(&mut self, name: &str) -> Option<AttrValue> {
        self.position(name).map(|idx| self.entries.remove(idx).1)
    }

    fn render_value(&self, name: &str, value: &AttrValue) -> String {
        let separator = self.list_separator.as_deref().unwrap_or(" ");
        value.render(is_arguments_attr(name), separator)
    }

    /// Resolve an attribute's value, expanding every `$(x)` reference.
    /// Returns `Ok(None)` for a missing attribute.
    pub fn resolve(&self, name: &str, cluster_id: i64) -> Result<Option<String>> {
        let Some(raw) = self.get_str(name) else {
            return Ok(None);
        };
        let mut stack = vec![name.to_string()];
        self.resolve_with_stack(&raw, cluster_id, &mut stack)
            .map(Some)
    }

    /// Resolve `$(x)` references inside an arbitrary value string.
    pub fn resolve_value(&self, value: &str, cluster_id: i64) -> Result<String> {
        let mut stack = Vec::new();
        self.resolve_with_stack(value, cluster_id, &mut stack)
    }

    fn resolve_with_stack(
        &self,
        value: &str,
        cluster_id: i64,
        stack: &mut Vec<String>,
    ) -> Result<String> {
        let mut result = String::with_capacity(value.len());
        let mut last_end = 0;
        for captures in MACRO_RE.captures_iter(value) {
            let whole = captures.get(0).expect("regex match has group 0");
            let name = captures[1].trim();
            result.push_str(&value[last_end..whole.start()]);
            last_end = whole.end();

            if name.eq_ignore_ascii_case("cluster") {
                result.push_str(&cluster_id.to_string());
            } else if let Some(raw) = self.get_str(name) {
                if stack.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                    return Err(CondorError::MacroCycle(name.to_string()));
                }
                stack.push(name.to_string());
                let resolved = self.resolve_with_stack(&raw, cluster_id, stack)?;
                stack.pop();
                result.push_str(&resolved);
            } else {
                // Genuinely-external macros are left for the scheduler.
                result.push_str(whole.as_str());
            }
        }
        result.push_str(&value[last_end..]);
        Ok(result)
    }

    /// Render the submit description: `key = value` lines in insertion
    /// order, falsy values dropped, then a blank line and a `queue`
    /// directive.
    pub fn submit_description(&self, num_jobs: u32) -> String {
        let lines: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, value)| !value.is_falsy())
            .map(|(key, value)| format!("{} = {}", key, self.render_value(key, value)))
            .collect();
        format!("{}\n\nqueue {}\n", lines.join("\n"), num_jobs)
    }
}

impl fmt::Display for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.submit_description(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_preserved() {
        let mut store = AttributeStore::new();
        store.set("job_name", "x");
        store.set("executable", "run.sh");
        store.set("universe", "vanilla");

        let keys: Vec<&str> = store.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["job_name", "executable", "universe"]);
    }

    #[test]
    fn test_reset_keeps_position() {
        let mut store = AttributeStore::new();
        store.set("output", "a.out");
        store.set("error", "a.err");
        store.set("output", "b.out");

        let keys: Vec<&str> = store.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["output", "error"]);
        assert_eq!(store.get_str("output").unwrap(), "b.out");
    }

    #[test]
    fn test_case_insensitive_keys() {
        let mut store = AttributeStore::new();
        store.set("InitialDir", "work");
        assert_eq!(store.get_str("initialdir").unwrap(), "work");
        store.set("INITIALDIR", "other");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get_str("initialdir").unwrap(), "other");
    }

    #[test]
    fn test_bool_coercion() {
        let mut store = AttributeStore::new();
        store.set("getenv", true);
        store.set("stream_output", false);
        assert_eq!(store.get_str("getenv").unwrap(), "true");
        assert_eq!(store.get_str("stream_output").unwrap(), "false");
    }

    #[test]
    fn test_list_join_with_separator() {
        let mut store = AttributeStore::new();
        store.set_list_separator(", ");
        store.set("transfer_input_files", vec!["a.txt", "b.txt"]);
        assert_eq!(
            store.get_str("transfer_input_files").unwrap(),
            "a.txt, b.txt"
        );
    }

    #[test]
    fn test_arguments_quoting() {
        let mut store = AttributeStore::new();
        store.set("arguments", vec!["plain", "two words", "say \"hi\""]);
        assert_eq!(
            store.get_str("arguments").unwrap(),
            "plain 'two words' 'say \"\"hi\"\"'"
        );
    }

    #[test]
    fn test_submit_description_round_trip() {
        let mut store = AttributeStore::new();
        store.set("job_name", "x");
        store.set("executable", "run.sh");
        store.set("universe", "vanilla");

        assert_eq!(
            store.submit_description(3),
            "job_name = x\nexecutable = run.sh\nuniverse = vanilla\n\nqueue 3\n"
        );
    }

    #[test]
    fn test_falsy_values_dropped() {
        let mut store = AttributeStore::new();
        store.set("executable", "run.sh");
        store.set("log", "");
        store.set("getenv", false);
        store.set("priority", 0);
        store.set("arguments", Vec::<String>::new());

        assert_eq!(
            store.submit_description(1),
            "executable = run.sh\n\nqueue 1\n"
        );
    }

    #[test]
    fn test_resolve_cluster_pseudo_variable() {
        let mut store = AttributeStore::new();
        store.set("log", "job_$(cluster).log");
        assert_eq!(store.resolve("log", 42).unwrap().unwrap(), "job_42.log");
        // Resolution is not cached.
        assert_eq!(store.resolve("log", 43).unwrap().unwrap(), "job_43.log");
    }

    #[test]
    fn test_resolve_chained_references() {
        let mut store = AttributeStore::new();
        store.set("base", "results");
        store.set("subdir", "$(base)/logs");
        store.set("log", "$(subdir)/run.log");
        assert_eq!(
            store.resolve("log", 0).unwrap().unwrap(),
            "results/logs/run.log"
        );
    }

    #[test]
    fn test_undefined_macro_left_literal() {
        let mut store = AttributeStore::new();
        store.set("output", "out.$(Process)");
        assert_eq!(store.resolve("output", 0).unwrap().unwrap(), "out.$(Process)");
    }

    #[test]
    fn test_missing_attribute_resolves_to_none() {
        let store = AttributeStore::new();
        assert!(store.resolve("log", 0).unwrap().is_none());
    }

    #[test]
    fn test_self_referential_macro_fails() {
        let mut store = AttributeStore::new();
        store.set("log", "$(log).log");
        assert!(matches!(
            store.resolve("log", 0),
            Err(CondorError::MacroCycle(name)) if name == "log"
        ));
    }

    #[test]
    fn test_mutual_macro_cycle_fails() {
        let mut store = AttributeStore::new();
        store.set("a", "$(b)");
        store.set("b", "$(a)");
        assert!(matches!(store.resolve("a", 0), Err(CondorError::MacroCycle(_))));
    }

    #[test]
    fn test_resolve_value_without_owner() {
        let mut store = AttributeStore::new();
        store.set("name", "alpha");
        assert_eq!(
            store.resolve_value("$(name)-$(cluster)", 7).unwrap(),
            "alpha-7"
        );
    }
}
