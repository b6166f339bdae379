//! Mapping table and column name derivation.
//!
//! Migration identifiers are free-form (often namespaced type names like
//! `App\Import\Product` or `shop::products`) and are not valid as raw SQL
//! identifiers. Tables are derived by snake-casing the identifier and
//! pluralizing the last segment; columns are the snake-cased field name with
//! a `source_` or `dest_` prefix. Results are memoized per cache instance —
//! the cache is owned by the mapper, never global state.

use std::collections::HashMap;

/// Memoizing name derivation cache.
#[derive(Debug, Default)]
pub struct NameCache {
    tables: HashMap<String, String>,
    columns: HashMap<(&'static str, String), String>,
}

impl NameCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive (and memoize) the mapping table name for a migration
    /// identifier.
    pub fn table_name(&mut self, mapping_key: &str) -> &str {
        self.tables
            .entry(mapping_key.to_string())
            .or_insert_with(|| pluralize(&snake_case(mapping_key)))
    }

    /// Derive (and memoize) a mapping column name for an id field.
    pub fn column_name(&mut self, prefix: &'static str, field: &str) -> &str {
        self.columns
            .entry((prefix, field.to_string()))
            .or_insert_with(|| format!("{}_{}", prefix, snake_case(field)))
    }
}

/// Convert an identifier to snake_case, mapping namespace separators
/// (`\`, `::`, `/`, `-`, `.`, spaces) to underscores.
pub fn snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev_lower = false;
    let mut prev_sep = true;

    let normalized = input.replace("::", "\\");
    for ch in normalized.chars() {
        match ch {
            '\\' | '/' | '-' | '.' | ' ' => {
                if !prev_sep {
                    out.push('_');
                }
                prev_lower = false;
                prev_sep = true;
            }
            c if c.is_uppercase() => {
                if prev_lower && !prev_sep {
                    out.push('_');
                }
                for lower in c.to_lowercase() {
                    out.push(lower);
                }
                prev_lower = false;
                prev_sep = false;
            }
            c => {
                out.push(c);
                prev_lower = c.is_lowercase() || c.is_ascii_digit();
                prev_sep = false;
            }
        }
    }

    out.trim_matches('_').to_string()
}

/// Naive English pluralization of the last underscore-separated segment.
pub fn pluralize(input: &str) -> String {
    if input.is_empty() {
        return input.to_string();
    }

    if input.ends_with('s')
        || input.ends_with('x')
        || input.ends_with('z')
        || input.ends_with("ch")
        || input.ends_with("sh")
    {
        format!("{}es", input)
    } else if let Some(stem) = input.strip_suffix('y') {
        let penultimate = stem.chars().last();
        if penultimate.is_some_and(|c| !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')) {
            format!("{}ies", stem)
        } else {
            format!("{}s", input)
        }
    } else {
        format!("{}s", input)
    }
}
