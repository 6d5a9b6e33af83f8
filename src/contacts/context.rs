//! Cumulative per-contact memory with a monotonic merge.
//!
//! The field schema is declared once in `context_schema!`; the merge,
//! emptiness check, and prompt rendering are generated from it, so a new
//! field only needs one line to inherit the merge guarantees:
//!
//! - a known scalar is never overwritten by null or blank
//! - list fields are unioned without duplicates

use serde::{Deserialize, Deserializer, Serialize};

/// A field that can absorb a newer observation without losing information.
pub trait MergeField {
    fn merge_from(&mut self, incoming: Self);
    fn is_unset(&self) -> bool;
}

impl MergeField for Option<String> {
    fn merge_from(&mut self, incoming: Self) {
        if let Some(value) = incoming {
            let value = value.trim();
            if !value.is_empty() {
                *self = Some(value.to_string());
            }
        }
    }

    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

impl MergeField for Vec<String> {
    fn merge_from(&mut self, incoming: Self) {
        let mut seen: Vec<String> = Vec::with_capacity(self.len() + incoming.len());
        for item in self.drain(..).chain(incoming) {
            if item.trim().is_empty() || seen.contains(&item) {
                continue;
            }
            seen.push(item);
        }
        *self = seen;
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

/// Accept strings, numbers, and booleans for scalar fields; models are not consistent.
fn lenient_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Accept a list, a single string, or null for list fields.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(serde_json::Value::String(s)) => vec![s],
        _ => Vec::new(),
    })
}

macro_rules! context_schema {
    (scalars: [$($scalar:ident),* $(,)?], lists: [$($list:ident),* $(,)?] $(,)?) => {
        /// Everything learned about a contact so far.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct ExtractedContext {
            $(
                #[serde(default, deserialize_with = "lenient_scalar", skip_serializing_if = "Option::is_none")]
                pub $scalar: Option<String>,
            )*
            $(
                #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
                pub $list: Vec<String>,
            )*
        }

        impl ExtractedContext {
            pub const SCALAR_FIELDS: &'static [&'static str] = &[$(stringify!($scalar)),*];
            pub const LIST_FIELDS: &'static [&'static str] = &[$(stringify!($list)),*];

            /// Fold `incoming` into `self`.
            pub fn merge(&mut self, incoming: ExtractedContext) {
                $( self.$scalar.merge_from(incoming.$scalar); )*
                $( self.$list.merge_from(incoming.$list); )*
            }

            pub fn is_empty(&self) -> bool {
                true $( && self.$scalar.is_unset() )* $( && self.$list.is_unset() )*
            }

            /// Known facts as `(field, value)` pairs, in schema order.
            pub fn facts(&self) -> Vec<(&'static str, String)> {
                let mut out = Vec::new();
                $(
                    if let Some(v) = &self.$scalar {
                        out.push((stringify!($scalar), v.clone()));
                    }
                )*
                $(
                    if !self.$list.is_empty() {
                        out.push((stringify!($list), self.$list.join("; ")));
                    }
                )*
                out
            }
        }
    };
}

context_schema! {
    scalars: [
        name,
        company,
        job_title,
        budget,
        timeline,
        team_size,
        current_solution,
        interest_level,
    ],
    lists: [
        pain_points,
        needs,
        objections,
        competitors_mentioned,
        decision_makers,
        key_quotes,
    ],
}

impl ExtractedContext {
    /// Non-mutating merge.
    pub fn merged(&self, incoming: ExtractedContext) -> Self {
        let mut out = self.clone();
        out.merge(incoming);
        out
    }

    /// Prompt-ready summary of known facts.
    pub fn render(&self) -> String {
        let facts = self.facts();
        if facts.is_empty() {
            return "(nothing known yet)".to_string();
        }
        facts
            .into_iter()
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
