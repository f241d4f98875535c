//! Typed option bags integrators publish and consume.
//!
//! An [`Options`] value is an ordered list of named, typed, bounded values.
//! Integrators return one from `options()` describing their editable
//! parameters, and receive one back through `update_options`/`preview`/`run`.
//! Display layers iterate the entries to build widgets; headless drivers
//! override entries by name from a settings file.

use serde::{Deserialize, Serialize};

/// A single typed option value, with bounds where the type has them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptionValue {
    /// Read-only informational line; shown, never edited.
    Info(String),
    Boolean(bool),
    Integer { value: u32, min: u32, max: u32 },
    Float { value: f32, min: f32, max: f32 },
    /// Index into a fixed label list.
    Enum { selected: u32, labels: Vec<String> },
}

/// Named option entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub name: String,
    pub value: OptionValue,
}

/// Ordered bag of named options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    entries: Vec<OptionEntry>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptionEntry> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.value)
    }

    /// Replaces the named entry, appending if it does not exist yet.
    /// Insertion order is preserved so display layers show a stable layout.
    pub fn set(&mut self, name: &str, value: OptionValue) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value = value,
            None => self.entries.push(OptionEntry {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn add_info(&mut self, name: &str, text: impl Into<String>) {
        self.set(name, OptionValue::Info(text.into()));
    }

    pub fn set_boolean(&mut self, name: &str, value: bool) {
        self.set(name, OptionValue::Boolean(value));
    }

    pub fn set_integer(&mut self, name: &str, value: u32, min: u32, max: u32) {
        self.set(name, OptionValue::Integer { value, min, max });
    }

    pub fn set_float(&mut self, name: &str, value: f32, min: f32, max: f32) {
        self.set(name, OptionValue::Float { value, min, max });
    }

    pub fn set_enum(&mut self, name: &str, selected: u32, labels: &[&str]) {
        self.set(
            name,
            OptionValue::Enum {
                selected,
                labels: labels.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn get_boolean(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(OptionValue::Boolean(v)) => *v,
            _ => default,
        }
    }

    /// Integer value clamped to the entry's declared bounds.
    pub fn get_integer(&self, name: &str, default: u32) -> u32 {
        match self.get(name) {
            Some(OptionValue::Integer { value, min, max }) => (*value).clamp(*min, *max),
            _ => default,
        }
    }

    /// Float value clamped to the entry's declared bounds.
    pub fn get_float(&self, name: &str, default: f32) -> f32 {
        match self.get(name) {
            Some(OptionValue::Float { value, min, max }) => value.clamp(*min, *max),
            _ => default,
        }
    }

    /// Selected enum index, clamped to the label list.
    pub fn get_enum(&self, name: &str, default: u32) -> u32 {
        match self.get(name) {
            Some(OptionValue::Enum { selected, labels }) if !labels.is_empty() => {
                (*selected).min(labels.len() as u32 - 1)
            }
            _ => default,
        }
    }

    /// Applies a loosely-typed override (CLI flag, settings file) to an
    /// existing entry. The override must coerce to the entry's type; numeric
    /// values are clamped to the declared bounds. Returns false when the name
    /// is unknown or the value does not coerce.
    pub fn apply(&mut self, name: &str, raw: &serde_json::Value) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) else {
            return false;
        };
        match &mut entry.value {
            OptionValue::Info(_) => false,
            OptionValue::Boolean(v) => match raw.as_bool() {
                Some(b) => {
                    *v = b;
                    true
                }
                None => false,
            },
            OptionValue::Integer { value, min, max } => match raw.as_u64() {
                Some(n) => {
                    *value = (n.min(u32::MAX as u64) as u32).clamp(*min, *max);
                    true
                }
                None => false,
            },
            OptionValue::Float { value, min, max } => match raw.as_f64() {
                Some(f) => {
                    *value = (f as f32).clamp(*min, *max);
                    true
                }
                None => false,
            },
            OptionValue::Enum { selected, labels } => {
                if let Some(n) = raw.as_u64() {
                    if (n as usize) < labels.len() {
                        *selected = n as u32;
                        return true;
                    }
                } else if let Some(s) = raw.as_str() {
                    if let Some(idx) = labels.iter().position(|l| l == s) {
                        *selected = idx as u32;
                        return true;
                    }
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Options {
        let mut opt = Options::new();
        opt.set_integer("samples", 64, 1, 4096);
        opt.set_float("exposure", 1.0, 0.001, 64.0);
        opt.set_boolean("denoise", false);
        opt.set_enum("quality", 1, &["draft", "normal", "high"]);
        opt
    }

    #[test]
    fn test_getters_clamp_to_bounds() {
        let mut opt = sample();
        opt.set("samples", OptionValue::Integer { value: 100_000, min: 1, max: 4096 });
        assert_eq!(opt.get_integer("samples", 0), 4096);
        assert_eq!(opt.get_integer("missing", 7), 7);

        opt.set("exposure", OptionValue::Float { value: -3.0, min: 0.001, max: 64.0 });
        assert!((opt.get_float("exposure", 0.0) - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut opt = sample();
        let order_before: Vec<_> = opt.iter().map(|e| e.name.clone()).collect();
        opt.set_integer("samples", 128, 1, 4096);
        let order_after: Vec<_> = opt.iter().map(|e| e.name.clone()).collect();
        assert_eq!(order_before, order_after);
        assert_eq!(opt.get_integer("samples", 0), 128);
    }

    #[test]
    fn test_apply_json_overrides() {
        let mut opt = sample();
        assert!(opt.apply("samples", &serde_json::json!(256)));
        assert_eq!(opt.get_integer("samples", 0), 256);

        assert!(opt.apply("quality", &serde_json::json!("high")));
        assert_eq!(opt.get_enum("quality", 0), 2);

        assert!(!opt.apply("quality", &serde_json::json!("ultra")));
        assert!(!opt.apply("nope", &serde_json::json!(1)));
        assert!(!opt.apply("samples", &serde_json::json!("many")));
    }
}
