//! Command-line grammar for describing a fleet of nodes.
//!
//! Tokens come in four shapes:
//!
//! * `-x [value]` short option; takes the next token as its value unless that
//!   token looks like another option.
//! * `--name[=value]` long option; the value is only ever inline.
//! * `--` starts the passthrough tail, kept verbatim (including the `--`).
//! * anything else is a positional value (a node identifier or a count).
//!
//! Either option form may carry a namespace suffix, `-c:1,3` or
//! `--loglevel:kramer=DEBUG`, which files the option under that namespace key
//! instead of the global map.

/// Ordered flag -> optional value map. Re-inserting a flag keeps its original
/// position and replaces the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionMap {
    entries: Vec<(String, Option<String>)>,
}

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, flag: impl Into<String>, value: Option<String>) {
        let flag = flag.into();
        match self.entries.iter_mut().find(|(f, _)| *f == flag) {
            Some((_, v)) => *v = value,
            None => self.entries.push((flag, value)),
        }
    }

    /// Insert only if the flag is not present yet.
    pub fn set_default(&mut self, flag: &str, value: impl Into<String>) {
        if !self.contains(flag) {
            self.entries.push((flag.to_string(), Some(value.into())));
        }
    }

    pub fn remove(&mut self, flag: &str) -> Option<Option<String>> {
        let idx = self.entries.iter().position(|(f, _)| f == flag)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.entries.iter().any(|(f, _)| f == flag)
    }

    /// Overlay `other` on top of `self`: same flags are replaced in place,
    /// new flags are appended in `other`'s order.
    pub fn merge(&mut self, other: &OptionMap) {
        for (flag, value) in &other.entries {
            self.insert(flag.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F, V> FromIterator<(F, Option<V>)> for OptionMap
where
    F: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (F, Option<V>)>>(iter: I) -> Self {
        let mut map = OptionMap::new();
        for (flag, value) in iter {
            map.insert(flag, value.map(Into::into));
        }
        map
    }
}

/// Result of parsing one fleet description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespacedOptions {
    pub args: Vec<String>,
    /// Options without a namespace suffix.
    pub options: OptionMap,
    /// Namespace key (as written, e.g. `"jerry,elaine"`) -> overrides, in
    /// declaration order.
    pub namespaces: Vec<(String, OptionMap)>,
    /// Positional tokens before `--`.
    pub values: Vec<String>,
    /// `--` and everything after it joined by spaces, or empty.
    pub passthrough: String,
}

impl NamespacedOptions {
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = NamespacedOptions {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        let args = parsed.args.clone();

        let mut pos = 0usize;
        while pos < args.len() {
            let arg = args[pos].as_str();
            if arg == "--" {
                parsed.passthrough = args[pos..].join(" ");
                break;
            }
            if let Some(long) = arg.strip_prefix("--") {
                let (name, value) = match long.split_once('=') {
                    Some((n, v)) => (n, Some(v.to_string())),
                    None => (long, None),
                };
                parsed.add_option("--", name, value);
            } else if let Some(short) = arg.strip_prefix('-').filter(|s| !s.is_empty()) {
                let value = args
                    .get(pos + 1)
                    .filter(|next| !next.starts_with('-'))
                    .cloned();
                if value.is_some() {
                    pos += 1;
                }
                parsed.add_option("-", short, value);
            } else {
                parsed.values.push(arg.to_string());
            }
            pos += 1;
        }
        parsed
    }

    fn add_option(&mut self, dashes: &str, name: &str, value: Option<String>) {
        match name.split_once(':') {
            Some((flag, ns)) => {
                let flag = format!("{dashes}{flag}");
                self.namespace_mut(ns).insert(flag, value);
            }
            None => self.options.insert(format!("{dashes}{name}"), value),
        }
    }

    fn namespace_mut(&mut self, key: &str) -> &mut OptionMap {
        let idx = match self.namespaces.iter().position(|(k, _)| k == key) {
            Some(idx) => idx,
            None => {
                self.namespaces.push((key.to_string(), OptionMap::new()));
                self.namespaces.len() - 1
            }
        };
        &mut self.namespaces[idx].1
    }

    pub fn namespace(&self, key: &str) -> Option<&OptionMap> {
        self.namespaces
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, opts)| opts)
    }
}
