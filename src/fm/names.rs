use nix::sys::signal::Signal;
use std::str::FromStr;

/// Widest `a-b` run [`parse_ns_range`] will expand.
pub const MAX_NS_RANGE: u64 = 10_000;

/// Split a namespace key on commas; with `expand`, `a-b` parts become the
/// inclusive run `a..=b`.
///
/// A part that merely contains a dash (`"web-1"`), or a run wider than
/// [`MAX_NS_RANGE`], is kept as-is.
pub fn parse_ns_range(ns: &str, expand: bool) -> Vec<String> {
    let mut out = Vec::new();
    for part in ns.split(',') {
        if expand {
            if let Some((start, stop)) = part.split_once('-') {
                if let (Ok(start), Ok(stop)) = (start.parse::<i64>(), stop.parse::<i64>()) {
                    if stop.abs_diff(start) < MAX_NS_RANGE {
                        out.extend((start..=stop).map(|n| n.to_string()));
                        continue;
                    }
                }
            }
        }
        out.push(part.to_string());
    }
    out
}

/// Literal substring substitution table (`%h` -> node name, ...).
///
/// Keys are applied in insertion order, each over the output of the previous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Abbreviations {
    table: Vec<(String, String)>,
}

impl Abbreviations {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            table: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn expand(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (short, long) in &self.table {
            if !short.is_empty() {
                out = out.replace(short.as_str(), long);
            }
        }
        out
    }

    /// Absent templates stay absent.
    pub fn expand_opt(&self, template: Option<&str>) -> Option<String> {
        template.map(|t| self.expand(t))
    }
}

/// Render one option for a command line: `--log=foo`, `-c 1`, or the bare flag.
pub fn format_opt(name: &str, value: Option<&str>) -> String {
    match value {
        None | Some("") => name.to_string(),
        Some(v) if name.starts_with("--") => format!("{name}={v}"),
        Some(v) => format!("{name} {v}"),
    }
}

/// POSIX single-quote escaping.
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// [`quote`] only when `text` would not survive shell word splitting as a
/// single word.
pub fn quote_word(text: &str) -> String {
    let unsafe_char = |c: char| c.is_whitespace() || matches!(c, '\'' | '"' | '\\' | '#');
    if text.is_empty() || text.contains(unsafe_char) {
        quote(text)
    } else {
        text.to_string()
    }
}

/// Find a signal given as `-9` or `-INT` among `args`; the last match wins.
/// Defaults to SIGTERM.
pub fn findsig<S: AsRef<str>>(args: &[S]) -> i32 {
    for arg in args.iter().rev() {
        let Some(rest) = arg.as_ref().strip_prefix('-') else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        if rest.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = rest.parse::<i32>() {
                return n;
            }
        }
        if let Ok(sig) = Signal::from_str(&format!("SIG{rest}")) {
            return sig as i32;
        }
    }
    Signal::SIGTERM as i32
}

/// `15` -> `"TERM"`; unknown numbers are rendered as-is.
pub fn signal_name(sig: i32) -> String {
    match Signal::try_from(sig) {
        Ok(s) => s.as_str().trim_start_matches("SIG").to_string(),
        Err(_) => sig.to_string(),
    }
}
