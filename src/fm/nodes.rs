use crate::fm::names::{format_opt, parse_ns_range, quote_word, Abbreviations};
use crate::fm::options::{NamespacedOptions, OptionMap};
use anyhow::Context as _;

/// Prefix used for nodes generated from a bare count (`fleetmaster start 3`).
pub const AUTO_PREFIX: &str = "celery";

/// One generated node: full name, command line and its macro expander.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Full node name, `prefix + ident + suffix`.
    pub name: String,
    /// Bare identifier (`%n`).
    pub ident: String,
    pub argv: Vec<String>,
    pub expander: Abbreviations,
    /// Most specific namespace key whose overrides were applied.
    pub namespace: Option<String>,
}

impl NodeSpec {
    /// `%h` -> full name, `%n` -> bare identifier.
    pub fn expand(&self, template: &str) -> String {
        self.expander.expand(template)
    }

    /// Value of `--pidfile=...` on this node's command line, if any, with
    /// shell quoting removed.
    pub fn pidfile(&self) -> Option<String> {
        let raw = self.argv.iter().find_map(|a| a.strip_prefix("--pidfile="))?;
        match shell_words::split(raw) {
            Ok(words) if words.len() == 1 => words.into_iter().next(),
            _ => Some(raw.to_string()),
        }
    }
}

/// Caller-side naming knobs; `--prefix`/`--suffix`/`--append` on the command
/// line win over these.
#[derive(Debug, Clone, Default)]
pub struct Naming {
    pub append: String,
    pub prefix: String,
    /// `None` means `"." + hostname`. `Some("")` (or the shell-escaped `""`)
    /// means no suffix.
    pub suffix: Option<String>,
}

impl Naming {
    pub fn new(append: &str, prefix: &str, suffix: Option<&str>) -> Self {
        Self {
            append: append.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.map(str::to_string),
        }
    }
}

pub fn local_hostname() -> anyhow::Result<String> {
    let raw = nix::unistd::gethostname().context("gethostname")?;
    Ok(raw.to_string_lossy().into_owned())
}

/// Options `start`, `restart` and `stop_verify` imply for detached workers.
pub fn with_detacher_defaults(p: &mut NamespacedOptions, cmd: &str) {
    with_pidfile_default(p, cmd);
    p.options.set_default("--logfile", format!("{cmd}@%n.log"));
}

pub fn with_pidfile_default(p: &mut NamespacedOptions, cmd: &str) {
    p.options.set_default("--pidfile", format!("{cmd}@%n.pid"));
}

struct NamespaceRule {
    key: String,
    members: Vec<String>,
    shared: bool,
    opts: OptionMap,
}

/// One-shot iterator over the node specs of a fleet. Build a new one to
/// iterate again.
pub struct NodeSpecs {
    idents: std::vec::IntoIter<String>,
    cmd: String,
    append: String,
    prefix: String,
    suffix: String,
    options: OptionMap,
    rules: Vec<NamespaceRule>,
    passthrough: String,
}

/// Expand a parsed fleet description into per-node command lines.
///
/// A single positional integer `K` generates `K` nodes named `celery1..K`;
/// otherwise every positional value is a node identifier. `hostname` feeds
/// the default `.hostname` suffix.
pub fn multi_args(p: &NamespacedOptions, cmd: &str, naming: &Naming, hostname: &str) -> NodeSpecs {
    let mut options = p.options.clone();
    let ranges = p.values.len() == 1;

    let mut idents = p.values.clone();
    let mut prefix = naming.prefix.clone();
    if ranges {
        if let Ok(count) = idents[0].parse::<u32>() {
            idents = (1..=count).map(|n| n.to_string()).collect();
            prefix = AUTO_PREFIX.to_string();
        }
    }

    let cmd = take_value(&mut options, "--cmd").unwrap_or_else(|| cmd.to_string());
    let append = take_value(&mut options, "--append").unwrap_or_else(|| naming.append.clone());
    let short_host = take_value(&mut options, "-n");
    let hostname = take_value(&mut options, "--hostname")
        .or(short_host)
        .unwrap_or_else(|| hostname.to_string());
    let prefix = take_value(&mut options, "--prefix").unwrap_or(prefix);
    let suffix = match take_value(&mut options, "--suffix").or_else(|| naming.suffix.clone()) {
        None => format!(".{hostname}"),
        Some(s) if s == "\"\"" || s == "''" => String::new(),
        Some(s) => s,
    };

    let rules = p
        .namespaces
        .iter()
        .map(|(key, opts)| {
            let shared = key.contains(',') || (ranges && key.contains('-'));
            let members = if shared {
                parse_ns_range(key, ranges)
            } else {
                vec![key.clone()]
            };
            NamespaceRule {
                key: key.clone(),
                members,
                shared,
                opts: opts.clone(),
            }
        })
        .collect();

    NodeSpecs {
        idents: idents.into_iter(),
        cmd,
        append,
        prefix,
        suffix,
        options,
        rules,
        passthrough: p.passthrough.clone(),
    }
}

fn take_value(options: &mut OptionMap, flag: &str) -> Option<String> {
    options.remove(flag).flatten()
}

impl NodeSpecs {
    fn build(&self, ident: String) -> NodeSpec {
        let name = format!("{}{}{}", self.prefix, ident, self.suffix);
        let expander = Abbreviations::new([("%h", name.as_str()), ("%n", ident.as_str())]);

        // globals < shared keys (declaration order) < the node's own key
        let mut merged = self.options.clone();
        let mut namespace = None;
        for rule in self.rules.iter().filter(|r| r.shared) {
            if rule.members.iter().any(|m| *m == ident) {
                merged.merge(&rule.opts);
                namespace = Some(rule.key.clone());
            }
        }
        for rule in self.rules.iter().filter(|r| !r.shared) {
            if rule.key == ident {
                merged.merge(&rule.opts);
                namespace = Some(rule.key.clone());
            }
        }

        let mut argv = Vec::with_capacity(merged.len() + 4);
        argv.push(expander.expand(&self.cmd));
        argv.push(format!("-n {}", quote_word(&name)));
        for (flag, value) in merged.iter() {
            let value = expander
                .expand_opt(value)
                .filter(|v| !v.is_empty())
                .map(|v| quote_word(&v));
            argv.push(format_opt(flag, value.as_deref()));
        }
        argv.push(self.passthrough.clone());
        if !self.append.is_empty() {
            argv.push(expander.expand(&self.append));
        }

        NodeSpec {
            name,
            ident,
            argv,
            expander,
            namespace,
        }
    }
}

impl Iterator for NodeSpecs {
    type Item = NodeSpec;

    fn next(&mut self) -> Option<NodeSpec> {
        let ident = self.idents.next()?;
        Some(self.build(ident))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.idents.size_hint()
    }
}
