// ── UCI document codec ──
//
// Just enough of the OpenWrt UCI text format to render templates and to
// read current files back for section-level diffs.

use std::fmt::{self, Write as _};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct UciParseError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciValue {
    Single(String),
    List(Vec<String>),
}

impl fmt::Display for UciValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(v) => f.write_str(v),
            Self::List(items) => write!(f, "[{}]", items.join(" ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciSection {
    pub kind: String,
    pub name: Option<String>,
    pub options: Vec<(String, UciValue)>,
}

impl UciSection {
    pub fn named(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            name: Some(name.to_owned()),
            options: Vec::new(),
        }
    }

    pub fn anonymous(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            name: None,
            options: Vec::new(),
        }
    }

    /// Builder: set a single-valued option.
    pub fn opt(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, UciValue::Single(value.into()));
        self
    }

    /// Builder: set a single-valued option only when `value` is not empty.
    pub fn opt_nonempty(self, key: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.opt(key, value)
        }
    }

    /// Builder: set a list option. Empty lists are skipped.
    pub fn list<I, S>(mut self, key: &str, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        if !items.is_empty() {
            self.set(key, UciValue::List(items));
        }
        self
    }

    pub fn set(&mut self, key: &str, value: UciValue) {
        if let Some(slot) = self.options.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.options.push((key.to_owned(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&UciValue> {
        self.options.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Single option value as a string slice.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            UciValue::Single(v) => Some(v),
            UciValue::List(_) => None,
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.options.retain(|(k, _)| k != key);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UciDocument {
    pub sections: Vec<UciSection>,
}

impl UciDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, section: UciSection) -> &mut Self {
        self.sections.push(section);
        self
    }

    pub fn section(&self, kind: &str, name: &str) -> Option<&UciSection> {
        self.sections
            .iter()
            .find(|s| s.kind == kind && s.name.as_deref() == Some(name))
    }

    pub fn section_mut(&mut self, kind: &str, name: &str) -> Option<&mut UciSection> {
        self.sections
            .iter_mut()
            .find(|s| s.kind == kind && s.name.as_deref() == Some(name))
    }

    pub fn sections_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a UciSection> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }

    /// Stable identity per section: `kind 'name'`, or `@kind[n]` for
    /// anonymous sections counted per kind.
    pub fn keyed(&self) -> Vec<(String, &UciSection)> {
        let mut counters: Vec<(&str, usize)> = Vec::new();
        self.sections
            .iter()
            .map(|s| {
                let key = if let Some(name) = &s.name {
                    format!("{} '{name}'", s.kind)
                } else {
                    let idx = match counters.iter_mut().find(|(k, _)| *k == s.kind) {
                        Some((_, n)) => {
                            *n += 1;
                            *n
                        }
                        None => {
                            counters.push((&s.kind, 0));
                            0
                        }
                    };
                    format!("@{}[{idx}]", s.kind)
                };
                (key, s)
            })
            .collect()
    }

    pub fn parse(text: &str) -> Result<Self, UciParseError> {
        let mut doc = Self::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let err = |message: &str| UciParseError {
                line,
                message: message.to_owned(),
            };
            let tokens = tokenize(raw).map_err(|m| err(&m))?;
            let Some((keyword, args)) = tokens.split_first() else {
                continue;
            };
            match keyword.as_str() {
                "package" => {}
                "config" => {
                    let (kind, name) = match args {
                        [kind] => (kind, None),
                        [kind, name] => (kind, Some(name.clone())),
                        _ => return Err(err("expected `config <type> ['<name>']`")),
                    };
                    doc.sections.push(UciSection {
                        kind: kind.clone(),
                        name,
                        options: Vec::new(),
                    });
                }
                "option" | "list" => {
                    let [key, value] = args else {
                        return Err(err("expected `<keyword> <name> '<value>'`"));
                    };
                    let section = doc
                        .sections
                        .last_mut()
                        .ok_or_else(|| err("option outside of a section"))?;
                    if keyword == "option" {
                        section.set(key, UciValue::Single(value.clone()));
                    } else {
                        match section.options.iter_mut().find(|(k, _)| k == key) {
                            Some((_, UciValue::List(items))) => items.push(value.clone()),
                            _ => section.set(key, UciValue::List(vec![value.clone()])),
                        }
                    }
                }
                other => return Err(err(&format!("unknown keyword `{other}`"))),
            }
        }
        Ok(doc)
    }

    /// Canonical text form: one blank line between sections, tabs before
    /// options, every value single-quoted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            if !out.is_empty() {
                out.push('\n');
            }
            match &section.name {
                Some(name) => {
                    let _ = writeln!(out, "config {} {}", section.kind, quote(name));
                }
                None => {
                    let _ = writeln!(out, "config {}", section.kind);
                }
            }
            for (key, value) in &section.options {
                match value {
                    UciValue::Single(v) => {
                        let _ = writeln!(out, "\toption {key} {}", quote(v));
                    }
                    UciValue::List(items) => {
                        for item in items {
                            let _ = writeln!(out, "\tlist {key} {}", quote(item));
                        }
                    }
                }
            }
        }
        out
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell-like word splitting with single quotes, double quotes, backslash
/// escapes and `#` comments.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '#' if !in_token => break,
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err("unterminated single quote".into()),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c) => current.push(c),
                            None => return Err("dangling escape".into()),
                        },
                        Some(c) => current.push(c),
                        None => return Err("unterminated double quote".into()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => return Err("dangling escape".into()),
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
