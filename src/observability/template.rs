//! Message templates with named placeholders.
//!
//! `"Saved {RecordCount} records"` keeps its text verbatim on every event;
//! positional arguments bind to placeholders in order and travel as fields.
//! `{{` and `}}` escape literal braces; `{Name:format}` binds as `Name`.

use serde_json::Value;

use crate::observability::Properties;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Text(String),
    Hole(&'a str),
}

/// A parsed message template.
#[derive(Debug, Clone)]
pub struct MessageTemplate<'a> {
    tokens: Vec<Token<'a>>,
}

impl<'a> MessageTemplate<'a> {
    /// Parse a template. Malformed holes are kept as literal text.
    pub fn parse(text: &'a str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") || tail.starts_with("}}") {
                literal.push_str(&tail[..1]);
                rest = &tail[2..];
                continue;
            }

            if tail.starts_with('{') {
                if let Some(end) = tail.find('}') {
                    let inner = &tail[1..end];
                    let name = inner.split_once(':').map_or(inner, |(name, _)| name);
                    if is_property_name(name) {
                        if !literal.is_empty() {
                            tokens.push(Token::Text(std::mem::take(&mut literal)));
                        }
                        tokens.push(Token::Hole(name));
                        rest = &tail[end + 1..];
                        continue;
                    }
                }
            }

            literal.push_str(&tail[..1]);
            rest = &tail[1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Text(literal));
        }
        Self { tokens }
    }

    /// Placeholder names in order of appearance (duplicates included).
    pub fn placeholders(&self) -> Vec<&'a str> {
        self.tokens
            .iter()
            .filter_map(|token| match token {
                Token::Hole(name) => Some(*name),
                Token::Text(_) => None,
            })
            .collect()
    }

    /// Bind positional arguments to placeholder names.
    ///
    /// A repeated name binds once, to its first argument. Surplus arguments
    /// are dropped; placeholders without an argument stay unbound.
    pub fn bind(&self, args: &[Value]) -> Properties {
        let mut fields = Properties::new();
        let mut args = args.iter();
        for name in self.placeholders() {
            if fields.contains_key(name) {
                continue;
            }
            match args.next() {
                Some(value) => {
                    fields.insert(name.to_string(), value.clone());
                }
                None => break,
            }
        }
        fields
    }

    /// Render the template against bound fields.
    pub fn render(&self, fields: &Properties) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Hole(name) => match fields.get(*name) {
                    Some(value) => out.push_str(&display_value(value)),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                },
            }
        }
        out
    }
}

/// Render a property value the way it reads in a log line: strings unquoted.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_property_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
