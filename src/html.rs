//! Trusted HTML fragments.
//!
//! A plain `&str` only turns into [`Html`] through [`escape`], so anything a
//! user typed is escaped before it can reach a page.

use std::fmt::{self, Write};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Html(String);

impl Html {
    pub fn new() -> Self {
        Self::default()
    }

    /// Markup written by this crate, never user input.
    pub(crate) fn trusted(markup: impl Into<String>) -> Self {
        Self(markup.into())
    }

    pub fn push(&mut self, other: Html) {
        self.0.push_str(&other.0);
    }

    pub(crate) fn push_trusted(&mut self, markup: &str) {
        self.0.push_str(markup);
    }

    pub fn push_text(&mut self, text: &str) {
        escape_into(&mut self.0, text);
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Html {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn escape(text: &str) -> Html {
    let mut out = String::with_capacity(text.len());
    escape_into(&mut out, text);
    Html(out)
}

/// The same escaper askama applies to template values.
fn escape_into(out: &mut String, text: &str) {
    // writing to a String can't fail
    let _ = write!(out, "{}", askama_escape::escape(text, askama_escape::Html));
}

/// Ordered attribute list, escaped when rendered.
#[derive(Debug, Clone, Default)]
pub struct Attrs(Vec<(String, Option<String>)>);

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, Some(value.into()));
        self
    }

    /// A boolean attribute such as `required`.
    pub fn flag(mut self, name: &str) -> Self {
        self.set(name, None);
        self
    }

    pub fn class(self, class: &str) -> Self {
        let joined = match self.get("class") {
            Some(existing) => format!("{existing} {class}"),
            None => class.to_string(),
        };
        self.with("class", joined)
    }

    pub fn required(self) -> Self {
        self.flag("required")
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }

    fn set(&mut self, name: &str, value: Option<String>) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name.into(), value)),
        }
    }

    /// ` name="value" ...`, skipping attribute names the caller reserved.
    pub fn render_except(&self, reserved: &[&str]) -> Html {
        let mut out = Html::new();

        for (name, value) in &self.0 {
            if reserved.contains(&name.as_str()) || !is_attr_name(name) {
                continue;
            }
            out.push_trusted(" ");
            out.push_trusted(name);
            if let Some(value) = value {
                out.push_trusted("=\"");
                out.push_text(value);
                out.push_trusted("\"");
            }
        }

        out
    }

    pub fn render(&self) -> Html {
        self.render_except(&[])
    }
}

fn is_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

/// A JavaScript string literal, safe inside an inline `<script>`.
pub fn js_string(value: &str) -> String {
    // serializing a &str can't fail
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".into())
        .replace("</", "<\\/")
        .replace("<!--", "<\\!--")
}

pub fn script(body: &str) -> Html {
    Html::trusted(format!("<script>{body}</script>"))
}

/// Turn a field name into something usable as an element id.
pub fn field_id(name: &str) -> String {
    let id: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    format!("field-{id}")
}
