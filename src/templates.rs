//! Gateway pages, compiled into the binary and laid out once at startup.

use std::collections::HashMap;
use thiserror::Error;

pub const LOGIN_TEMPLATE: &str = "login";
pub const INFO_TEMPLATE: &str = "info";

const BASE_HTML: &str = include_str!("templates/base.html");
const LOGIN_HTML: &str = include_str!("templates/login.html");
const INFO_HTML: &str = include_str!("templates/info.html");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unknown template name: {0}")]
    UnknownTemplate(String),
}

pub struct Templates {
    pages: HashMap<&'static str, String>,
}

impl Templates {
    pub fn load() -> Self {
        let pages = [
            (LOGIN_TEMPLATE, "Sign in", LOGIN_HTML),
            (INFO_TEMPLATE, "Signed in", INFO_HTML),
        ]
        .into_iter()
        .map(|(name, title, content)| {
            let page = BASE_HTML
                .replace("{{title}}", title)
                .replace("{{content}}", content.trim_end());
            (name, page)
        })
        .collect();

        Self { pages }
    }

    /// Renders `name`, replacing each `{{key}}` with its HTML-escaped value.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
        let page = self
            .pages
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;

        let mut rendered = page.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), &escape_html(value));
        }
        Ok(rendered)
    }
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
