//! Extraction of the B2C `SETTINGS` values embedded in the authorize page

use crate::error::{OceaError, Result};
use regex::Regex;

/// Values the login flow needs from the authorize page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSettings {
    /// Transaction id, `StateProperties=...`
    pub trans_id: String,
    pub page_view_id: String,
    pub csrf: String,
}

/// Pulls [`PageSettings`] out of an authorize page body.
///
/// One implementation per known portal page layout.
pub trait PageSettingsExtractor: Send + Sync {
    fn extract(&self, page: &str) -> Result<PageSettings>;
}

/// Extractor for the current Azure B2C self-asserted page, which inlines
/// `var SETTINGS = {...}` in a script tag.
#[derive(Debug, Clone)]
pub struct B2cSettingsExtractor {
    trans_id: Regex,
    page_view_id: Regex,
    csrf: Regex,
}

impl B2cSettingsExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            trans_id: compile(r#""transId":"(StateProperties=[a-zA-Z0-9]+)""#)?,
            page_view_id: compile(r#""pageViewId":"([a-f0-9-]+)""#)?,
            csrf: compile(r#""csrf":"([a-zA-Z0-9=_-]+)""#)?,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| OceaError::config(format!("invalid settings pattern: {e}")))
}

fn capture(re: &Regex, page: &str, field: &str) -> Result<String> {
    re.captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| OceaError::settings_not_found(field))
}

impl PageSettingsExtractor for B2cSettingsExtractor {
    fn extract(&self, page: &str) -> Result<PageSettings> {
        Ok(PageSettings {
            trans_id: capture(&self.trans_id, page, "transId")?,
            page_view_id: capture(&self.page_view_id, page, "pageViewId")?,
            csrf: capture(&self.csrf, page, "csrf")?,
        })
    }
}
