//! Item price lookup through an external quote command.
//!
//! The command receives the item name as its last argument and prints
//! either `{"price_usd": "12.34"}` or, like the legacy scraper, text with a
//! `$12.34` amount somewhere in it.

use super::command::{CommandError, run_command};
use crate::config::runtime::CommandSettings;
use rust_decimal::Decimal;
use serde::Deserialize;
use skinvault_core::ports::OracleError;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct QuoteOutput {
    #[serde(default)]
    price_usd: Option<Decimal>,
    #[serde(default)]
    error: Option<String>,
}

pub struct CommandPriceQuoter {
    settings: CommandSettings,
}

impl CommandPriceQuoter {
    pub fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }

    pub async fn quote(&self, item_name: &str) -> Result<Decimal, OracleError> {
        let output = run_command(&self.settings, &[item_name])
            .await
            .map_err(|e: CommandError| OracleError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(OracleError::Unavailable(format!(
                "quote command exited with {}: {}",
                output.status,
                output.stderr.trim()
            )));
        }

        let price = parse_quote_output(item_name, &output.stdout)?;
        debug!(item = item_name, %price, "Quoted item");
        Ok(price)
    }
}

/// Parse quote output.
///
/// A line holding a JSON object wins. Otherwise the first `$`-prefixed
/// amount anywhere in the output is taken, so diagnostic lines and tuple
/// output like `('$12.34', 'Skinport', '$12.30')` still price. A bare number
/// on the first non-empty line is accepted last.
pub fn parse_quote_output(item_name: &str, stdout: &str) -> Result<Decimal, OracleError> {
    let first_line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| OracleError::Parse("empty output".into()))?;

    let json_line = stdout.lines().map(str::trim).find(|l| l.starts_with('{'));
    let price = if let Some(line) = json_line {
        let parsed: QuoteOutput =
            serde_json::from_str(line).map_err(|e| OracleError::Parse(e.to_string()))?;
        match (parsed.price_usd, parsed.error) {
            (Some(price), _) => price,
            (None, Some(error)) => return Err(OracleError::Unavailable(error)),
            (None, None) => return Err(OracleError::NotFound(item_name.to_owned())),
        }
    } else if let Some(price) = find_dollar_amount(stdout) {
        price
    } else {
        let cleaned: String = first_line.chars().filter(|c| *c != ',').collect();
        Decimal::from_str(cleaned.trim()).map_err(|_| OracleError::Parse(first_line.to_owned()))?
    };

    if price <= Decimal::ZERO {
        return Err(OracleError::NotFound(item_name.to_owned()));
    }
    Ok(price)
}

/// First `$<digits>[,digits][.digits]` in `text`.
fn find_dollar_amount(text: &str) -> Option<Decimal> {
    text.match_indices('$').find_map(|(at, _)| {
        let rest = &text[at + 1..];
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == ',' || c == '.'))
            .unwrap_or(rest.len());
        let raw = rest[..end].trim_end_matches(['.', ',']);
        if !raw.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
        Decimal::from_str(&cleaned).ok()
    })
}
