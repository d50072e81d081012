//! Native coin / USD rate over HTTP.
//!
//! Expects the CoinGecko `simple/price` shape: `{"ethereum": {"usd": 3521.4}}`.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use skinvault_core::ports::OracleError;
use std::str::FromStr;
use url::Url;

pub struct HttpRateFeed {
    client: reqwest::Client,
    url: Url,
}

impl HttpRateFeed {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }

    pub async fn fetch(&self) -> Result<Decimal, OracleError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!(
                "rate feed answered {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;
        parse_rate(&body)
    }
}

/// Pull the USD rate out of a `{coin: {"usd": n}}` document.
pub fn parse_rate(body: &serde_json::Value) -> Result<Decimal, OracleError> {
    let usd = body
        .as_object()
        .and_then(|coins| coins.values().find_map(|quote| quote.get("usd")))
        .ok_or_else(|| OracleError::Parse(format!("no usd rate in {body}")))?;

    let rate = match usd {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    };
    rate.ok_or_else(|| OracleError::Parse(format!("unreadable usd rate {usd}")))
}
