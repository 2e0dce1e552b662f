//! Market data providers
//!
//! [`AlphaVantageFinance`] combines the Alpha Vantage `OVERVIEW` and
//! `TIME_SERIES_DAILY` endpoints. [`MockFinance`] derives a stable price
//! series from the symbol so offline runs are reproducible.
//!
//! Payload shape:
//!
//! ```json
//! { "symbol": "MSFT", "price": 412.5, "history": [ { "date", "close" } ],
//!   "metrics": { ... }, "mock": false }
//! ```

use crate::tools::registry::{ProviderError, ToolProvider, ToolRequest};
use crate::types::ProviderKind;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Trading days kept from the daily series
pub const HISTORY_DAYS: usize = 30;

/// Overview fields surfaced as metrics, keyed by our metric name.
const OVERVIEW_FIELDS: &[(&str, &str)] = &[
    ("name", "Name"),
    ("sector", "Sector"),
    ("industry", "Industry"),
    ("currency", "Currency"),
    ("market_cap", "MarketCapitalization"),
    ("pe_ratio", "PERatio"),
    ("profit_margin", "ProfitMargin"),
    ("eps", "EPS"),
    ("week_52_high", "52WeekHigh"),
    ("week_52_low", "52WeekLow"),
];

pub struct AlphaVantageFinance {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AlphaVantageFinance {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn fetch(&self, function: &str, symbol: &str) -> Result<Map<String, Value>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[
                ("function", function),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let Value::Object(body) = body else {
            return Err(ProviderError::InvalidResponse("expected a JSON object".into()));
        };
        check_body(body)
    }
}

/// Alpha Vantage reports most failures with HTTP 200 and a marker key.
fn check_body(body: Map<String, Value>) -> Result<Map<String, Value>, ProviderError> {
    for key in ["Note", "Information"] {
        if let Some(message) = body.get(key).and_then(Value::as_str) {
            return Err(ProviderError::RateLimited(message.to_string()));
        }
    }
    if let Some(message) = body.get("Error Message").and_then(Value::as_str) {
        return Err(ProviderError::NotFound(message.to_string()));
    }
    Ok(body)
}

fn parse_history(series: &Map<String, Value>) -> Vec<Value> {
    // ISO dates sort chronologically as strings
    let ordered: BTreeMap<&String, f64> = series
        .iter()
        .filter_map(|(date, bar)| {
            bar.get("4. close")
                .and_then(Value::as_str)
                .and_then(|close| close.parse::<f64>().ok())
                .map(|close| (date, close))
        })
        .collect();

    let skip = ordered.len().saturating_sub(HISTORY_DAYS);
    ordered
        .into_iter()
        .skip(skip)
        .map(|(date, close)| json!({"date": date, "close": close}))
        .collect()
}

fn parse_metrics(overview: &Map<String, Value>) -> Map<String, Value> {
    OVERVIEW_FIELDS
        .iter()
        .filter_map(|(name, field)| {
            let raw = overview.get(*field)?.as_str()?;
            if raw.is_empty() || raw == "None" || raw == "-" {
                return None;
            }
            let value = raw
                .parse::<f64>()
                .ok()
                .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
                .unwrap_or_else(|| Value::String(raw.to_string()));
            Some((name.to_string(), value))
        })
        .collect()
}

#[async_trait]
impl ToolProvider for AlphaVantageFinance {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Finance
    }

    fn backend(&self) -> &'static str {
        "alphavantage"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        let symbol = request.query.as_str();

        let overview = self.fetch("OVERVIEW", symbol).await?;
        if overview.is_empty() {
            return Err(ProviderError::NotFound(format!("unknown symbol {}", symbol)));
        }

        let daily = self.fetch("TIME_SERIES_DAILY", symbol).await?;
        let history = daily
            .get("Time Series (Daily)")
            .and_then(Value::as_object)
            .map(parse_history)
            .unwrap_or_default();
        let price = history.last().and_then(|p| p.get("close")).cloned();

        Ok(json!({
            "symbol": symbol,
            "price": price,
            "history": history,
            "metrics": parse_metrics(&overview),
            "mock": false,
        }))
    }
}

/// Deterministic offline market data backend.
#[derive(Debug, Default)]
pub struct MockFinance;

impl MockFinance {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolProvider for MockFinance {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Finance
    }

    fn backend(&self) -> &'static str {
        "mock"
    }

    async fn call(&self, request: &ToolRequest) -> Result<Value, ProviderError> {
        let symbol = request.query.as_str();
        if symbol.is_empty() {
            return Err(ProviderError::Malformed("empty symbol".into()));
        }

        let seed: u32 = symbol.bytes().map(u32::from).sum();
        let base = 50.0 + f64::from(seed % 400);
        let step = f64::from(seed % 7) * 0.25 - 0.75;

        let history: Vec<Value> = (0..10u32)
            .map(|day| {
                let close = ((base + step * f64::from(day)) * 100.0).round() / 100.0;
                json!({"date": format!("2024-01-{:02}", day + 2), "close": close})
            })
            .collect();
        let price = history.last().and_then(|p| p.get("close")).cloned();

        Ok(json!({
            "symbol": symbol,
            "price": price,
            "history": history,
            "metrics": {
                "name": format!("{} (sample data)", symbol),
                "market_cap": f64::from(seed) * 1.0e9,
                "pe_ratio": f64::from(10 + seed % 30),
                "profit_margin": f64::from(seed % 40) / 100.0,
            },
            "mock": true,
        }))
    }
}
