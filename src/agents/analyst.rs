use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{Agent, AgentContext, AgentError, AgentResult};
use crate::tools::ToolRequest;
use crate::types::{AgentKind, FinanceSnapshot, Finding, FindingData, PricePoint};

/// Pulls a price series and headline metrics for the planned symbol.
#[derive(Debug, Default)]
pub struct FinancialAnalyst;

#[async_trait]
impl Agent for FinancialAnalyst {
    fn kind(&self) -> AgentKind {
        AgentKind::FinancialAnalyst
    }

    async fn produce(&self, ctx: &AgentContext, _upstream: &[Finding]) -> AgentResult {
        let request = ToolRequest::finance(&ctx.symbol);
        let (outcome, record) = ctx.gateway.invoke(&request, &ctx.cancel).await;
        let payload = match outcome {
            Ok(payload) => payload,
            Err(error) => {
                return Err(AgentError {
                    error,
                    tool_calls: vec![record],
                });
            }
        };

        let snapshot = normalize_finance(&payload, &request.query);
        let mock = payload.get("mock").and_then(Value::as_bool).unwrap_or(false);
        let partial = snapshot.price.is_none() && snapshot.price_history.is_empty();

        let summary = match snapshot.price {
            Some(price) => format!(
                "{} last close {:.2} across {} sessions.",
                snapshot.symbol,
                price,
                snapshot.price_history.len()
            ),
            None => format!("No price data for {}.", snapshot.symbol),
        };

        Ok(Finding {
            agent: AgentKind::FinancialAnalyst,
            summary,
            data: FindingData::Finance(snapshot),
            low_confidence: mock || partial,
            tool_calls: vec![record],
        })
    }
}

/// Normalize a finance payload; history is sorted by date ascending.
pub fn normalize_finance(payload: &Value, requested_symbol: &str) -> FinanceSnapshot {
    let symbol = payload
        .get("symbol")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(requested_symbol)
        .to_uppercase();

    let mut price_history: Vec<PricePoint> = payload
        .get("history")
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .filter_map(|p| {
                    Some(PricePoint {
                        date: p.get("date")?.as_str()?.to_string(),
                        close: p.get("close")?.as_f64()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    price_history.sort_by(|a, b| a.date.cmp(&b.date));

    let price = payload
        .get("price")
        .and_then(Value::as_f64)
        .or_else(|| price_history.last().map(|p| p.close));

    let metrics: BTreeMap<String, Value> = payload
        .get("metrics")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    FinanceSnapshot {
        symbol,
        price,
        price_history,
        metrics,
    }
}
