use std::collections::HashSet;
use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::{Agent, AgentContext, AgentResult};
use crate::types::{AgentKind, FinanceSnapshot, Finding, FindingData, NewsItem, Report, Source};

/// Snippet length quoted in the memo body
const MEMO_SNIPPET_CHARS: usize = 160;

/// Synthesizes upstream Findings into the final memo. Makes no external calls.
#[derive(Debug, Default)]
pub struct ReportWriter;

#[async_trait]
impl Agent for ReportWriter {
    fn kind(&self) -> AgentKind {
        AgentKind::ReportWriter
    }

    async fn produce(&self, ctx: &AgentContext, upstream: &[Finding]) -> AgentResult {
        let report = compose_report(&ctx.topic, &ctx.symbol, upstream);
        Ok(Finding {
            agent: AgentKind::ReportWriter,
            summary: format!(
                "Drafted final business memo with {} sources.",
                report.sources.len()
            ),
            data: FindingData::Report(report),
            low_confidence: upstream.iter().any(|f| f.low_confidence),
            tool_calls: Vec::new(),
        })
    }
}

/// Sources from every upstream Finding, deduplicated by URL.
///
/// The first occurrence of a URL wins and upstream order is preserved.
pub fn merge_sources(upstream: &[Finding]) -> Vec<Source> {
    let mut seen = HashSet::new();
    upstream
        .iter()
        .flat_map(Finding::sources)
        .filter(|source| seen.insert(source.url.clone()))
        .collect()
}

pub fn compose_report(topic: &str, symbol: &str, upstream: &[Finding]) -> Report {
    let news: Vec<&NewsItem> = upstream.iter().flat_map(|f| f.news_items()).collect();
    let finance = upstream.iter().find_map(Finding::finance);
    let sources = merge_sources(upstream);
    let degraded = upstream.iter().any(|f| f.low_confidence);

    let mut md = String::new();
    let _ = writeln!(md, "# Market Research Memo: {}", topic);
    md.push('\n');

    md.push_str("## Executive Summary\n");
    let _ = writeln!(
        md,
        "This memo summarizes recent public signals and financial context for **{}**. \
         It draws on {} news items and {}.",
        topic,
        news.len(),
        match finance.and_then(|f| f.price) {
            Some(price) => format!("a last close of {:.2} for `{}`", price, finance_symbol(finance, symbol)),
            None => format!("no price data for `{}`", finance_symbol(finance, symbol)),
        }
    );
    if degraded {
        md.push_str("\n> Some inputs came from offline sample data or were incomplete.\n");
    }
    md.push('\n');

    md.push_str("## Recent News & Product Signals\n");
    if news.is_empty() {
        md.push_str("- No recent news found.\n");
    }
    for item in &news {
        let snippet: String = item.snippet.chars().take(MEMO_SNIPPET_CHARS).collect();
        let _ = write!(md, "- [{}]({})", item.title, item.url);
        if !snippet.is_empty() {
            let _ = write!(md, ": {}", snippet);
        }
        if let Some(date) = &item.published_at {
            let _ = write!(md, " ({})", date);
        }
        md.push('\n');
    }
    md.push('\n');

    md.push_str("## Financial Snapshot\n");
    let _ = writeln!(md, "- Symbol: `{}`", finance_symbol(finance, symbol));
    let _ = writeln!(
        md,
        "- Last Close: {}",
        finance
            .and_then(|f| f.price)
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "n/a".into())
    );
    for (label, key) in [
        ("Market Cap", "market_cap"),
        ("P/E Ratio", "pe_ratio"),
        ("Profit Margin", "profit_margin"),
    ] {
        let _ = writeln!(md, "- {}: {}", label, metric(finance, key));
    }
    if let Some(trend) = finance.and_then(trend) {
        let _ = writeln!(md, "- Trend: {}", trend);
    }
    md.push('\n');

    md.push_str("## Implications\n");
    md.push_str("- Recent product and news momentum can signal investment areas and go-to-market priorities.\n");
    md.push_str("- Financial ratios should be read alongside revenue growth and competitive positioning.\n");
    md.push('\n');

    md.push_str("## Sources\n");
    if sources.is_empty() {
        md.push_str("- None\n");
    }
    for (i, source) in sources.iter().enumerate() {
        let _ = writeln!(md, "{}. {}: {}", i + 1, source.title, source.url);
    }

    Report {
        markdown: md,
        sources,
    }
}

fn finance_symbol<'a>(finance: Option<&'a FinanceSnapshot>, fallback: &'a str) -> &'a str {
    finance.map(|f| f.symbol.as_str()).unwrap_or(fallback)
}

fn metric(finance: Option<&FinanceSnapshot>, key: &str) -> String {
    match finance.and_then(|f| f.metrics.get(key)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v.abs() >= 1.0e9 => format!("{:.2}B", v / 1.0e9),
            Some(v) if v.fract() != 0.0 => format!("{:.2}", v),
            _ => n.to_string(),
        },
        _ => "n/a".into(),
    }
}

fn trend(finance: &FinanceSnapshot) -> Option<String> {
    let first = finance.price_history.first()?;
    let last = finance.price_history.last()?;
    if finance.price_history.len() < 2 || first.close == 0.0 {
        return None;
    }
    let change = (last.close - first.close) / first.close * 100.0;
    Some(format!(
        "{:+.1}% from {} to {}",
        change, first.date, last.date
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PricePoint;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn news(urls: &[(&str, &str)]) -> Finding {
        Finding {
            agent: AgentKind::NewsResearcher,
            summary: String::new(),
            data: FindingData::News {
                query: "q".into(),
                items: urls
                    .iter()
                    .map(|(title, url)| NewsItem {
                        title: title.to_string(),
                        snippet: format!("about {}", title),
                        url: url.to_string(),
                        published_at: None,
                    })
                    .collect(),
            },
            low_confidence: false,
            tool_calls: vec![],
        }
    }

    fn finance() -> Finding {
        let mut metrics = BTreeMap::new();
        metrics.insert("market_cap".to_string(), json!(3.1e12));
        metrics.insert("pe_ratio".to_string(), json!(35.25));
        Finding {
            agent: AgentKind::FinancialAnalyst,
            summary: String::new(),
            data: FindingData::Finance(FinanceSnapshot {
                symbol: "MSFT".into(),
                price: Some(110.0),
                price_history: vec![
                    PricePoint {
                        date: "2024-01-01".into(),
                        close: 100.0,
                    },
                    PricePoint {
                        date: "2024-01-02".into(),
                        close: 110.0,
                    },
                ],
                metrics,
            }),
            low_confidence: false,
            tool_calls: vec![],
        }
    }

    #[test]
    fn test_merge_sources_first_occurrence_wins() {
        let upstream = vec![
            news(&[("A", "https://a"), ("B", "https://b")]),
            news(&[("A again", "https://a"), ("C", "https://c")]),
        ];
        let sources = merge_sources(&upstream);
        let titles: Vec<&str> = sources.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_memo_sections() {
        let report = compose_report(
            "Competitor X",
            "MSFT",
            &[news(&[("A", "https://a"), ("B", "https://b")]), finance()],
        );
        let md = &report.markdown;

        for heading in [
            "# Market Research Memo: Competitor X",
            "## Executive Summary",
            "## Recent News & Product Signals",
            "## Financial Snapshot",
            "## Implications",
            "## Sources",
        ] {
            assert!(md.contains(heading), "missing {}", heading);
        }
        assert!(md.contains("- [A](https://a): about A"));
        assert!(md.contains("- Market Cap: 3100.00B"));
        assert!(md.contains("- P/E Ratio: 35.25"));
        assert!(md.contains("- Profit Margin: n/a"));
        assert!(md.contains("- Trend: +10.0% from 2024-01-01 to 2024-01-02"));
        assert!(md.contains("2. B: https://b"));
        assert_eq!(report.sources.len(), 2);
    }

    #[test]
    fn test_memo_without_inputs() {
        let report = compose_report("Acme", "ACME", &[]);
        assert!(report.markdown.contains("- No recent news found."));
        assert!(report.markdown.contains("- Last Close: n/a"));
        assert!(report.sources.is_empty());
    }
}
