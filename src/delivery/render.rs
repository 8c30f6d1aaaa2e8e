//! Message text for a single ledger event (Telegram HTML subset)

use crate::ledger::types::{format_units, LedgerEvent, DEFAULT_DECIMALS, NATIVE_SYMBOL};

pub fn render_event(address: &str, event: &LedgerEvent) -> String {
    let mut lines = vec![
        "🔔 <b>New transaction</b>".to_string(),
        format!("Address: <code>{}</code>", escape_html(address)),
    ];

    let lt = event
        .order_key
        .map(|k| k.to_string())
        .unwrap_or_else(|| "?".to_string());
    lines.push(format!("LT: {}", lt));
    lines.push(format!("From: <code>{}</code>", party(&event.parties.from)));
    lines.push(format!("To: <code>{}</code>", party(&event.parties.to)));

    for line in &event.lines {
        lines.push(format!(
            "Amount: {} {}",
            line.display_amount(),
            escape_html(&line.asset_symbol)
        ));
    }

    if let Some(fee) = event.fee.filter(|f| *f > 0) {
        lines.push(format!("Fee: {} {}", format_units(fee, DEFAULT_DECIMALS), NATIVE_SYMBOL));
    }
    if let Some(memo) = &event.memo {
        lines.push(format!("Comment: {}", escape_html(memo)));
    }
    if let Some(at) = event.observed_at {
        lines.push(format!("Time: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    lines.push(format!("Hash: <code>{}</code>", escape_html(&event.id)));

    lines.join("\n")
}

fn party(address: &Option<String>) -> String {
    address
        .as_deref()
        .map(escape_html)
        .unwrap_or_else(|| "?".to_string())
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
