//! Plain-text renderings of a user's collected documents.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};

use fleet_core::domain::artifact::{amount_label, DocumentExtraction, StoredArtifact, TOTALLED_AMOUNTS};

pub const EMPTY_SUMMARY: &str = "No documents collected yet.";
const RULE_WIDTH: usize = 40;

pub fn render_summary(artifacts: &[StoredArtifact]) -> String {
    if artifacts.is_empty() {
        return EMPTY_SUMMARY.to_owned();
    }

    let rule = "=".repeat(RULE_WIDTH);
    let mut totals: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut out = format!("TAX DOCUMENT SUMMARY\n{rule}\n\n");

    for artifact in artifacts {
        let extraction = &artifact.extraction;
        let payer = extraction.payer_name.as_deref().unwrap_or("Unknown");
        out.push_str(&format!("{} - {payer}\n", extraction.doc_type));
        for (key, value) in extraction.positive_amounts() {
            out.push_str(&format!("   {}: {}\n", amount_label(key), format_money(value)));
            if let Some(total_key) = TOTALLED_AMOUNTS.iter().find(|total| **total == key) {
                *totals.entry(*total_key).or_default() += value;
            }
        }
        out.push('\n');
    }

    out.push_str(&format!("{rule}\nTOTALS:\n"));
    for key in TOTALLED_AMOUNTS {
        if let Some(total) = totals.get(key).filter(|total| **total > Decimal::ZERO) {
            out.push_str(&format!("   {}: {}\n", amount_label(key), format_money(*total)));
        }
    }
    out
}

/// Reply sent after a photo has been read.
pub fn render_extraction_reply(extraction: &DocumentExtraction, collected: u64) -> String {
    let mut out = format!("📄 {}", extraction.doc_type);
    if let Some(payer) = extraction.payer_name.as_deref() {
        out.push_str(&format!(" from {payer}"));
    }
    out.push_str("\n\n");
    for (key, value) in extraction.positive_amounts() {
        out.push_str(&format!("• {}: {}\n", amount_label(key), format_money(value)));
    }
    out.push_str(&format!("\n✅ {collected} doc(s) collected."));
    out
}

/// `1234567.5` -> `$1,234,567.50`.
pub fn format_money(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{sign}${grouped}.{cents}")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use fleet_core::domain::artifact::{ArtifactId, ArtifactKind, DocumentExtraction, StoredArtifact};
    use fleet_core::domain::tenant::{TenantId, UserId};

    use super::{format_money, render_extraction_reply, render_summary, EMPTY_SUMMARY};

    fn amount(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("decimal")
    }

    fn artifact(doc_type: &str, payer: &str, amounts: &[(&str, &str)]) -> StoredArtifact {
        StoredArtifact {
            id: ArtifactId(format!("a-{doc_type}-{payer}")),
            tenant_id: TenantId("t-1".to_owned()),
            user_id: UserId("u-1".to_owned()),
            external_handle: "handle".to_owned(),
            display_name: None,
            kind: ArtifactKind::Photo,
            size: None,
            secondary_ref: None,
            extraction: DocumentExtraction {
                doc_type: doc_type.to_owned(),
                payer_name: Some(payer.to_owned()),
                amounts: amounts
                    .iter()
                    .map(|(key, value)| ((*key).to_owned(), amount(value)))
                    .collect::<BTreeMap<_, _>>(),
                ..DocumentExtraction::default()
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn money_is_grouped_with_two_decimals() {
        assert_eq!(format_money(amount("1234567.5")), "$1,234,567.50");
        assert_eq!(format_money(amount("999")), "$999.00");
        assert_eq!(format_money(amount("0.005")), "$0.01");
        assert_eq!(format_money(amount("-1200")), "-$1,200.00");
    }

    #[test]
    fn empty_summary_has_a_fixed_message() {
        assert_eq!(render_summary(&[]), EMPTY_SUMMARY);
    }

    #[test]
    fn summary_totals_tracked_amounts_across_documents() {
        let summary = render_summary(&[
            artifact("W-2", "Acme", &[("wages", "50000"), ("federal_withheld", "6000")]),
            artifact("W-2", "Globex", &[("wages", "25000.25"), ("state_withheld", "0")]),
            artifact("1099-INT", "Bank", &[("interest_income", "120.10"), ("bonus", "10")]),
        ]);

        assert!(summary.starts_with("TAX DOCUMENT SUMMARY\n"));
        assert!(summary.contains("W-2 - Acme\n   Federal Withheld: $6,000.00\n   Wages: $50,000.00\n"));
        assert!(summary.contains("   Bonus: $10.00\n"));
        let totals = summary.split("TOTALS:\n").nth(1).expect("totals section");
        assert_eq!(
            totals,
            "   Wages: $75,000.25\n   Federal Withheld: $6,000.00\n   Interest Income: $120.10\n"
        );
    }

    #[test]
    fn extraction_reply_lists_positive_amounts_and_count() {
        let extraction = artifact("W-2", "Acme", &[("wages", "1500"), ("state_withheld", "0")]).extraction;
        let reply = render_extraction_reply(&extraction, 3);

        assert!(reply.starts_with("📄 W-2 from Acme\n\n"));
        assert!(reply.contains("• Wages: $1,500.00\n"));
        assert!(!reply.contains("State Withheld"));
        assert!(reply.ends_with("✅ 3 doc(s) collected."));
    }
}
