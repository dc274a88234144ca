//! Receipt assembly.
//!
//! Translates a posted document into the submission contract the
//! device accepts. The rules mirror what the authority enforces:
//! positive quantities only, a harmonised-system code on every line,
//! one tax inclusion mode per receipt, credit notes with negated
//! amounts, and buyer identification only when it is complete.

use rust_decimal::Decimal;

use fiskus_types::{
    BuyerData, Document, DocumentKind, FiscalReceipt, PaymentMethod, ReceiptLine, ReceiptLineKind,
    ReceiptPayment,
};

use crate::error::AssemblyError;

/// Longest line name the device accepts.
const MAX_LINE_NAME: usize = 100;

fn truncate_name(name: &str) -> String {
    name.chars().take(MAX_LINE_NAME).collect()
}

fn buyer_data(document: &Document) -> Option<BuyerData> {
    match (document.customer_vat(), document.customer_tin()) {
        (Some(vat), Some(tin)) => {
            let counterparty = &document.counterparty;
            Some(BuyerData {
                register_name: counterparty.name.clone(),
                trade_name: counterparty
                    .trade_name
                    .clone()
                    .unwrap_or_else(|| counterparty.name.clone()),
                vat_number: vat.to_string(),
                tin: tin.to_string(),
                phone: counterparty.phone.clone(),
                email: counterparty.email.clone(),
                address: counterparty.address.clone(),
            })
        }
        _ => None,
    }
}

/// Assemble the receipt for one document.
///
/// Lines with non-positive quantities are dropped. A line discount
/// becomes its own negative line right after the sale line, under the
/// same HS code and tax rate, so the device books the reduction
/// against the same classification.
pub fn assemble_receipt(document: &Document) -> Result<FiscalReceipt, AssemblyError> {
    let sign = match document.kind {
        DocumentKind::CreditNote => Decimal::NEGATIVE_ONE,
        _ => Decimal::ONE,
    };

    let mut inclusive: Option<bool> = None;
    let mut lines = Vec::new();
    let mut number = 0u32;

    for line in &document.lines {
        if line.quantity <= Decimal::ZERO {
            continue;
        }
        let hs_code = line
            .hs_code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AssemblyError::MissingHsCode {
                line: line.name.clone(),
            })?
            .to_string();

        if let Some(tax) = line.tax {
            match inclusive {
                None => inclusive = Some(tax.price_inclusive),
                Some(mode) if mode != tax.price_inclusive => {
                    return Err(AssemblyError::MixedTaxInclusion);
                }
                Some(_) => {}
            }
        }
        let tax_percent = line.tax.map(|tax| tax.percent);

        let name = truncate_name(&line.name);
        let gross = line.unit_price * line.quantity;
        number += 1;
        lines.push(ReceiptLine {
            kind: ReceiptLineKind::Sale,
            number,
            hs_code: hs_code.clone(),
            name: name.clone(),
            unit_price: sign * line.unit_price,
            quantity: line.quantity,
            total: sign * gross,
            tax_percent,
        });

        if line.discount_percent > Decimal::ZERO {
            let amount = gross * line.discount_percent / Decimal::ONE_HUNDRED;
            number += 1;
            lines.push(ReceiptLine {
                kind: ReceiptLineKind::Discount,
                number,
                hs_code,
                name: truncate_name(&format!("{name} (Discount)")),
                unit_price: -sign * amount,
                quantity: Decimal::ONE,
                total: -sign * amount,
                tax_percent,
            });
        }
    }

    if lines.is_empty() {
        return Err(AssemblyError::EmptyReceipt);
    }

    let total = sign * document.total;
    Ok(FiscalReceipt {
        kind: document.kind.into(),
        currency: document.currency.clone(),
        invoice_number: document.number.clone(),
        buyer: buyer_data(document),
        notes: document.reference.clone(),
        credit_debit_reference: match document.kind {
            DocumentKind::Invoice => None,
            _ => document.reversed_number.clone(),
        },
        lines_tax_inclusive: inclusive.unwrap_or(true),
        lines,
        // The whole amount settles as a single cash payment.
        payments: vec![ReceiptPayment {
            method: PaymentMethod::Cash,
            amount: total,
        }],
        total,
    })
}
