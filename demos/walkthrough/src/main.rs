//! Walks one document through the whole fiscal lifecycle: draft,
//! posted, fiscalised, plus a failed submission that stays retryable.
//! Runs entirely in memory against the simulated device.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;

use fiskus_device::{DeviceRegistry, NewDevice, SimulatedDevice};
use fiskus_gate::{FiscalGate, FiscaliseCommand, SurfaceView};
use fiskus_store::memory::InMemoryFiskusStore;
use fiskus_store::{
    verify_journal, DeviceStore, DocumentStore, JournalFilter, JournalStore, QueryWindow,
};
use fiskus_types::{
    CompanyId, Counterparty, Document, DocumentId, DocumentKind, DocumentLine, DocumentState,
    FiscalFields, LineTax,
};

fn invoice(company: &CompanyId, number: &str) -> Document {
    Document {
        id: DocumentId::new(),
        company_id: company.clone(),
        number: number.to_string(),
        kind: DocumentKind::Invoice,
        state: DocumentState::Draft,
        currency: "USD".to_string(),
        counterparty: Counterparty {
            name: "Kudzanai Hardware Ltd".to_string(),
            trade_name: None,
            vat: Some("220001234".to_string()),
            tin: Some("1000012345".to_string()),
            email: None,
            phone: None,
            address: None,
        },
        reference: None,
        reversed_number: None,
        lines: vec![
            DocumentLine {
                name: "Galvanised roofing sheet 3m".to_string(),
                hs_code: Some("7308".to_string()),
                quantity: dec!(10),
                unit_price: dec!(12.50),
                discount_percent: dec!(0),
                tax: Some(LineTax {
                    percent: dec!(15),
                    price_inclusive: true,
                }),
            },
            DocumentLine {
                name: "Fixing screws, box".to_string(),
                hs_code: Some("7318".to_string()),
                quantity: dec!(2),
                unit_price: dec!(4.75),
                discount_percent: dec!(10),
                tax: Some(LineTax {
                    percent: dec!(15),
                    price_inclusive: true,
                }),
            },
        ],
        total: dec!(133.55),
        fiscalised: false,
        fiscal: FiscalFields::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn describe(view: &SurfaceView) -> String {
    let panel = match &view.fiscal_panel {
        Some(fields) => format!(
            "panel[serial={} receipt=#{} day={}]",
            fields.device_serial.as_deref().unwrap_or("-"),
            fields.receipt_global_number.unwrap_or(0),
            fields.fiscal_day_no.unwrap_or(0),
        ),
        None => "panel hidden".to_string(),
    };
    let action = if view.fiscalise_action {
        "action visible"
    } else {
        "action hidden"
    };
    format!("status={:?}, {action}, {panel}", view.status)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let store = Arc::new(InMemoryFiskusStore::new());
    let link = Arc::new(SimulatedDevice::new());
    let registry = DeviceRegistry::new(store.clone(), store.clone(), link.clone());
    let gate = FiscalGate::new(store.clone(), store.clone(), store.clone(), link);

    println!("== device setup ==");
    let company = CompanyId::new();
    let device = registry
        .register(NewDevice {
            company_id: company.clone(),
            label: "Front till".to_string(),
            device_no: 1,
            serial: "DEV-01".to_string(),
            activation_key: "4421-8800".to_string(),
        })
        .await?;
    let opened = registry.open_day(&device.id).await?;
    println!(
        "registered {} and opened fiscal day {}",
        device.serial, opened.fiscal_day_no
    );

    println!("\n== draft document ==");
    let document = invoice(&company, "INV-2026-0001");
    store.put_document(document.clone()).await?;
    let view = gate.surface(&document.id).await?;
    println!("form renders: {}", describe(&view));

    println!("\n== posting ==");
    store
        .transition_state(&document.id, DocumentState::Draft, DocumentState::Posted)
        .await?;
    let view = gate.surface(&document.id).await?;
    println!("form renders: {}", describe(&view));

    println!("\n== fiscalising ==");
    let outcome = gate
        .fiscalise(FiscaliseCommand {
            document_id: document.id.clone(),
        })
        .await?;
    println!(
        "device confirmed receipt #{} (verification {})",
        outcome.confirmation.receipt_global_number, outcome.confirmation.verification_code
    );
    let view = gate.surface(&document.id).await?;
    println!("form renders: {}", describe(&view));

    println!("\n== invoking again ==");
    match gate
        .fiscalise(FiscaliseCommand {
            document_id: document.id.clone(),
        })
        .await
    {
        Err(e) => println!("refused as expected: {e}"),
        Ok(_) => anyhow::bail!("a second fiscalisation must not succeed"),
    }

    println!("\n== failure stays retryable ==");
    let second = invoice(&company, "INV-2026-0002");
    let mut posted = second.clone();
    posted.state = DocumentState::Posted;
    store.put_document(posted).await?;

    registry.close_day(&device.id).await?;
    match gate
        .fiscalise(FiscaliseCommand {
            document_id: second.id.clone(),
        })
        .await
    {
        Err(e) => println!("attempt with a closed day failed: {e}"),
        Ok(_) => anyhow::bail!("submission against a closed day must fail"),
    }
    let view = gate.surface(&second.id).await?;
    println!("after the failure the form still renders: {}", describe(&view));

    registry.open_day(&device.id).await?;
    let retried = gate
        .fiscalise(FiscaliseCommand {
            document_id: second.id.clone(),
        })
        .await?;
    println!(
        "retry succeeded with receipt #{}",
        retried.confirmation.receipt_global_number
    );

    println!("\n== journal ==");
    let mut records = store
        .list_entries(JournalFilter::default(), QueryWindow::default())
        .await?;
    records.reverse();
    println!(
        "{} entries, hash chain intact: {}",
        records.len(),
        verify_journal(&records)
    );
    for record in &records {
        println!(
            "  #{} {:?} {} - {}",
            record.sequence,
            record.stage,
            if record.success { "ok" } else { "failed" },
            record.detail
        );
    }

    let stored = store.device(&device.id).await?;
    if let Some(stored) = stored {
        println!(
            "\ndevice {} now at receipt #{}, fiscal day {:?}",
            stored.serial, stored.last_receipt_global_number, stored.fiscal_day_no
        );
    }

    Ok(())
}
