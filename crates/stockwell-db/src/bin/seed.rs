//! # Seed Data Generator
//!
//! Populates a database with a small clinic catalog and walks one sale
//! through payment and a partial refund.
//!
//! ## Usage
//! ```bash
//! # Use stockwell.toml from the platform config directory
//! cargo run -p stockwell-db --bin seed
//!
//! # Explicit config file
//! cargo run -p stockwell-db --bin seed -- --config ./stockwell.toml
//!
//! # Override the database path
//! cargo run -p stockwell-db --bin seed -- --db ./data/stockwell.db
//! ```
//!
//! ## Generated Data
//! - Stock-tracked consumables, each with two or three expiring batches
//! - One service product (not stock-tracked)
//! - One sale, paid, then refunded in part under an idempotency key

use chrono::{Duration, NaiveDate, Utc};
use std::env;
use std::path::PathBuf;
use stockwell_core::{Money, NewBatch, NewProduct, NewSale, NewSaleLine, RefundLineRequest};
use stockwell_db::{init_tracing, Database, StockEngine, StockwellConfig};

/// (sku, name, unit, batches as (lot, days to expiry, units))
const CATALOG: &[(&str, &str, &str, &[(&str, i64, i64)])] = &[
    ("AMOX-500", "Amoxicillin 500mg", "capsule", &[("AX-2401", 30, 40), ("AX-2407", 210, 120)]),
    ("IBU-400", "Ibuprofen 400mg", "tablet", &[("IB-2312", 14, 25), ("IB-2405", 180, 200)]),
    ("SAL-0.9-500", "Saline 0.9% 500ml", "bag", &[("SL-88", 365, 60)]),
    (
        "GAUZE-10",
        "Sterile gauze 10x10",
        "pack",
        &[("GZ-01", 90, 10), ("GZ-02", 400, 50), ("GZ-03", 700, 50)],
    ),
];

const SERVICE_SKU: &str = "CONSULT-STD";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockwell Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Config file (default: platform config dir)");
                println!("  -d, --db <PATH>      Database file path (overrides config)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = StockwellConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }
    init_tracing(&config.logging.filter);

    println!("Stockwell Seed Data Generator");
    println!("=============================");
    println!("Database:       {}", config.database.path.display());
    println!("Restock policy: {}", config.stock.restock_policy);
    println!();

    let engine = StockEngine::from_config(&config).await?;
    let db = engine.database().clone();

    if db.products().count().await? > 0 {
        println!("Database already has products; skipping seed.");
        println!("Delete the database file to regenerate.");
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let mut first_product = None;

    for (sku, name, unit, batches) in CATALOG {
        let product = db
            .products()
            .create(&NewProduct {
                sku: sku.to_string(),
                name: name.to_string(),
                unit: unit.to_string(),
                track_stock: true,
            })
            .await?;

        for (lot, days, units) in batches.iter() {
            let batch = engine
                .create_batch(&NewBatch {
                    product_id: product.id.clone(),
                    lot_code: lot.to_string(),
                    expiry_date: Some(expiry(today, *days)),
                })
                .await?;
            engine.receive(&batch.id, *units, &format!("PO-{lot}")).await?;
        }

        println!("  {:<12} {:>5} on hand", sku, db.batches().product_on_hand(&product.id).await?);
        first_product.get_or_insert(product);
    }

    let service = db
        .products()
        .create(&NewProduct {
            sku: SERVICE_SKU.to_string(),
            name: "Standard consultation".to_string(),
            unit: "visit".to_string(),
            track_stock: false,
        })
        .await?;

    let Some(amox) = first_product else {
        return Ok(());
    };

    println!();
    println!("Demo sale");

    let detail = db
        .sales()
        .create_draft(&NewSale {
            legal_entity: "Clinic North".to_string(),
            currency: "EUR".to_string(),
            lines: vec![
                NewSaleLine {
                    product_id: amox.id.clone(),
                    quantity: 50,
                    unit_price: Money::from_cents(35),
                    discount: Money::zero(),
                },
                NewSaleLine {
                    product_id: service.id.clone(),
                    quantity: 1,
                    unit_price: Money::from_cents(4500),
                    discount: Money::from_cents(500),
                },
            ],
        })
        .await?;

    let paid = engine.mark_paid(&detail.sale.id).await?;
    println!("  {} paid, total {} {}", paid.id, paid.total(), paid.currency);

    for batch in db.batches().list_for_product(&amox.id).await? {
        println!("    {:<8} {:>4}", batch.batch.lot_code, batch.on_hand);
    }

    let refund_line = RefundLineRequest::new(&detail.lines[0].id, 10);
    let receipt = engine
        .refund(&detail.sale.id, std::slice::from_ref(&refund_line), Some("seed-refund-1"))
        .await?;
    println!("  refund {} for {}", receipt.refund.id, receipt.refund.total_refunded());

    let retry = engine
        .refund(&detail.sale.id, std::slice::from_ref(&refund_line), Some("seed-refund-1"))
        .await?;
    println!("  retry replayed: {}", retry.replayed);

    for line in db.refunds().refundable_quantities(&detail.sale.id).await? {
        println!(
            "    line {} sold {} refunded {} remaining {}",
            line.sale_line_id,
            line.sold,
            line.refunded,
            line.remaining()
        );
    }

    println!();
    println!("{:<12} {:>8} {:>6} {:>8} {:>7}", "SKU", "received", "sold", "refunded", "on hand");
    for product in db.products().list().await? {
        if !product.track_stock {
            continue;
        }
        let s = db.ledger().product_summary(&product.id).await?;
        println!(
            "{:<12} {:>8} {:>6} {:>8} {:>7}",
            product.sku, s.received, s.sold, s.refunded, s.on_hand
        );
    }

    let violations = db.ledger().audit_all().await?;
    println!();
    if violations.is_empty() {
        println!("Ledger audit: clean");
    } else {
        println!("Ledger audit: {} violation(s)", violations.len());
        for v in violations {
            println!("  {v}");
        }
    }
    println!("Outbox pending: {}", db.outbox().count_pending().await?);

    db.close().await;
    Ok(())
}

fn expiry(today: NaiveDate, days: i64) -> NaiveDate {
    today + Duration::days(days)
}
