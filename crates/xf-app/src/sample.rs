//! Create a sample SQLite database for trying the widget

use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use rusqlite::{Connection, Result};
use tracing::info;

pub const SAMPLE_TABLE: &str = "sales";

const REGIONS: [&str; 5] = ["North", "South", "East", "West", "Online"];

const CATEGORIES: [&str; 14] = [
    "Groceries",
    "Electronics",
    "Clothing",
    "Books",
    "Garden",
    "Toys",
    "Sports",
    "Beauty",
    "Automotive",
    "Music",
    "Office",
    "Pets",
    "Jewelry",
    "Tools",
];

/// Create the `sales` table in `path` and fill it with `rows` generated rows
///
/// Roughly one region in forty and one amount in fifty is null so the null
/// bucket shows up.
pub fn create_sample_database(path: &Path, rows: usize) -> Result<()> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        "
        DROP TABLE IF EXISTS sales;
        CREATE TABLE sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sold_at TEXT NOT NULL,
            region TEXT,
            category TEXT,
            amount REAL,
            quantity INTEGER
        );
        ",
    )?;

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO sales (sold_at, region, category, amount, quantity) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;

        let mut rng = 42u32;
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default();

        for i in 0..rows {
            let sold_at = base + Duration::minutes(i as i64 * 37 + (random_int(&mut rng) % 30) as i64);
            let region = (random_float(&mut rng) >= 0.025).then(|| REGIONS[random_int(&mut rng) as usize % REGIONS.len()]);

            // Skewed so a few categories dominate and the tail folds into "other"
            let skew = random_float(&mut rng);
            let category = CATEGORIES[((skew * skew) * CATEGORIES.len() as f64) as usize % CATEGORIES.len()];

            let amount = (random_float(&mut rng) >= 0.02).then(|| {
                let base_price = 5.0 + 200.0 * random_float(&mut rng).powi(3);
                (base_price * 100.0).round() / 100.0
            });
            let quantity = 1 + random_int(&mut rng) % 8;

            stmt.execute((
                sold_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                region,
                category,
                amount,
                quantity,
            ))?;
        }
    }
    tx.commit()?;

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_sales_sold_at ON sales(sold_at);
        CREATE INDEX IF NOT EXISTS idx_sales_region ON sales(region);
        ",
    )?;

    info!(path = %path.display(), rows, "sample database created");
    Ok(())
}

fn random_float(seed: &mut u32) -> f64 {
    *seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
    (*seed as f64) / (u32::MAX as f64)
}

fn random_int(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
    *seed
}
