//! `xfview`: crossfilter column summaries for a SQLite table

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use xf_core::WidgetSettings;
use xf_data::{SchemaDetector, SqliteEngine};
use xf_views::{Crossfilter, PointerEvent, Session};

mod render;
mod sample;

#[derive(Parser, Debug)]
#[command(name = "xfview", version, about = "Crossfilter column summaries for a SQLite table")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a sample `sales` table to a new database file
    Sample {
        path: PathBuf,
        #[arg(long, default_value_t = 5_000)]
        rows: usize,
    },
    /// List tables and the detected kind of each column
    Tables { db: PathBuf },
    /// Bin every column of a table, optionally after selecting or brushing
    Show(ShowArgs),
}

#[derive(clap::Args, Debug)]
struct ShowArgs {
    db: PathBuf,
    /// Table to read; may be omitted when the database has only one
    #[arg(long, short)]
    table: Option<String>,
    /// Comma-separated subset of columns
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,
    /// Widget settings as JSON
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Click a bin: `column=INDEX` or `column=null`
    #[arg(long)]
    select: Vec<Gesture>,
    /// Brush a bin range: `column=START..END`
    #[arg(long)]
    brush: Vec<Gesture>,
    /// Restore a saved session before applying gestures
    #[arg(long)]
    session_in: Option<PathBuf>,
    /// Save the resulting session
    #[arg(long)]
    session_out: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
enum GestureTarget {
    Bin(usize),
    Null,
    Range(usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Gesture {
    column: String,
    target: GestureTarget,
}

impl FromStr for Gesture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, target) = s.split_once('=').ok_or_else(|| format!("expected column=target, got `{s}`"))?;
        let parse = |v: &str| v.trim().parse::<usize>().map_err(|e| format!("bad bin index `{v}`: {e}"));
        let target = if target.eq_ignore_ascii_case("null") {
            GestureTarget::Null
        } else if let Some((start, end)) = target.split_once("..") {
            GestureTarget::Range(parse(start)?, parse(end)?)
        } else {
            GestureTarget::Bin(parse(target)?)
        };
        Ok(Self {
            column: column.trim().to_string(),
            target,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Sample { path, rows } => {
            sample::create_sample_database(&path, rows)
                .with_context(|| format!("creating sample database {}", path.display()))?;
            println!("wrote {rows} rows to table `{}` in {}", sample::SAMPLE_TABLE, path.display());
        }
        Command::Tables { db } => list_tables(&db)?,
        Command::Show(args) => show(args).await?,
    }
    Ok(())
}

fn open(db: &Path) -> Result<SqliteEngine> {
    SqliteEngine::open(db).with_context(|| format!("opening {}", db.display()))
}

fn list_tables(db: &Path) -> Result<()> {
    let engine = open(db)?;
    let detector = SchemaDetector::new();
    for table in engine.tables()? {
        println!("{table}");
        for column in detector.detect(&engine, &table)? {
            println!("  {:<24} {}", column.name, column.kind);
        }
    }
    Ok(())
}

async fn show(args: ShowArgs) -> Result<()> {
    let engine = open(&args.db)?;
    let settings = match &args.settings {
        Some(path) => WidgetSettings::load(path).with_context(|| format!("loading settings {}", path.display()))?,
        None => WidgetSettings::default(),
    };

    let table = match args.table {
        Some(table) => table,
        None => {
            let mut tables = engine.tables()?;
            if tables.len() != 1 {
                bail!("database has {} tables; pick one with --table", tables.len());
            }
            tables.remove(0)
        }
    };

    let schema = SchemaDetector::new()
        .detect(&engine, &table)
        .with_context(|| format!("reading columns of {table}"))?;
    let crossfilter = Crossfilter::new(Arc::new(engine), &table, settings);
    for column in &schema {
        if args.columns.is_empty() || args.columns.contains(&column.name) {
            crossfilter.add_column(&column.name, column.kind);
        }
    }
    for wanted in &args.columns {
        if crossfilter.column(wanted).is_none() {
            bail!("table {table} has no column `{wanted}`");
        }
    }

    let report = crossfilter.refresh_all().await?;
    for (column, error) in &report.failed {
        warn!(column = %column, error = %error, "column could not be binned");
    }

    if let Some(path) = &args.session_in {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading session {}", path.display()))?;
        let session: Session = serde_json::from_str(&json).context("parsing session")?;
        crossfilter.restore(&session).await?;
        info!(filters = session.filters.len(), "restored session");
    }

    let mut clock = 0u64;
    for gesture in args.select.iter().chain(&args.brush) {
        clock += 1_000;
        perform(&crossfilter, gesture, clock).await?;
    }

    for column in crossfilter.columns() {
        println!("{}", render::render_column(column.as_ref()));
    }
    let filters = crossfilter.store().filters();
    if !filters.is_empty() {
        println!("filters:");
        for filter in &filters {
            println!("  {}", xf_core::to_predicate(filter));
        }
    }

    if let Some(path) = &args.session_out {
        let json = serde_json::to_string_pretty(&crossfilter.session())?;
        std::fs::write(path, json).with_context(|| format!("writing session {}", path.display()))?;
    }
    Ok(())
}

/// Replay a gesture as pointer input on the column's track
async fn perform(crossfilter: &Crossfilter, gesture: &Gesture, time_ms: u64) -> Result<()> {
    let column = crossfilter
        .column(&gesture.column)
        .ok_or_else(|| anyhow!("no column `{}`", gesture.column))?;

    let (from, to) = {
        let controller = column.controller().lock();
        let layout = controller.layout();
        let extent = |index: usize| {
            layout
                .extent(index)
                .ok_or_else(|| anyhow!("column {} has no bin {index}", gesture.column))
        };
        match gesture.target {
            GestureTarget::Bin(index) => {
                let e = extent(index)?;
                let x = (e.start + e.end) / 2.0;
                (x, x)
            }
            GestureTarget::Null => {
                let e = layout
                    .null_extent()
                    .ok_or_else(|| anyhow!("column {} has no null values", gesture.column))?;
                let x = (e.start + e.end) / 2.0;
                (x, x)
            }
            GestureTarget::Range(start, end) => {
                let (first, last) = (extent(start.min(end))?, extent(start.max(end))?);
                (
                    first.start + first.width() * 0.25,
                    last.end - last.width() * 0.25,
                )
            }
        }
    };

    let name = gesture.column.as_str();
    crossfilter.pointer(name, PointerEvent::Move { x: from, y: 0.0 }).await?;
    crossfilter.pointer(name, PointerEvent::Down { x: from, y: 0.0, time_ms }).await?;
    if to != from {
        crossfilter.pointer(name, PointerEvent::Move { x: to, y: 0.0 }).await?;
    }
    let report = crossfilter
        .pointer(name, PointerEvent::Up { x: to, y: 0.0, time_ms: time_ms + 100 })
        .await?;
    info!(column = name, refreshed = report.applied.len(), "applied gesture");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gesture_parsing() {
        assert_eq!(
            "region=2".parse::<Gesture>().unwrap(),
            Gesture { column: "region".into(), target: GestureTarget::Bin(2) }
        );
        assert_eq!("amount=NULL".parse::<Gesture>().unwrap().target, GestureTarget::Null);
        assert_eq!("amount=3..1".parse::<Gesture>().unwrap().target, GestureTarget::Range(3, 1));
        assert!("amount".parse::<Gesture>().is_err());
        assert!("amount=x".parse::<Gesture>().is_err());
    }

    #[tokio::test]
    async fn test_gestures_filter_sample_data() {
        let dir = std::env::temp_dir().join(format!("xfview-main-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.db");
        sample::create_sample_database(&path, 300).unwrap();

        let engine = SqliteEngine::open(&path).unwrap();
        let schema = SchemaDetector::new().detect(&engine, "sales").unwrap();
        let crossfilter = Crossfilter::new(Arc::new(engine), "sales", WidgetSettings::default());
        for column in schema.iter().filter(|c| c.name != "id") {
            crossfilter.add_column(&column.name, column.kind);
        }
        crossfilter.refresh_all().await.unwrap();

        let gesture = "region=0".parse::<Gesture>().unwrap();
        perform(&crossfilter, &gesture, 1_000).await.unwrap();
        assert_eq!(crossfilter.store().filters().len(), 1);

        let brush = "amount=0..1".parse::<Gesture>().unwrap();
        perform(&crossfilter, &brush, 2_000).await.unwrap();
        assert_eq!(crossfilter.store().filters().len(), 2);

        let rendered = render::render_column(crossfilter.column("amount").unwrap().as_ref());
        assert!(rendered.starts_with("amount (numeric)"));
        assert!(rendered.contains(" * "));

        std::fs::remove_dir_all(&dir).ok();
    }
}
