//! # reports: UKLP management-information report generator
//!
//! Rebuilds the per-territory pivot of dataset extras, then writes one CSV per
//! requested report letter and territory. The two summary reports (C and E) also
//! keep a dated snapshot in a history table so each run can show the change since
//! the previous snapshot.
//!
//! ## Stages
//! 1. `create table if not exists` for the staging, pivot and history tables.
//! 2. Publisher titles are restaged into `tmp_publisher_info`.
//! 3. In one transaction, the pivot and territory staging tables are cleared and
//!    refilled territory by territory (search first, then SQL).
//! 4. In a second transaction, each report in [`ReportKind::RUN_ORDER`] that was
//!    requested is written for every territory.
//!
//! Any database error aborts the run. Files already written stay on disk.

pub mod export;
pub mod sql;
pub mod territory;

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use sqlx::{AnyConnection, Connection};
use thiserror::Error;
use tracing::{error, info};

use crate::contract::DatasetSearch;
use crate::search::SearchError;

pub use export::resolve_group;
pub use territory::{parse_letters, ReportKind, Territory, TerritoryFilter, TERRITORIES};

use sql::PivotSource;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not find group {0}; set MI_REPORT_TEST=<GROUP_NAME> to run locally")]
    GroupNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset search failed: {0}")]
    Search(#[from] SearchError),
}

/// What to produce and where.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub letters: Vec<ReportKind>,
    pub report_date: NaiveDate,
    pub file_prefix: String,
    /// Group given ownership of every written file, when set.
    pub output_gid: Option<u32>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReportRunSummary {
    /// Pivoted dataset rows per territory, in [`TERRITORIES`] order.
    pub territory_datasets: Vec<(String, usize)>,
    pub files: Vec<PathBuf>,
}

/// Open the single connection a report run uses. Accepts any URL the `Any`
/// driver knows (`postgres://...`, `sqlite://...`).
pub async fn connect(database_url: &str) -> Result<AnyConnection, ReportError> {
    sqlx::any::install_default_drivers();
    AnyConnection::connect(database_url).await.map_err(|e| {
        error!(error = ?e, "Failed to connect to report database");
        ReportError::Database(e)
    })
}

/// Run the whole report job on one connection.
pub async fn run_reports<S>(
    conn: &mut AnyConnection,
    search: &S,
    config: &ReportConfig,
) -> Result<ReportRunSummary, ReportError>
where
    S: DatasetSearch + ?Sized,
{
    let report_date = config.report_date.format("%Y-%m-%d").to_string();
    info!(
        report_date = %report_date,
        output_dir = %config.output_dir.display(),
        letters = ?config.letters,
        "Starting UKLP report run"
    );

    setup_tables(conn).await?;
    update_publisher_table(conn).await?;
    let territory_datasets = rebuild_pivot(conn, search).await?;
    let files = write_reports(conn, config, &report_date).await?;

    info!(files = files.len(), "UKLP report run complete");
    Ok(ReportRunSummary {
        territory_datasets,
        files,
    })
}

/// Create the staging, pivot and history tables when missing.
pub async fn setup_tables(conn: &mut AnyConnection) -> Result<(), ReportError> {
    let pivot = sql::create_pivot_table();
    for ddl in [
        sql::CREATE_PUBLISHER_INFO,
        sql::CREATE_TERRITORY_PACKAGE,
        pivot.as_str(),
        sql::CREATE_REPORT_C_HISTORY,
        sql::CREATE_REPORT_E_HISTORY,
    ] {
        sqlx::query(ddl).execute(&mut *conn).await.map_err(|e| {
            error!(error = ?e, "Failed to create report tables");
            e
        })?;
    }
    Ok(())
}

/// Replace `tmp_publisher_info` with the current publisher groups.
pub async fn update_publisher_table(conn: &mut AnyConnection) -> Result<u64, ReportError> {
    let staged_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    sqlx::query(sql::DELETE_PUBLISHER_INFO)
        .execute(&mut *conn)
        .await?;
    let inserted = sqlx::query(sql::INSERT_PUBLISHER_INFO)
        .bind(staged_at)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    info!(publishers = inserted, "Staged publisher info");
    Ok(inserted)
}

/// Clear and refill the pivot table for every territory in one transaction.
pub async fn rebuild_pivot<S>(
    conn: &mut AnyConnection,
    search: &S,
) -> Result<Vec<(String, usize)>, ReportError>
where
    S: DatasetSearch + ?Sized,
{
    let mut tx = conn.begin().await?;
    sqlx::query(sql::DELETE_PIVOT).execute(&mut *tx).await?;
    sqlx::query(sql::DELETE_TERRITORY_PACKAGES)
        .execute(&mut *tx)
        .await?;

    let mut counts = Vec::with_capacity(TERRITORIES.len());
    for territory in TERRITORIES.iter() {
        let source = match territory.filter {
            TerritoryFilter::BoundingBox(bbox) => {
                let ids = search.find_datasets(bbox).await.map_err(|e| {
                    error!(error = %e, territory = territory.name, bbox, "Dataset search failed");
                    e
                })?;
                info!(territory = territory.name, datasets = ids.len(), "Found datasets for territory");
                for id in &ids {
                    sqlx::query(sql::INSERT_TERRITORY_PACKAGE)
                        .bind(id.as_str())
                        .bind(territory.name)
                        .execute(&mut *tx)
                        .await?;
                }
                PivotSource::Staged
            }
            TerritoryFilter::All => PivotSource::AllActive,
        };

        let pivoted = sqlx::query(&sql::pivot_insert(source))
            .bind(territory.name)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!(error = ?e, territory = territory.name, "Failed to pivot package extras");
                e
            })?
            .rows_affected();
        info!(territory = territory.name, rows = pivoted, "Pivoted package extras");
        counts.push((territory.name.to_string(), pivoted as usize));
    }

    tx.commit().await?;
    Ok(counts)
}

/// Write every requested report, refreshing summary snapshots first.
async fn write_reports(
    conn: &mut AnyConnection,
    config: &ReportConfig,
    report_date: &str,
) -> Result<Vec<PathBuf>, ReportError> {
    let mut tx = conn.begin().await?;
    let mut files = Vec::new();

    for kind in ReportKind::RUN_ORDER {
        if !config.letters.contains(&kind) {
            continue;
        }

        if let (Some(delete), Some(insert)) = (sql::snapshot_delete(kind), sql::snapshot_insert(kind)) {
            sqlx::query(&delete)
                .bind(report_date)
                .execute(&mut *tx)
                .await?;
            let rows = sqlx::query(&insert)
                .bind(report_date)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!(error = ?e, report = %kind.letter(), "Failed to record summary snapshot");
                    e
                })?
                .rows_affected();
            info!(report = %kind.letter(), rows, report_date, "Recorded summary snapshot");
        }

        let query = sql::report_query(kind);
        for territory in TERRITORIES.iter() {
            info!(report = %kind.letter(), territory = territory.name, "Generating report");
            let path = config
                .output_dir
                .join(kind.file_name(&config.file_prefix, report_date, territory));
            let binds: Vec<&str> = match kind {
                ReportKind::C | ReportKind::E => vec![report_date, territory.name],
                _ => vec![territory.name],
            };
            export::export_csv(&mut *tx, &query, &binds, sql::columns(kind), &path).await?;
            if let Some(gid) = config.output_gid {
                export::set_group(&path, gid)?;
            }
            files.push(path);
        }
    }

    tx.commit().await?;
    Ok(files)
}
