use std::path::Path;

use futures::TryStreamExt;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, Row};
use tracing::{error, info, warn};

use super::sql::ReportColumn;
use super::ReportError;

/// Run `query` with `binds` and stream every row into a CSV file at `path`.
///
/// The header row comes from `columns`, so a query matching nothing still yields
/// a file with headers. NULL cells are written empty. Returns the data row count.
pub async fn export_csv(
    conn: &mut AnyConnection,
    query: &str,
    binds: &[&str],
    columns: &[ReportColumn],
    path: &Path,
) -> Result<u64, ReportError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| {
        error!(error = ?e, path = %path.display(), "Could not create report file");
        ReportError::Csv(e)
    })?;
    writer.write_record(columns.iter().map(|c| c.header))?;

    let mut statement = sqlx::query(query);
    for value in binds {
        statement = statement.bind(value.to_string());
    }

    let mut rows = statement.fetch(&mut *conn);
    let mut written = 0u64;
    while let Some(row) = rows.try_next().await? {
        let mut record = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            record.push(cell_text(&row, index)?);
        }
        writer.write_record(&record)?;
        written += 1;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = written, "Wrote report");
    Ok(written)
}

/// Render one cell as CSV text whatever its database type.
fn cell_text(row: &AnyRow, index: usize) -> Result<String, sqlx::Error> {
    if let Ok(text) = row.try_get::<Option<String>, _>(index) {
        return Ok(text.unwrap_or_default());
    }
    if let Ok(number) = row.try_get::<Option<i64>, _>(index) {
        return Ok(number.map(|n| n.to_string()).unwrap_or_default());
    }
    if let Ok(number) = row.try_get::<Option<f64>, _>(index) {
        return Ok(number.map(|n| n.to_string()).unwrap_or_default());
    }
    row.try_get::<Option<bool>, _>(index)
        .map(|flag| flag.map(|b| if b { "t" } else { "f" }.to_string()).unwrap_or_default())
}

/// Give `path` to group `gid`, leaving the owner unchanged.
#[cfg(unix)]
pub fn set_group(path: &Path, gid: u32) -> Result<(), ReportError> {
    use std::os::unix::fs::chown;
    chown(path, None, Some(gid)).map_err(|e| {
        error!(error = ?e, path = %path.display(), gid, "Failed to set report group");
        ReportError::Io(e)
    })
}

#[cfg(not(unix))]
pub fn set_group(path: &Path, gid: u32) -> Result<(), ReportError> {
    warn!(path = %path.display(), gid, "Group ownership is not supported on this platform");
    Ok(())
}

/// Look up the numeric id of an OS group.
#[cfg(unix)]
pub fn resolve_group(name: &str) -> Result<u32, ReportError> {
    use std::ffi::CString;

    let c_name = CString::new(name).map_err(|_| ReportError::GroupNotFound(name.to_string()))?;
    // getgrnam returns a pointer into static storage; the gid is copied out before returning.
    let entry = unsafe { libc::getgrnam(c_name.as_ptr()) };
    if entry.is_null() {
        warn!(group = name, "OS group not found");
        return Err(ReportError::GroupNotFound(name.to_string()));
    }
    Ok(unsafe { (*entry).gr_gid })
}

#[cfg(not(unix))]
pub fn resolve_group(name: &str) -> Result<u32, ReportError> {
    Err(ReportError::GroupNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn unknown_group_is_reported() {
        match resolve_group("no-such-group-for-dgu-reports") {
            Err(ReportError::GroupNotFound(name)) => {
                assert_eq!(name, "no-such-group-for-dgu-reports")
            }
            other => panic!("expected GroupNotFound, got {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn root_group_resolves() {
        assert_eq!(resolve_group("root").unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn set_group_reports_missing_file_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.csv");
        assert!(matches!(set_group(&missing, 0), Err(ReportError::Io(_))));
    }

    #[test]
    fn interior_nul_is_not_a_group() {
        assert!(matches!(
            resolve_group("www\0data"),
            Err(ReportError::GroupNotFound(_))
        ));
    }
}
