//! SQL for the UKLP reports.
//!
//! Statements are written against the subset of SQL that PostgreSQL and SQLite
//! share, so the same text runs through `sqlx::AnyConnection` on either backend.
//! All parameters use the `$N` form.

use super::territory::ReportKind;

/// Extra keys collapsed into columns of `tmp_package_extra_pivot`, in column order.
pub const PIVOT_KEYS: [&str; 45] = [
    "access_constraints",
    "agency",
    "bbox-east-long",
    "bbox-north-lat",
    "bbox-south-lat",
    "bbox-west-long",
    "categories",
    "contact-email",
    "coupled-resource",
    "dataset-reference-date",
    "date_released",
    "date_updated",
    "date_update_future",
    "department",
    "external_reference",
    "frequency-of-update",
    "geographic_coverage",
    "geographic_granularity",
    "guid",
    "import_source",
    "UKLP",
    "licence",
    "licence_url",
    "mandate",
    "metadata-date",
    "metadata-language",
    "national_statistic",
    "openness_score",
    "openness_score_last_checked",
    "precision",
    "published_by",
    "published_via",
    "resource-type",
    "responsible-party",
    "series",
    "spatial-data-service-type",
    "spatial-reference-system",
    "taxonomy_url",
    "temporal_coverage_from",
    "temporal_coverage-from",
    "temporal_coverage_to",
    "temporal_coverage-to",
    "temporal_granularity",
    "update_frequency",
    "harvest_object_id",
];

/// Value CKAN stores for an empty extra (a JSON-encoded empty string).
pub const EMPTY_MARKER: &str = "\"\"";

pub const CREATE_PUBLISHER_INFO: &str = r#"create table if not exists tmp_publisher_info (
    id text,
    title text,
    "timestamp" text
)"#;

pub const CREATE_TERRITORY_PACKAGE: &str = r#"create table if not exists tmp_territory_package (
    package_id text,
    territory text
)"#;

pub const CREATE_REPORT_C_HISTORY: &str = r#"create table if not exists report_uklp_report_c_history (
    report_date text,
    id text,
    title text,
    date_registered text,
    dataset integer,
    series integer,
    other_type integer,
    "view" integer,
    download integer,
    transformation integer,
    "invoke" integer,
    "other" integer,
    territory text
)"#;

pub const CREATE_REPORT_E_HISTORY: &str = r#"create table if not exists report_uklp_report_e_history_by_owner (
    report_date text,
    id text,
    dataset integer,
    series integer,
    other_type integer,
    "view" integer,
    download integer,
    transformation integer,
    "invoke" integer,
    "other" integer,
    territory text
)"#;

pub fn create_pivot_table() -> String {
    let columns: Vec<String> = PIVOT_KEYS.iter().map(|k| format!("    \"{k}\" text")).collect();
    format!(
        "create table if not exists tmp_package_extra_pivot (\n    package_id text,\n{},\n    territory text\n)",
        columns.join(",\n")
    )
}

pub const DELETE_PUBLISHER_INFO: &str = "delete from tmp_publisher_info";

/// `$1`: timestamp recorded against every publisher.
pub const INSERT_PUBLISHER_INFO: &str = r#"insert into tmp_publisher_info (id, title, "timestamp")
select "group".id, "group".title, $1
from "group"
where "group".type = 'publisher'
group by "group".id, "group".title"#;

pub const DELETE_PIVOT: &str = "delete from tmp_package_extra_pivot";
pub const DELETE_TERRITORY_PACKAGES: &str = "delete from tmp_territory_package";

/// `$1`: dataset id, `$2`: territory name.
pub const INSERT_TERRITORY_PACKAGE: &str =
    "insert into tmp_territory_package (package_id, territory) values ($1, $2)";

/// Which datasets a pivot insert draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotSource {
    /// Ids staged in `tmp_territory_package` for the territory.
    Staged,
    /// Every active dataset.
    AllActive,
}

fn pivot_column(key: &str) -> String {
    if key == "published_by" {
        // Publisher title comes from the active group membership, not the extra's value.
        return format!(
            "max(case when \"key\" = '{key}' then (select \"group\".title from \"member\" \
             join \"group\" on \"group\".id = \"member\".group_id \
             where \"member\".table_name = 'package' and \"member\".state = 'active' \
             and \"member\".table_id = package_extra.package_id limit 1) else '{EMPTY_MARKER}' end)"
        );
    }
    format!("max(case when \"key\" = '{key}' then \"value\" else '{EMPTY_MARKER}' end)")
}

/// Insert one pivoted row per active dataset for territory `$1`.
pub fn pivot_insert(source: PivotSource) -> String {
    let targets: Vec<String> = PIVOT_KEYS.iter().map(|k| format!("\"{k}\"")).collect();
    let values: Vec<String> = PIVOT_KEYS.iter().map(|k| pivot_column(k)).collect();
    let selection = match source {
        PivotSource::Staged => {
            "select package_id from tmp_territory_package where territory = $1"
        }
        PivotSource::AllActive => "select id from package where state = 'active'",
    };
    format!(
        "insert into tmp_package_extra_pivot (package_id, {}, territory)\n\
         select package_extra.package_id,\n{},\ncast($1 as text)\n\
         from package_extra\n\
         where package_extra.package_id in ({selection}) and package_extra.state = 'active'\n\
         group by package_extra.package_id",
        targets.join(", "),
        values.join(",\n")
    )
}

/// A CSV column: its header and the SQL expression that fills it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportColumn {
    pub header: &'static str,
    pub expr: &'static str,
}

const fn col(header: &'static str, expr: &'static str) -> ReportColumn {
    ReportColumn { header, expr }
}

const RESOURCE_LOCATOR: &str = "(select max(r.url) from resource r \
     join resource_group rg on rg.id = r.resource_group_id \
     where rg.package_id = package.id and r.state = 'active')";

const EXTENT: &str = "trim(extra.\"bbox-west-long\", '\"') || ',' || trim(extra.\"bbox-south-lat\", '\"') \
     || ',' || trim(extra.\"bbox-east-long\", '\"') || ',' || trim(extra.\"bbox-north-lat\", '\"')";

const KEYWORDS: &str = "(select string_agg(tag.name, ',') from package_tag \
     join tag on tag.id = package_tag.tag_id where package_tag.package_id = package.id)";

/// Columns of the per-dataset listings (reports A, D and F).
pub const LISTING_COLUMNS: [ReportColumn; 15] = [
    col("Record Owner", "trim(extra.\"responsible-party\", '\"')"),
    col("Record Publisher", "pub.title"),
    col("Resource Type", "trim(extra.\"resource-type\", '\"')"),
    col("Contact", "trim(extra.\"contact-email\", '\"')"),
    col("CKAN ID", "package.id"),
    col("Record Title", "package.title"),
    col("Date record revised or updated", "trim(extra.\"metadata-date\", '\"')"),
    col("Update schedule (if any)", "trim(extra.\"frequency-of-update\", '\"')"),
    col("Unique resource identifier", "trim(extra.guid, '\"')"),
    col("Resource locator", RESOURCE_LOCATOR),
    col("Geographic location", EXTENT),
    col("Geographic Extent", EXTENT),
    col("Constraints", "trim(extra.access_constraints, '\"')"),
    col("Keywords", KEYWORDS),
    col("Abstract", "package.notes"),
];

/// Columns of the services listing (report B).
pub const SERVICE_COLUMNS: [ReportColumn; 17] = [
    col("Record Owner", "trim(extra.\"responsible-party\", '\"')"),
    col("Record Publisher", "pub.title"),
    col("Resource Type", "trim(extra.\"resource-type\", '\"')"),
    col("Contact", "trim(extra.\"contact-email\", '\"')"),
    col(
        "Date record Registered",
        "cast((select min(pr.revision_timestamp) from package_revision pr where pr.id = package.id) as text)",
    ),
    col("Date record revised or updated", "trim(extra.\"metadata-date\", '\"')"),
    col("Update schedule (if any)", "trim(extra.\"frequency-of-update\", '\"')"),
    col("CKAN ID", "package.id"),
    col("Record Title", "package.title"),
    col("Unique resource identifier", "trim(extra.guid, '\"')"),
    col("Resource type", "trim(extra.\"spatial-data-service-type\", '\"')"),
    col("Resource Locator", RESOURCE_LOCATOR),
    col("Geographic Extent", EXTENT),
    col("Coupled Resource", "trim(extra.\"coupled-resource\", '\"')"),
    col("Constraints", "trim(extra.access_constraints, '\"')"),
    col("Keywords", KEYWORDS),
    col("Abstract", "package.notes"),
];

/// Columns of the publisher summary (report C).
pub const PUBLISHER_SUMMARY_COLUMNS: [ReportColumn; 16] = [
    col("Organisation Name", "cur.title"),
    col("Date Registered", "cur.date_registered"),
    col("Number of datasets", "cur.dataset"),
    col("Number of series", "cur.series"),
    col("Number of other resource types", "cur.other_type"),
    col("Number of View Services", "cur.\"view\""),
    col("Number of Download Services", "cur.download"),
    col("Number of Transformation Services", "cur.transformation"),
    col("Number of Invoke Services", "cur.\"invoke\""),
    col("Number of Other Services", "cur.\"other\""),
    col("Dataset change", "cur.dataset - coalesce(prev.dataset, 0)"),
    col("View Services change", "cur.\"view\" - coalesce(prev.\"view\", 0)"),
    col("Download Services change", "cur.download - coalesce(prev.download, 0)"),
    col(
        "Transformation Services change",
        "cur.transformation - coalesce(prev.transformation, 0)",
    ),
    col("Invoke Services change", "cur.\"invoke\" - coalesce(prev.\"invoke\", 0)"),
    col("Other Services change", "cur.\"other\" - coalesce(prev.\"other\", 0)"),
];

/// Columns of the responsible-party summary (report E).
pub const OWNER_SUMMARY_COLUMNS: [ReportColumn; 15] = [
    col("Responsible Party", "cur.id"),
    col("Number of datasets", "cur.dataset"),
    col("Number of series", "cur.series"),
    col("Number of other resource types", "cur.other_type"),
    col("Number of View Services", "cur.\"view\""),
    col("Number of Download Services", "cur.download"),
    col("Number of Transformation Services", "cur.transformation"),
    col("Number of Invoke Services", "cur.\"invoke\""),
    col("Number of Other Services", "cur.\"other\""),
    col("Dataset change", "cur.dataset - coalesce(prev.dataset, 0)"),
    col("View Services change", "cur.\"view\" - coalesce(prev.\"view\", 0)"),
    col("Download Services change", "cur.download - coalesce(prev.download, 0)"),
    col(
        "Transformation Services change",
        "cur.transformation - coalesce(prev.transformation, 0)",
    ),
    col("Invoke Services change", "cur.\"invoke\" - coalesce(prev.\"invoke\", 0)"),
    col("Other Services change", "cur.\"other\" - coalesce(prev.\"other\", 0)"),
];

const LISTING_FROM: &str = "from package\n\
     join tmp_package_extra_pivot extra on package.id = extra.package_id\n\
     left join tmp_publisher_info pub on extra.published_by = pub.title";

const OTHER_RESOURCE_FILTER: &str = "not (extra.\"resource-type\" = '\"\"' \
     or extra.\"resource-type\" is null \
     or extra.\"resource-type\" = '\"dataset\"' \
     or extra.\"resource-type\" = '\"series\"' \
     or extra.\"resource-type\" = '\"service\"')";

fn select_list(columns: &[ReportColumn]) -> String {
    columns
        .iter()
        .map(|c| c.expr)
        .collect::<Vec<_>>()
        .join(",\n")
}

fn listing(columns: &[ReportColumn], filter: &str) -> String {
    format!(
        "select\n{}\n{LISTING_FROM}\nwhere {filter} and package.state = 'active' and extra.territory = $1",
        select_list(columns)
    )
}

fn summary(columns: &[ReportColumn], history_table: &str) -> String {
    format!(
        "select\n{}\nfrom {history_table} cur\n\
         left join {history_table} prev\n\
           on prev.id = cur.id and prev.territory = cur.territory\n\
          and prev.report_date = (select max(earlier.report_date) from {history_table} earlier\n\
              where earlier.id = cur.id and earlier.territory = cur.territory\n\
                and earlier.report_date < $1)\n\
         where cur.report_date = $1 and cur.territory = $2",
        select_list(columns)
    )
}

pub const REPORT_C_HISTORY: &str = "report_uklp_report_c_history";
pub const REPORT_E_HISTORY: &str = "report_uklp_report_e_history_by_owner";

/// The CSV columns of a report.
pub fn columns(kind: ReportKind) -> &'static [ReportColumn] {
    match kind {
        ReportKind::A | ReportKind::D | ReportKind::F => &LISTING_COLUMNS,
        ReportKind::B => &SERVICE_COLUMNS,
        ReportKind::C => &PUBLISHER_SUMMARY_COLUMNS,
        ReportKind::E => &OWNER_SUMMARY_COLUMNS,
    }
}

/// The report query for `kind`.
///
/// Listings (A, B, D, F) take the territory as `$1`. Summaries (C, E) take the
/// report date as `$1` and the territory as `$2`.
pub fn report_query(kind: ReportKind) -> String {
    let cols = columns(kind);
    match kind {
        ReportKind::A => listing(cols, "extra.\"resource-type\" = '\"dataset\"'"),
        ReportKind::B => listing(cols, "extra.\"resource-type\" = '\"service\"'"),
        ReportKind::D => listing(cols, "extra.\"resource-type\" = '\"series\"'"),
        ReportKind::F => listing(cols, OTHER_RESOURCE_FILTER),
        ReportKind::C => summary(cols, REPORT_C_HISTORY),
        ReportKind::E => summary(cols, REPORT_E_HISTORY),
    }
}

/// Delete the snapshot for report date `$1`, for summary reports only.
pub fn snapshot_delete(kind: ReportKind) -> Option<String> {
    let table = match kind {
        ReportKind::C => REPORT_C_HISTORY,
        ReportKind::E => REPORT_E_HISTORY,
        _ => return None,
    };
    Some(format!("delete from {table} where report_date = $1"))
}

const SERVICE_COUNTS: &str = "sum(case when extra.\"resource-type\" = '\"dataset\"' then 1 else 0 end),\n\
     sum(case when extra.\"resource-type\" = '\"series\"' then 1 else 0 end),\n\
     sum(case when extra.\"resource-type\" != '\"series\"' and extra.\"resource-type\" != '\"dataset\"' \
         and extra.\"resource-type\" != '\"service\"' then 1 else 0 end),";

fn service_type_count(service_type: &str) -> String {
    format!(
        "sum(case when extra.\"resource-type\" = '\"service\"' \
         and extra.\"spatial-data-service-type\" = '\"{service_type}\"' then 1 else 0 end)"
    )
}

/// Insert the snapshot for report date `$1`, for summary reports only.
pub fn snapshot_insert(kind: ReportKind) -> Option<String> {
    let tail = [
        service_type_count("download"),
        service_type_count("transformation"),
        service_type_count("invoke"),
        service_type_count("other"),
    ]
    .join(",\n");
    match kind {
        // Publisher "view" counts every service.
        ReportKind::C => Some(format!(
            "insert into {REPORT_C_HISTORY} (report_date, id, title, date_registered, dataset, series, \
             other_type, \"view\", download, transformation, \"invoke\", \"other\", territory)\n\
             select cast($1 as text), pub.id, pub.title, pub.\"timestamp\",\n\
             {SERVICE_COUNTS}\n\
             sum(case when extra.\"resource-type\" = '\"service\"' then 1 else 0 end),\n\
             {tail},\n\
             extra.territory\n\
             from package\n\
             join tmp_package_extra_pivot extra on package.id = extra.package_id\n\
             left join tmp_publisher_info pub on extra.published_by = pub.title\n\
             where package.state = 'active' and extra.\"resource-type\" <> '\"\"'\n\
             group by pub.id, pub.title, pub.\"timestamp\", extra.territory"
        )),
        ReportKind::E => Some(format!(
            "insert into {REPORT_E_HISTORY} (report_date, id, dataset, series, other_type, \"view\", \
             download, transformation, \"invoke\", \"other\", territory)\n\
             select cast($1 as text), extra.\"responsible-party\",\n\
             {SERVICE_COUNTS}\n\
             {},\n\
             {tail},\n\
             extra.territory\n\
             from package\n\
             join tmp_package_extra_pivot extra on package.id = extra.package_id\n\
             where package.state = 'active' and extra.\"resource-type\" <> '\"\"'\n\
             group by extra.\"responsible-party\", extra.territory",
            service_type_count("view")
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_has_one_column_per_key() {
        let ddl = create_pivot_table();
        for key in PIVOT_KEYS {
            assert!(ddl.contains(&format!("\"{key}\" text")), "missing {key}");
        }
        let insert = pivot_insert(PivotSource::Staged);
        assert_eq!(insert.matches("max(case when").count(), PIVOT_KEYS.len());
        assert!(insert.contains("from tmp_territory_package where territory = $1"));
        assert!(pivot_insert(PivotSource::AllActive).contains("from package where state = 'active'"));
    }

    #[test]
    fn listing_queries_filter_on_resource_type_and_territory() {
        let a = report_query(ReportKind::A);
        assert!(a.contains("extra.\"resource-type\" = '\"dataset\"'"));
        assert!(a.ends_with("extra.territory = $1"));
        assert!(report_query(ReportKind::F).contains("not (extra.\"resource-type\" = '\"\"'"));
    }

    #[test]
    fn only_summaries_have_snapshots() {
        for kind in [ReportKind::A, ReportKind::B, ReportKind::D, ReportKind::F] {
            assert!(snapshot_delete(kind).is_none());
            assert!(snapshot_insert(kind).is_none());
        }
        let c = snapshot_insert(ReportKind::C).unwrap();
        assert!(c.contains("group by pub.id, pub.title, pub.\"timestamp\", extra.territory"));
        let e = snapshot_insert(ReportKind::E).unwrap();
        assert!(e.contains("group by extra.\"responsible-party\", extra.territory"));
    }

    #[test]
    fn header_counts_match_reports() {
        assert_eq!(columns(ReportKind::A).len(), 15);
        assert_eq!(columns(ReportKind::B).len(), 17);
        assert_eq!(columns(ReportKind::C)[0].header, "Organisation Name");
        assert_eq!(columns(ReportKind::E)[0].header, "Responsible Party");
    }
}
