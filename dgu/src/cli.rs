/// # dgu CLI Interface (Module)
///
/// Command parsing and orchestration for the `dgu` binary. All business logic (the
/// directory client, dataset search and report generation) lives in [`dgu-core`];
/// this module only maps arguments and config onto those calls.
///
/// ## Commands
/// - `reports`: rebuild the UKLP pivot and write the MI report CSVs.
/// - `directory`: one-off lookups against the Drupal directory, printed as JSON.
///
/// ## How To Use
/// - From a shell: `dgu --help`.
/// - From tests: call [`run`] with a constructed [`Cli`].
///
/// [`dgu-core`]: ../../dgu-core/
use crate::load_config::load_config;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use dgu_core::contract::{Directory, DirectoryError};
use dgu_core::directory::DirectoryClient;
use dgu_core::reports::{self, parse_letters, resolve_group, ReportConfig, ReportKind};
use dgu_core::search::CkanSearchClient;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;

/// Overrides the OS group that owns the report files.
pub const REPORT_GROUP_ENV: &str = "MI_REPORT_TEST";

/// CLI for the data.gov.uk directory client and UKLP reports.
#[derive(Parser)]
#[clap(
    name = "dgu",
    version,
    about = "data.gov.uk directory lookups and UKLP management-information reports"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the UKLP MI reports into OUTPUT_DIR
    Reports {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Report date (YYYY-MM-DD), defaults to today
        #[clap(long)]
        date: Option<NaiveDate>,
        /// Directory the CSV files are written to; created when missing
        output_dir: PathBuf,
        /// Reports to produce, any of A-F
        #[clap(default_value = "ABCDEF")]
        letters: ReportLetters,
    },
    /// Look something up in the Drupal directory
    Directory {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        #[clap(subcommand)]
        lookup: Lookup,
    },
}

/// Report selection parsed from a string such as `ACE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLetters(pub Vec<ReportKind>);

impl FromStr for ReportLetters {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_letters(s).map(ReportLetters)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Properties of a user
    User { user_id: u64 },
    /// User id owning a session
    Session { session_id: String },
    /// Parent department of an organisation
    Department { organisation_id: String },
    /// Name of an organisation
    Organisation { organisation_id: String },
    /// Organisation id for a name
    MatchOrganisation { name: String },
    /// All publishers
    Publishers,
    /// Details of one publisher
    Publisher { organisation_id: String },
    /// All organogram files
    Organograms,
    /// Properties of one organogram file
    Organogram { fid: String },
    /// Nodes referring to datasets
    Referrers,
    /// One node
    Node { nid: String },
    /// All nodes, optionally of one type
    Nodes {
        #[clap(long = "type")]
        node_type: Option<String>,
    },
    /// Replies to a node
    Comments { node_id: String },
    /// Replies to a dataset
    DatasetComments { entity_id: String },
}

/// Perform one directory lookup and return its result as JSON.
pub async fn lookup<D>(directory: &D, lookup: &Lookup) -> Result<Value, DirectoryError>
where
    D: Directory + ?Sized,
{
    let value = match lookup {
        Lookup::User { user_id } => directory.get_user_properties(*user_id).await?,
        Lookup::Session { session_id } => directory
            .get_user_id_from_session_id(session_id)
            .await?
            .map(Value::String)
            .unwrap_or(Value::Null),
        Lookup::Department { organisation_id } => Value::String(
            directory
                .get_department_from_organisation(organisation_id)
                .await?,
        ),
        Lookup::Organisation { organisation_id } => {
            Value::String(directory.get_organisation_name(organisation_id).await?)
        }
        Lookup::MatchOrganisation { name } => {
            Value::String(directory.match_organisation(name).await?)
        }
        Lookup::Publishers => directory.get_organisation_list().await?,
        Lookup::Publisher { organisation_id } => {
            directory.get_organisation_details(organisation_id).await?
        }
        Lookup::Organograms => directory.get_organogram_files().await?,
        Lookup::Organogram { fid } => directory.get_organogram_file_properties(fid).await?,
        Lookup::Referrers => Value::Array(directory.get_dataset_referrers().await?),
        Lookup::Node { nid } => directory.get_node(nid).await?,
        Lookup::Nodes { node_type } => {
            Value::Array(directory.get_nodes(node_type.as_deref()).await?)
        }
        Lookup::Comments { node_id } => Value::Array(directory.get_comments(node_id).await?),
        Lookup::DatasetComments { entity_id } => {
            Value::Array(directory.get_dataset_comments(entity_id).await?)
        }
    };
    Ok(value)
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Reports {
            config,
            date,
            output_dir,
            letters,
        } => run_reports(config, date, output_dir, letters.0).await,
        Commands::Directory { config, lookup: query } => {
            let config = load_config(config)?;
            let client = DirectoryClient::new(&config.directory)?;
            tracing::info!(command = "directory", ?query, "Running directory lookup");
            match lookup(&client, &query).await {
                Ok(value) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "directory", error = %e, "Directory lookup failed");
                    Err(e.into())
                }
            }
        }
    }
}

async fn run_reports(
    config_path: PathBuf,
    date: Option<NaiveDate>,
    output_dir: PathBuf,
    letters: Vec<ReportKind>,
) -> Result<()> {
    let config = load_config(config_path)?;

    // The group is checked before anything touches the database.
    let group = std::env::var(REPORT_GROUP_ENV)
        .ok()
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| config.reports.output_group.clone());
    tracing::info!(group = %group, "Using report file group");
    let gid = resolve_group(&group)?;

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    let database_url = config
        .reports
        .database_url
        .as_deref()
        .context("No database configured: set DATABASE_URL or reports.database_url")?;
    let search_settings = config
        .search
        .as_ref()
        .context("No search section in config: reports need search.ckan_url")?;
    let search = CkanSearchClient::new(search_settings)?;

    let report_config = ReportConfig {
        output_dir,
        letters,
        report_date: date.unwrap_or_else(|| Local::now().date_naive()),
        file_prefix: config.reports.file_prefix.clone(),
        output_gid: Some(gid),
    };

    let mut conn = reports::connect(database_url).await?;
    match reports::run_reports(&mut conn, &search, &report_config).await {
        Ok(summary) => {
            tracing::info!(command = "reports", ?summary, "Report generation complete");
            for file in &summary.files {
                println!("{}", file.display());
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(command = "reports", error = %e, "Report generation failed");
            Err(e.into())
        }
    }
}
