#![allow(unused)]

//! # contract: trait seams between orchestration and remote collaborators
//!
//! Two external services sit behind traits here so the CLI and the report
//! generator can be driven by real clients in production and by `mockall`
//! mocks in tests:
//!
//! - [`Directory`]: the Drupal user/organisation directory (XML-RPC + REST).
//! - [`DatasetSearch`]: CKAN's search index, used to resolve a bounding box
//!   into dataset ids.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; the mocks are exported under the
//!   default `test-export-mocks` feature so integration tests in other crates can
//!   use `MockDirectory` and `MockDatasetSearch`.
//!
//! ## Errors
//! - Implementations must translate every transport failure into the domain
//!   errors ([`DirectoryError`], [`SearchError`]); callers never match on
//!   `reqwest` or decoding errors.

use async_trait::async_trait;
use mockall::{automock, predicate::*};

pub use crate::directory::DirectoryError;
pub use crate::search::SearchError;

/// Opaque record returned by the directory service.
///
/// Neither transport's payload is validated beyond the checks each operation
/// documents, so records stay as plain JSON values.
pub type DirectoryRecord = serde_json::Value;

/// Typed lookups against the Drupal directory.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// Properties of a Drupal user (`user.retrieve`).
    async fn get_user_properties(&self, user_id: u64) -> Result<DirectoryRecord, DirectoryError>;

    /// The user id owning a Drupal session, or `None` when the session is not valid.
    async fn get_user_id_from_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, DirectoryError>;

    /// The id of the single parent department of an organisation.
    async fn get_department_from_organisation(
        &self,
        organisation_id: &str,
    ) -> Result<String, DirectoryError>;

    async fn get_organisation_name(&self, organisation_id: &str) -> Result<String, DirectoryError>;

    /// Resolve an organisation name to its id.
    async fn match_organisation(&self, organisation_name: &str) -> Result<String, DirectoryError>;

    async fn get_organisation_list(&self) -> Result<DirectoryRecord, DirectoryError>;

    async fn get_organisation_details(
        &self,
        organisation_id: &str,
    ) -> Result<DirectoryRecord, DirectoryError>;

    async fn get_organogram_files(&self) -> Result<DirectoryRecord, DirectoryError>;

    async fn get_organogram_file_properties(
        &self,
        fid: &str,
    ) -> Result<DirectoryRecord, DirectoryError>;

    /// Nodes referring to datasets (includes apps).
    async fn get_dataset_referrers(&self) -> Result<Vec<DirectoryRecord>, DirectoryError>;

    async fn get_node(&self, nid: &str) -> Result<DirectoryRecord, DirectoryError>;

    /// All nodes, optionally restricted to one node type (app, blog, forum, ...).
    async fn get_nodes<'a>(
        &self,
        type_filter: Option<&'a str>,
    ) -> Result<Vec<DirectoryRecord>, DirectoryError>;

    /// Replies attached to a Drupal node.
    async fn get_comments(&self, node_id: &str) -> Result<Vec<DirectoryRecord>, DirectoryError>;

    /// Replies attached to a CKAN dataset.
    async fn get_dataset_comments(
        &self,
        entity_id: &str,
    ) -> Result<Vec<DirectoryRecord>, DirectoryError>;
}

/// Resolves a bounding box into the ids of the datasets whose extent falls inside it.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DatasetSearch: Send + Sync {
    async fn find_datasets(&self, bbox: &str) -> Result<Vec<String>, SearchError>;
}
