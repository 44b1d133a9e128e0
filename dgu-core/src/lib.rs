#![doc = "dgu-core: core logic library for the DGU directory client and UKLP reports."]

//! This crate contains the remote-directory client, the CKAN dataset search client
//! and the UKLP report generator. The `dgu` binary is thin glue over these modules.
//!
//! # Usage
//! Construct a [`directory::DirectoryClient`] or call [`reports::run_reports`] with
//! settings from [`config`]. Orchestration code should depend on the traits in
//! [`contract`] so it can be exercised with the exported mocks.

pub mod config;
pub mod contract;
pub mod directory;
pub mod reports;
pub mod search;
