//! Client for the Drupal directory service behind data.gov.uk.
//!
//! Two transports reach the same Drupal site:
//! - XML-RPC (`/services/xmlrpc`) for users, sessions, organisations and publishers;
//! - REST/JSON (`/services/rest`) for organograms, referrers, nodes and replies.
//!
//! Every failure is reported as one of the three [`DirectoryError`] kinds.

pub mod xmlrpc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::config::{DirectoryEndpoints, DirectorySettings};
use crate::contract::{Directory, DirectoryRecord};
use xmlrpc::RpcFailure;

/// Fields of a reply that Drupal renders with thousands separators.
const REPLY_ID_FIELDS: [&str; 3] = ["entity_id", "reply id", "uid"];

#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The service address is missing from the configuration.
    #[error("directory setup error: {0}")]
    Setup(String),
    /// Network, protocol or decoding failure talking to the service.
    #[error("directory request error: {0}")]
    Request(String),
    /// The entity does not exist, or the lookup was ambiguous.
    #[error("directory key error: {0}")]
    NotFound(String),
}

/// How a failed call for a keyed entity should be reported.
#[derive(Clone, Copy, PartialEq)]
enum Lookup {
    /// Any failure is a request error.
    Plain,
    /// A 404 (fault code or HTTP status) means the entity does not exist.
    Keyed,
}

pub struct DirectoryClient {
    http: Client,
    endpoints: DirectoryEndpoints,
}

impl DirectoryClient {
    pub fn new(settings: &DirectorySettings) -> Result<Self, DirectoryError> {
        let endpoints = settings.endpoints()?;
        let http = Client::builder().build().map_err(|e| {
            error!(error = ?e, "Failed to build HTTP client for directory");
            DirectoryError::Setup(format!("could not build HTTP client: {e}"))
        })?;
        Ok(Self { http, endpoints })
    }

    fn authorise(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.endpoints.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_deref()),
            None => request,
        }
    }

    async fn call(&self, method: &str, params: &[&str]) -> Result<Value, RpcFailure> {
        let body = xmlrpc::encode_call(method, params);
        let request = self
            .http
            .post(&self.endpoints.xmlrpc_url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body);
        let response = self
            .authorise(request)
            .send()
            .await
            .map_err(RpcFailure::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcFailure::Status(status.as_u16()));
        }
        let text = response.text().await.map_err(RpcFailure::Transport)?;
        xmlrpc::decode_response(&text)
    }

    fn translate(&self, failure: RpcFailure, subject: &str, lookup: Lookup) -> DirectoryError {
        let url = &self.endpoints.xmlrpc_url_log_safe;
        let err = match failure {
            RpcFailure::Fault { code: 404, .. } | RpcFailure::Status(404)
                if lookup == Lookup::Keyed =>
            {
                DirectoryError::NotFound(subject.to_string())
            }
            RpcFailure::Transport(e) => {
                DirectoryError::Request(format!("Socket error with url '{url}': {e}"))
            }
            RpcFailure::Fault { code, message } => DirectoryError::Request(format!(
                "Drupal returned error for {subject}: fault {code}: {message}"
            )),
            RpcFailure::Status(code) => DirectoryError::Request(format!(
                "Drupal returned protocol error for {subject}: HTTP {code}"
            )),
            RpcFailure::Malformed(desc) => DirectoryError::Request(format!(
                "Drupal return value not XML-RPC for {subject}: {desc}"
            )),
        };
        error!(subject, error = %err, "Directory XML-RPC call failed");
        err
    }

    async fn rpc(
        &self,
        method: &str,
        params: &[&str],
        subject: &str,
        lookup: Lookup,
    ) -> Result<Value, DirectoryError> {
        self.call(method, params)
            .await
            .map_err(|failure| self.translate(failure, subject, lookup))
    }

    /// Each segment is percent-encoded, so an id can never reach another endpoint.
    fn rest_url(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let base = &self.endpoints.rest_url;
        let mut url = Url::parse(base)
            .map_err(|e| DirectoryError::Setup(format!("invalid REST url {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| DirectoryError::Setup(format!("REST url {base} cannot take a path")))?
            .extend(segments);
        Ok(url)
    }

    async fn get_json(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
        lookup: Lookup,
    ) -> Result<Value, DirectoryError> {
        let url = self.rest_url(segments)?;
        let request = self.authorise(self.http.get(url.clone()).query(query));
        let response = request.send().await.map_err(|e| {
            error!(error = ?e, url = %url, "Directory REST request failed");
            DirectoryError::Request(format!("Socket error with url '{url}': {e}"))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND && lookup == Lookup::Keyed {
            return Err(DirectoryError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            error!(status = %status, url = %url, "Directory REST endpoint returned error status");
            return Err(DirectoryError::Request(format!(
                "Drupal url {url} returned protocol error: HTTP {status}"
            )));
        }
        response.json::<Value>().await.map_err(|e| {
            error!(error = ?e, url = %url, "Directory REST response was not JSON");
            DirectoryError::Request(format!("Drupal url {url} returned invalid JSON: {e}"))
        })
    }

    async fn get_json_list(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Vec<Value>, DirectoryError> {
        match self.get_json(segments, query, Lookup::Plain).await? {
            Value::Array(items) => Ok(items),
            other => Err(DirectoryError::Request(format!(
                "Drupal url {}/{} returned {} instead of a list",
                self.endpoints.rest_url,
                segments.join("/"),
                json_kind(&other)
            ))),
        }
    }

    async fn get_replies(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<Value>, DirectoryError> {
        let mut replies = self
            .get_json_list(
                &["views", "replies"],
                &[("entity_type", entity_type), ("entity_id", entity_id)],
            )
            .await?;
        strip_thousands_separators(&mut replies);
        Ok(replies)
    }
}

#[async_trait]
impl Directory for DirectoryClient {
    async fn get_user_properties(&self, user_id: u64) -> Result<DirectoryRecord, DirectoryError> {
        let id = user_id.to_string();
        let user = self
            .rpc("user.retrieve", &[id.as_str()], &format!("user_id {id}"), Lookup::Plain)
            .await?;
        info!(user_id, user = %truncated(&user, 200), "Obtained Drupal user");
        Ok(user)
    }

    async fn get_user_id_from_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, DirectoryError> {
        let prefix: String = session_id.chars().take(4).collect();
        let value = self
            .rpc(
                "session.retrieve",
                &[session_id],
                &format!("session_id {prefix}..."),
                Lookup::Plain,
            )
            .await?;
        let user_id = scalar_text(&value);
        info!(session = %prefix, user_id = %user_id, "Obtained Drupal user_id for session");
        // Drupal answers 0 for a session it does not know
        if user_id == "0" {
            return Ok(None);
        }
        Ok(Some(user_id))
    }

    async fn get_department_from_organisation(
        &self,
        organisation_id: &str,
    ) -> Result<String, DirectoryError> {
        let subject = format!("organisation_id {organisation_id}");
        // e.g. {"11419": "Department for Culture, Media and Sport"}
        let departments = self
            .rpc(
                "organisation.department",
                &[organisation_id],
                &subject,
                Lookup::Keyed,
            )
            .await?;
        let departments = match departments {
            Value::Object(map) => map,
            other => {
                return Err(DirectoryError::Request(format!(
                    "Drupal returned {} for {subject}, expected a struct",
                    json_kind(&other)
                )))
            }
        };
        let mut entries = departments.into_iter();
        match (entries.next(), entries.next()) {
            (None, _) => Err(DirectoryError::NotFound(format!(
                "No parent department for {subject}"
            ))),
            (Some(_), Some(_)) => Err(DirectoryError::NotFound(format!(
                "Multiple parent departments for {subject}"
            ))),
            (Some((department_id, name)), None) => {
                info!(
                    department = %scalar_text(&name),
                    department_id = %department_id,
                    organisation_id,
                    "Obtained Drupal parent department"
                );
                Ok(department_id)
            }
        }
    }

    async fn get_organisation_name(&self, organisation_id: &str) -> Result<String, DirectoryError> {
        let name = self
            .rpc(
                "organisation.one",
                &[organisation_id],
                &format!("organisation_id {organisation_id}"),
                Lookup::Keyed,
            )
            .await?;
        let name = scalar_text(&name);
        info!(organisation_id, name = %name, "Obtained Drupal organisation name");
        Ok(name)
    }

    async fn match_organisation(&self, organisation_name: &str) -> Result<String, DirectoryError> {
        let id = self
            .rpc(
                "organisation.match",
                &[organisation_name],
                &format!("organisation_name {organisation_name:?}"),
                Lookup::Keyed,
            )
            .await?;
        let id = scalar_text(&id);
        info!(organisation_name, organisation_id = %id, "Obtained organisation id from name");
        Ok(id)
    }

    async fn get_organisation_list(&self) -> Result<DirectoryRecord, DirectoryError> {
        let organisations = self
            .rpc("publisher.list", &[], "publisher list", Lookup::Plain)
            .await?;
        info!(organisations = %truncated(&organisations, 200), "Obtained organisation list");
        Ok(organisations)
    }

    async fn get_organisation_details(
        &self,
        organisation_id: &str,
    ) -> Result<DirectoryRecord, DirectoryError> {
        let organisation = self
            .rpc(
                "publisher.details",
                &[organisation_id],
                &format!("organisation_id {organisation_id}"),
                Lookup::Keyed,
            )
            .await?;
        info!(organisation_id, details = %truncated(&organisation, 200), "Obtained organisation details");
        Ok(organisation)
    }

    async fn get_organogram_files(&self) -> Result<DirectoryRecord, DirectoryError> {
        let files = self.get_json(&["organogram"], &[], Lookup::Plain).await?;
        info!(count = json_len(&files), "Obtained organogram files");
        Ok(files)
    }

    async fn get_organogram_file_properties(
        &self,
        fid: &str,
    ) -> Result<DirectoryRecord, DirectoryError> {
        let organogram = self
            .get_json(&["organogram", fid], &[], Lookup::Keyed)
            .await?;
        info!(fid, properties = %truncated(&organogram, 200), "Obtained organogram file properties");
        Ok(organogram)
    }

    async fn get_dataset_referrers(&self) -> Result<Vec<DirectoryRecord>, DirectoryError> {
        let referrers = self.get_json_list(&["views", "dataset_referrers"], &[]).await?;
        info!(
            count = referrers.len(),
            example = %referrers.first().map(|r| truncated(r, 200)).unwrap_or_default(),
            "Obtained referrers/apps"
        );
        Ok(referrers)
    }

    async fn get_node(&self, nid: &str) -> Result<DirectoryRecord, DirectoryError> {
        let node = self
            .get_json(&["node", nid], &[], Lookup::Keyed)
            .await?;
        info!(nid, node = %truncated(&node, 200), "Obtained node");
        Ok(node)
    }

    async fn get_nodes<'a>(
        &self,
        type_filter: Option<&'a str>,
    ) -> Result<Vec<DirectoryRecord>, DirectoryError> {
        let query: Vec<(&str, &str)> = type_filter
            .map(|t| vec![("parameters[type]", t)])
            .unwrap_or_default();
        let nodes = self.get_json_list(&["node"], &query).await?;
        info!(
            count = nodes.len(),
            type_filter = type_filter.unwrap_or("*"),
            "Obtained nodes"
        );
        Ok(nodes)
    }

    async fn get_comments(&self, node_id: &str) -> Result<Vec<DirectoryRecord>, DirectoryError> {
        let replies = self.get_replies("node", node_id).await?;
        info!(node_id, count = replies.len(), "Obtained replies");
        Ok(replies)
    }

    async fn get_dataset_comments(
        &self,
        entity_id: &str,
    ) -> Result<Vec<DirectoryRecord>, DirectoryError> {
        let replies = self.get_replies("ckan_dataset", entity_id).await?;
        info!(entity_id, count = replies.len(), "Obtained dataset replies");
        Ok(replies)
    }
}

/// Drupal formats some numeric ids as "4,490"; turn them back into "4490".
pub fn strip_thousands_separators(replies: &mut [Value]) {
    for reply in replies.iter_mut() {
        for key in REPLY_ID_FIELDS {
            if let Some(Value::String(field)) = reply.get_mut(key) {
                field.retain(|c| c != ',');
            }
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncated(value: &Value, limit: usize) -> String {
    value.to_string().chars().take(limit).collect()
}

fn json_len(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 1,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
