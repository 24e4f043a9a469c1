//! Registration requests submitted to the workflow.
//!
//! A request describes one data product: a storage location owned by a
//! producer account, the database it is cataloged under in the central
//! account, and the tables it exposes.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A data product registration request.
///
/// Field names follow the wire format of the inbound registration message,
/// so a request file can be passed through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    /// Storage path of the data product (e.g. "bucket/path").
    pub data_product_location: String,

    /// Account that owns the data product.
    pub producer_account_id: String,

    /// Database name local to the producer account.
    pub database_name: String,

    /// Tables exposed by the data product.
    pub tables: Vec<TableSpec>,

    /// Owner recorded in the database metadata.
    pub product_owner_name: String,

    /// Whether the product contains personally identifiable information.
    #[serde(default)]
    pub product_pii_flag: bool,
}

impl WorkflowRequest {
    /// Load a request from a YAML (or JSON) file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a request from YAML content (JSON is a subset of YAML)
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse registration request")
    }

    /// Name of the database in the central catalog.
    ///
    /// Derived deterministically so repeated submissions of the same
    /// request always target the same database.
    pub fn central_database_name(&self) -> String {
        format!("{}_{}", self.producer_account_id, self.database_name)
    }

    /// Validate the request before any provisioning side effect.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.data_product_location.is_empty() {
            return Err(RequestError::EmptyField("dataProductLocation"));
        }
        if self.producer_account_id.is_empty() {
            return Err(RequestError::EmptyField("producerAccountId"));
        }
        if self.database_name.is_empty() {
            return Err(RequestError::EmptyField("databaseName"));
        }
        if self.product_owner_name.is_empty() {
            return Err(RequestError::EmptyField("productOwnerName"));
        }
        if self.tables.is_empty() {
            return Err(RequestError::NoTables);
        }

        for (i, table) in self.tables.iter().enumerate() {
            if table.name.is_empty() {
                return Err(RequestError::EmptyTableField { index: i, field: "name" });
            }
            if table.location.is_empty() {
                return Err(RequestError::EmptyTableField {
                    index: i,
                    field: "location",
                });
            }

            // Table names are unique within a request
            if self.tables[..i].iter().any(|t| t.name == table.name) {
                return Err(RequestError::DuplicateTable(table.name.clone()));
            }
        }

        Ok(())
    }
}

/// A single table within a data product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    /// Table name (unique within the request)
    pub name: String,

    /// Storage sub-path holding the table's data
    pub location: String,
}

/// Request validation errors, raised before any external side effect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("request has no tables")]
    NoTables,

    #[error("duplicate table name '{0}'")]
    DuplicateTable(String),

    #[error("table {index} has an empty {field}")]
    EmptyTableField { index: usize, field: &'static str },
}
