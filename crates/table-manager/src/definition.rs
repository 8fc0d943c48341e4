//! Table Definitions
//!
//! JSON files shaped like a `CreateTable` request. Keys other than the ones
//! modelled here are passed through to the request unchanged.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TableError;

/// One element of `KeySchema`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    pub attribute_name: String,
    /// `HASH` or `RANGE`
    pub key_type: String,
}

/// One element of `AttributeDefinitions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    pub attribute_name: String,
    /// `S`, `N` or `B`
    pub attribute_type: String,
}

/// Capacity written either as `"5"` or `5`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapacityUnits {
    Number(u64),
    Text(String),
}

impl CapacityUnits {
    pub fn value(&self) -> Option<u64> {
        match self {
            CapacityUnits::Number(n) => Some(*n),
            CapacityUnits::Text(s) => s.trim().parse().ok(),
        }
    }

    fn raw(&self) -> String {
        match self {
            CapacityUnits::Number(n) => n.to_string(),
            CapacityUnits::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisionedThroughput {
    pub read_capacity_units: CapacityUnits,
    pub write_capacity_units: CapacityUnits,
}

/// A parsed table definition file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDefinition {
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute_definitions: Vec<AttributeDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_throughput: Option<ProvisionedThroughput>,
    /// Everything else, e.g. `GlobalSecondaryIndexes`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TableDefinition {
    /// Read and parse a definition file
    pub async fn load(path: &Path) -> Result<Self, TableError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TableError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(path, &contents)
    }

    /// Parse definition JSON; `path` is only used in errors
    pub fn parse(path: &Path, contents: &str) -> Result<Self, TableError> {
        let parse_err = |source| TableError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let value: Value = serde_json::from_str(contents).map_err(parse_err)?;
        let named = matches!(
            value.get("TableName"),
            Some(Value::String(name)) if !name.trim().is_empty()
        );
        if !named {
            return Err(TableError::MissingTableName {
                path: path.to_path_buf(),
            });
        }

        serde_json::from_value(value).map_err(parse_err)
    }

    pub fn name(&self) -> &str {
        &self.table_name
    }

    /// `CreateTable` request body; capacity units become numbers
    pub fn to_request(&self) -> Result<Value, TableError> {
        let mut body = self.extra.clone();
        body.insert("TableName".into(), Value::String(self.table_name.clone()));

        if !self.key_schema.is_empty() {
            body.insert("KeySchema".into(), to_value(&self.key_schema));
        }
        if !self.attribute_definitions.is_empty() {
            body.insert(
                "AttributeDefinitions".into(),
                to_value(&self.attribute_definitions),
            );
        }
        if let Some(throughput) = &self.provisioned_throughput {
            let read = self.capacity("ReadCapacityUnits", &throughput.read_capacity_units)?;
            let write = self.capacity("WriteCapacityUnits", &throughput.write_capacity_units)?;
            body.insert(
                "ProvisionedThroughput".into(),
                serde_json::json!({
                    "ReadCapacityUnits": read,
                    "WriteCapacityUnits": write,
                }),
            );
        }

        Ok(Value::Object(body))
    }

    fn capacity(&self, field: &'static str, units: &CapacityUnits) -> Result<u64, TableError> {
        units.value().ok_or_else(|| TableError::InvalidCapacity {
            table: self.table_name.clone(),
            field,
            value: units.raw(),
        })
    }
}

fn to_value<T: Serialize>(items: &[T]) -> Value {
    Value::Array(
        items
            .iter()
            .filter_map(|item| serde_json::to_value(item).ok())
            .collect(),
    )
}
