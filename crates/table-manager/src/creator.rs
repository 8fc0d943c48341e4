//! Create-Table Step
//!
//! Creates every table from a list of definition files, skipping tables that
//! already exist.

use std::path::PathBuf;
use std::time::Duration;

use dynamo_emulator_core::TablesConfig;
use tracing::info;

use crate::client::{DynamoClient, RESOURCE_IN_USE};
use crate::definition::TableDefinition;
use crate::error::TableError;
use crate::signing::Credentials;

/// What happened to one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Created(String),
    /// Already existed
    Skipped(String),
}

impl TableOutcome {
    pub fn table_name(&self) -> &str {
        match self {
            TableOutcome::Created(name) | TableOutcome::Skipped(name) => name,
        }
    }
}

/// Creates tables through one client
#[derive(Debug, Clone)]
pub struct TableCreator {
    client: DynamoClient,
    poll_interval: Duration,
    active_timeout: Duration,
}

impl TableCreator {
    pub fn new(client: DynamoClient) -> Self {
        let defaults = TablesConfig::default();
        Self {
            client,
            poll_interval: defaults.active_poll_interval(),
            active_timeout: defaults.active_timeout(),
        }
    }

    /// Creator for the emulator on `port`, or the configured endpoint
    pub fn from_config(config: &TablesConfig, port: u16) -> Result<Self, TableError> {
        let client = DynamoClient::new(
            &config.endpoint_for(port),
            &config.region,
            Credentials::new(config.key.as_str(), config.secret.as_str()),
        )?;
        Ok(Self::new(client).with_active_wait(config.active_poll_interval(), config.active_timeout()))
    }

    pub fn with_active_wait(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.active_timeout = timeout;
        self
    }

    pub fn client(&self) -> &DynamoClient {
        &self.client
    }

    /// Create the tables in `paths`, in order.
    ///
    /// All files are read and checked before the first request, so a bad
    /// file leaves the endpoint untouched.
    pub async fn create_all(&self, paths: &[PathBuf]) -> Result<Vec<TableOutcome>, TableError> {
        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            definitions.push(TableDefinition::load(path).await?);
        }

        let mut outcomes = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            outcomes.push(self.create(definition).await?);
        }
        Ok(outcomes)
    }

    /// Create one table unless it exists, then wait for it to be active
    pub async fn create(&self, definition: &TableDefinition) -> Result<TableOutcome, TableError> {
        let name = definition.name();
        let request = definition.to_request()?;

        if self.client.describe_table(name).await?.is_some() {
            info!("Table '{}' already exists, skipping", name);
            return Ok(TableOutcome::Skipped(name.to_string()));
        }

        match self.client.create_table(&request).await {
            Ok(_) => {}
            // Created by someone else since the describe
            Err(e) if e.api_code() == Some(RESOURCE_IN_USE) => {
                info!("Table '{}' already exists, skipping", name);
                return Ok(TableOutcome::Skipped(name.to_string()));
            }
            Err(e) => return Err(e),
        }

        self.client
            .wait_until_active(name, self.poll_interval, self.active_timeout)
            .await?;
        info!("Table {} is now ready for use", name);
        Ok(TableOutcome::Created(name.to_string()))
    }
}
