//! Topology provisioning: rebuild an RTDB from scratch for one topology.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::platform::{EngineError, StorageEngine};
use crate::topology::layout::Topology;
use crate::topology::message::{message_dir, MESSAGE_FILE};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to create database {rtdb}")]
    CreateFailed {
        rtdb: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to load database {rtdb}")]
    LoadFailed {
        rtdb: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to write point attributes into {rtdb}")]
    ItemPutFailed {
        rtdb: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to write mapping records into {rtdb}")]
    MappingFailed {
        rtdb: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to save database {rtdb}")]
    SaveFailed {
        rtdb: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to transfer message file for {rtdb}")]
    MessageTransferFailed {
        rtdb: String,
        #[source]
        source: EngineError,
    },
}

/// What a successful provisioning pass wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub rtdb: String,
    pub points: usize,
    pub mappings: usize,
    pub messages: usize,
    /// The prior database could not be deleted (usually because it did not
    /// exist).
    pub delete_skipped: bool,
}

/// Writes topologies into the storage engine.
pub struct Provisioner<'a, S: StorageEngine + ?Sized> {
    engine: &'a S,
}

impl<'a, S: StorageEngine + ?Sized> Provisioner<'a, S> {
    pub fn new(engine: &'a S) -> Self {
        Self { engine }
    }

    /// Delete, recreate and populate `rtdb`. On success the engine's current
    /// database is `rtdb`.
    pub async fn provision(&self, rtdb: &str, topology: &Topology) -> Result<ProvisionOutcome, ProvisionError> {
        let delete_skipped = match self.engine.delete_database(rtdb).await {
            Ok(()) => false,
            Err(e) => {
                warn!(rtdb, error = %e, "could not delete prior database, continuing");
                true
            }
        };

        self.engine
            .create_database(rtdb)
            .await
            .map_err(|source| ProvisionError::CreateFailed {
                rtdb: rtdb.to_string(),
                source,
            })?;
        self.engine
            .load_database(rtdb)
            .await
            .map_err(|source| ProvisionError::LoadFailed {
                rtdb: rtdb.to_string(),
                source,
            })?;

        let items = topology.items();
        self.engine
            .upsert_items(&items, true)
            .await
            .map_err(|source| ProvisionError::ItemPutFailed {
                rtdb: rtdb.to_string(),
                source,
            })?;
        debug!(rtdb, count = items.len(), "point attributes written");

        let mappings = topology.mappings();
        self.engine
            .upsert_mapping_records(&mappings)
            .await
            .map_err(|source| ProvisionError::MappingFailed {
                rtdb: rtdb.to_string(),
                source,
            })?;
        debug!(rtdb, count = mappings.len(), "mapping records written");

        self.engine
            .save_database(rtdb)
            .await
            .map_err(|source| ProvisionError::SaveFailed {
                rtdb: rtdb.to_string(),
                source,
            })?;

        let lines = topology.message_lines();
        self.engine
            .write_remote_file(&lines, &message_dir(rtdb), MESSAGE_FILE)
            .await
            .map_err(|source| ProvisionError::MessageTransferFailed {
                rtdb: rtdb.to_string(),
                source,
            })?;

        info!(
            rtdb,
            points = items.len(),
            mappings = mappings.len(),
            messages = lines.len(),
            "database provisioned"
        );

        Ok(ProvisionOutcome {
            rtdb: rtdb.to_string(),
            points: items.len(),
            mappings: mappings.len(),
            messages: lines.len(),
            delete_skipped,
        })
    }
}
