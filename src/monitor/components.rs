//! Construction of everything the monitor needs

use crate::config::AppConfig;
use crate::connector::{build_connector, Connector, ConnectorError};
use crate::monitor::{Monitor, MonitorSettings};
use iow_shared::{Interpreter, Storage, StorageError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Which component failed to come up
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("Storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Connector setup failed: {0}")]
    Connector(#[from] ConnectorError),
}

/// Storage, interpreter and connector built from one config
pub struct Components {
    pub storage: Storage,
    pub interpreter: Interpreter,
    pub connector: Box<dyn Connector>,
    pub settings: MonitorSettings,
}

impl Components {
    pub fn build(config: &AppConfig) -> Result<Self, ComponentError> {
        let storage = Storage::create(&config.database_location, config.overwrite)?;
        info!(
            database = %storage.path().display(),
            overwrite = config.overwrite,
            "Storage ready"
        );

        let connector = build_connector(config)?;
        info!(
            connector = connector.name(),
            candidates = ?config.connection_list,
            "Connector ready"
        );

        Ok(Self {
            storage,
            interpreter: Interpreter::new(),
            connector,
            settings: MonitorSettings::from_config(config),
        })
    }

    pub fn into_monitor(self, shutdown: watch::Receiver<bool>) -> Monitor {
        Monitor::new(
            self.connector,
            self.storage,
            self.interpreter,
            self.settings,
            shutdown,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::TickOutcome;

    fn config(dir: &std::path::Path, overwrite: bool) -> AppConfig {
        AppConfig::from_yaml(&format!(
            "database_location: {}\noverwrite: {overwrite}\ntimeout: 0.05\nconnection_type: simulated\nconnection_list: []\npoll_interval: 0\n",
            dir.join("iow.db").display()
        ))
        .unwrap()
    }

    #[test]
    fn test_invalid_schema_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("iow.db"), "not a sqlite database ".repeat(64)).unwrap();

        let result = Components::build(&config(dir.path(), false));
        assert!(matches!(
            result,
            Err(ComponentError::Storage(StorageError::Schema { .. }))
        ));

        assert!(Components::build(&config(dir.path(), true)).is_ok());
    }

    #[tokio::test]
    async fn test_simulated_components_run() {
        let dir = tempfile::tempdir().unwrap();
        let components = Components::build(&config(dir.path(), false)).unwrap();
        let (_tx, rx) = watch::channel(false);
        let mut monitor = components.into_monitor(rx);

        assert_eq!(monitor.tick().await.unwrap(), TickOutcome::Connected);
        monitor.run_for(3).await.unwrap();
    }
}
