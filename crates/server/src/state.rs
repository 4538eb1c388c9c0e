//! Shared state handed to every tool call.

use std::collections::HashMap;
use std::sync::Arc;

use recall_coord::{CommandProducer, Coordinator, Producer};
use recall_core::{AppConfig, Error, Stores};

pub struct AppState {
    pub config: AppConfig,
    pub coord: Coordinator,
    producers: HashMap<String, Arc<dyn Producer>>,
}

impl AppState {
    /// Wire the coordinator and the configured producer commands.
    pub fn new(config: AppConfig, stores: &Stores) -> Result<Self, Error> {
        let coord = Coordinator::new(&config, stores)?;
        let producers = config
            .producers
            .iter()
            .map(|(identity, command)| {
                let producer: Arc<dyn Producer> = Arc::new(CommandProducer::new(
                    identity.as_str(),
                    command.program.clone(),
                    command.args.iter().cloned(),
                    config.producer_timeout(),
                ));
                (identity.clone(), producer)
            })
            .collect();

        Ok(Self { config, coord, producers })
    }

    /// Register an extra producer, replacing any with the same identity.
    pub fn with_producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.producers.insert(producer.identity().to_string(), producer);
        self
    }

    pub fn producer(&self, identity: &str) -> Result<Arc<dyn Producer>, Error> {
        self.producers
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::InvalidInput(format!("unknown producer: {identity}")))
    }

    pub fn producer_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.producers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
    use recall_core::{MemoryStore, SqliteStore};

    let stores = Stores {
        durable: Arc::new(SqliteStore::open_in_memory().await.unwrap()),
        ephemeral: Arc::new(MemoryStore::new()),
        coordination: Arc::new(MemoryStore::unbounded()),
    };
    let config = AppConfig { schedule_delay_ms: 0, ..Default::default() };
    AppState::new(config, &stores).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::config::ProducerCommand;
    use recall_core::{MemoryStore, SqliteStore};

    #[tokio::test]
    async fn test_configured_producers_are_registered() {
        let stores = Stores {
            durable: Arc::new(SqliteStore::open_in_memory().await.unwrap()),
            ephemeral: Arc::new(MemoryStore::new()),
            coordination: Arc::new(MemoryStore::unbounded()),
        };
        let mut config = AppConfig::default();
        config
            .producers
            .insert("summary".into(), ProducerCommand { program: "/bin/true".into(), args: vec![] });

        let state = AppState::new(config, &stores).unwrap();
        assert_eq!(state.producer_names(), vec!["summary"]);
        assert_eq!(state.producer("summary").unwrap().identity(), "summary");
        assert!(matches!(state.producer("transcript"), Err(Error::InvalidInput(_))));
    }
}
