use std::sync::Arc;

use serde::Deserialize;

use crate::error::TopicError;
use crate::traits::TopicBackend;

#[cfg(feature = "memory")]
use crate::memory::MemoryTopic;

#[cfg(feature = "postgres")]
use crate::postgres::PostgresTopic;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum TopicConfig {
    #[default]
    Memory,
    #[cfg(feature = "postgres")]
    Postgres {
        url: String,
        #[serde(default = "default_topic_table")]
        table: String,
        #[serde(default = "default_partitions")]
        partitions: u32,
    },
}

impl TopicConfig {
    /// Construct the configured backend.
    pub async fn connect(&self) -> Result<Arc<dyn TopicBackend>, TopicError> {
        match self {
            #[cfg(feature = "memory")]
            Self::Memory => Ok(Arc::new(MemoryTopic::default())),

            #[cfg(feature = "postgres")]
            Self::Postgres {
                url,
                table,
                partitions,
            } => {
                let topic = PostgresTopic::new(url, table.clone(), *partitions).await?;
                Ok(Arc::new(topic))
            }

            #[allow(unreachable_patterns)]
            _ => Err(TopicError::Backend(
                "No suitable topic backend enabled".to_string(),
            )),
        }
    }
}

#[cfg(feature = "postgres")]
fn default_topic_table() -> String {
    "faultline_topic".to_string()
}

#[cfg(feature = "postgres")]
fn default_partitions() -> u32 {
    PostgresTopic::DEFAULT_PARTITIONS
}
