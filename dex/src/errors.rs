use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    #[error("failed to unmarshal dex.config from configmap: {0}")]
    InvalidDexConfig(#[source] serde_yaml::Error),

    #[error("malformed dex connector: {0}")]
    MalformedConnector(String),

    #[error("failed to marshal dex config: {0}")]
    Serialize(#[source] serde_yaml::Error),
}
