use thiserror::Error;

/// Errors produced while loading or querying the attack graph model.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("vulnerability {cve} referenced by host {host} is not in the pool")]
    Integrity { cve: String, host: u32 },

    #[error("unknown host id {0}")]
    UnknownHost(u32),

    #[error("unknown CVE {0}")]
    UnknownCve(String),

    #[error("malformed vulnerability record: {0}")]
    MalformedVulnerability(String),

    #[error("malformed attack trace: {0}")]
    InvalidTrace(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
