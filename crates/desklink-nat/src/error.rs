use thiserror::Error;

#[derive(Error, Debug)]
pub enum NatError {
    #[error("no NAT gateway discovered: {0}")]
    Discovery(String),

    #[error("failed to query external IP: {0}")]
    ExternalIp(String),

    #[error("failed to add mapping {external_port} -> {internal_port}: {reason}")]
    AddMapping {
        external_port: u16,
        internal_port: u16,
        reason: String,
    },

    #[error("failed to delete mapping for external port {external_port}: {reason}")]
    DeleteMapping { external_port: u16, reason: String },

    #[error("no local IPv4 address: {0}")]
    LocalAddress(String),
}

pub type Result<T> = std::result::Result<T, NatError>;
