//! Error types for SetuLink

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuLink error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid packet or frame field
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Checksum mismatch
    #[error("Checksum error: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumError {
        /// Checksum computed over the received bytes
        expected: u8,
        /// Checksum carried in the frame
        actual: u8,
    },

    /// Object type or instance not found in the registry
    #[error("Unknown object: {obj_id:#010x} instance {inst_id}")]
    UnknownObject {
        /// Object type id
        obj_id: u32,
        /// Instance id
        inst_id: u16,
    },

    /// Instance id already occupied
    #[error("Instance conflict: {obj_id:#010x} instance {inst_id} already registered")]
    InstanceConflict {
        /// Object type id
        obj_id: u32,
        /// Requested instance id
        inst_id: u16,
    },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Configuration parse error
    #[error("Config error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration serialize error
    #[error("Config error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
