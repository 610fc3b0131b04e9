use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    #[error("Container {0:?} is open in another handle")]
    Locked(std::path::PathBuf),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Invalid entry name: {0}")]
    InvalidName(String),

    #[error("Integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("Metadata table is full ({capacity} slots)")]
    MetadataFull { capacity: u32 },

    #[error("Out of space: container offsets exceed 4 GiB")]
    OutOfSpace,

    #[error("Free list is corrupt: {0}")]
    CorruptFreeList(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
