//! Error types for morphology loading and cell configuration

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CellError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SWC parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Duplicate SWC node id: {0}")]
    DuplicateNode(u64),

    #[error("SWC node {node} references missing parent {parent}")]
    MissingParent { node: u64, parent: u64 },

    #[error("No root node found (parent == -1)")]
    NoRoot,

    #[error("Multiple root nodes found: {0:?}")]
    MultipleRoots(Vec<u64>),

    #[error("Zero-radius for non-endpoint node {0}")]
    ZeroRadius(u64),

    #[error("Morphology has no soma")]
    NoSoma,

    #[error("Section not found: {0}")]
    SectionNotFound(String),

    #[error("Unknown mechanism: {0}")]
    UnknownMechanism(String),

    #[error("Mechanism {mechanism} is not inserted in {section}")]
    MechanismNotInserted { section: String, mechanism: String },

    #[error("Unknown parameter {0}")]
    UnknownParameter(String),

    #[error("Ion {ion} is not present in {section}")]
    IonNotPresent { section: String, ion: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: f64 },

    #[error("Connection location must lie in [0, 1], got {0}")]
    InvalidLocation(f64),

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Parameter file has no {0} block")]
    MissingBlock(String),

    #[error("Parameter file error: {0}")]
    Parameters(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CellError>;
