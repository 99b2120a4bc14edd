//! Partition engine error types

use thiserror::Error;

/// The main error type for partition table operations
#[derive(Error, Debug)]
pub enum Error {
    /// Read, write, or seek failure on the device
    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No GPT header signature at the LBA read
    #[error("Not a GPT disk: {0}")]
    NotGpt(String),

    /// No MBR boot signature in sector 0
    #[error("Not an MBR disk: {0}")]
    NotMbr(String),

    /// Neither a GPT header nor an MBR was found
    #[error("No recognized partition table on device")]
    UnrecognizedTable,

    /// GPT header fields are structurally unusable
    #[error("Malformed GPT header: {0}")]
    MalformedHeader(String),

    /// An EBR in the logical partition chain is unreadable
    #[error("Malformed EBR at LBA {lba}: {reason}")]
    MalformedEbr { lba: u64, reason: String },

    /// Stored CRC32 does not match the recomputed value
    #[error("{region} CRC32 mismatch: computed 0x{computed:08X}, stored 0x{stored:08X}")]
    CrcMismatch {
        region: &'static str,
        computed: u32,
        stored: u32,
    },

    /// No free partition slot in the table
    #[error("No partition slot available: {0}")]
    SlotUnavailable(String),

    /// Requested range falls outside the permitted region
    #[error("Range LBA {first_lba}..={last_lba} out of bounds: {reason}")]
    OutOfBounds {
        first_lba: u64,
        last_lba: u64,
        reason: String,
    },

    /// The operation is deliberately not supported
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Type name does not resolve to a known partition type
    #[error("Unknown partition type: {0}")]
    UnknownPartitionType(String),

    /// The caller reported the target partition as mounted
    #[error("Partition {0} is mounted; unmount it first")]
    PartitionMounted(usize),

    /// Partition number does not exist in the table
    #[error("Partition {0} not found")]
    PartitionNotFound(usize),

    /// Request is internally inconsistent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid sector size or disk size
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A size computed from on-disk fields exceeds a safety limit
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// Read-back of the freshly written backup GPT did not match
    #[error("Backup GPT verification failed: {0}")]
    VerificationFailed(String),

    /// Backup GPT was written but the primary write failed afterwards
    #[error("Backup GPT committed but primary write failed; repair the primary table: {source}")]
    PartiallyCommitted {
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for partition table operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a not-GPT detection error
    pub fn not_gpt(msg: impl Into<String>) -> Self {
        Error::NotGpt(msg.into())
    }

    /// Create a not-MBR detection error
    pub fn not_mbr(msg: impl Into<String>) -> Self {
        Error::NotMbr(msg.into())
    }

    /// Create a malformed header error
    pub fn malformed_header(msg: impl Into<String>) -> Self {
        Error::MalformedHeader(msg.into())
    }

    /// Create a malformed EBR error
    pub fn malformed_ebr(lba: u64, reason: impl Into<String>) -> Self {
        Error::MalformedEbr {
            lba,
            reason: reason.into(),
        }
    }

    /// Create an out-of-bounds error for an inclusive LBA range
    pub fn out_of_bounds(first_lba: u64, last_lba: u64, reason: impl Into<String>) -> Self {
        Error::OutOfBounds {
            first_lba,
            last_lba,
            reason: reason.into(),
        }
    }

    /// Create a slot unavailable error
    pub fn slot_unavailable(msg: impl Into<String>) -> Self {
        Error::SlotUnavailable(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedOperation(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Error::InvalidRequest(msg.into())
    }

    /// Create an invalid geometry error
    pub fn invalid_geometry(msg: impl Into<String>) -> Self {
        Error::InvalidGeometry(msg.into())
    }

    /// True for errors that only signal "this is not that format"
    pub fn is_detection_miss(&self) -> bool {
        matches!(self, Error::NotGpt(_) | Error::NotMbr(_))
    }
}
