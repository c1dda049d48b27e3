pub mod channel;
pub mod decoder;
pub mod ingestor;
pub mod validator;

pub use channel::{ChannelError, ChannelReader, ChannelWriter, Frame};
pub use decoder::{decode, DecodeError};
pub use ingestor::{IngestOptions, IngestOutcome, IngestStats, JobIngestor};
pub use validator::{Accepted, DuplicatePolicy, Rejection, Validator};
