pub mod constants;
pub mod types;

pub use types::event::JobEvent;
pub use types::job::{JobDescriptor, JobId, Pid, RegistryEntry};
pub use types::timestamp::JobTimestamp;
pub use types::wire::WireJobDescriptor;
