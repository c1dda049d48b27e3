pub mod event;
pub mod job;
pub mod timestamp;
pub mod wire;
