//! OBD-II Polling Scheduler
//!
//! Repeatedly queries the supported PIDs over a single transport, one
//! exchange at a time, and hands each decoded value to the caller as a
//! [`LiveSample`]. A run can be stopped at any point; an exchange already in
//! flight is allowed to finish.

mod scheduler;

pub use scheduler::{
    FailurePolicy, LiveSample, PollingScheduler, SampleValue, SchedulerConfig, TickReport,
};
