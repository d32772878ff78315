//! Message types for actor communication.

use ractor::RpcReplyPort;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one claim cycle.
    Poll,

    /// Stop after the in-flight job, if any.
    Shutdown,
}

/// Messages for the MonitorActor.
#[derive(Debug)]
pub enum MonitorMessage {
    /// Scan processing lists for expired claims.
    Scan,

    /// Stop the monitor.
    Shutdown,
}

/// Messages for the SchedulerActor.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Evaluate every entry against the current time.
    Tick,

    /// Number of scheduled entries.
    EntryCount { reply: RpcReplyPort<usize> },

    /// Stop the scheduler.
    Shutdown,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Number of running workers.
    WorkerCount { reply: RpcReplyPort<usize> },

    /// Stop every child, then the supervisor.
    Shutdown,
}
