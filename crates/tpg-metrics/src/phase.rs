//! Scheduler phases and counters

/// Timed scheduler phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Picking the next ready operations
    Explore,
    /// Running business functions
    Process,
    /// Resolving children countdowns
    Notify,
    /// Abort marking and rollback
    Abort,
    /// Level computation at batch start
    FirstExplore,
    /// Operation construction and dependency linking
    Construction,
}

impl Phase {
    /// Number of phases
    pub const COUNT: usize = 6;

    /// Every phase in index order
    pub const ALL: [Phase; Phase::COUNT] = [
        Phase::Explore,
        Phase::Process,
        Phase::Notify,
        Phase::Abort,
        Phase::FirstExplore,
        Phase::Construction,
    ];

    /// Dense index
    pub fn index(self) -> usize {
        self as usize
    }

    /// Export name
    pub fn name(self) -> &'static str {
        match self {
            Phase::Explore => "explore",
            Phase::Process => "process",
            Phase::Notify => "notify",
            Phase::Abort => "abort",
            Phase::FirstExplore => "first_explore",
            Phase::Construction => "construction",
        }
    }
}

/// Scheduler event counter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Operations that reached EXECUTED
    OpsExecuted,
    /// Operations that reached ABORTED
    OpsAborted,
    /// Guard failures
    OpsFailed,
    /// Coordinated rollbacks
    Rollbacks,
    /// Busy-wait queue retries
    BusyWaitRetries,
    /// Recovery replays that needed a second pass
    ReplaySecondPass,
}

impl Counter {
    /// Number of counters
    pub const COUNT: usize = 6;

    /// Every counter in index order
    pub const ALL: [Counter; Counter::COUNT] = [
        Counter::OpsExecuted,
        Counter::OpsAborted,
        Counter::OpsFailed,
        Counter::Rollbacks,
        Counter::BusyWaitRetries,
        Counter::ReplaySecondPass,
    ];

    /// Dense index
    pub fn index(self) -> usize {
        self as usize
    }

    /// Export name
    pub fn name(self) -> &'static str {
        match self {
            Counter::OpsExecuted => "ops_executed",
            Counter::OpsAborted => "ops_aborted",
            Counter::OpsFailed => "ops_failed",
            Counter::Rollbacks => "rollbacks",
            Counter::BusyWaitRetries => "busy_wait_retries",
            Counter::ReplaySecondPass => "replay_second_pass",
        }
    }
}
