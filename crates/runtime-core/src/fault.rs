use thiserror::Error;

/// Error classes used for diagnostics aggregation and policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// A bounded queue or per-event budget was exhausted.
    Capacity,
    /// Event dispatch reached a state with no handler.
    Dispatch,
    /// An argument-intake status was illegal at the call site.
    Argument,
    /// A machine reference did not resolve inside this process.
    Identity,
    /// A scheduling entry point was used under the wrong policy.
    Scheduling,
    /// The static program tables are malformed.
    Program,
}

/// Stable code taxonomy for fatal runtime errors.
///
/// Every runtime failure is fatal at the core: after the host error sink
/// observes it the process transitions to terminating and subsequent dispatch
/// reports [`crate::StepResult::Terminating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// A send exceeded the receiver's bounded queue size.
    QueueOverflow = 0x01,
    /// A send exceeded an event's per-queue instance budget.
    EventMaxInstancesExceeded = 0x02,
    /// An event reached the bottom of the state stack unhandled.
    UnhandledEvent = 0x03,
    /// A reserved argument status was used at an intake site.
    IllegalParamStatus = 0x04,
    /// A machine-reference value did not resolve in this process.
    InvalidMachineId = 0x05,
    /// A cooperative scheduling entry point ran under the wrong policy.
    InvalidPolicy = 0x06,
    /// A send targeted a halted machine.
    SendToHalted = 0x07,
    /// The static program tables failed coherence validation.
    InvalidProgramTable = 0x08,
}

impl ErrorCode {
    /// Converts the code to its stable low-byte value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable low-byte value back into a code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::QueueOverflow),
            0x02 => Some(Self::EventMaxInstancesExceeded),
            0x03 => Some(Self::UnhandledEvent),
            0x04 => Some(Self::IllegalParamStatus),
            0x05 => Some(Self::InvalidMachineId),
            0x06 => Some(Self::InvalidPolicy),
            0x07 => Some(Self::SendToHalted),
            0x08 => Some(Self::InvalidProgramTable),
            _ => None,
        }
    }

    /// Returns the diagnostics class for this code.
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::QueueOverflow | Self::EventMaxInstancesExceeded => ErrorClass::Capacity,
            Self::UnhandledEvent => ErrorClass::Dispatch,
            Self::IllegalParamStatus => ErrorClass::Argument,
            Self::InvalidMachineId | Self::SendToHalted => ErrorClass::Identity,
            Self::InvalidPolicy => ErrorClass::Scheduling,
            Self::InvalidProgramTable => ErrorClass::Program,
        }
    }
}

/// Fatal runtime errors surfaced through the host error sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A send would grow the receiver's queue past its declared bound.
    #[error("queue overflow on machine `{machine}` sending `{event}` (limit {limit})")]
    QueueOverflow {
        /// Receiver machine name.
        machine: String,
        /// Offending event name.
        event: String,
        /// Declared queue bound.
        limit: usize,
    },
    /// A send would exceed an event's unconsumed-instance budget in one queue.
    #[error("event `{event}` exceeded its max-instances budget on machine `{machine}` (limit {limit})")]
    EventMaxInstancesExceeded {
        /// Receiver machine name.
        machine: String,
        /// Offending event name.
        event: String,
        /// Declared per-queue instance budget.
        limit: u32,
    },
    /// An event matched no defer, transition, or do-handler down the whole
    /// state stack.
    #[error("machine `{machine}` cannot handle event `{event}` in state `{state}`")]
    UnhandledEvent {
        /// Machine name.
        machine: String,
        /// State in which the stack bottomed out.
        state: String,
        /// Offending event name.
        event: String,
    },
    /// A reserved argument status reached an intake site.
    #[error("illegal argument status in {operation}")]
    IllegalParamStatus {
        /// Intake operation that rejected the argument.
        operation: &'static str,
    },
    /// A machine-reference value was not a reference, carried a foreign
    /// process guid, or was out of range.
    #[error("machine id {machine_id} does not resolve in this process")]
    InvalidMachineId {
        /// The unresolvable 1-based machine id (0 when the value was not a
        /// machine reference at all).
        machine_id: u32,
    },
    /// A cooperative entry point ran while the process was task-neutral.
    #[error("cooperative scheduling entry point used under task-neutral policy")]
    InvalidPolicy,
    /// A send targeted a machine that already executed halt.
    #[error("send of `{event}` to halted machine `{machine}`")]
    SendToHalted {
        /// Receiver machine name.
        machine: String,
        /// Offending event name.
        event: String,
    },
    /// The static program tables failed coherence validation.
    #[error("invalid program table: {reason}")]
    InvalidProgramTable {
        /// Human-readable description of the violated table invariant.
        reason: String,
    },
}

impl RuntimeError {
    /// The stable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::QueueOverflow { .. } => ErrorCode::QueueOverflow,
            Self::EventMaxInstancesExceeded { .. } => ErrorCode::EventMaxInstancesExceeded,
            Self::UnhandledEvent { .. } => ErrorCode::UnhandledEvent,
            Self::IllegalParamStatus { .. } => ErrorCode::IllegalParamStatus,
            Self::InvalidMachineId { .. } => ErrorCode::InvalidMachineId,
            Self::InvalidPolicy => ErrorCode::InvalidPolicy,
            Self::SendToHalted { .. } => ErrorCode::SendToHalted,
            Self::InvalidProgramTable { .. } => ErrorCode::InvalidProgramTable,
        }
    }

    /// The diagnostics class for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.code().class()
    }
}
