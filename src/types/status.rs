use std::fmt::{Display, Formatter};

/// Linking state of a type object.
///
/// Values are ordered: a type only ever moves forward, except into one of
/// the two error states, which are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ClassStatus {
    NotReady = 0,
    /// Failed after reaching `Resolved`.
    ErrorResolved = 2,
    /// Failed before reaching `Resolved`.
    ErrorUnresolved = 3,
    /// Loaded from a class definition, super type not yet resolved.
    Idx = 4,
    Loaded = 5,
    Resolving = 6,
    Resolved = 7,
    Verifying = 8,
    RetryVerificationAtRuntime = 9,
    VerifiedNeedsAccessChecks = 10,
    Verified = 11,
    SuperclassValidated = 12,
    Initializing = 13,
    Initialized = 14,
    VisiblyInitialized = 15,
}

impl ClassStatus {
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => ClassStatus::ErrorResolved,
            3 => ClassStatus::ErrorUnresolved,
            4 => ClassStatus::Idx,
            5 => ClassStatus::Loaded,
            6 => ClassStatus::Resolving,
            7 => ClassStatus::Resolved,
            8 => ClassStatus::Verifying,
            9 => ClassStatus::RetryVerificationAtRuntime,
            10 => ClassStatus::VerifiedNeedsAccessChecks,
            11 => ClassStatus::Verified,
            12 => ClassStatus::SuperclassValidated,
            13 => ClassStatus::Initializing,
            14 => ClassStatus::Initialized,
            15 => ClassStatus::VisiblyInitialized,
            _ => ClassStatus::NotReady,
        }
    }

    pub fn is_erroneous(self) -> bool {
        matches!(self, ClassStatus::ErrorResolved | ClassStatus::ErrorUnresolved)
    }

    pub fn is_resolved(self) -> bool {
        self >= ClassStatus::Resolved || self == ClassStatus::ErrorResolved
    }

    pub fn is_verified(self) -> bool {
        self >= ClassStatus::Verified
    }

    pub fn is_initialized(self) -> bool {
        self >= ClassStatus::Initialized
    }
}

impl Display for ClassStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClassStatus::NotReady => "NotReady",
            ClassStatus::ErrorResolved => "ErrorResolved",
            ClassStatus::ErrorUnresolved => "ErrorUnresolved",
            ClassStatus::Idx => "Idx",
            ClassStatus::Loaded => "Loaded",
            ClassStatus::Resolving => "Resolving",
            ClassStatus::Resolved => "Resolved",
            ClassStatus::Verifying => "Verifying",
            ClassStatus::RetryVerificationAtRuntime => "RetryVerificationAtRuntime",
            ClassStatus::VerifiedNeedsAccessChecks => "VerifiedNeedsAccessChecks",
            ClassStatus::Verified => "Verified",
            ClassStatus::SuperclassValidated => "SuperclassValidated",
            ClassStatus::Initializing => "Initializing",
            ClassStatus::Initialized => "Initialized",
            ClassStatus::VisiblyInitialized => "VisiblyInitialized",
        };
        f.write_str(name)
    }
}
