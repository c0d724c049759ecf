//! Mapping from upload outcomes to retriever acknowledgments.

use crate::gateway::UploadOutcome;

/// The acknowledgment a retriever receives for one staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
pub enum Ack {
    #[strum(serialize = "file_succeeded")]
    Succeeded,
    #[strum(serialize = "file_failed")]
    Failed,
    #[strum(serialize = "file_not_processed")]
    NotProcessed,
}

/// What the loop does with a file after its upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge and continue with the next file.
    Acknowledge(Ack),
    /// Stop the instrument; carries what the gateway reported.
    Abort(String),
}

/// Classify an upload outcome. Anything outside the known set aborts.
pub fn disposition(outcome: &UploadOutcome) -> Disposition {
    match outcome {
        UploadOutcome::Succeeded => Disposition::Acknowledge(Ack::Succeeded),
        UploadOutcome::GatewayNotReady => Disposition::Acknowledge(Ack::Failed),
        UploadOutcome::AlreadyExists => Disposition::Acknowledge(Ack::NotProcessed),
        UploadOutcome::Unrecognized(detail) => Disposition::Abort(detail.clone()),
    }
}
