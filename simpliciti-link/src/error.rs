//! Transport status codes.

/// Non-success status reported by a [Network](crate::device::Network) operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("Operation timed out.")]
    Timeout,

    #[error("Bad parameter.")]
    BadParam,

    #[error("No frame pending.")]
    NoFrame,

    #[error("No such link.")]
    NoLink,

    #[error("No access point answered the join request.")]
    NoJoin,

    #[error("No channel available.")]
    NoChannel,

    #[error("Peer could not unlink.")]
    NoPeerUnlink,

    #[error("Empty payload.")]
    NoPayload,

    #[error("Out of memory (link table or queue full).")]
    NoMem,

    #[error("Access point address unknown.")]
    NoApAddress,

    #[error("Frame not acknowledged.")]
    NoAck,

    #[error("Clear channel assessment failed.")]
    TxCcaFail,

    #[error("Radio error. Context: {}", .context)]
    Radio { context: String },
}

impl NetError {
    /// Short status name, as shown on a status line.
    pub fn status_name(&self) -> &'static str {
        match self {
            NetError::Timeout => "TIMEOUT",
            NetError::BadParam => "BAD_PARAM",
            NetError::NoFrame => "NO_FRAME",
            NetError::NoLink => "NO_LINK",
            NetError::NoJoin => "NO_JOIN",
            NetError::NoChannel => "NO_CHANNEL",
            NetError::NoPeerUnlink => "NO_PEER_UNLINK",
            NetError::NoPayload => "NO_PAYLOAD",
            NetError::NoMem => "NOMEM",
            NetError::NoApAddress => "NO_AP_ADDRESS",
            NetError::NoAck => "NO_ACK",
            NetError::TxCcaFail => "TX_CCA_FAIL",
            NetError::Radio { .. } => "RADIO",
        }
    }

    /// Failures the retry policies absorb locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetError::Timeout | NetError::NoFrame | NetError::NoAck | NetError::TxCcaFail
        )
    }
}
