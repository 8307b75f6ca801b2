use thiserror::Error;

/// Errors produced while decoding a frame carrying the adhocd wire protocol. Per the error
/// taxonomy of the daemon, both variants are handled by the caller as "drop the frame, count it,
/// keep going" — neither is ever allowed to escape past the receive path.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CodecError {
    #[error("buffer shorter than the minimum length for this header kind")]
    MalformedHeader,
    #[error("unknown message type tag {0:#04x}")]
    UnknownKind(u8),
}

impl<I> From<nom::Err<nom::error::Error<I>>> for CodecError {
    fn from(_: nom::Err<nom::error::Error<I>>) -> Self {
        CodecError::MalformedHeader
    }
}
