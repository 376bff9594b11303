//! Error types for the framing layer.

/// Errors that can occur while unframing a wire message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The message has no bytes at all, so there is no channel tag to
    /// read. Sessions log and drop these.
    #[error("empty frame: missing channel tag")]
    EmptyFrame,
}
