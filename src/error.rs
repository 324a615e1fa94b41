use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// The rendering device, blit shaders, input layout, or sampler could
    /// not be created. No capture is possible on this machine/config.
    DeviceInitFailed(anyhow::Error),

    /// The requested output index does not resolve to an attached display.
    OutputEnumerationFailed(u32),

    /// The OS cap on concurrent duplication sessions for this output has
    /// been reached. Retrying does not help until another consumer exits.
    DuplicationUnavailable,

    AccessLost,

    /// An acquire failed after recovery was already attempted once in the
    /// same call. The caller may retry on its own schedule.
    AcquireFailed,

    Timeout,

    /// Growing the pointer shape buffer failed; its capacity is now zero.
    OutOfMemory,

    /// The pointer shape query failed after a successful reallocation; the
    /// buffer was freed and the shape is stale until the next update.
    ShapeRetrievalFailed,

    InvalidConfig(String),

    BufferOverflow,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::InvalidConfig(_) | Self::OutputEnumerationFailed(_) => {
                CaptureErrorClass::InvalidInput
            }
            Self::AccessLost | Self::AcquireFailed | Self::Timeout | Self::ShapeRetrievalFailed => {
                CaptureErrorClass::Transient
            }
            Self::DeviceInitFailed(_)
            | Self::DuplicationUnavailable
            | Self::OutOfMemory
            | Self::BufferOverflow
            | Self::Platform(_) => CaptureErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), CaptureErrorClass::Transient)
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceInitFailed(inner) => {
                write!(f, "failed to initialize rendering device: {inner}")
            }
            Self::OutputEnumerationFailed(index) => {
                write!(f, "output {index} does not exist on any adapter")
            }
            Self::DuplicationUnavailable => write!(
                f,
                "the maximum number of applications using desktop duplication is already running"
            ),
            Self::AccessLost => write!(f, "duplication access lost"),
            Self::AcquireFailed => {
                write!(f, "failed to acquire desktop frame after reinitialization")
            }
            Self::Timeout => write!(f, "no desktop frame available within timeout"),
            Self::OutOfMemory => write!(f, "failed to allocate pointer shape buffer"),
            Self::ShapeRetrievalFailed => write!(f, "failed to retrieve pointer shape"),
            Self::InvalidConfig(message) => write!(f, "invalid capture configuration: {message}"),
            Self::BufferOverflow => write!(f, "frame buffer size overflow"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DeviceInitFailed(inner) | Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;
