#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxError {
    #[error("Channel {channel} appears twice in event (crate {crate_number})")]
    DuplicateChannel { channel: u8, crate_number: u8 },

    #[error("Channel {channel} exceeds module channel count {max}")]
    ChannelOutOfRange { channel: usize, max: usize },

    #[error("More data words than announced in header: expected {expected}")]
    TooManyDataWords { expected: usize },

    #[error("Channel count mismatch at end of block: expected {expected}, got {found}")]
    ChannelCountMismatch { expected: usize, found: usize },

    #[error("Header received inside event, discarding {pending} pending channels")]
    InterruptedEvent { pending: usize },

    #[error("Record too short: need {needed} words, got {available}")]
    RecordTooShort { needed: usize, available: usize },

    #[error(
        "Invalid record layout: {per_event} words per event cannot hold {raw_words} raw words and {footer} footer words"
    )]
    InvalidLayout {
        per_event: usize,
        raw_words: usize,
        footer: usize,
    },

    #[error("Number of sub-events must be at least 1")]
    NoSubEvents,

    #[error("Unexpected word {word:#010X} inside event")]
    UnexpectedWord { word: u32 },

    #[error("Stream ended inside event, discarding {pending} pending channels")]
    TruncatedEvent { pending: usize },
}

/// Attached as context to an error returned mid-slice, so the caller knows
/// where to resume.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Decoding stopped after {consumed} words ({events} events published)")]
pub struct DecodeStopped {
    pub consumed: usize,
    pub events: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Event buffer is closed")]
    Closed,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Module {owner} already has a slot named {name:?}")]
    DuplicateSlot { owner: u32, name: String },

    #[error("Unknown slot {0}")]
    UnknownSlot(u32),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Channel count must be between 1 and {max}. Got {actual}")]
    InvalidChannelCount { max: usize, actual: usize },

    #[error("Data width must be between 1 and {max} bits. Got {actual}")]
    InvalidBitWidth { max: u8, actual: u8 },

    #[error("Number of events per record must be at least 1")]
    InvalidEventCount,

    #[error("Decoder bound to {found} slots, needs {needed}")]
    MissingSlots { needed: usize, found: usize },
}
