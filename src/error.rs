use std::fmt::{self, Display};
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),

    Csv(csv::Error),

    // Structural problems in the event catalog, detected at load time.
    Config(String),

    // A category's row schema does not fit the trace header.
    Schema(String),

    // More element offsets than time units between two instructions.
    OffsetSpacing {
        time: u64,
        offsets: usize,
        spacing: u64,
    },

    // More element offsets than generated offset events.
    OffsetSlots {
        time: u64,
        offsets: usize,
        slots: usize,
    },

    SymbolTool(String),

    Parse(String),
}

impl Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(formatter, "{}", err),
            Error::Csv(err) => write!(formatter, "malformed CSV input: {}", err),
            Error::Config(msg) => write!(formatter, "invalid event configuration: {}", msg),
            Error::Schema(msg) => write!(formatter, "trace does not match row schema: {}", msg),
            Error::OffsetSpacing {
                time,
                offsets,
                spacing,
            } => write!(
                formatter,
                "instruction at time {} has {} offsets, but the time between instructions is {}; \
                 the time between instructions has to be greater than the number of offsets",
                time, offsets, spacing
            ),
            Error::OffsetSlots {
                time,
                offsets,
                slots,
            } => write!(
                formatter,
                "instruction at time {} has {} offsets, but only {} offset events are configured",
                time, offsets, slots
            ),
            Error::SymbolTool(msg) => write!(formatter, "symbol resolution failed: {}", msg),
            Error::Parse(msg) => formatter.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Csv(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&'a str>>) -> Self {
        Error::Parse(format!("{}", err))
    }
}
