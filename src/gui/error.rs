use std::{error::Error, fmt::Display};

use crate::transport::TransportError;

/// Things that go wrong while driving the terminal.
#[derive(Debug)]
pub enum GuiError {
    /// Drawing or reading terminal events failed.
    IOError(std::io::Error),
    /// There is nothing to choose from.
    NoDevices,
    /// Listing serial devices failed.
    Transport(TransportError),
}

impl Display for GuiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#?}", self)
    }
}

impl Error for GuiError {}

impl From<std::io::Error> for GuiError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl From<TransportError> for GuiError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}
