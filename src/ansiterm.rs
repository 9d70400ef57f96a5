//! ANSI terminal escape codes. See:
//! - <https://en.wikipedia.org/wiki/ANSI_escape_code>

use core::fmt;

pub(crate) const CLEAR_FORMAT: AnsiEscapeSequence =
    AnsiEscapeSequence::SelectGraphicRendition(SelectGraphicRendition::Reset);

pub(crate) const BOLD: AnsiEscapeSequence =
    AnsiEscapeSequence::SelectGraphicRendition(SelectGraphicRendition::Bold);

/// An ANSI escape sequence value that can be used in format strings. The meat
/// of the logic for printing the sequence is in the `Display` trait
/// implementation.
pub(crate) enum AnsiEscapeSequence {
    SelectGraphicRendition(SelectGraphicRendition),
}

impl AnsiEscapeSequence {
    pub(crate) const fn foreground(color: Color) -> Self {
        Self::SelectGraphicRendition(SelectGraphicRendition::ForegroundColor(color))
    }
}

impl fmt::Display for AnsiEscapeSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1B[")?;
        match self {
            Self::SelectGraphicRendition(sgr) => write!(f, "{sgr}"),
        }
    }
}

/// <https://en.wikipedia.org/wiki/ANSI_escape_code#SGR_(Select_Graphic_Rendition)_parameters>
pub(crate) enum SelectGraphicRendition {
    Reset,
    Bold,
    ForegroundColor(Color),
}

impl fmt::Display for SelectGraphicRendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // N.B. \x1B[ already added from outer `AnsiEscapeSequence` impl
        match self {
            Self::Reset => write!(f, "0")?,
            Self::Bold => write!(f, "1")?,
            Self::ForegroundColor(color) => write!(f, "{}", color.foreground_byte())?,
        }
        write!(f, "m")
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Color {
    Red,
    Green,
    Yellow,
    Cyan,
    White,
}

impl Color {
    fn foreground_byte(self) -> u8 {
        match self {
            Self::Red => 31,
            Self::Green => 32,
            Self::Yellow => 33,
            Self::Cyan => 36,
            Self::White => 37,
        }
    }
}
