//! Closed set of formatting commands and their browser mapping.
//!
//! Each command maps to one `document.execCommand(name, false, value)` call.
//! `FormatCommand::parse` is the inverse, used by the toolbar bridge.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unknown format command: {0}")]
    UnknownCommand(String),

    #[error("Command {0} requires a value")]
    MissingValue(&'static str),

    #[error("Invalid color: {0} (expected #rrggbb)")]
    InvalidColor(String),

    #[error("Unsupported font family: {0}")]
    UnknownFontFamily(String),

    #[error("Font size must be 1-7, got {0}")]
    InvalidFontSize(String),
}

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFamily {
    Monospace,
    Arial,
    Georgia,
    TimesNewRoman,
    Verdana,
}

impl FontFamily {
    pub const ALL: [FontFamily; 5] = [
        FontFamily::Monospace,
        FontFamily::Arial,
        FontFamily::Georgia,
        FontFamily::TimesNewRoman,
        FontFamily::Verdana,
    ];

    /// CSS family name passed to `fontName`.
    pub fn css_name(&self) -> &'static str {
        match self {
            FontFamily::Monospace => "monospace",
            FontFamily::Arial => "Arial",
            FontFamily::Georgia => "Georgia",
            FontFamily::TimesNewRoman => "Times New Roman",
            FontFamily::Verdana => "Verdana",
        }
    }
}

impl FromStr for FontFamily {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.css_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FormatError::UnknownFontFamily(s.to_string()))
    }
}

/// Legacy HTML font size, 1 (smallest) through 7 (biggest). 3 is normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontSize(u8);

impl FontSize {
    pub const NORMAL: FontSize = FontSize(3);

    pub fn new(size: u8) -> Option<Self> {
        (1..=7).contains(&size).then_some(Self(size))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn label(&self) -> &'static str {
        match self.0 {
            1 => "Smallest",
            2 => "Small",
            3 => "Normal",
            4 => "Medium",
            5 => "Large",
            6 => "Extra Large",
            _ => "Biggest",
        }
    }
}

/// An RGB color as produced by a color input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Default text color.
    pub const DEFAULT_FOREGROUND: Color = Color::rgb(0x1f, 0x29, 0x37);
    /// Default highlight color.
    pub const DEFAULT_HIGHLIGHT: Color = Color::rgb(0xff, 0xff, 0x00);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Display for Color {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || FormatError::InvalidColor(s.to_string());
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

/// A formatting operation the surface can perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatCommand {
    Bold,
    Italic,
    Underline,
    Align(Alignment),
    FontFamily(FontFamily),
    FontSize(FontSize),
    ForeColor(Color),
    BackColor(Color),
    /// Insert an image from a `data:` URL
    InsertImage(String),
}

impl FormatCommand {
    /// The `execCommand` name for this operation.
    pub fn command_name(&self) -> &'static str {
        match self {
            FormatCommand::Bold => "bold",
            FormatCommand::Italic => "italic",
            FormatCommand::Underline => "underline",
            FormatCommand::Align(Alignment::Left) => "justifyLeft",
            FormatCommand::Align(Alignment::Center) => "justifyCenter",
            FormatCommand::Align(Alignment::Right) => "justifyRight",
            FormatCommand::Align(Alignment::Justify) => "justifyFull",
            FormatCommand::FontFamily(_) => "fontName",
            FormatCommand::FontSize(_) => "fontSize",
            FormatCommand::ForeColor(_) => "foreColor",
            FormatCommand::BackColor(_) => "backColor",
            FormatCommand::InsertImage(_) => "insertImage",
        }
    }

    /// The `execCommand` value argument, if the command takes one.
    pub fn command_value(&self) -> Option<String> {
        match self {
            FormatCommand::FontFamily(family) => Some(family.css_name().to_string()),
            FormatCommand::FontSize(size) => Some(size.get().to_string()),
            FormatCommand::ForeColor(color) | FormatCommand::BackColor(color) => {
                Some(color.to_string())
            }
            FormatCommand::InsertImage(url) => Some(url.clone()),
            _ => None,
        }
    }

    /// Parse an `execCommand` name/value pair back into a command.
    pub fn parse(name: &str, value: Option<&str>) -> Result<Self> {
        let value_for = |command: &'static str| value.ok_or(FormatError::MissingValue(command));
        let command = match name {
            "bold" => FormatCommand::Bold,
            "italic" => FormatCommand::Italic,
            "underline" => FormatCommand::Underline,
            "justifyLeft" => FormatCommand::Align(Alignment::Left),
            "justifyCenter" => FormatCommand::Align(Alignment::Center),
            "justifyRight" => FormatCommand::Align(Alignment::Right),
            "justifyFull" => FormatCommand::Align(Alignment::Justify),
            "fontName" => FormatCommand::FontFamily(value_for("fontName")?.parse()?),
            "fontSize" => {
                let raw = value_for("fontSize")?;
                let size = raw
                    .parse::<u8>()
                    .ok()
                    .and_then(FontSize::new)
                    .ok_or_else(|| FormatError::InvalidFontSize(raw.to_string()))?;
                FormatCommand::FontSize(size)
            }
            "foreColor" => FormatCommand::ForeColor(value_for("foreColor")?.parse()?),
            "backColor" => FormatCommand::BackColor(value_for("backColor")?.parse()?),
            "insertImage" => FormatCommand::InsertImage(value_for("insertImage")?.to_string()),
            other => return Err(FormatError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_mapping() {
        assert_eq!(FormatCommand::Bold.command_name(), "bold");
        assert_eq!(FormatCommand::Bold.command_value(), None);
        assert_eq!(FormatCommand::Align(Alignment::Justify).command_name(), "justifyFull");

        let cmd = FormatCommand::FontFamily(FontFamily::TimesNewRoman);
        assert_eq!(cmd.command_name(), "fontName");
        assert_eq!(cmd.command_value().as_deref(), Some("Times New Roman"));

        let cmd = FormatCommand::BackColor(Color::DEFAULT_HIGHLIGHT);
        assert_eq!(cmd.command_value().as_deref(), Some("#ffff00"));
    }

    #[test]
    fn test_parse_inverts_mapping() {
        let commands = [
            FormatCommand::Underline,
            FormatCommand::Align(Alignment::Center),
            FormatCommand::FontFamily(FontFamily::Georgia),
            FormatCommand::FontSize(FontSize::new(7).unwrap()),
            FormatCommand::ForeColor(Color::DEFAULT_FOREGROUND),
            FormatCommand::InsertImage("data:image/png;base64,AAAA".into()),
        ];
        for cmd in commands {
            let value = cmd.command_value();
            let parsed = FormatCommand::parse(cmd.command_name(), value.as_deref()).unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            FormatCommand::parse("strikeThrough", None),
            Err(FormatError::UnknownCommand("strikeThrough".into()))
        );
        assert_eq!(
            FormatCommand::parse("foreColor", None),
            Err(FormatError::MissingValue("foreColor"))
        );
        assert!(matches!(
            FormatCommand::parse("fontSize", Some("8")),
            Err(FormatError::InvalidFontSize(_))
        ));
        assert!(matches!(
            FormatCommand::parse("fontName", Some("Comic Sans")),
            Err(FormatError::UnknownFontFamily(_))
        ));
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!("#1F2937".parse::<Color>().unwrap(), Color::DEFAULT_FOREGROUND);
        assert_eq!(Color::DEFAULT_FOREGROUND.to_string(), "#1f2937");
        assert!("1f2937".parse::<Color>().is_err());
        assert!("#12345".parse::<Color>().is_err());
        assert!("#gg0000".parse::<Color>().is_err());
    }

    #[test]
    fn test_font_size_bounds() {
        assert!(FontSize::new(0).is_none());
        assert!(FontSize::new(8).is_none());
        assert_eq!(FontSize::NORMAL.label(), "Normal");
        assert_eq!(FontSize::new(1).unwrap().label(), "Smallest");
    }
}
