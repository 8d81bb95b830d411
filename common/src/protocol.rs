//! ASCII command protocol.
//!
//! A frame is one line: `CODE[ ARGUMENT]\n`. Queries end in `?`, setters in
//! `S`. Replies are `CODE;VALUE` or the bare token `ERR`, and go out on the
//! transport followed by two carriage returns.

use std::fmt;

use crate::{
    error::ParseError,
    types::{parse_two_digits, TimeOfDay},
};

pub const PROTOCOL_VERSION_SUB: u8 = 83;
pub const ERROR_TOKEN: &str = "ERR";
pub const REPLY_TERMINATOR: &[u8] = b"\r\r";

/// Every value the protocol can read back, keyed by its two-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Version,
    PerfektDay,
    PerfektLight,
    SunUp,
    SolarNoon,
    SunDown,
    SunUpDim,
    SolarNoonDim,
    SunDownDim,
    CctLimitTop,
    CctLimitBottom,
    NightCct,
    ColorTemp,
    DimLevel,
    Time,
    Date,
    Year,
}

impl Field {
    pub fn code(self) -> &'static str {
        match self {
            Self::Version => "CK",
            Self::PerfektDay => "PD",
            Self::PerfektLight => "PL",
            Self::SunUp => "SU",
            Self::SolarNoon => "SN",
            Self::SunDown => "SD",
            Self::SunUpDim => "DU",
            Self::SolarNoonDim => "DN",
            Self::SunDownDim => "DD",
            Self::CctLimitTop => "LT",
            Self::CctLimitBottom => "LB",
            Self::NightCct => "NC",
            Self::ColorTemp => "CT",
            Self::DimLevel => "DL",
            Self::Time => "RT",
            Self::Date => "RD",
            Self::Year => "RY",
        }
    }
}

/// Host clock component a time-sync command replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockField {
    Time,
    Date,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    Query(Field),
    Set(Field),
    Sync(ClockField),
}

const COMMAND_TABLE: &[(&str, Handler)] = &[
    ("CK?", Handler::Query(Field::Version)),
    ("PD?", Handler::Query(Field::PerfektDay)),
    ("PL?", Handler::Query(Field::PerfektLight)),
    ("SU?", Handler::Query(Field::SunUp)),
    ("SD?", Handler::Query(Field::SunDown)),
    ("SN?", Handler::Query(Field::SolarNoon)),
    ("DU?", Handler::Query(Field::SunUpDim)),
    ("DD?", Handler::Query(Field::SunDownDim)),
    ("DN?", Handler::Query(Field::SolarNoonDim)),
    ("LT?", Handler::Query(Field::CctLimitTop)),
    ("LB?", Handler::Query(Field::CctLimitBottom)),
    ("NC?", Handler::Query(Field::NightCct)),
    ("CT?", Handler::Query(Field::ColorTemp)),
    ("DL?", Handler::Query(Field::DimLevel)),
    ("RD?", Handler::Query(Field::Date)),
    ("RY?", Handler::Query(Field::Year)),
    ("RT?", Handler::Query(Field::Time)),
    ("PDS", Handler::Set(Field::PerfektDay)),
    ("CTS", Handler::Set(Field::ColorTemp)),
    ("DLS", Handler::Set(Field::DimLevel)),
    ("DNS", Handler::Set(Field::SolarNoonDim)),
    ("DUS", Handler::Set(Field::SunUpDim)),
    ("DDS", Handler::Set(Field::SunDownDim)),
    ("SUS", Handler::Set(Field::SunUp)),
    ("SDS", Handler::Set(Field::SunDown)),
    ("SNS", Handler::Set(Field::SolarNoon)),
    ("LTS", Handler::Set(Field::CctLimitTop)),
    ("LBS", Handler::Set(Field::CctLimitBottom)),
    ("NCS", Handler::Set(Field::NightCct)),
    ("RTS", Handler::Sync(ClockField::Time)),
    ("RDS", Handler::Sync(ClockField::Date)),
    ("RYS", Handler::Sync(ClockField::Year)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    PerfektDay(bool),
    SunUp(TimeOfDay),
    SolarNoon(TimeOfDay),
    SunDown(TimeOfDay),
    SunUpDim(u8),
    SolarNoonDim(u8),
    SunDownDim(u8),
    CctLimitTop(u16),
    CctLimitBottom(u16),
    NightCct(u8),
    ColorTemp(u8),
    DimLevel(u8),
}

impl Setting {
    pub fn field(self) -> Field {
        match self {
            Self::PerfektDay(_) => Field::PerfektDay,
            Self::SunUp(_) => Field::SunUp,
            Self::SolarNoon(_) => Field::SolarNoon,
            Self::SunDown(_) => Field::SunDown,
            Self::SunUpDim(_) => Field::SunUpDim,
            Self::SolarNoonDim(_) => Field::SolarNoonDim,
            Self::SunDownDim(_) => Field::SunDownDim,
            Self::CctLimitTop(_) => Field::CctLimitTop,
            Self::CctLimitBottom(_) => Field::CctLimitBottom,
            Self::NightCct(_) => Field::NightCct,
            Self::ColorTemp(_) => Field::ColorTemp,
            Self::DimLevel(_) => Field::DimLevel,
        }
    }

    fn parse(field: Field, arg: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidArgument {
            code: field.code(),
            value: arg.to_string(),
        };
        let byte = || parse_number::<u8>(arg).ok_or_else(invalid);
        let time = || arg.parse::<TimeOfDay>().map_err(|_| invalid());

        Ok(match field {
            Field::PerfektDay => match arg {
                "0" => Self::PerfektDay(false),
                "1" => Self::PerfektDay(true),
                _ => return Err(invalid()),
            },
            Field::SunUp => Self::SunUp(time()?),
            Field::SolarNoon => Self::SolarNoon(time()?),
            Field::SunDown => Self::SunDown(time()?),
            Field::SunUpDim => Self::SunUpDim(byte()?),
            Field::SolarNoonDim => Self::SolarNoonDim(byte()?),
            Field::SunDownDim => Self::SunDownDim(byte()?),
            Field::NightCct => Self::NightCct(byte()?),
            Field::ColorTemp => Self::ColorTemp(byte()?),
            Field::DimLevel => Self::DimLevel(byte()?),
            Field::CctLimitTop => Self::CctLimitTop(parse_number(arg).ok_or_else(invalid)?),
            Field::CctLimitBottom => {
                Self::CctLimitBottom(parse_number(arg).ok_or_else(invalid)?)
            }
            Field::Version | Field::PerfektLight | Field::Time | Field::Date | Field::Year => {
                return Err(invalid())
            }
        })
    }
}

/// Raw components of a time-sync command. Syntax is checked by the parser;
/// ranges are checked against the current clock when the command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSet {
    Time { hour: u32, minute: u32 },
    Date { month: u32, day: u32 },
    Year(u32),
}

impl ClockSet {
    fn parse(field: ClockField, code: &'static str, arg: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidArgument {
            code,
            value: arg.to_string(),
        };
        let pair = |separator: char| -> Result<(u32, u32), ParseError> {
            let (a, b) = arg.split_once(separator).ok_or_else(invalid)?;
            let a = parse_two_digits(a).ok_or_else(invalid)?;
            let b = parse_two_digits(b).ok_or_else(invalid)?;
            Ok((a as u32, b as u32))
        };

        Ok(match field {
            ClockField::Time => {
                let (hour, minute) = pair(':')?;
                Self::Time { hour, minute }
            }
            ClockField::Date => {
                let (month, day) = pair('/')?;
                Self::Date { month, day }
            }
            ClockField::Year => Self::Year(parse_number(arg).ok_or_else(invalid)?),
        })
    }

    pub fn field(self) -> ClockField {
        match self {
            Self::Time { .. } => ClockField::Time,
            Self::Date { .. } => ClockField::Date,
            Self::Year(_) => ClockField::Year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Query(Field),
    Set(Setting),
    SyncClock(ClockSet),
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || s.len() > 5 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn is_protocol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '?' | ';' | ' ' | ':' | '/')
}

/// Drops everything outside `[A-Za-z0-9?; :/]`, including the terminator.
pub fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| is_protocol_char(*c)).collect()
}

/// Decodes one line-feed terminated frame.
pub fn parse_frame(raw: &str) -> Result<Command, ParseError> {
    if !raw.ends_with('\n') {
        return Err(ParseError::Unterminated);
    }

    let cleaned = sanitize(raw);
    let mut tokens = cleaned.split(' ');
    let code = tokens.next().unwrap_or_default();
    let argument = tokens.next().filter(|arg| !arg.is_empty());

    if code.is_empty() {
        return Err(ParseError::Empty);
    }

    let handler = COMMAND_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, handler)| *handler)
        .ok_or_else(|| ParseError::UnknownCommand(code.to_string()))?;

    match handler {
        Handler::Query(field) => match argument {
            Some(_) => Err(ParseError::UnexpectedArgument(code.to_string())),
            None => Ok(Command::Query(field)),
        },
        Handler::Set(field) => {
            let arg = argument.ok_or_else(|| ParseError::MissingArgument(code.to_string()))?;
            Setting::parse(field, arg).map(Command::Set)
        }
        Handler::Sync(field) => {
            let arg = argument.ok_or_else(|| ParseError::MissingArgument(code.to_string()))?;
            let reply_code = match field {
                ClockField::Time => Field::Time.code(),
                ClockField::Date => Field::Date.code(),
                ClockField::Year => Field::Year.code(),
            };
            ClockSet::parse(field, reply_code, arg).map(Command::SyncClock)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Value { code: &'static str, value: String },
    Error,
}

impl Response {
    pub fn new(field: Field, value: impl fmt::Display) -> Self {
        Self::Value {
            code: field.code(),
            value: value.to_string(),
        }
    }

    /// Bytes handed to the transport for notification.
    pub fn to_notification(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.extend_from_slice(REPLY_TERMINATOR);
        bytes
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value { code, value } => write!(f, "{code};{value}"),
            Self::Error => f.write_str(ERROR_TOKEN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Complete(String),
    /// The client sent more than the frame limit without a line feed. The
    /// line is discarded up to and including its terminator.
    Overflow,
}

/// Reassembles line-terminated frames from arbitrarily split transport
/// writes.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    max_frame_bytes: usize,
    discarding: bool,
}

impl FrameAssembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_frame_bytes),
            max_frame_bytes,
            discarding: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if self.discarding {
                self.discarding = byte != b'\n';
                continue;
            }

            self.buf.push(byte);
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                frames.push(Frame::Complete(line));
            } else if self.buf.len() > self.max_frame_bytes {
                self.buf.clear();
                self.discarding = true;
                frames.push(Frame::Overflow);
            }
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_queries() {
        assert_eq!(parse_frame("PD?\n"), Ok(Command::Query(Field::PerfektDay)));
        assert_eq!(parse_frame("CK?\r\n"), Ok(Command::Query(Field::Version)));
        assert_eq!(parse_frame("RT?\n"), Ok(Command::Query(Field::Time)));
    }

    #[test]
    fn parses_setters_with_typed_arguments() {
        assert_eq!(
            parse_frame("CTS 200\n"),
            Ok(Command::Set(Setting::ColorTemp(200)))
        );
        assert_eq!(
            parse_frame("SUS 06:30\n"),
            Ok(Command::Set(Setting::SunUp(TimeOfDay::new(6, 30).unwrap())))
        );
        assert_eq!(
            parse_frame("LTS 6500\n"),
            Ok(Command::Set(Setting::CctLimitTop(6500)))
        );
        assert_eq!(
            parse_frame("PDS 0\n"),
            Ok(Command::Set(Setting::PerfektDay(false)))
        );
    }

    #[test]
    fn parses_clock_sync() {
        assert_eq!(
            parse_frame("RTS 10:15\n"),
            Ok(Command::SyncClock(ClockSet::Time {
                hour: 10,
                minute: 15
            }))
        );
        assert_eq!(
            parse_frame("RDS 07/04\n"),
            Ok(Command::SyncClock(ClockSet::Date { month: 7, day: 4 }))
        );
        assert_eq!(parse_frame("RYS 24\n"), Ok(Command::SyncClock(ClockSet::Year(24))));
        // Range is not the parser's concern.
        assert_eq!(
            parse_frame("RYS 124\n"),
            Ok(Command::SyncClock(ClockSet::Year(124)))
        );
    }

    #[test]
    fn strips_transport_noise_before_matching() {
        assert_eq!(
            parse_frame("\u{0}D\tLS 1\u{7f}28\n"),
            Ok(Command::Set(Setting::DimLevel(128)))
        );
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(
            parse_frame("XYZ\n"),
            Err(ParseError::UnknownCommand("XYZ".to_string()))
        );
        assert_eq!(parse_frame("PD?"), Err(ParseError::Unterminated));
        assert_eq!(parse_frame("\n"), Err(ParseError::Empty));
        assert_eq!(
            parse_frame("DUS\n"),
            Err(ParseError::MissingArgument("DUS".to_string()))
        );
        assert_eq!(
            parse_frame("PD? 1\n"),
            Err(ParseError::UnexpectedArgument("PD?".to_string()))
        );
        assert!(matches!(
            parse_frame("DUS 256\n"),
            Err(ParseError::InvalidArgument { code: "DU", .. })
        ));
        assert!(matches!(
            parse_frame("SUS 25:00\n"),
            Err(ParseError::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse_frame("RYS xx\n"),
            Err(ParseError::InvalidArgument { code: "RY", .. })
        ));
        assert!(matches!(
            parse_frame("PDS 2\n"),
            Err(ParseError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn codes_are_case_sensitive() {
        assert!(parse_frame("pd?\n").is_err());
    }

    #[test]
    fn formats_replies() {
        assert_eq!(Response::new(Field::ColorTemp, 200).to_string(), "CT;200");
        assert_eq!(Response::Error.to_string(), "ERR");
        assert_eq!(Response::new(Field::PerfektDay, 1).to_notification(), b"PD;1\r\r");
    }

    #[test]
    fn assembles_frames_split_across_writes() {
        let mut assembler = FrameAssembler::new(32);

        assert!(assembler.push(b"CT").is_empty());
        assert!(assembler.push(b"S 20").is_empty());
        assert_eq!(
            assembler.push(b"0\nPD?\nDL"),
            vec![
                Frame::Complete("CTS 200\n".to_string()),
                Frame::Complete("PD?\n".to_string()),
            ]
        );
        assert_eq!(
            assembler.push(b"?\n"),
            vec![Frame::Complete("DL?\n".to_string())]
        );
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let mut assembler = FrameAssembler::new(4);

        assert_eq!(assembler.push(b"ABCDEFG"), vec![Frame::Overflow]);
        assert_eq!(
            assembler.push(b"EF\nPD?\n"),
            vec![Frame::Complete("PD?\n".to_string())]
        );
    }

    #[test]
    fn every_table_entry_parses() {
        for (code, handler) in COMMAND_TABLE {
            let frame = match handler {
                Handler::Query(_) => format!("{code}\n"),
                Handler::Set(Field::PerfektDay) => format!("{code} 1\n"),
                Handler::Set(Field::SunUp | Field::SolarNoon | Field::SunDown) => {
                    format!("{code} 07:00\n")
                }
                Handler::Set(_) => format!("{code} 200\n"),
                Handler::Sync(ClockField::Time) => format!("{code} 07:00\n"),
                Handler::Sync(ClockField::Date) => format!("{code} 01/02\n"),
                Handler::Sync(ClockField::Year) => format!("{code} 25\n"),
            };
            assert!(parse_frame(&frame).is_ok(), "{frame:?}");
        }
    }
}
