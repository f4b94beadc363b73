//! DSMR P1 telegram parsing.
//!
//! A telegram is a block of text lines sent by the meter every few seconds:
//!
//! ```text
//! /ISk5\2MT382-1000
//!
//! 0-0:1.0.0(101209113020W)
//! 1-0:1.8.1(123456.789*kWh)
//! 1-0:1.8.2(123456.789*kWh)
//! 0-0:96.14.0(0002)
//! 1-0:1.7.0(01.193*kW)
//! !EF2F
//! ```
//!
//! Every data line is `OBIS(value[*unit])`. Only the registers the record
//! model stores are picked up; other lines are skipped.

use meter_store::{Field, NewRecord};
use nom::{
    bytes::complete::{tag, take_until, take_while_m_n},
    character::complete::{char, one_of},
    combinator::{map_opt, map_res, opt, verify},
    number::complete::double,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use time::{Date, Month, PrimitiveDateTime, Time, UtcOffset};

/// OBIS reference of each register kept in a record.
pub const REGISTERS: [(&str, Field); 9] = [
    ("1-0:1.8.1", Field::Delivered1),
    ("1-0:1.8.2", Field::Delivered2),
    ("1-0:2.8.1", Field::Received1),
    ("1-0:2.8.2", Field::Received2),
    ("0-0:96.14.0", Field::CurrentTariff),
    ("1-0:1.7.0", Field::ActualDelivered),
    ("1-0:2.7.0", Field::ActualReceived),
    ("0-0:17.0.0", Field::MaxPower),
    ("0-0:96.3.10", Field::SwitchMode),
];

const METER_CLOCK: &str = "0-0:1.0.0";

/// What a single telegram line contributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Header,
    Register(Field, f64),
    MeterClock(i64),
    /// Final line, `!` optionally followed by a CRC.
    End,
    /// Starts with a known OBIS code but the value could not be parsed.
    Malformed,
    Other,
}

/// `OBIS(value)` or `OBIS(value*unit)`. `nan` and `inf` are not readings.
fn register_value<'a>(code: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, f64> {
    preceded(
        tag(code),
        delimited(
            char('('),
            terminated(verify(double, |v: &f64| v.is_finite()), opt(preceded(char('*'), take_until(")")))),
            char(')'),
        ),
    )
}

fn two_digits(input: &str) -> IResult<&str, u8> {
    map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |s: &str| s.parse::<u8>())(input)
}

/// `0-0:1.0.0(YYMMDDhhmmssX)`, X being `S` (summer, UTC+2) or `W` (winter, UTC+1).
fn meter_clock(input: &str) -> IResult<&str, i64> {
    preceded(
        tag(METER_CLOCK),
        delimited(
            char('('),
            map_opt(
                tuple((
                    two_digits,
                    two_digits,
                    two_digits,
                    two_digits,
                    two_digits,
                    two_digits,
                    one_of("SW"),
                )),
                |(yy, mo, dd, hh, mi, ss, season)| {
                    let month = Month::try_from(mo).ok()?;
                    let date = Date::from_calendar_date(2000 + i32::from(yy), month, dd).ok()?;
                    let time = Time::from_hms(hh, mi, ss).ok()?;
                    let offset = UtcOffset::from_hms(if season == 'S' { 2 } else { 1 }, 0, 0).ok()?;
                    Some(PrimitiveDateTime::new(date, time).assume_offset(offset).unix_timestamp())
                },
            ),
            char(')'),
        ),
    )(input)
}

pub fn parse_line(line: &str) -> Line {
    let line = line.trim();

    if line.starts_with('/') {
        return Line::Header;
    }
    if line.starts_with('!') {
        return Line::End;
    }
    if line.starts_with(METER_CLOCK) {
        return match meter_clock(line) {
            Ok((_, ts)) => Line::MeterClock(ts),
            Err(_) => Line::Malformed,
        };
    }

    for (code, field) in REGISTERS {
        if !line.starts_with(code) {
            continue;
        }
        match register_value(code)(line) {
            Ok((_, value)) => return Line::Register(field, value),
            // A longer code sharing this prefix, e.g. `1-0:1.8.10`.
            Err(_) if line[code.len()..].starts_with('(') => return Line::Malformed,
            Err(_) => continue,
        }
    }

    Line::Other
}

fn set_register(record: &mut NewRecord, field: Field, value: f64) {
    match field {
        Field::Delivered1 => record.delivered_1 = Some(value),
        Field::Delivered2 => record.delivered_2 = Some(value),
        Field::Received1 => record.received_1 = Some(value),
        Field::Received2 => record.received_2 = Some(value),
        Field::CurrentTariff => record.current_tariff = Some(value as i32),
        Field::ActualDelivered => record.actual_delivered = Some(value),
        Field::ActualReceived => record.actual_received = Some(value),
        Field::MaxPower => record.max_power = Some(value),
        Field::SwitchMode => record.switch_mode = Some(value as i32),
    }
}

/// A complete telegram. `record` has no timestamp yet; the source decides
/// whether to use the meter's clock or the time of reception.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telegram {
    pub record: NewRecord,
    pub meter_timestamp: Option<i64>,
    pub malformed_lines: usize,
}

/// Accumulates lines until a telegram is complete.
#[derive(Debug, Default)]
pub struct TelegramAssembler {
    current: Telegram,
}

impl TelegramAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns the finished telegram on its `!` terminator.
    ///
    /// A header line discards anything collected so far, so joining the
    /// serial stream halfway through a telegram does not leak registers into
    /// the next one.
    pub fn push_line(&mut self, line: &str) -> Option<Telegram> {
        match parse_line(line) {
            Line::Header => self.current = Telegram::default(),
            Line::Register(field, value) => set_register(&mut self.current.record, field, value),
            Line::MeterClock(ts) => self.current.meter_timestamp = Some(ts),
            Line::Malformed => {
                metrics::counter!("p1_malformed_lines_total").increment(1);
                self.current.malformed_lines += 1;
            }
            Line::End => return Some(std::mem::take(&mut self.current)),
            Line::Other => {}
        }
        None
    }
}
