use std::{fmt, str::FromStr};

/// One of the optional columns of a meter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Delivered1,
    Delivered2,
    Received1,
    Received2,
    CurrentTariff,
    ActualDelivered,
    ActualReceived,
    MaxPower,
    SwitchMode,
}

impl Field {
    /// Column order as laid out in the `records` table.
    pub const ALL: [Field; 9] = [
        Field::Delivered1,
        Field::Delivered2,
        Field::Received1,
        Field::Received2,
        Field::CurrentTariff,
        Field::ActualDelivered,
        Field::ActualReceived,
        Field::MaxPower,
        Field::SwitchMode,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Field::Delivered1 => "delivered_1",
            Field::Delivered2 => "delivered_2",
            Field::Received1 => "received_1",
            Field::Received2 => "received_2",
            Field::CurrentTariff => "current_tariff",
            Field::ActualDelivered => "actual_delivered",
            Field::ActualReceived => "actual_received",
            Field::MaxPower => "max_power",
            Field::SwitchMode => "switch_mode",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown record field '{0}'")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Field::ALL
            .into_iter()
            .find(|f| f.column() == name)
            .ok_or_else(|| UnknownField(name.to_string()))
    }
}

/// Set of optional columns a range query should materialize.
///
/// Columns outside the filter come back absent, exactly like a register the
/// meter did not report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFilter {
    mask: u16,
}

impl FieldFilter {
    pub fn all() -> Self {
        Field::ALL.into_iter().collect()
    }

    /// Only `id` and `timestamp`.
    pub fn none() -> Self {
        Self { mask: 0 }
    }

    pub fn with(mut self, field: Field) -> Self {
        self.mask |= field.bit();
        self
    }

    pub fn contains(&self, field: Field) -> bool {
        self.mask & field.bit() != 0
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Field> for FieldFilter {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        iter.into_iter().fold(Self::none(), FieldFilter::with)
    }
}

/// Parses a comma separated list of column names, e.g. `delivered_1,max_power`.
/// An empty string selects no optional columns.
impl FromStr for FieldFilter {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Field::from_str)
            .collect()
    }
}
