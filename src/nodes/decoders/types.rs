//! Common decoder types: annotation records, classes and row configuration

use std::fmt;

/// Annotation categories emitted by the PS/2 decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationClass {
    /// Raw line value at a clock edge
    Bit,
    /// Start bit (expected low)
    StartBit,
    /// Stop bit (expected high)
    StopBit,
    /// Parity bit that checked out
    ParityOk,
    /// Any framing, parity or transition error
    Error,
    /// Data bit placeholder
    DataBit,
    /// Assembled 8-bit word
    Word,
    /// Host holding the clock line low
    Inhibit,
    /// Device acknowledge bit
    Ack,
}

impl AnnotationClass {
    /// Stable identifier, e.g. for column headers or serialization
    pub fn id(&self) -> &'static str {
        match self {
            AnnotationClass::Bit => "bit",
            AnnotationClass::StartBit => "start-bit",
            AnnotationClass::StopBit => "stop-bit",
            AnnotationClass::ParityOk => "parity-ok",
            AnnotationClass::Error => "error",
            AnnotationClass::DataBit => "data-bit",
            AnnotationClass::Word => "word",
            AnnotationClass::Inhibit => "inhibit",
            AnnotationClass::Ack => "ack",
        }
    }

    /// Human-readable name
    pub fn description(&self) -> &'static str {
        match self {
            AnnotationClass::Bit => "Bit",
            AnnotationClass::StartBit => "Start bit",
            AnnotationClass::StopBit => "Stop bit",
            AnnotationClass::ParityOk => "Parity OK bit",
            AnnotationClass::Error => "Error",
            AnnotationClass::DataBit => "Data bit",
            AnnotationClass::Word => "Word",
            AnnotationClass::Inhibit => "Inhibit",
            AnnotationClass::Ack => "Acknowledge",
        }
    }
}

/// A display row grouping annotation classes
///
/// Consumers render one row of raw bits next to one row of decoded fields;
/// the decoder routes each annotation to the output port whose index matches
/// the row that contains its class.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationRow {
    pub id: &'static str,
    pub name: &'static str,
    pub classes: &'static [AnnotationClass],
}

impl AnnotationRow {
    /// Whether this row carries the given class
    pub fn contains(&self, class: AnnotationClass) -> bool {
        self.classes.contains(&class)
    }
}

/// Default row layout: raw bits on one row, everything decoded on the other
pub const ANNOTATION_ROWS: &[AnnotationRow] = &[
    AnnotationRow {
        id: "bits",
        name: "Bits",
        classes: &[AnnotationClass::Bit],
    },
    AnnotationRow {
        id: "fields",
        name: "Fields",
        classes: &[
            AnnotationClass::StartBit,
            AnnotationClass::StopBit,
            AnnotationClass::ParityOk,
            AnnotationClass::Error,
            AnnotationClass::DataBit,
            AnnotationClass::Word,
            AnnotationClass::Inhibit,
            AnnotationClass::Ack,
        ],
    },
];

/// One decoded annotation spanning a range of the capture
///
/// Labels are ordered by decreasing verbosity (full text first, then
/// abbreviations) so a consumer can pick whichever fits its display space.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub class: AnnotationClass,
    /// First sample position of the span
    pub start: u64,
    /// Sample position at which the span ends
    pub end: u64,
    pub labels: Vec<String>,
}

impl Annotation {
    pub fn new<I, S>(class: AnnotationClass, start: u64, end: u64, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            class,
            start,
            end,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// The most verbose label
    pub fn label(&self) -> &str {
        self.labels.first().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}..{}] {}: {}",
            self.start,
            self.end,
            self.class.id(),
            self.label()
        )
    }
}

/// Who was driving the exchange when a word completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host-to-device (the host held the clock before the frame)
    Host,
    /// Device-to-host
    Device,
}

impl Direction {
    /// Single-letter form used in compact labels
    pub fn letter(&self) -> &'static str {
        match self {
            Direction::Host => "H",
            Direction::Device => "D",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Host => write!(f, "Host"),
            Direction::Device => write!(f, "Device"),
        }
    }
}

/// Fully framed 8-bit word event
///
/// Emitted alongside the Word annotation so sinks can consume decoded bytes
/// without parsing label strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ps2Word {
    /// The 8 data bits, LSB received first
    pub value: u8,
    pub direction: Direction,
    /// Whether the observed parity bit satisfied odd parity
    pub parity_ok: bool,
    /// Sample position where the start bit completed
    pub start: u64,
    /// Sample position where the parity bit began
    pub end: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_lands_on_exactly_one_row() {
        for class in [
            AnnotationClass::Bit,
            AnnotationClass::StartBit,
            AnnotationClass::StopBit,
            AnnotationClass::ParityOk,
            AnnotationClass::Error,
            AnnotationClass::DataBit,
            AnnotationClass::Word,
            AnnotationClass::Inhibit,
            AnnotationClass::Ack,
        ] {
            let rows: Vec<_> = ANNOTATION_ROWS
                .iter()
                .filter(|row| row.contains(class))
                .collect();
            assert_eq!(rows.len(), 1, "class {:?} must map to one row", class);
        }
    }

    #[test]
    fn bits_row_only_carries_raw_bits() {
        assert_eq!(ANNOTATION_ROWS[0].id, "bits");
        assert_eq!(ANNOTATION_ROWS[0].name, "Bits");
        assert_eq!(ANNOTATION_ROWS[0].classes, &[AnnotationClass::Bit]);
        assert_eq!(ANNOTATION_ROWS[1].name, "Fields");
        assert!(!ANNOTATION_ROWS[1].contains(AnnotationClass::Bit));
    }

    #[test]
    fn class_identifiers_are_stable() {
        assert_eq!(AnnotationClass::StartBit.id(), "start-bit");
        assert_eq!(AnnotationClass::StartBit.description(), "Start bit");
        assert_eq!(AnnotationClass::ParityOk.id(), "parity-ok");
        assert_eq!(AnnotationClass::ParityOk.description(), "Parity OK bit");
        assert_eq!(AnnotationClass::Ack.description(), "Acknowledge");
    }

    #[test]
    fn labels_keep_their_order() {
        let ann = Annotation::new(AnnotationClass::StartBit, 10, 20, ["Start bit", "Start", "S"]);
        assert_eq!(ann.label(), "Start bit");
        assert_eq!(ann.labels, vec!["Start bit", "Start", "S"]);
    }

    #[test]
    fn direction_labels() {
        assert_eq!(Direction::Host.to_string(), "Host");
        assert_eq!(Direction::Device.to_string(), "Device");
        assert_eq!(Direction::Host.letter(), "H");
        assert_eq!(Direction::Device.letter(), "D");
    }
}
