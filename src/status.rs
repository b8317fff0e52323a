// =============================================================================
// Hardware Status (DLE EOT response decoding)
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The four ESC/POS real-time status classes, in probe order.
///
/// Each class is queried with `DLE EOT n` and answered with a single byte.
/// Bit 1 of every response is fixed high and bit 0/7 fixed low on compliant
/// printers, so only the documented flag bits are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusClass {
    #[serde(rename = "Printer Status")]
    PrinterStatus,
    #[serde(rename = "Offline Status")]
    OfflineStatus,
    #[serde(rename = "Error Status")]
    ErrorStatus,
    #[serde(rename = "Paper Status")]
    PaperStatus,
}

impl StatusClass {
    pub const ALL: [StatusClass; 4] = [
        StatusClass::PrinterStatus,
        StatusClass::OfflineStatus,
        StatusClass::ErrorStatus,
        StatusClass::PaperStatus,
    ];

    /// `DLE EOT n` request for this class.
    pub fn command(self) -> [u8; 3] {
        let n = match self {
            StatusClass::PrinterStatus => 1,
            StatusClass::OfflineStatus => 2,
            StatusClass::ErrorStatus => 3,
            StatusClass::PaperStatus => 4,
        };
        [0x10, 0x04, n]
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusClass::PrinterStatus => "Printer Status",
            StatusClass::OfflineStatus => "Offline Status",
            StatusClass::ErrorStatus => "Error Status",
            StatusClass::PaperStatus => "Paper Status",
        }
    }

    /// Message emitted when no flag bit of this class is set.
    fn clear_message(self) -> &'static str {
        match self {
            StatusClass::PrinterStatus => PRINTER_OK,
            StatusClass::OfflineStatus => ONLINE_COVER_CLOSED,
            StatusClass::ErrorStatus => NO_ERRORS,
            StatusClass::PaperStatus => PAPER_ADEQUATE,
        }
    }

    fn flag_table(self) -> &'static [(u8, &'static str)] {
        match self {
            StatusClass::PrinterStatus => PRINTER_FLAGS,
            StatusClass::OfflineStatus => OFFLINE_FLAGS,
            StatusClass::ErrorStatus => ERROR_FLAGS,
            StatusClass::PaperStatus => &[],
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PRINTER_OK: &str = "Printer status OK";
const ONLINE_COVER_CLOSED: &str = "Printer is online and cover closed";
const NO_ERRORS: &str = "No printer errors";
const PAPER_ADEQUATE: &str = "Paper adequate";

// Highest mask first; messages are emitted in table order.
const PRINTER_FLAGS: &[(u8, &str)] = &[
    (0x80, "Printer is busy"),
    (0x40, "FEED button is being pressed"),
    (0x20, "Error occurred"),
    (0x08, "Drawer kick-out connector pin 3 is high"),
];

const OFFLINE_FLAGS: &[(u8, &str)] = &[
    (0x08, "Cover is open"),
    (0x04, "Paper is out"),
    (0x01, "Printer is offline"),
];

const ERROR_FLAGS: &[(u8, &str)] = &[
    (0x40, "Auto-cutter error"),
    (0x08, "Unrecoverable error"),
    (0x04, "Recoverable error"),
];

const PAPER_SENSOR_MASK: u8 = 0x60;

/// Decode one status response byte into human-readable conditions.
///
/// Total over `0..=255`: the result is never empty.
pub fn decode(class: StatusClass, byte: u8) -> Vec<String> {
    if class == StatusClass::PaperStatus {
        let message = match byte & PAPER_SENSOR_MASK {
            0x00 => PAPER_ADEQUATE,
            0x20 => "Paper near end",
            0x60 => "Paper end",
            _ => "Unknown paper status",
        };
        return vec![message.to_string()];
    }

    let mut messages: Vec<String> = class
        .flag_table()
        .iter()
        .filter(|(mask, _)| byte & mask != 0)
        .map(|(_, message)| message.to_string())
        .collect();

    if messages.is_empty() {
        messages.push(class.clear_message().to_string());
    }
    messages
}

/// Whether a decoded message reports a condition that needs attention.
pub fn is_problem(message: &str) -> bool {
    !matches!(
        message,
        PRINTER_OK | ONLINE_COVER_CLOSED | NO_ERRORS | PAPER_ADEQUATE
    )
}

/// Fully decoded answer to the four status queries of one probe.
///
/// Only constructible from all four response bytes, so a report is never
/// partially populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    raw: [u8; 4],
    messages: BTreeMap<StatusClass, Vec<String>>,
}

impl StatusReport {
    pub fn from_responses(printer: u8, offline: u8, error: u8, paper: u8) -> Self {
        let raw = [printer, offline, error, paper];
        let messages = StatusClass::ALL
            .iter()
            .zip(raw)
            .map(|(class, byte)| (*class, decode(*class, byte)))
            .collect();
        Self { raw, messages }
    }

    pub fn raw(&self) -> [u8; 4] {
        self.raw
    }

    pub fn messages(&self, class: StatusClass) -> &[String] {
        self.messages.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Problem messages keyed by class; classes without problems are omitted.
    pub fn problems(&self) -> BTreeMap<StatusClass, Vec<String>> {
        self.messages
            .iter()
            .filter_map(|(class, messages)| {
                let problems: Vec<String> = messages
                    .iter()
                    .filter(|m| is_problem(m))
                    .cloned()
                    .collect();
                (!problems.is_empty()).then_some((*class, problems))
            })
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.problems().is_empty()
    }
}
