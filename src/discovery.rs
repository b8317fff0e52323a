use crate::errors::{AgentError, Result};
use rusb::{Context, Device, DeviceDescriptor, UsbContext};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Known ESC/POS printer vendor IDs
pub const KNOWN_VENDORS: &[(u16, &str)] = &[
    (0x4b43, "Caysn OR Shreyans"),
    (0x0fe6, "RuGtek or Xprinter"),
    (0x04b8, "EPSON"),
    (0x1504, "BIXOLON"),
    (0x0416, "Winbond"),
    (0x1fc9, "POSBANK"),
    (0x0519, "Star Micronics"),
];

/// USB interface class for printers
pub const PRINTER_INTERFACE_CLASS: u8 = 0x07;

const NAME_KEYWORDS: &[&str] = &["printer", "thermal", "receipt", "pos", "rugtek", "xprinter"];

const UNKNOWN: &str = "Unknown";

/// Why a device was reported as a candidate printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchReason {
    #[serde(rename = "Vendor id")]
    VendorId,
    #[serde(rename = "Interface class")]
    InterfaceClass,
    #[serde(rename = "Name keyword")]
    NameKeyword,
    #[serde(rename = "No Filter Applied")]
    NoFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsbPrinterInfo {
    pub vendor_id: String,
    pub product_id: String,
    pub manufacturer: String,
    pub vendor_name: String,
    pub product: String,
    pub matched_by: MatchReason,
}

pub fn vendor_name(vendor_id: u16) -> &'static str {
    KNOWN_VENDORS
        .iter()
        .find(|(vid, _)| *vid == vendor_id)
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN)
}

/// First matching heuristic, strongest first; `None` if the device does not
/// look like a printer.
pub fn classify(
    vendor_id: u16,
    has_printer_interface: bool,
    manufacturer: &str,
    product: &str,
) -> Option<MatchReason> {
    if KNOWN_VENDORS.iter().any(|(vid, _)| *vid == vendor_id) {
        return Some(MatchReason::VendorId);
    }
    if has_printer_interface {
        return Some(MatchReason::InterfaceClass);
    }
    let name = format!("{} {}", manufacturer, product).to_lowercase();
    if NAME_KEYWORDS.iter().any(|keyword| name.contains(keyword)) {
        return Some(MatchReason::NameKeyword);
    }
    None
}

/// Enumerate attached USB devices.
///
/// With `only_candidates` set, devices that match no printer heuristic are
/// left out; otherwise every readable device is listed as `NoFilter`.
pub fn list_usb_printers(context: &Context, only_candidates: bool) -> Result<Vec<UsbPrinterInfo>> {
    let devices = context
        .devices()
        .map_err(|e| AgentError::from_usb("enumerate devices", e))?;

    let mut printers = Vec::new();
    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                debug!("Skipping device at bus {} addr {}: {}", device.bus_number(), device.address(), e);
                continue;
            }
        };

        let has_printer_interface = has_printer_interface(&device, &desc);
        let (manufacturer, product) = read_strings(&device, &desc);

        let matched_by = if only_candidates {
            match classify(desc.vendor_id(), has_printer_interface, &manufacturer, &product) {
                Some(reason) => reason,
                None => continue,
            }
        } else {
            MatchReason::NoFilter
        };

        printers.push(UsbPrinterInfo {
            vendor_id: format!("{:04x}", desc.vendor_id()),
            product_id: format!("{:04x}", desc.product_id()),
            manufacturer,
            vendor_name: vendor_name(desc.vendor_id()).to_string(),
            product,
            matched_by,
        });
    }

    info!("Listed {} USB device(s) (candidates only: {})", printers.len(), only_candidates);
    Ok(printers)
}

fn has_printer_interface<T: UsbContext>(device: &Device<T>, desc: &DeviceDescriptor) -> bool {
    (0..desc.num_configurations())
        .filter_map(|index| device.config_descriptor(index).ok())
        .any(|config| {
            config.interfaces().any(|interface| {
                interface
                    .descriptors()
                    .any(|setting| setting.class_code() == PRINTER_INTERFACE_CLASS)
            })
        })
}

/// Manufacturer and product strings, `"Unknown"` when unreadable.
fn read_strings<T: UsbContext>(device: &Device<T>, desc: &DeviceDescriptor) -> (String, String) {
    let unknown = || (UNKNOWN.to_string(), UNKNOWN.to_string());

    let handle = match device.open() {
        Ok(handle) => handle,
        Err(e) => {
            debug!("Cannot open {:04x}:{:04x} for strings: {}", desc.vendor_id(), desc.product_id(), e);
            return unknown();
        }
    };

    let timeout = Duration::from_secs(1);
    let language = match handle.read_languages(timeout) {
        Ok(languages) => match languages.first() {
            Some(language) => *language,
            None => return unknown(),
        },
        Err(e) => {
            warn!("Error reading device info for {:04x}:{:04x}: {}", desc.vendor_id(), desc.product_id(), e);
            return unknown();
        }
    };

    let non_empty = |s: rusb::Result<String>| {
        s.ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    (
        non_empty(handle.read_manufacturer_string(language, desc, timeout)),
        non_empty(handle.read_product_string(language, desc, timeout)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vendor_wins() {
        assert_eq!(
            classify(0x0fe6, true, "Generic", "Printer"),
            Some(MatchReason::VendorId)
        );
        assert_eq!(vendor_name(0x04b8), "EPSON");
    }

    #[test]
    fn test_interface_class_before_keyword() {
        assert_eq!(
            classify(0x1234, true, "Acme", "Thermal Printer"),
            Some(MatchReason::InterfaceClass)
        );
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        assert_eq!(
            classify(0x1234, false, "ACME", "Receipt Unit"),
            Some(MatchReason::NameKeyword)
        );
        assert_eq!(
            classify(0x1234, false, "XPrinter", "Unknown"),
            Some(MatchReason::NameKeyword)
        );
    }

    #[test]
    fn test_non_printer_is_skipped() {
        assert_eq!(classify(0x046d, false, "Logitech", "USB Receiver"), None);
        assert_eq!(vendor_name(0x046d), "Unknown");
    }

    #[test]
    fn test_match_reason_serializes_as_label() {
        let json = serde_json::to_value(MatchReason::InterfaceClass).unwrap();
        assert_eq!(json, serde_json::json!("Interface class"));
    }
}
