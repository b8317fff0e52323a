// Integration tests for the print job sequence sent to the device

mod common;

use common::{create_test_print_job, FakePrinter};
use escpos_print_agent::errors::AgentError;
use escpos_print_agent::executor::{JobExecutor, PrintJobExecutor};
use escpos_print_agent::queue::PrintJob;
use pretty_assertions::assert_eq;

const INIT: &[u8] = &[0x1b, 0x40];
const FEED: &[u8] = &[0x0a];
const CUT: &[u8] = &[0x0a, 0x0a, 0x0a, 0x1d, 0x56, 0x00];
const DRAWER: &[u8] = &[0x1b, 0x70, 0x00, 0x19, 0xfa];

#[test]
fn test_print_sends_init_raster_feed_cut() {
    let printer = FakePrinter::new();
    let executor = PrintJobExecutor::new(printer.access());
    let job = create_test_print_job(16, 2, false);

    executor.execute(&job).unwrap();

    let writes = printer.writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes[0], INIT);
    assert_eq!(
        writes[1],
        vec![0x1d, 0x76, 0x30, 0x00, 0x02, 0x00, 0x02, 0x00, 0, 1, 2, 3]
    );
    assert_eq!(writes[2], FEED);
    assert_eq!(writes[3], CUT);
    assert_eq!(printer.opens(), 1);
    assert_eq!(printer.closes(), 1);
}

#[test]
fn test_cash_drawer_kick_is_last() {
    let printer = FakePrinter::new();
    let executor = PrintJobExecutor::new(printer.access());

    executor.execute(&create_test_print_job(8, 1, true)).unwrap();

    let writes = printer.writes();
    assert_eq!(writes.len(), 5);
    assert_eq!(writes[3], CUT);
    assert_eq!(writes[4], DRAWER);
}

#[test]
fn test_write_failure_closes_device_once() {
    let printer = FakePrinter::new();
    printer.fail_write_at(1);
    let executor = PrintJobExecutor::new(printer.access());

    let result = executor.execute(&create_test_print_job(8, 1, true));

    assert!(matches!(result, Err(AgentError::Io(_))));
    assert_eq!(printer.writes(), vec![INIT.to_vec()]);
    assert_eq!(printer.opens(), 1);
    assert_eq!(printer.closes(), 1);
}

#[test]
fn test_invalid_payload_never_opens_device() {
    let printer = FakePrinter::new();
    let executor = PrintJobExecutor::new(printer.access());
    let mut job = create_test_print_job(8, 1, false);
    job.raster_base64 = "not base64!".to_string();

    let result = executor.execute(&job);

    assert!(matches!(result, Err(AgentError::InvalidPayload(_))));
    assert_eq!(printer.opens(), 0);
}

#[test]
fn test_zero_height_is_rejected() {
    let printer = FakePrinter::new();
    let executor = PrintJobExecutor::new(printer.access());
    let job = PrintJob::new(String::new(), 8, 0, common::usb_target(), false);

    assert!(matches!(
        executor.execute(&job),
        Err(AgentError::InvalidPayload(_))
    ));
    assert_eq!(printer.opens(), 0);
}

#[test]
fn test_missing_device_is_not_found() {
    let printer = FakePrinter::new();
    printer.fail_open(AgentError::NotFound("usb 0fe6:811e".to_string()));
    let executor = PrintJobExecutor::new(printer.access());

    let result = executor.execute(&create_test_print_job(8, 1, false));

    assert!(matches!(result, Err(AgentError::NotFound(_))));
    assert!(printer.writes().is_empty());
    assert_eq!(printer.closes(), 0);
}

#[test]
fn test_short_payload_is_still_printed() {
    let printer = FakePrinter::new();
    let executor = PrintJobExecutor::new(printer.access());
    let mut job = create_test_print_job(16, 4, false);
    job.raster_base64 = "AAEC".to_string(); // 3 bytes, 8 expected

    executor.execute(&job).unwrap();

    assert_eq!(
        printer.writes()[1],
        vec![0x1d, 0x76, 0x30, 0x00, 0x02, 0x00, 0x04, 0x00, 0, 1, 2]
    );
}
