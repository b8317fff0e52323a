// Common test utilities and fixtures

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use escpos_print_agent::errors::{AgentError, Result};
use escpos_print_agent::executor::JobExecutor;
use escpos_print_agent::queue::PrintJob;
use escpos_print_agent::transport::{DeviceAccess, DeviceConnection, DeviceTarget, DeviceTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Everything a fake printer saw, shared between the transport and its connections.
#[derive(Default)]
#[allow(dead_code)]
pub struct DeviceLog {
    pub opens: usize,
    pub closes: usize,
    pub writes: Vec<Vec<u8>>,
    pub open_now: usize,
    pub peak_open: usize,
}

/// Scripted reaction of the fake device to the next read.
#[allow(dead_code)]
pub enum Reply {
    Byte(u8),
    Empty,
    Fail(AgentError),
}

/// Fake printer behind the `DeviceTransport` seam.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct FakePrinter {
    log: Arc<Mutex<DeviceLog>>,
    replies: Arc<Mutex<VecDeque<Reply>>>,
    open_error: Arc<Mutex<Option<AgentError>>>,
    fail_write_at: Arc<Mutex<Option<usize>>>,
    write_delay: Arc<Mutex<Duration>>,
}

#[allow(dead_code)]
impl FakePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the four status queries in order.
    pub fn with_status(self, printer: u8, offline: u8, error: u8, paper: u8) -> Self {
        for byte in [printer, offline, error, paper] {
            self.push_reply(Reply::Byte(byte));
        }
        self
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Make the next `open` fail.
    pub fn fail_open(&self, error: AgentError) {
        *self.open_error.lock().unwrap() = Some(error);
    }

    /// Make the write with this zero-based index fail.
    pub fn fail_write_at(&self, index: usize) {
        *self.fail_write_at.lock().unwrap() = Some(index);
    }

    /// Slow every write down so overlapping sessions would be observed.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Most connections that were ever open at the same time.
    pub fn peak_open(&self) -> usize {
        self.log.lock().unwrap().peak_open
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().writes.clone()
    }

    /// Device gate over this fake, as the agent wires it.
    pub fn access(&self) -> Arc<DeviceAccess> {
        Arc::new(DeviceAccess::new(
            Arc::new(self.clone()),
            Duration::from_millis(50),
        ))
    }
}

impl DeviceTransport for FakePrinter {
    fn open(&self, _target: &DeviceTarget) -> Result<Box<dyn DeviceConnection>> {
        if let Some(error) = self.open_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut log = self.log.lock().unwrap();
        log.opens += 1;
        log.open_now += 1;
        log.peak_open = log.peak_open.max(log.open_now);
        Ok(Box::new(FakeConnection {
            printer: self.clone(),
            closed: false,
        }))
    }
}

struct FakeConnection {
    printer: FakePrinter,
    closed: bool,
}

impl DeviceConnection for FakeConnection {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        let delay = *self.printer.write_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut log = self.printer.log.lock().unwrap();
        if *self.printer.fail_write_at.lock().unwrap() == Some(log.writes.len()) {
            return Err(AgentError::Io("simulated write failure".to_string()));
        }
        log.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read_response(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
        match self.printer.replies.lock().unwrap().pop_front() {
            Some(Reply::Byte(byte)) => Ok(vec![byte]),
            Some(Reply::Empty) => Ok(Vec::new()),
            Some(Reply::Fail(error)) => Err(error),
            None => Err(AgentError::Timeout("no scripted response".to_string())),
        }
    }

    fn max_packet_size(&self) -> usize {
        64
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut log = self.printer.log.lock().unwrap();
            log.closes += 1;
            log.open_now -= 1;
        }
    }
}

/// Executor that records job ids in execution order.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingExecutor {
    pub executed: Mutex<Vec<PrintJob>>,
    pub fail_ids: Mutex<Vec<uuid::Uuid>>,
    pub panic_ids: Mutex<Vec<uuid::Uuid>>,
}

#[allow(dead_code)]
impl RecordingExecutor {
    pub fn executed_ids(&self) -> Vec<uuid::Uuid> {
        self.executed.lock().unwrap().iter().map(|job| job.id).collect()
    }
}

impl JobExecutor for RecordingExecutor {
    fn execute(&self, job: &PrintJob) -> Result<()> {
        if self.panic_ids.lock().unwrap().contains(&job.id) {
            panic!("simulated executor panic");
        }
        self.executed.lock().unwrap().push(job.clone());
        if self.fail_ids.lock().unwrap().contains(&job.id) {
            return Err(AgentError::Io("simulated print failure".to_string()));
        }
        Ok(())
    }
}

/// Executor that blocks inside its first job until released.
#[derive(Default)]
#[allow(dead_code)]
pub struct GatedExecutor {
    state: Mutex<GateState>,
    changed: Condvar,
    pub inner: RecordingExecutor,
}

#[derive(Default)]
struct GateState {
    entered: bool,
    released: bool,
}

#[allow(dead_code)]
impl GatedExecutor {
    /// Wait until the worker is inside a job.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.entered)
            .unwrap();
        state.entered
    }

    pub fn release(&self) {
        self.state.lock().unwrap().released = true;
        self.changed.notify_all();
    }
}

impl JobExecutor for GatedExecutor {
    fn execute(&self, job: &PrintJob) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.entered = true;
        self.changed.notify_all();
        let _state = self.changed.wait_while(state, |s| !s.released).unwrap();
        self.inner.execute(job)
    }
}

#[allow(dead_code)]
pub fn usb_target() -> DeviceTarget {
    DeviceTarget::Usb {
        vendor_id: 0x0fe6,
        product_id: 0x811e,
    }
}

/// A job whose payload exactly fills `width` x `height`.
#[allow(dead_code)]
pub fn create_test_print_job(width: u32, height: u32, cash_drawer: bool) -> PrintJob {
    let len = (width.div_ceil(8) * height) as usize;
    let bitmap: Vec<u8> = (0..len).map(|i| i as u8).collect();
    PrintJob::new(BASE64.encode(bitmap), width, height, usb_target(), cash_drawer)
}

/// Run `f` on a helper thread and fail the test if it outlives `timeout`.
#[allow(dead_code)]
pub fn within<T: Send + 'static>(timeout: Duration, f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout)
        .expect("operation did not finish in time")
}
