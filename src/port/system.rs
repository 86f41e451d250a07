//! OS serial transport built on the `serialport` crate.
//!
//! Blocking serialport calls run on Tokio's blocking pool. Each session gets a
//! dedicated reader thread on a cloned handle that polls with a short timeout
//! and forwards whatever arrives to the binding.
//!
//! Note: This module is gated behind the `system` feature flag.

use super::registry::{PortRegistry, SessionId};
use super::traits::{
    Connection, DataBits, FlowControl, InboundSink, OpenOptions, Parity, PortInfo, SetOptions,
    StopBits, Transport, TransportCapabilities,
};
use crate::error::{BindingError, BindingResult, Operation};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Read timeout of the per-session reader; bounds how long closing a session
/// waits for its reader thread.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK_SIZE: usize = 4096;

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(port: SerialPortInfo) -> Self {
        match port.port_type {
            SerialPortType::UsbPort(usb) => usb_port_info(
                port.port_name,
                usb.vid,
                usb.pid,
                usb.manufacturer,
                usb.serial_number,
            ),
            _ => PortInfo::new(port.port_name),
        }
    }
}

/// USB ids are rendered as four lowercase hex digits.
fn usb_port_info(
    path: String,
    vid: u16,
    pid: u16,
    manufacturer: Option<String>,
    serial_number: Option<String>,
) -> PortInfo {
    PortInfo {
        manufacturer,
        serial_number,
        vendor_id: Some(format!("{vid:04x}")),
        product_id: Some(format!("{pid:04x}")),
        ..PortInfo::new(path)
    }
    .normalized()
}

/// Map a serialport failure onto the error taxonomy.
fn serial_error(op: Operation, path: &str, err: serialport::Error) -> BindingError {
    match err.kind() {
        serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound)
            if op == Operation::Open =>
        {
            BindingError::not_found(op, path)
        }
        serialport::ErrorKind::InvalidInput => BindingError::invalid(op, err.to_string()),
        _ => BindingError::disconnected(op, err.to_string()),
    }
}

/// Transport over the devices of the host operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemTransport {
    registry: PortRegistry,
}

impl SystemTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share session bookkeeping with other transports or observers.
    pub fn with_registry(registry: PortRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }
}

#[async_trait]
impl Transport for SystemTransport {
    fn capabilities(&self) -> TransportCapabilities {
        // Windows cannot open a COM port twice.
        TransportCapabilities {
            shared_access: cfg!(unix),
        }
    }

    async fn list(&self) -> BindingResult<Vec<PortInfo>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| BindingError::disconnected(Operation::List, e.to_string()))?
            .map_err(|e| serial_error(Operation::List, "", e))?;
        Ok(ports.into_iter().map(PortInfo::from).collect())
    }

    async fn connect(
        &self,
        path: &str,
        options: &OpenOptions,
        sink: InboundSink,
    ) -> BindingResult<Box<dyn Connection>> {
        self.registry.ensure(PortInfo::new(path));
        let session = self.registry.attach(
            path,
            options,
            self.capabilities().shared_access,
            sink.clone(),
        )?;

        let owned_path = path.to_string();
        let owned_options = options.clone();
        let opened = tokio::task::spawn_blocking(move || open_device(&owned_path, &owned_options))
            .await
            .map_err(|e| BindingError::disconnected(Operation::Open, e.to_string()))
            .and_then(|result| result);

        let (port, reader) = match opened {
            Ok(handles) => handles,
            Err(err) => {
                self.registry.detach(path, session);
                self.registry.forget_idle(path);
                return Err(err);
            }
        };

        let reader = match spawn_reader(path, reader, sink) {
            Ok(reader) => reader,
            Err(err) => {
                self.registry.detach(path, session);
                self.registry.forget_idle(path);
                return Err(err);
            }
        };

        info!(path, baud_rate = options.baud_rate, lock = options.lock, "device opened");
        Ok(Box::new(SystemConnection {
            port: Arc::new(Mutex::new(Some(port))),
            path: path.to_string(),
            session,
            registry: self.registry.clone(),
            reader: Some(reader),
        }))
    }
}

type DeviceHandles = (Box<dyn SerialPort>, Box<dyn SerialPort>);

fn open_device(path: &str, options: &OpenOptions) -> BindingResult<DeviceHandles> {
    let builder = serialport::new(path, options.baud_rate)
        .data_bits(options.data_bits.into())
        .flow_control(options.flow_control().into())
        .parity(options.parity.into())
        .stop_bits(options.stop_bits.into())
        .timeout(READ_POLL_INTERVAL);

    #[cfg(unix)]
    let port: Box<dyn SerialPort> = {
        let mut port = builder
            .open_native()
            .map_err(|e| serial_error(Operation::Open, path, e))?;
        port.set_exclusive(options.lock)
            .map_err(|e| serial_error(Operation::Open, path, e))?;
        Box::new(port)
    };

    #[cfg(not(unix))]
    let port: Box<dyn SerialPort> = builder
        .open()
        .map_err(|e| serial_error(Operation::Open, path, e))?;

    let reader = port
        .try_clone()
        .map_err(|e| serial_error(Operation::Open, path, e))?;
    Ok((port, reader))
}

/// Per-session reader thread. It holds its own handle on the device until
/// it is joined.
struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderThread {
    fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the thread and wait until its device handle is dropped.
    fn join(mut self) -> std::thread::Result<()> {
        self.stop();
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reader<R>(path: &str, mut reader: R, sink: InboundSink) -> BindingResult<ReaderThread>
where
    R: Read + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let thread_path = path.to_string();
    let handle = std::thread::Builder::new()
        .name(format!("serial-reader {path}"))
        .spawn(move || {
            let mut buffer = vec![0u8; READ_CHUNK_SIZE];
            while !thread_stop.load(Ordering::Acquire) {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        if !thread_stop.load(Ordering::Acquire) {
                            warn!(path = %thread_path, "device hung up");
                            sink.disconnected("device hung up");
                        }
                        break;
                    }
                    Ok(n) => {
                        trace!(path = %thread_path, bytes = n, "read");
                        if !sink.data(Bytes::copy_from_slice(&buffer[..n])) {
                            break;
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::TimedOut
                                | std::io::ErrorKind::WouldBlock
                                | std::io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        if !thread_stop.load(Ordering::Acquire) {
                            warn!(path = %thread_path, error = %e, "read failed");
                            sink.disconnected(e.to_string());
                        }
                        break;
                    }
                }
            }
            debug!(path = %thread_path, "reader stopped");
        })
        .map_err(|e| BindingError::disconnected(Operation::Open, e.to_string()))?;

    Ok(ReaderThread {
        stop,
        handle: Some(handle),
    })
}

/// One session on an OS device.
pub struct SystemConnection {
    /// `None` once closed.
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    path: String,
    session: SessionId,
    registry: PortRegistry,
    reader: Option<ReaderThread>,
}

impl SystemConnection {
    /// Run a blocking call against the device on the blocking pool.
    async fn blocking<T, F>(&self, op: Operation, f: F) -> BindingResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialPort) -> serialport::Result<T> + Send + 'static,
    {
        let port = Arc::clone(&self.port);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock();
            match guard.as_mut() {
                Some(port) => f(&mut **port),
                None => Err(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "device already closed",
                )),
            }
        })
        .await
        .map_err(|e| BindingError::disconnected(op, e.to_string()))?
        .map_err(|e| serial_error(op, &path, e))
    }
}

#[async_trait]
impl Connection for SystemConnection {
    async fn write(&mut self, data: Bytes) -> BindingResult<()> {
        let len = data.len();
        self.blocking(Operation::Write, move |port| {
            port.write_all(&data).map_err(serialport::Error::from)
        })
        .await?;
        trace!(path = %self.path, bytes = len, "write accepted");
        Ok(())
    }

    async fn update(&mut self, baud_rate: u32) -> BindingResult<()> {
        self.blocking(Operation::Update, move |port| port.set_baud_rate(baud_rate))
            .await?;
        self.registry.record_baud_rate(&self.path, baud_rate)
    }

    async fn set(&mut self, flags: &SetOptions) -> BindingResult<()> {
        let flags = *flags;
        self.blocking(Operation::Set, move |port| {
            port.write_request_to_send(flags.rts)?;
            port.write_data_terminal_ready(flags.dtr)?;
            if flags.brk {
                port.set_break()
            } else {
                port.clear_break()
            }
        })
        .await
    }

    async fn flush(&mut self) -> BindingResult<()> {
        self.blocking(Operation::Flush, |port| port.clear(ClearBuffer::All))
            .await
    }

    async fn drain(&mut self) -> BindingResult<()> {
        self.blocking(Operation::Drain, |port| {
            port.flush().map_err(serialport::Error::from)
        })
        .await
    }

    /// Resolves once the reader thread has exited and both device handles
    /// are released, so a following open finds the device free.
    async fn close(self: Box<Self>) -> BindingResult<()> {
        let mut this = self;
        if let Some(reader) = this.reader.take() {
            match tokio::task::spawn_blocking(move || reader.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!(path = %this.path, "reader thread panicked"),
                Err(e) => warn!(path = %this.path, error = %e, "failed to join reader thread"),
            }
        }
        drop(this.port.lock().take());
        this.registry.detach(&this.path, this.session);
        info!(path = %this.path, "device closed");
        Ok(())
    }
}

impl Drop for SystemConnection {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.stop();
        }
    }
}

impl std::fmt::Debug for SystemConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemConnection")
            .field("path", &self.path)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_data_bits_conversion() {
        let bits: serialport::DataBits = DataBits::Seven.into();
        assert_eq!(bits, serialport::DataBits::Seven);
    }

    #[test]
    fn test_flow_control_conversion() {
        let mut options = OpenOptions::default();
        options.rtscts = true;
        let flow: serialport::FlowControl = options.flow_control().into();
        assert_eq!(flow, serialport::FlowControl::Hardware);
    }

    #[test]
    fn test_parity_and_stop_bits_conversion() {
        let parity: serialport::Parity = Parity::Even.into();
        assert_eq!(parity, serialport::Parity::Even);
        let stop_bits: serialport::StopBits = StopBits::Two.into();
        assert_eq!(stop_bits, serialport::StopBits::Two);
    }

    #[test]
    fn test_missing_path_maps_to_not_found() {
        let err = serial_error(
            Operation::Open,
            "/dev/ttyGONE",
            serialport::Error::new(
                serialport::ErrorKind::Io(std::io::ErrorKind::NotFound),
                "No such file or directory",
            ),
        );
        assert_eq!(err.kind(), ErrorKind::PortNotFound);

        let err = serial_error(
            Operation::Write,
            "/dev/ttyGONE",
            serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::TransportDisconnected);
    }

    #[test]
    fn test_usb_info_conversion() {
        let info = usb_port_info(
            "/dev/ttyACM0".to_string(),
            0x2341,
            0x43,
            Some("Arduino".to_string()),
            Some(String::new()),
        );
        assert_eq!(info.vendor_id.as_deref(), Some("2341"));
        assert_eq!(info.product_id.as_deref(), Some("0043"));
        assert_eq!(info.serial_number, None);
        assert_eq!(info.manufacturer.as_deref(), Some("Arduino"));
        assert_eq!(info.pnp_id, None);
    }

    /// Stands in for a device that never sends anything.
    struct SilentDevice {
        _handle: Arc<()>,
    }

    impl Read for SilentDevice {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(10));
            Err(std::io::ErrorKind::TimedOut.into())
        }
    }

    /// Sends its script, then hangs up.
    struct ScriptedDevice {
        script: Vec<&'static [u8]>,
    }

    impl Read for ScriptedDevice {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.script.is_empty() {
                return Ok(0);
            }
            let chunk = self.script.remove(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_join_releases_reader_handle() {
        let handle = Arc::new(());
        let reader = spawn_reader(
            "/dev/ttyTEST",
            SilentDevice {
                _handle: Arc::clone(&handle),
            },
            InboundSink::new(|_| true),
        )
        .unwrap();
        assert_eq!(Arc::strong_count(&handle), 2);

        reader.join().unwrap();
        assert_eq!(Arc::strong_count(&handle), 1);
    }

    #[test]
    fn test_reader_forwards_data_then_hangup() {
        use crate::port::traits::Inbound;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let reader = spawn_reader(
            "/dev/ttyTEST",
            ScriptedDevice {
                script: vec![b"RE", b"ADY"],
            },
            InboundSink::new(move |inbound| {
                seen_clone.lock().push(inbound);
                true
            }),
        )
        .unwrap();
        for _ in 0..200 {
            if seen.lock().len() == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        reader.join().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], Inbound::Data(Bytes::from_static(b"RE")));
        assert_eq!(seen[1], Inbound::Data(Bytes::from_static(b"ADY")));
        assert!(matches!(seen[2], Inbound::Disconnected(_)));
    }

    #[tokio::test]
    async fn test_connect_missing_device() {
        let transport = SystemTransport::new();
        let sink = InboundSink::new(|_| true);
        let err = transport
            .connect("/dev/nonexistent_port_12345", &OpenOptions::default(), sink)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PortNotFound);
        assert!(err.to_string().contains("nonexistent"));
        assert!(!transport.registry().contains("/dev/nonexistent_port_12345"));
    }

    #[tokio::test]
    async fn test_list_reports_no_empty_strings() {
        let transport = SystemTransport::new();
        // Enumeration may be unavailable in sandboxes; only check what we get.
        if let Ok(ports) = transport.list().await {
            for port in ports {
                assert!(!port.path.is_empty());
                assert_ne!(port.manufacturer.as_deref(), Some(""));
                assert_ne!(port.serial_number.as_deref(), Some(""));
            }
        }
    }
}
