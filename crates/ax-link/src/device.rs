//! KISS device and port handling
//!
//! A [`KissDevice`] drives a KISS TNC over any byte stream implementing
//! `AsyncRead + AsyncWrite` (serial ports, TCP sockets and in-memory pipes
//! all look the same from here). The device owns a reader task that runs the
//! KISS deframer and a writer task that paces outgoing bytes, so callers
//! never block on the transport.
//!
//! Up to sixteen [`KissPort`]s hang off one device; each port dispatches the
//! data frames addressed to it through its `received` signal and accepts
//! payloads to transmit.
//!
//! On open the writer puts the TNC into KISS mode: the configured TNC2
//! command strings are dribbled out one octet at a time (small TNC input
//! buffers overflow otherwise), then a `C0 FF C0` exit-KISS frame clears any
//! stale KISS session, then the KISS parameters (TXDELAY and friends) are
//! sent. `reset_on_close` sends the exit sequence again on teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use ax_protocol::kiss::{KissCommand, KissDeframer, KissFrame};
use ax_protocol::KissError;

use crate::error::LinkError;
use crate::signal::Signal;

/// KISS device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KissConfig {
    /// TNC2 commands sent to enter KISS mode (suits Kantronics KPC3 TNCs)
    pub kiss_commands: Vec<String>,
    /// Pause between init octets (ms); TNCs with small buffers need >= 100
    pub init_delay_ms: u64,
    /// TXDELAY in 10 ms units
    pub txdelay: Option<u8>,
    /// CSMA persistence parameter
    pub persistence: Option<u8>,
    /// Slot time in 10 ms units
    pub slot_time: Option<u8>,
    /// TXTAIL in 10 ms units
    pub txtail: Option<u8>,
    /// Full-duplex flag
    pub full_duplex: Option<bool>,
    /// Send the exit-KISS sequence when the device closes
    pub reset_on_close: bool,
    /// Largest write issued to the transport in one go
    pub send_block_size: usize,
    /// Pause between consecutive blocks (ms)
    pub send_block_delay_ms: u64,
}

impl Default for KissConfig {
    fn default() -> Self {
        Self {
            kiss_commands: vec!["INT KISS".into(), "RESET".into()],
            init_delay_ms: 100,
            txdelay: Some(50),
            persistence: Some(63),
            slot_time: Some(10),
            txtail: Some(30),
            full_duplex: None,
            reset_on_close: true,
            send_block_size: 128,
            send_block_delay_ms: 0,
        }
    }
}

impl KissConfig {
    /// KISS parameter frames sent at the end of the init sequence
    fn param_frames(&self) -> Vec<KissFrame> {
        let params = [
            (KissCommand::TxDelay, self.txdelay),
            (KissCommand::Persistence, self.persistence),
            (KissCommand::SlotTime, self.slot_time),
            (KissCommand::TxTail, self.txtail),
            (KissCommand::FullDuplex, self.full_duplex.map(u8::from)),
        ];
        params
            .into_iter()
            .filter_map(|(command, value)| {
                value.map(|v| KissFrame::param(0, command, v).expect("port 0 is valid"))
            })
            .collect()
    }
}

/// Lifecycle state of a KISS device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Transport open, TNC being put into KISS mode
    Opening,
    /// TNC in KISS mode, traffic flowing
    Open,
    /// Close requested, draining outgoing data
    Closing,
    /// Device closed
    Closed,
    /// Transport error; the device is no longer usable
    Failed,
}

enum WriterMsg {
    Frame(Vec<u8>),
    Shutdown { reset: bool },
}

struct DeviceShared {
    writer_tx: mpsc::UnboundedSender<WriterMsg>,
    ports: Mutex<HashMap<u8, Arc<PortShared>>>,
    state: Mutex<DeviceState>,
    reset_on_close: bool,
    failed: Signal<String>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceShared {
    fn set_state(&self, state: DeviceState) {
        *self.state.lock().unwrap() = state;
    }

    fn fail(&self, action: &str, error: &dyn std::fmt::Display) {
        warn!("KISS device failed during {}: {}", action, error);
        self.set_state(DeviceState::Failed);
        self.failed.emit(&format!("{}: {}", action, error));
    }
}

struct PortShared {
    index: u8,
    received: Signal<Vec<u8>>,
    device: Weak<DeviceShared>,
}

/// Handle to an open KISS device
#[derive(Clone)]
pub struct KissDevice {
    shared: Arc<DeviceShared>,
}

impl KissDevice {
    /// Open a device over the given transport and start its I/O tasks
    pub fn open<T>(io: T, config: KissConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(DeviceShared {
            writer_tx,
            ports: Mutex::new(HashMap::new()),
            state: Mutex::new(DeviceState::Opening),
            reset_on_close: config.reset_on_close,
            failed: Signal::new(),
            reader: Mutex::new(None),
        });

        tokio::spawn(writer_task(writer, writer_rx, config, Arc::downgrade(&shared)));
        let reader_handle = tokio::spawn(reader_task(reader, Arc::downgrade(&shared)));
        *shared.reader.lock().unwrap() = Some(reader_handle);

        info!("KISS device opening");
        Self { shared }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DeviceState {
        *self.shared.state.lock().unwrap()
    }

    /// Signal fired with a description when the device enters
    /// [`DeviceState::Failed`]
    pub fn failed(&self) -> &Signal<String> {
        &self.shared.failed
    }

    /// Get (creating on first use) the port with the given index
    pub fn port(&self, index: u8) -> Result<KissPort, KissError> {
        if index > 15 {
            return Err(KissError::PortOutOfRange(index));
        }
        let mut ports = self.shared.ports.lock().unwrap();
        let shared = ports
            .entry(index)
            .or_insert_with(|| {
                debug!("opening KISS port {}", index);
                Arc::new(PortShared {
                    index,
                    received: Signal::new(),
                    device: Arc::downgrade(&self.shared),
                })
            })
            .clone();
        Ok(KissPort { shared })
    }

    /// Close the device, optionally resetting the TNC first
    pub fn close(&self) {
        info!("closing KISS device");
        self.shared.set_state(DeviceState::Closing);
        let _ = self.shared.writer_tx.send(WriterMsg::Shutdown {
            reset: self.shared.reset_on_close,
        });
        if let Some(reader) = self.shared.reader.lock().unwrap().take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for KissDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KissDevice")
            .field("state", &self.state())
            .finish()
    }
}

/// One of a device's sixteen ports
#[derive(Clone)]
pub struct KissPort {
    shared: Arc<PortShared>,
}

impl KissPort {
    /// Port number (0-15)
    pub fn index(&self) -> u8 {
        self.shared.index
    }

    /// Signal fired with the payload of every inbound data frame
    pub fn received(&self) -> &Signal<Vec<u8>> {
        &self.shared.received
    }

    /// Queue a raw AX.25 frame for transmission on this port
    pub fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        let device = self
            .shared
            .device
            .upgrade()
            .ok_or(LinkError::DeviceClosed)?;
        match *device.state.lock().unwrap() {
            DeviceState::Opening | DeviceState::Open => {}
            _ => return Err(LinkError::DeviceClosed),
        }

        debug!("port {}: sending {} bytes", self.shared.index, payload.len());
        let frame = KissFrame::data(self.shared.index, payload.to_vec())?;
        device
            .writer_tx
            .send(WriterMsg::Frame(frame.encode()))
            .map_err(|_| LinkError::DeviceClosed)
    }
}

impl std::fmt::Debug for KissPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KissPort")
            .field("index", &self.shared.index)
            .finish()
    }
}

async fn writer_task<T>(
    mut writer: WriteHalf<T>,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
    config: KissConfig,
    shared: Weak<DeviceShared>,
) where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    if let Err(e) = run_init(&mut writer, &config).await {
        if let Some(shared) = shared.upgrade() {
            shared.fail("open", &e);
        }
        return;
    }
    if let Some(shared) = shared.upgrade() {
        shared.set_state(DeviceState::Open);
        info!("KISS device open");
    }

    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMsg::Frame(bytes) => {
                if let Err(e) = send_blocks(&mut writer, &bytes, &config).await {
                    if let Some(shared) = shared.upgrade() {
                        shared.fail("send", &e);
                    }
                    return;
                }
            }
            WriterMsg::Shutdown { reset } => {
                if reset {
                    debug!("sending exit-KISS sequence");
                    let _ = writer.write_all(&KissFrame::exit_kiss().encode()).await;
                }
                let _ = writer.flush().await;
                let _ = writer.shutdown().await;
                break;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.set_state(DeviceState::Closed);
        info!("KISS device closed");
    }
}

/// Put the TNC into KISS mode and configure it
async fn run_init<W: AsyncWrite + Unpin>(
    writer: &mut W,
    config: &KissConfig,
) -> std::io::Result<()> {
    let delay = Duration::from_millis(config.init_delay_ms);

    for command in &config.kiss_commands {
        debug!("sending TNC2 command {:?}", command);
        for &byte in command.as_bytes() {
            writer.write_all(&[byte]).await?;
            writer.flush().await?;
            sleep(delay).await;
        }
        writer.write_all(b"\r").await?;
        writer.flush().await?;
        sleep(delay).await;
    }

    writer.write_all(&KissFrame::exit_kiss().encode()).await?;
    writer.flush().await?;
    sleep(delay).await;

    for frame in config.param_frames() {
        writer.write_all(&frame.encode()).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Write `data` in `send_block_size` pieces with the configured pause
/// between them
async fn send_blocks<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    config: &KissConfig,
) -> std::io::Result<()> {
    let delay = Duration::from_millis(config.send_block_delay_ms);
    let mut chunks = data.chunks(config.send_block_size.max(1)).peekable();
    while let Some(chunk) = chunks.next() {
        writer.write_all(chunk).await?;
        writer.flush().await?;
        if chunks.peek().is_some() && !delay.is_zero() {
            sleep(delay).await;
        }
    }
    Ok(())
}

async fn reader_task<T>(mut reader: ReadHalf<T>, shared: Weak<DeviceShared>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut buf = vec![0u8; 1024];
    let mut deframer = KissDeframer::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("KISS transport EOF");
                break;
            }
            Ok(n) => {
                for frame in deframer.push(&buf[..n]) {
                    let Some(shared) = shared.upgrade() else { return };
                    dispatch_frame(&shared, frame);
                }
            }
            Err(e) => {
                if let Some(shared) = shared.upgrade() {
                    shared.fail("receive", &e);
                }
                return;
            }
        }
    }
}

fn dispatch_frame(shared: &DeviceShared, frame: KissFrame) {
    if frame.command != KissCommand::Data {
        // The TNC is not supposed to send these
        debug!("ignoring non-data frame from TNC: {}", frame);
        return;
    }

    let port = shared.ports.lock().unwrap().get(&frame.port).cloned();
    match port {
        Some(port) => {
            debug!("port {}: received {} bytes", frame.port, frame.payload.len());
            port.received.emit(&frame.payload);
        }
        None => debug!("dropping frame for unopened port {}", frame.port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KissConfig::default();
        assert_eq!(config.kiss_commands, vec!["INT KISS", "RESET"]);
        assert_eq!(config.init_delay_ms, 100);
        assert!(config.reset_on_close);
        assert_eq!(config.send_block_size, 128);
    }

    #[test]
    fn test_param_frames() {
        let config = KissConfig {
            txdelay: Some(40),
            persistence: None,
            slot_time: None,
            txtail: Some(30),
            full_duplex: Some(false),
            ..KissConfig::default()
        };
        let frames = config.param_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].command, KissCommand::TxDelay);
        assert_eq!(frames[0].payload, vec![40]);
        assert_eq!(frames[1].command, KissCommand::TxTail);
        assert_eq!(frames[2].command, KissCommand::FullDuplex);
        assert_eq!(frames[2].payload, vec![0]);
    }
}
