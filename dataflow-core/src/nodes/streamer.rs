//! Streaming Source
//!
//! A [`StreamingSource`] publishes frames produced by an external hardware
//! stream. The stream lives on a dedicated worker thread; frames arrive
//! through a callback on whatever thread the hardware uses.
//!
//! # How the Handoff Works
//!
//! Worker, callback and pipeline share one [`Handoff`]: a mutex over the
//! latest frame, a generation counter, a pending fault and the stop flag,
//! plus two condition variables.
//!
//! - The callback (through a [`FrameSink`]) replaces the latest frame, bumps
//!   the generation and signals `frame_ready`. Last writer wins; older
//!   frames are not queued.
//! - The first execution starts the worker and blocks on `frame_ready`
//!   until a frame, a fault or the worker's exit is observed.
//! - Later updates notice a new generation through `poll_modified` and
//!   republish without blocking.
//! - [`StreamHandle::stop`] sets the stop flag and signals `wake`. The
//!   worker checks the flag every poll interval, stops and disconnects the
//!   stream, and exits. Dropping the node stops and joins the worker.
//!
//! A fault raised anywhere on the worker side is held until the next
//! execution of the node and returned from it as a resource error.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::StreamConfig;
use crate::data::{DataHandle, DataObject, DataType, Image};
use crate::error::{EngineError, Result};
use crate::graph::{ExecutionContext, NodeKind, ProcessBehavior};

/// One frame as delivered by the hardware.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub microns_per_pixel: f64,
}

pub type FrameCallback = Box<dyn FnMut(RawFrame<'_>) + Send>;

/// Failures reported by a hardware stream or its worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamFault {
    #[error("unable to connect to {address}:{port}: {reason}")]
    Connect {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("unable to start streaming: {0}")]
    Start(String),

    #[error("unable to stop streaming: {0}")]
    Stop(String),

    #[error("unable to disconnect: {0}")]
    Disconnect(String),

    #[error("rejected frame: {0}")]
    Frame(String),

    #[error("stream worker exited before delivering a frame")]
    WorkerExited,
}

impl From<StreamFault> for EngineError {
    fn from(fault: StreamFault) -> Self {
        EngineError::Resource(fault.to_string())
    }
}

/// The hardware side of a stream.
///
/// Implementations call the registered callback once per frame, from any
/// thread, between `start` and `stop`.
pub trait HardwareStream: Send + 'static {
    fn set_frame_callback(&mut self, callback: FrameCallback);

    fn connect(&mut self, address: &str, port: u16) -> std::result::Result<(), StreamFault>;

    fn start(&mut self) -> std::result::Result<(), StreamFault>;

    fn stop(&mut self) -> std::result::Result<(), StreamFault>;

    fn disconnect(&mut self) -> std::result::Result<(), StreamFault>;
}

#[derive(Default)]
struct HandoffState {
    latest: Option<DataHandle>,
    generation: u64,
    fault: Option<StreamFault>,
    stop_requested: bool,
    worker_alive: bool,
}

#[derive(Default)]
struct Handoff {
    state: Mutex<HandoffState>,
    frame_ready: Condvar,
    wake: Condvar,
}

impl Handoff {
    fn publish(&self, data: DataHandle) {
        let mut state = self.state.lock();
        state.latest = Some(data);
        state.generation += 1;
        self.frame_ready.notify_all();
    }

    fn raise(&self, fault: StreamFault) {
        let mut state = self.state.lock();
        if state.fault.is_some() {
            warn!(pending = ?state.fault, dropped = %fault, "stream fault already pending");
        } else {
            state.fault = Some(fault);
        }
        self.frame_ready.notify_all();
    }

    fn take_fault(&self) -> Option<StreamFault> {
        self.state.lock().fault.take()
    }

    fn request_stop(&self) {
        let mut state = self.state.lock();
        state.stop_requested = true;
        self.wake.notify_all();
    }
}

/// Marks the worker dead when it returns or unwinds.
struct AliveGuard(Arc<Handoff>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.worker_alive = false;
        self.0.frame_ready.notify_all();
    }
}

/// Handle given to the frame callback. Holds no reference to the node.
#[derive(Clone)]
pub struct FrameSink {
    handoff: Arc<Handoff>,
}

impl FrameSink {
    /// Convert a raw frame into an 8-bit [`Image`] and publish it.
    pub fn publish(&self, frame: RawFrame<'_>) {
        match frame_to_image(frame) {
            Ok(image) => self.handoff.publish(DataObject::new(image)),
            Err(fault) => self.handoff.raise(fault),
        }
    }

    /// Publish an already-built data object.
    pub fn publish_data(&self, data: DataHandle) {
        self.handoff.publish(data);
    }

    pub fn report_fault(&self, fault: StreamFault) {
        self.handoff.raise(fault);
    }
}

fn frame_to_image(frame: RawFrame<'_>) -> std::result::Result<Image, StreamFault> {
    if frame.bits_per_pixel == 0 || frame.bits_per_pixel % 8 != 0 || frame.bits_per_pixel > 32 {
        return Err(StreamFault::Frame(format!(
            "unsupported bit depth {}",
            frame.bits_per_pixel
        )));
    }
    let channels = (frame.bits_per_pixel / 8) as u8;
    let spacing = (frame.microns_per_pixel / 1000.0) as f32;
    Image::new_2d(frame.width, frame.height, DataType::Uint8, channels, frame.data.to_vec())
        .map(|image| image.with_spacing([spacing, spacing, 1.0]))
        .map_err(|err| StreamFault::Frame(err.to_string()))
}

/// Driver-side control of a running stream.
#[derive(Clone)]
pub struct StreamHandle {
    handoff: Arc<Handoff>,
}

impl StreamHandle {
    /// Ask the worker to stop. Does not wait for it.
    pub fn stop(&self) {
        info!("stopping stream");
        self.handoff.request_stop();
    }

    pub fn is_running(&self) -> bool {
        self.handoff.state.lock().worker_alive
    }

    /// Number of frames published so far.
    pub fn frames_delivered(&self) -> u64 {
        self.handoff.state.lock().generation
    }
}

/// Source node fed by a [`HardwareStream`] on a background worker.
pub struct StreamingSource {
    stream: Option<Box<dyn HardwareStream>>,
    config: Option<StreamConfig>,
    handoff: Arc<Handoff>,
    worker: Option<JoinHandle<Box<dyn HardwareStream>>>,
    seen_generation: u64,
}

impl StreamingSource {
    pub fn new<S: HardwareStream>(stream: S) -> Self {
        Self {
            stream: Some(Box::new(stream)),
            config: None,
            handoff: Arc::new(Handoff::default()),
            worker: None,
            seen_generation: 0,
        }
    }

    /// Use `config` instead of the pipeline's stream settings.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            handoff: Arc::clone(&self.handoff),
        }
    }

    fn worker_alive(&self) -> bool {
        self.worker.is_some() && self.handoff.state.lock().worker_alive
    }

    /// Join a worker that has exited and take the stream back.
    fn reap_worker(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(_) => {
                error!("stream worker panicked");
                Err(EngineError::Resource("stream worker panicked".to_string()))
            }
        }
    }

    fn ensure_started(&mut self, config: StreamConfig) -> Result<()> {
        if self.worker_alive() {
            return Ok(());
        }
        self.reap_worker()?;

        let mut stream = self.stream.take().ok_or_else(|| {
            EngineError::Resource("hardware stream is no longer available".to_string())
        })?;
        {
            let mut state = self.handoff.state.lock();
            state.stop_requested = false;
            state.latest = None;
            state.worker_alive = true;
        }

        let sink = FrameSink {
            handoff: Arc::clone(&self.handoff),
        };
        stream.set_frame_callback(Box::new(move |frame| sink.publish(frame)));

        let handoff = Arc::clone(&self.handoff);
        let spawned = thread::Builder::new()
            .name("stream-worker".to_string())
            .spawn(move || run_worker(stream, handoff, config));
        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(err) => {
                self.handoff.state.lock().worker_alive = false;
                Err(EngineError::Resource(format!("unable to spawn stream worker: {}", err)))
            }
        }
    }

    /// Block until a frame is published, a fault is raised or the worker
    /// exits.
    fn wait_for_frame(&self, config: &StreamConfig) -> Result<(DataHandle, u64)> {
        let deadline = config.first_frame_timeout().map(|timeout| Instant::now() + timeout);
        let mut state = self.handoff.state.lock();
        loop {
            if let Some(fault) = state.fault.take() {
                return Err(fault.into());
            }
            if let Some(latest) = &state.latest {
                return Ok((Arc::clone(latest), state.generation));
            }
            if !state.worker_alive {
                return Err(StreamFault::WorkerExited.into());
            }
            match deadline {
                Some(deadline) => {
                    let timed_out = self.handoff.frame_ready.wait_until(&mut state, deadline).timed_out();
                    if timed_out && state.latest.is_none() && state.fault.is_none() {
                        return Err(EngineError::Resource(format!(
                            "no frame arrived within {} ms",
                            config.first_frame_timeout_ms.unwrap_or_default()
                        )));
                    }
                }
                None => self.handoff.frame_ready.wait(&mut state),
            }
        }
    }

    fn shutdown(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.handoff.request_stop();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(stream) => self.stream = Some(stream),
                Err(_) => error!("stream worker panicked during shutdown"),
            }
        }
    }
}

fn run_worker(
    mut stream: Box<dyn HardwareStream>,
    handoff: Arc<Handoff>,
    config: StreamConfig,
) -> Box<dyn HardwareStream> {
    let _alive = AliveGuard(Arc::clone(&handoff));

    info!(address = %config.address, port = config.port, "connecting stream");
    if let Err(fault) = stream.connect(&config.address, config.port) {
        handoff.raise(fault);
        return stream;
    }
    if let Err(fault) = stream.start() {
        handoff.raise(fault);
        if let Err(fault) = stream.disconnect() {
            handoff.raise(fault);
        }
        return stream;
    }
    info!("stream started");

    {
        let mut state = handoff.state.lock();
        while !state.stop_requested {
            handoff.wake.wait_for(&mut state, config.poll_interval());
        }
    }

    if let Err(fault) = stream.stop() {
        handoff.raise(fault);
    }
    if let Err(fault) = stream.disconnect() {
        handoff.raise(fault);
    }
    info!("stream stopped");
    stream
}

impl ProcessBehavior for StreamingSource {
    fn kind(&self) -> NodeKind {
        NodeKind::Stream
    }

    fn name(&self) -> &str {
        "streaming_source"
    }

    fn poll_modified(&mut self) -> bool {
        let state = self.handoff.state.lock();
        state.generation != self.seen_generation || state.fault.is_some()
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        if let Some(fault) = self.handoff.take_fault() {
            return Err(fault.into());
        }

        let config = self.config.clone().unwrap_or_else(|| ctx.config().stream.clone());
        self.ensure_started(config.clone())?;

        let (frame, generation) = self.wait_for_frame(&config)?;
        self.seen_generation = generation;
        ctx.set_output(0, frame);
        Ok(())
    }
}

impl Drop for StreamingSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}
