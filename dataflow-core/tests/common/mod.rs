//! Shared test collaborators: counting behaviors, mock backends and a mock
//! hardware stream.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use dataflow_core::backend::{
    Access, ComputeBackend, ContextHandle, DeviceView, KernelArg, NdRange, PixelFormat,
    ProgramHandle, ProgramSource, RenderBackend, RenderContext, TextureId,
};
use dataflow_core::data::{DataHandle, DataObject, DataType, Image};
use dataflow_core::device::{
    Device, DeviceCapabilities, DeviceHandle, DeviceRegistry, DeviceType, StaticDeviceRegistry,
    MAIN_DEVICE,
};
use dataflow_core::error::{EngineError, Result};
use dataflow_core::graph::{ExecutionContext, Node, ProcessBehavior};
use dataflow_core::nodes::{FrameCallback, HardwareStream, RawFrame, StreamFault};
use dataflow_core::telemetry;

/// Route engine events to the test output. `RUST_LOG` overrides the filter.
pub fn init_logging() {
    telemetry::init_tracing("dataflow_core=debug");
}

/// Execution counter shared between a behavior and the test.
#[derive(Clone, Default)]
pub struct Runs(Arc<AtomicUsize>);

impl Runs {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Forwards input 0 to output 0 unchanged. Input 0 is required.
pub struct Passthrough {
    pub runs: Runs,
}

impl Passthrough {
    pub fn new() -> (Self, Runs) {
        let runs = Runs::default();
        (Self { runs: runs.clone() }, runs)
    }
}

impl ProcessBehavior for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn configure(&mut self, node: &mut Node, _devices: &dyn DeviceRegistry) -> Result<()> {
        node.set_input_required(0, true);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.runs.bump();
        let data = ctx.input(0)?.clone();
        ctx.set_output(0, data);
        Ok(())
    }
}

/// Publishes a new object holding its execution count. No required inputs.
pub struct Counter {
    pub runs: Runs,
}

impl Counter {
    pub fn new() -> (Self, Runs) {
        let runs = Runs::default();
        (Self { runs: runs.clone() }, runs)
    }
}

impl ProcessBehavior for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let n = self.runs.bump();
        ctx.set_output(0, DataObject::new(n));
        Ok(())
    }
}

/// Sums the `u32` payloads of all connected inputs into output 0.
pub struct Sum {
    pub runs: Runs,
}

impl Sum {
    pub fn new() -> (Self, Runs) {
        let runs = Runs::default();
        (Self { runs: runs.clone() }, runs)
    }
}

impl ProcessBehavior for Sum {
    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.runs.bump();
        let ports: Vec<_> = ctx.input_ports().collect();
        let mut total = 0u32;
        for port in ports {
            if let Some(value) = ctx.input(port)?.payload::<u32>() {
                total += *value;
            }
        }
        ctx.set_output(0, DataObject::new(total));
        Ok(())
    }
}

/// Fails while its switch is on. Counts every attempt. On success it
/// publishes the same object every time.
pub struct Flaky {
    pub runs: Runs,
    pub failing: Arc<AtomicBool>,
    output: DataHandle,
}

impl Flaky {
    pub fn new(failing: bool) -> (Self, Runs, Arc<AtomicBool>) {
        let runs = Runs::default();
        let switch = Arc::new(AtomicBool::new(failing));
        (
            Self {
                runs: runs.clone(),
                failing: switch.clone(),
                output: DataObject::new(0u32),
            },
            runs,
            switch,
        )
    }
}

impl ProcessBehavior for Flaky {
    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.runs.bump();
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Resource("device lost".to_string()));
        }
        ctx.set_output(0, self.output.clone());
        Ok(())
    }
}

/// Uses input 0 on the main device and records its residency while running.
pub struct DeviceConsumer {
    pub release_after_execute: bool,
    pub resident_during_execute: Arc<AtomicBool>,
    pub waits: Arc<AtomicUsize>,
    pub failing: Arc<AtomicBool>,
}

impl DeviceConsumer {
    pub fn new(release_after_execute: bool) -> Self {
        Self {
            release_after_execute,
            resident_during_execute: Arc::new(AtomicBool::new(false)),
            waits: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ProcessBehavior for DeviceConsumer {
    fn configure(&mut self, node: &mut Node, _devices: &dyn DeviceRegistry) -> Result<()> {
        node.set_input_required(0, true);
        node.set_input_devices(0, &[MAIN_DEVICE]);
        node.release_input_after_execute(0, self.release_after_execute);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let device = ctx.main_device()?.id();
        let resident = ctx.input(0)?.is_resident_on(device);
        self.resident_during_execute.store(resident, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Resource("kernel launch failed".to_string()));
        }
        Ok(())
    }

    fn wait_to_finish(&mut self, _ctx: &mut ExecutionContext<'_>) -> Result<()> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---- Devices ----

pub fn cpu() -> DeviceHandle {
    Device::new("cpu0", "host", DeviceType::Cpu).into_handle()
}

pub fn gl_gpu() -> DeviceHandle {
    Device::new("gpu0", "vendor", DeviceType::Gpu)
        .with_capabilities(DeviceCapabilities {
            gl_interop: true,
            image_3d_writes: true,
            global_memory: 4 << 30,
        })
        .into_handle()
}

/// A CPU (default compute device) and a GL-capable GPU.
pub fn two_device_registry() -> Arc<StaticDeviceRegistry> {
    Arc::new(StaticDeviceRegistry::new(vec![cpu(), gl_gpu()]).expect("registry"))
}

// ---- Compute ----

#[derive(Debug, Clone, PartialEq)]
pub struct KernelCall {
    pub kernel: String,
    pub program_flags: String,
    pub args: Vec<KernelArg>,
    pub range: NdRange,
}

#[derive(Default)]
pub struct MockCompute {
    pub builds: Mutex<Vec<String>>,
    pub kernels: Mutex<Vec<KernelCall>>,
    pub finishes: AtomicUsize,
    pub views: AtomicUsize,
    next_handle: AtomicU64,
}

impl ComputeBackend for MockCompute {
    fn acquire_view(&self, data: &DataObject, device: &Device, access: Access) -> Result<DeviceView> {
        self.views.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceView {
            data: data.identity(),
            device: device.id(),
            access,
            raw: self.next_handle.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn build_program(
        &self,
        device: &Device,
        name: &str,
        _source: &ProgramSource,
        build_flags: &str,
    ) -> Result<ProgramHandle> {
        self.builds.lock().push(build_flags.to_string());
        Ok(ProgramHandle {
            name: name.to_string(),
            device: device.id(),
            build_flags: build_flags.to_string(),
            raw: self.next_handle.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn enqueue_kernel(
        &self,
        _device: &Device,
        program: &ProgramHandle,
        kernel: &str,
        args: &[KernelArg],
        range: NdRange,
    ) -> Result<()> {
        self.kernels.lock().push(KernelCall {
            kernel: kernel.to_string(),
            program_flags: program.build_flags.clone(),
            args: args.to_vec(),
            range,
        });
        Ok(())
    }

    fn finish(&self, _device: &Device) -> Result<()> {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---- Rendering ----

pub struct MockRender {
    pub bind_ok: AtomicBool,
    pub binds: AtomicUsize,
    pub created: Mutex<Vec<(TextureId, u32, u32, PixelFormat)>>,
    pub deleted: Mutex<Vec<TextureId>>,
    pub draws: Mutex<Vec<TextureId>>,
    next_texture: AtomicU64,
}

impl Default for MockRender {
    fn default() -> Self {
        Self {
            bind_ok: AtomicBool::new(true),
            binds: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            draws: Mutex::new(Vec::new()),
            next_texture: AtomicU64::new(1),
        }
    }
}

impl RenderBackend for MockRender {
    fn make_current(&self, _context: ContextHandle) -> bool {
        self.binds.fetch_add(1, Ordering::SeqCst);
        self.bind_ok.load(Ordering::SeqCst)
    }

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        _pixels: Option<&[u8]>,
    ) -> Result<TextureId> {
        let id = TextureId(self.next_texture.fetch_add(1, Ordering::SeqCst));
        self.created.lock().push((id, width, height, format));
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        self.deleted.lock().push(texture);
    }

    fn draw_textured_quad(&self, texture: TextureId) -> Result<()> {
        self.draws.lock().push(texture);
        Ok(())
    }
}

pub fn render_context(backend: &Arc<MockRender>) -> RenderContext {
    RenderContext::new(ContextHandle(7), backend.clone())
}

pub fn volume(width: u32, height: u32, depth: u32, data_type: DataType) -> Image {
    let bytes = (width * height * depth) as usize * data_type.size_in_bytes();
    Image::new_3d(width, height, depth, data_type, 1, vec![0u8; bytes]).expect("volume")
}

// ---- Streaming ----

/// What a mock stream did, observable after the stream moved to its worker.
#[derive(Default)]
pub struct StreamProbe {
    pub connected: AtomicBool,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    pub disconnected: AtomicBool,
    pub address: Mutex<Option<(String, u16)>>,
}

/// A hardware stream whose `start` spawns a producer thread emitting
/// `width x height` 8-bit frames.
pub struct MockStream {
    pub probe: Arc<StreamProbe>,
    /// Delay before the first frame.
    pub first_frame_delay: Duration,
    /// Interval between frames; `None` sends a single frame.
    pub frame_interval: Option<Duration>,
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    /// Never deliver a frame.
    pub silent: bool,
    callback: Arc<Mutex<Option<FrameCallback>>>,
    running: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
}

impl MockStream {
    pub fn new() -> (Self, Arc<StreamProbe>) {
        let probe = Arc::new(StreamProbe::default());
        (
            Self {
                probe: probe.clone(),
                first_frame_delay: Duration::from_millis(0),
                frame_interval: None,
                fail_connect: false,
                fail_disconnect: false,
                silent: false,
                callback: Arc::new(Mutex::new(None)),
                running: Arc::new(AtomicBool::new(false)),
                producer: None,
            },
            probe,
        )
    }
}

impl HardwareStream for MockStream {
    fn set_frame_callback(&mut self, callback: FrameCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn connect(&mut self, address: &str, port: u16) -> std::result::Result<(), StreamFault> {
        *self.probe.address.lock() = Some((address.to_string(), port));
        if self.fail_connect {
            return Err(StreamFault::Connect {
                address: address.to_string(),
                port,
                reason: "no route to scanner".to_string(),
            });
        }
        self.probe.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self) -> std::result::Result<(), StreamFault> {
        self.probe.started.store(true, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        if self.silent {
            return Ok(());
        }

        let callback = self.callback.clone();
        let running = self.running.clone();
        let delay = self.first_frame_delay;
        let interval = self.frame_interval;
        self.producer = Some(thread::spawn(move || {
            thread::sleep(delay);
            let pixels = [0u8; 4 * 3];
            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(callback) = callback.lock().as_mut() {
                    callback(RawFrame {
                        data: &pixels,
                        width: 4,
                        height: 3,
                        bits_per_pixel: 8,
                        microns_per_pixel: 100.0,
                    });
                }
                match interval {
                    Some(interval) => thread::sleep(interval),
                    None => break,
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), StreamFault> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        self.probe.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&mut self) -> std::result::Result<(), StreamFault> {
        if self.fail_disconnect {
            return Err(StreamFault::Disconnect("scanner did not acknowledge".to_string()));
        }
        self.probe.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
