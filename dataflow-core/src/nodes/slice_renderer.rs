//! Slice Renderer
//!
//! Renders the middle slice of a 3D image into a texture on the
//! visualization device and draws it as a full-viewport quad.
//!
//! # How Rendering Works
//!
//! Each execution:
//!
//! 1. Rejects input that is not a 3D [`Image`].
//! 2. Resolves intensity window and level, falling back to the defaults of
//!    the input's [`DataType`].
//! 3. Binds the render context (a failed bind is returned immediately).
//! 4. Replaces the previous texture with a fresh RGBA float texture of the
//!    slice's size.
//! 5. Builds the `slice_renderer` program if the input data type changed
//!    since the last build, then runs `renderToTexture` over the slice and
//!    waits for it.

use std::path::PathBuf;

use crate::backend::{
    Access, KernelArg, NdRange, PixelFormat, ProgramHandle, ProgramRegistry, ProgramSource,
    RenderContext, TextureId,
};
use crate::data::{DataType, Image};
use crate::device::{DeviceRegistry, MAIN_DEVICE};
use crate::error::{EngineError, Result};
use crate::graph::{ExecutionContext, Node, NodeKind, ProcessBehavior};

pub const SLICE_PROGRAM: &str = "slice_renderer";
pub const SLICE_KERNEL: &str = "renderToTexture";

/// Build flags selecting the kernel's sampler for `data_type`.
pub fn build_flags(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Float => "-DTYPE_FLOAT",
        DataType::Int8 | DataType::Int16 => "-DTYPE_INT",
        DataType::Uint8 | DataType::Uint16 => "-DTYPE_UINT",
    }
}

pub struct SliceRenderer {
    window: Option<f32>,
    level: Option<f32>,
    programs: ProgramRegistry,
    program: Option<(DataType, ProgramHandle)>,
    texture: Option<TextureId>,
    /// Context the current texture was created in.
    context: Option<RenderContext>,
}

impl SliceRenderer {
    pub fn new() -> Self {
        Self::with_program(ProgramSource::File(PathBuf::from("kernels/slice_renderer.cl")))
    }

    pub fn with_program(source: ProgramSource) -> Self {
        let mut programs = ProgramRegistry::new();
        programs.register(SLICE_PROGRAM, source);
        Self {
            window: None,
            level: None,
            programs,
            program: None,
            texture: None,
            context: None,
        }
    }

    /// Fixed intensity window. `None` uses the input type's default.
    pub fn set_intensity_window(&mut self, window: Option<f32>) {
        self.window = window;
    }

    pub fn set_intensity_level(&mut self, level: Option<f32>) {
        self.level = level;
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    fn program_for(&mut self, ctx: &ExecutionContext<'_>, data_type: DataType) -> Result<ProgramHandle> {
        let device = ctx.main_device()?;
        if let Some((built_for, handle)) = &self.program {
            if *built_for == data_type && handle.device == device.id() {
                return Ok(handle.clone());
            }
        }
        let handle = self
            .programs
            .build(ctx.compute()?, device, SLICE_PROGRAM, build_flags(data_type))?;
        self.program = Some((data_type, handle.clone()));
        Ok(handle)
    }
}

impl Default for SliceRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBehavior for SliceRenderer {
    fn kind(&self) -> NodeKind {
        NodeKind::Render
    }

    fn name(&self) -> &str {
        "slice_renderer"
    }

    fn configure(&mut self, node: &mut Node, devices: &dyn DeviceRegistry) -> Result<()> {
        node.set_main_device(devices.default_visualization_device()?, devices)?;
        node.set_input_required(0, true);
        node.set_input_devices(0, &[MAIN_DEVICE]);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let input = ctx.input(0)?.clone();
        let image = input.payload::<Image>().ok_or_else(|| {
            EngineError::Precondition(format!(
                "{} expects an image on input 0, got {}",
                ctx.node_name(),
                input.type_name()
            ))
        })?;
        if image.dimensions() != 3 {
            return Err(EngineError::Precondition(format!(
                "{} only supports 3D images, got a {}D image",
                ctx.node_name(),
                image.dimensions()
            )));
        }

        let data_type = image.data_type();
        let window = self.window.unwrap_or_else(|| data_type.default_intensity_window());
        let level = self.level.unwrap_or_else(|| data_type.default_intensity_level());

        let render = ctx.render()?.clone();
        let backend = render.bind()?;

        let device = ctx.main_device()?.clone();
        let view = ctx.compute()?.acquire_view(&input, &device, Access::Read)?;

        if let Some(old) = self.texture.take() {
            backend.delete_texture(old);
        }
        let texture = backend.create_texture(image.width(), image.height(), PixelFormat::Rgba32F, None)?;
        self.texture = Some(texture);
        self.context = Some(render.clone());

        let program = self.program_for(ctx, data_type)?;
        let compute = ctx.compute()?;
        compute.enqueue_kernel(
            &device,
            &program,
            SLICE_KERNEL,
            &[
                KernelArg::View(view),
                KernelArg::Texture(texture),
                KernelArg::Int((image.depth() / 2) as i32),
                KernelArg::Float(level),
                KernelArg::Float(window),
            ],
            NdRange::D2(image.width() as usize, image.height() as usize),
        )?;
        compute.finish(&device)?;

        tracing::debug!(
            node = %ctx.node_id(),
            width = image.width(),
            height = image.height(),
            slice = image.depth() / 2,
            "slice rendered"
        );
        Ok(())
    }

    fn draw(&mut self, render: &RenderContext) -> Result<()> {
        let Some(texture) = self.texture else {
            return Ok(());
        };
        render.bind()?.draw_textured_quad(texture)
    }
}

impl Drop for SliceRenderer {
    fn drop(&mut self) {
        let (Some(texture), Some(context)) = (self.texture.take(), self.context.take()) else {
            return;
        };
        match context.bind() {
            Ok(backend) => backend.delete_texture(texture),
            Err(err) => tracing::warn!(error = %err, "leaking slice texture"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_flags_follow_data_type() {
        assert_eq!(build_flags(DataType::Float), "-DTYPE_FLOAT");
        assert_eq!(build_flags(DataType::Int8), "-DTYPE_INT");
        assert_eq!(build_flags(DataType::Int16), "-DTYPE_INT");
        assert_eq!(build_flags(DataType::Uint8), "-DTYPE_UINT");
        assert_eq!(build_flags(DataType::Uint16), "-DTYPE_UINT");
    }

    #[test]
    fn new_renderer_has_no_texture() {
        let renderer = SliceRenderer::new();
        assert!(renderer.texture().is_none());
        assert!(renderer.programs.contains(SLICE_PROGRAM));
    }
}
