//! Render Backend
//!
//! Render contexts are not reentrant across threads. A context must be made
//! current on the calling thread immediately before every use, and a failed
//! bind is reported at once as a `Resource` error. [`RenderContext::bind`]
//! is the only way to reach the backend's drawing operations, so no caller
//! can skip the bind.

use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, Result};

/// Opaque platform context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Opaque texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Texel format of a displayable texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    R8,
    Rgba8,
    Rgba32F,
}

/// Consumed contract of a render API.
pub trait RenderBackend: Send + Sync {
    /// Make `context` current on the calling thread. Returns `false` on
    /// failure.
    fn make_current(&self, context: ContextHandle) -> bool;

    /// Create a texture, optionally uploading pixel data.
    fn create_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId>;

    fn delete_texture(&self, texture: TextureId);

    /// Draw `texture` on a full-viewport quad.
    fn draw_textured_quad(&self, texture: TextureId) -> Result<()>;
}

/// A render context, created once by the driver and passed to the pipeline.
#[derive(Clone)]
pub struct RenderContext {
    handle: ContextHandle,
    backend: Arc<dyn RenderBackend>,
}

impl RenderContext {
    pub fn new(handle: ContextHandle, backend: Arc<dyn RenderBackend>) -> Self {
        Self { handle, backend }
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    /// Make the context current and return the backend for drawing.
    pub fn bind(&self) -> Result<&dyn RenderBackend> {
        if !self.backend.make_current(self.handle) {
            return Err(EngineError::Resource(format!(
                "failed to make render context {:?} current",
                self.handle
            )));
        }
        Ok(self.backend.as_ref())
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FlakyBackend {
        bind_ok: AtomicBool,
        binds: AtomicU64,
    }

    impl RenderBackend for FlakyBackend {
        fn make_current(&self, _context: ContextHandle) -> bool {
            self.binds.fetch_add(1, Ordering::SeqCst);
            self.bind_ok.load(Ordering::SeqCst)
        }

        fn create_texture(&self, _w: u32, _h: u32, _f: PixelFormat, _p: Option<&[u8]>) -> Result<TextureId> {
            Ok(TextureId(1))
        }

        fn delete_texture(&self, _texture: TextureId) {}

        fn draw_textured_quad(&self, _texture: TextureId) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_bind_is_a_resource_error() {
        let backend = Arc::new(FlakyBackend {
            bind_ok: AtomicBool::new(false),
            binds: AtomicU64::new(0),
        });
        let context = RenderContext::new(ContextHandle(9), backend.clone());

        let err = context.bind().err().unwrap();
        assert!(err.is_resource());
        assert_eq!(backend.binds.load(Ordering::SeqCst), 1);

        backend.bind_ok.store(true, Ordering::SeqCst);
        assert!(context.bind().is_ok());
        assert_eq!(backend.binds.load(Ordering::SeqCst), 2);
    }
}
