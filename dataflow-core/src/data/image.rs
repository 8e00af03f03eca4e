//! Image payloads.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Pixel component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Float,
}

impl DataType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Uint8 | DataType::Int8 => 1,
            DataType::Uint16 | DataType::Int16 => 2,
            DataType::Float => 4,
        }
    }

    /// Intensity window used when a renderer is not given one.
    pub fn default_intensity_window(&self) -> f32 {
        match self {
            DataType::Float => 1.0,
            DataType::Uint8 | DataType::Int8 => 255.0,
            DataType::Uint16 | DataType::Int16 => 65535.0,
        }
    }

    /// Intensity level used when a renderer is not given one.
    pub fn default_intensity_level(&self) -> f32 {
        match self {
            DataType::Float => 0.5,
            DataType::Uint8 => 127.5,
            DataType::Uint16 => 32767.5,
            DataType::Int8 | DataType::Int16 => 0.0,
        }
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(self, DataType::Int8 | DataType::Int16)
    }
}

/// A 2D or 3D image held in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    depth: u32,
    channels: u8,
    data_type: DataType,
    /// Physical pixel spacing in millimetres (x, y, z).
    spacing: [f32; 3],
    pixels: Vec<u8>,
}

impl Image {
    /// Create a 2D image from raw pixel bytes.
    pub fn new_2d(
        width: u32,
        height: u32,
        data_type: DataType,
        channels: u8,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        Self::new_3d(width, height, 1, data_type, channels, pixels)
    }

    /// Create a 3D image from raw pixel bytes.
    pub fn new_3d(
        width: u32,
        height: u32,
        depth: u32,
        data_type: DataType,
        channels: u8,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        let expected = width as usize
            * height as usize
            * depth as usize
            * channels as usize
            * data_type.size_in_bytes();
        if pixels.len() != expected {
            return Err(EngineError::Precondition(format!(
                "image of {}x{}x{} with {} channel(s) of {:?} needs {} bytes, got {}",
                width,
                height,
                depth,
                channels,
                data_type,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            depth,
            channels,
            data_type,
            spacing: [1.0; 3],
            pixels,
        })
    }

    pub fn with_spacing(mut self, spacing: [f32; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// 2 for a single-slice image, 3 otherwise.
    pub fn dimensions(&self) -> u8 {
        if self.depth > 1 {
            3
        } else {
            2
        }
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_count_is_validated() {
        assert!(Image::new_2d(4, 4, DataType::Uint8, 1, vec![0; 16]).is_ok());
        let err = Image::new_2d(4, 4, DataType::Uint16, 1, vec![0; 16]).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn dimensions_follow_depth() {
        let flat = Image::new_2d(2, 2, DataType::Float, 1, vec![0; 16]).unwrap();
        let volume = Image::new_3d(2, 2, 3, DataType::Uint8, 1, vec![0; 12]).unwrap();
        assert_eq!(flat.dimensions(), 2);
        assert_eq!(volume.dimensions(), 3);
    }

    #[test]
    fn default_window_level() {
        assert_eq!(DataType::Float.default_intensity_window(), 1.0);
        assert_eq!(DataType::Uint8.default_intensity_level(), 127.5);
        assert_eq!(DataType::Int16.default_intensity_level(), 0.0);
    }
}
