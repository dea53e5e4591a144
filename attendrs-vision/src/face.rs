use std::path::Path;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat};
use ndarray::Array2;

use crate::error::{Result, VisionError};

/// One cropped face as an 8-bit grayscale grid.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceImage {
    pixels: GrayImage,
}

impl FaceImage {
    pub fn new(pixels: GrayImage) -> Result<Self> {
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(VisionError::EmptyImage);
        }
        Ok(Self { pixels })
    }

    /// Decode any format the `image` crate understands and convert it to luma.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)?;
        Self::new(img.to_luma8())
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.pixels
            .save_with_format(path, ImageFormat::Png)
            .map_err(|source| VisionError::Encode {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Square resample used as the common comparison size.
    pub fn resized(&self, side: u32) -> GrayImage {
        resize_square(&self.pixels, side)
    }
}

pub(crate) fn resize_square(img: &GrayImage, side: u32) -> GrayImage {
    if img.dimensions() == (side, side) {
        return img.clone();
    }
    imageops::resize(img, side, side, FilterType::Triangle)
}

/// Row-major `(height, width)` view of the intensities.
pub fn to_array(img: &GrayImage) -> Array2<f64> {
    let (width, height) = img.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32)[0] as f64
    })
}
