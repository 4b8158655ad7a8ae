//! In-memory images: frames of mip chains of raw texels.

use crate::format::PixelFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMip {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageMip {
    pub fn zeroed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * format.bytes_per_texel()],
        }
    }

    pub fn expected_len(&self, format: PixelFormat) -> usize {
        self.width as usize * self.height as usize * format.bytes_per_texel()
    }
}

/// One frame. Cubemaps store their faces face-major: entry
/// `face * mip_count + level`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageFrame {
    pub mipmaps: Vec<ImageMip>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub format: PixelFormat,
    pub cubemap: bool,
    pub gamma_corrected: bool,
    pub frames: Vec<ImageFrame>,
}

impl Image {
    /// Single-frame, single-mip 2D image.
    pub fn single(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            format,
            cubemap: false,
            gamma_corrected: false,
            frames: vec![ImageFrame {
                mipmaps: vec![ImageMip {
                    width,
                    height,
                    data,
                }],
            }],
        }
    }

    /// True when there is nothing to upload.
    pub fn is_empty(&self) -> bool {
        match self.frames.first().and_then(|f| f.mipmaps.first()) {
            Some(mip) => mip.width == 0 || mip.height == 0 || mip.data.is_empty(),
            None => true,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Mipmap count of the first frame, all faces included.
    pub fn mipmap_count(&self) -> usize {
        self.frames.first().map(|f| f.mipmaps.len()).unwrap_or(0)
    }

    /// Converts a decoded image. 8-bit sources become gamma-corrected
    /// RGBA8; anything with more precision becomes linear RGBA32F.
    pub fn from_dynamic(image: ::image::DynamicImage) -> Self {
        use ::image::DynamicImage;

        let (width, height) = (image.width(), image.height());
        match image {
            DynamicImage::ImageRgb32F(_)
            | DynamicImage::ImageRgba32F(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_) => {
                let rgba = image.to_rgba32f();
                let data = rgba
                    .into_raw()
                    .into_iter()
                    .flat_map(f32::to_le_bytes)
                    .collect();
                Self::single(PixelFormat::Float32Rgba, width, height, data)
            }
            other => {
                let rgba = other.to_rgba8();
                let mut image = Self::single(PixelFormat::Unorm8Rgba, width, height, rgba.into_raw());
                image.gamma_corrected = true;
                image
            }
        }
    }
}
