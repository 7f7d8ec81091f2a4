//! Render context seam: texture creation and pixel upload.
//!
//! The player never talks to a graphics API directly. A [`TextureBackend`]
//! creates addressable image buffers and accepts decoded bytes at a given
//! pixel format and size; [`CpuTextureBackend`] keeps RGBA images in memory.

use std::collections::HashMap;

use image::RgbaImage;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPlanarImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuv420_to_rgba,
};

use crate::format::PixelFormat;
use crate::{Error, Result};

/// Identity of a texture created by a [`TextureBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrap {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Sampling parameters passed through to the render context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureParams {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
}

/// Creates and fills the image buffers decoded video is written into.
pub trait TextureBackend: Send {
    fn create_texture(&mut self, width: u32, height: u32, params: &TextureParams)
    -> Result<TextureId>;

    /// Writes one decoded frame into `texture`.
    fn upload(
        &mut self,
        texture: TextureId,
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<()>;

    fn delete_texture(&mut self, texture: TextureId) -> Result<()>;
}

/// Keeps every texture as an RGBA image in system memory.
#[derive(Debug, Default)]
pub struct CpuTextureBackend {
    next_id: u32,
    textures: HashMap<TextureId, RgbaImage>,
    params: HashMap<TextureId, TextureParams>,
    uploads: u64,
}

impl CpuTextureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current contents of `texture`.
    pub fn image(&self, texture: TextureId) -> Option<&RgbaImage> {
        self.textures.get(&texture)
    }

    pub fn params(&self, texture: TextureId) -> Option<&TextureParams> {
        self.params.get(&texture)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Total successful uploads since creation.
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }
}

impl TextureBackend for CpuTextureBackend {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        params: &TextureParams,
    ) -> Result<TextureId> {
        if width == 0 || height == 0 {
            return Err(Error::DeviceInit(format!(
                "invalid texture size {width}x{height}"
            )));
        }
        self.next_id += 1;
        let id = TextureId(self.next_id);
        self.textures.insert(id, RgbaImage::new(width, height));
        self.params.insert(id, *params);
        Ok(id)
    }

    fn upload(
        &mut self,
        texture: TextureId,
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<()> {
        if !self.textures.contains_key(&texture) {
            return Err(Error::DeviceInit(format!("unknown texture {}", texture.0)));
        }
        let expected = format.frame_len(width, height);
        if expected == 0 || data.len() < expected {
            return Err(Error::Decode(format!(
                "{format:?} frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        let rgba = to_rgba(format, width, height, data)?;
        let image = RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| Error::Decode("converted frame has wrong size".into()))?;
        self.textures.insert(texture, image);
        self.uploads += 1;
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) -> Result<()> {
        self.params.remove(&texture);
        match self.textures.remove(&texture) {
            Some(_) => Ok(()),
            None => Err(Error::DeviceInit(format!("unknown texture {}", texture.0))),
        }
    }
}

fn to_rgba(format: PixelFormat, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let mut rgba = vec![0u8; pixels * 4];
    match format {
        PixelFormat::Rgba => rgba.copy_from_slice(&data[..pixels * 4]),
        PixelFormat::Bgra | PixelFormat::Argb | PixelFormat::Abgr => {
            // source byte index for R, G, B, A
            let order = match format {
                PixelFormat::Bgra => [2, 1, 0, 3],
                PixelFormat::Argb => [1, 2, 3, 0],
                _ => [3, 2, 1, 0],
            };
            for (dst, src) in rgba.chunks_exact_mut(4).zip(data.chunks_exact(4)) {
                for (d, &o) in dst.iter_mut().zip(order.iter()) {
                    *d = src[o];
                }
            }
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
            let swap = format == PixelFormat::Bgr24;
            for (dst, src) in rgba.chunks_exact_mut(4).zip(data.chunks_exact(3)) {
                let (r, b) = if swap { (src[2], src[0]) } else { (src[0], src[2]) };
                dst.copy_from_slice(&[r, src[1], b, 255]);
            }
        }
        PixelFormat::Nv12 => {
            let y_size = pixels;
            let uv_size = width.div_ceil(2) as usize * 2 * height.div_ceil(2) as usize;
            let image = YuvBiPlanarImage {
                y_plane: &data[..y_size],
                y_stride: width,
                uv_plane: &data[y_size..y_size + uv_size],
                uv_stride: width.div_ceil(2) * 2,
                width,
                height,
            };
            yuv_nv12_to_rgba(
                &image,
                &mut rgba,
                width * 4,
                YuvRange::Limited,
                YuvStandardMatrix::Bt709,
                YuvConversionMode::Balanced,
            )
            .map_err(|e| Error::Decode(format!("NV12 conversion failed: {e:?}")))?;
        }
        PixelFormat::Yuv420p => {
            let y_size = pixels;
            let chroma_stride = width.div_ceil(2);
            let chroma = chroma_stride as usize * height.div_ceil(2) as usize;
            let image = YuvPlanarImage {
                y_plane: &data[..y_size],
                y_stride: width,
                u_plane: &data[y_size..y_size + chroma],
                u_stride: chroma_stride,
                v_plane: &data[y_size + chroma..y_size + 2 * chroma],
                v_stride: chroma_stride,
                width,
                height,
            };
            yuv420_to_rgba(
                &image,
                &mut rgba,
                width * 4,
                YuvRange::Limited,
                YuvStandardMatrix::Bt601,
            )
            .map_err(|e| Error::Decode(format!("YUV420P conversion failed: {e:?}")))?;
        }
        PixelFormat::Unsupported(tag) => {
            return Err(Error::Decode(format!("unsupported pixel format tag {tag}")));
        }
    }
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_upload_and_delete() {
        let mut backend = CpuTextureBackend::new();
        let params = TextureParams {
            min_filter: Filter::Linear,
            ..TextureParams::default()
        };
        let id = backend.create_texture(2, 1, &params).unwrap();
        assert_eq!(backend.params(id), Some(&params));

        let bgra = [10, 20, 30, 255, 1, 2, 3, 4];
        backend.upload(id, PixelFormat::Bgra, 2, 1, &bgra).unwrap();
        let image = backend.image(id).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [3, 2, 1, 4]);
        assert_eq!(backend.upload_count(), 1);

        backend.delete_texture(id).unwrap();
        assert!(backend.image(id).is_none());
        assert!(backend.delete_texture(id).is_err());
    }

    #[test]
    fn rgb24_gets_opaque_alpha() {
        let mut backend = CpuTextureBackend::new();
        let id = backend.create_texture(1, 1, &TextureParams::default()).unwrap();
        backend.upload(id, PixelFormat::Rgb24, 1, 1, &[1, 2, 3]).unwrap();
        assert_eq!(backend.image(id).unwrap().get_pixel(0, 0).0, [1, 2, 3, 255]);
    }

    #[test]
    fn short_frames_are_rejected() {
        let mut backend = CpuTextureBackend::new();
        let id = backend.create_texture(4, 4, &TextureParams::default()).unwrap();
        let err = backend.upload(id, PixelFormat::Rgba, 4, 4, &[0; 10]).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(backend.upload_count(), 0);
    }

    #[test]
    fn zero_sized_textures_fail_to_allocate() {
        let mut backend = CpuTextureBackend::new();
        let err = backend.create_texture(0, 4, &TextureParams::default()).unwrap_err();
        assert!(matches!(err, Error::DeviceInit(_)));
    }

    #[test]
    fn nv12_black_converts_to_dark_pixels() {
        let mut backend = CpuTextureBackend::new();
        let id = backend.create_texture(2, 2, &TextureParams::default()).unwrap();
        // limited range black: Y=16, U=V=128
        let data = [16, 16, 16, 16, 128, 128];
        backend.upload(id, PixelFormat::Nv12, 2, 2, &data).unwrap();
        let px = backend.image(id).unwrap().get_pixel(1, 1).0;
        assert!(px[0] < 8 && px[1] < 8 && px[2] < 8);
    }
}
