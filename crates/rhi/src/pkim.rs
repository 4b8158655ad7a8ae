//! `.pkim` container: a little-endian dump of an [`Image`].
//!
//! Layout:
//!
//! ```text
//! "PKIM" u32 version u32 format u32 flags u32 frame_count
//!   per frame: u32 mip_count
//!     per mip: u32 width u32 height u64 byte_len [bytes]
//! ```
//!
//! Flag bit 0 marks a cubemap, bit 1 gamma-corrected data, bit 2 whether
//! texel bytes follow each mip header.

use bitflags::bitflags;

use crate::error::{RhiError, RhiResult};
use crate::format::PixelFormat;
use crate::image::{Image, ImageFrame, ImageMip};

const MAGIC: &[u8; 4] = b"PKIM";
const VERSION: u32 = 1;

const FLAG_CUBEMAP: u32 = 1 << 0;
const FLAG_GAMMA: u32 = 1 << 1;
const FLAG_TEXELS: u32 = 1 << 2;

bitflags! {
    /// Options of a codec write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CodecWriteFlags: u32 {
        /// Store texel data, not only the mip table.
        const WRITE_TEXELS = 0x2;
    }
}

pub fn encode(image: &Image, flags: CodecWriteFlags) -> Vec<u8> {
    let with_texels = flags.contains(CodecWriteFlags::WRITE_TEXELS);
    let mut header_flags = 0;
    if image.cubemap {
        header_flags |= FLAG_CUBEMAP;
    }
    if image.gamma_corrected {
        header_flags |= FLAG_GAMMA;
    }
    if with_texels {
        header_flags |= FLAG_TEXELS;
    }

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&image.format.code().to_le_bytes());
    out.extend_from_slice(&header_flags.to_le_bytes());
    out.extend_from_slice(&(image.frames.len() as u32).to_le_bytes());
    for frame in &image.frames {
        out.extend_from_slice(&(frame.mipmaps.len() as u32).to_le_bytes());
        for mip in &frame.mipmaps {
            out.extend_from_slice(&mip.width.to_le_bytes());
            out.extend_from_slice(&mip.height.to_le_bytes());
            let len = if with_texels { mip.data.len() } else { 0 };
            out.extend_from_slice(&(len as u64).to_le_bytes());
            if with_texels {
                out.extend_from_slice(&mip.data);
            }
        }
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> RhiResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| RhiError::codec(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> RhiResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> RhiResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

pub fn decode(bytes: &[u8]) -> RhiResult<Image> {
    let mut reader = Reader { bytes, pos: 0 };
    if reader.take(4)? != MAGIC {
        return Err(RhiError::codec("bad magic"));
    }
    let version = reader.u32()?;
    if version != VERSION {
        return Err(RhiError::codec(format!("unsupported version {version}")));
    }
    let code = reader.u32()?;
    let format = PixelFormat::from_code(code)
        .ok_or_else(|| RhiError::codec(format!("unknown pixel format {code}")))?;
    let flags = reader.u32()?;
    let frame_count = reader.u32()?;

    let mut frames = Vec::new();
    for _ in 0..frame_count {
        let mip_count = reader.u32()?;
        let mut mipmaps = Vec::new();
        for _ in 0..mip_count {
            let width = reader.u32()?;
            let height = reader.u32()?;
            let len = usize::try_from(reader.u64()?)
                .map_err(|_| RhiError::codec("mip too large"))?;
            let data = reader.take(len)?.to_vec();
            mipmaps.push(ImageMip {
                width,
                height,
                data,
            });
        }
        frames.push(ImageFrame { mipmaps });
    }
    if reader.pos != bytes.len() {
        return Err(RhiError::codec("trailing bytes"));
    }

    Ok(Image {
        format,
        cubemap: flags & FLAG_CUBEMAP != 0,
        gamma_corrected: flags & FLAG_GAMMA != 0,
        frames,
    })
}
