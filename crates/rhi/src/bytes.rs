//! Byte views of `#[repr(C)]` constant blocks for buffer uploads.

/// View a `#[repr(C)]` constant block as raw bytes for
/// [`GpuDevice::update_buffer`](crate::GpuDevice::update_buffer).
///
/// # Safety
///
/// Only implement on `#[repr(C)]` structs made of plain numeric fields
/// (`f32`, `u32`, `i32` and arrays of them) with no implicit padding. Any
/// padding the std140 layout needs must be spelled out as explicit fields.
///
/// # Example
///
/// ```rust,ignore
/// #[repr(C)]
/// struct FaceInfo {
///     face: u32,
///     mip: u32,
///     _pad: [u32; 2],
/// }
///
/// unsafe impl AsBytes for FaceInfo {}
///
/// device.update_buffer(&buffer, info.as_bytes())?;
/// ```
pub unsafe trait AsBytes: Sized {
    /// View `self` as a byte slice of length `std::mem::size_of::<Self>()`.
    fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self as *const Self as *const u8, std::mem::size_of::<Self>())
        }
    }
}
