use std::io::Cursor;
use std::path::Path;

use rhi::{CodecWriteFlags, DiskResourceManager, Image, PixelFormat, ResourceManager};
use tempfile::tempdir;

#[test]
fn png_loads_as_gamma_corrected_rgba8() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();

    let img = image::RgbaImage::from_raw(2, 1, vec![1, 2, 3, 255, 4, 5, 6, 255]).unwrap();
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(tmp.join("sky.png"), &buf).unwrap();

    let manager = DiskResourceManager::new(tmp);
    let loaded = manager.load_image(Path::new("sky.png")).unwrap();
    assert_eq!(loaded.format, PixelFormat::Unorm8Rgba);
    assert!(loaded.gamma_corrected);
    assert!(!loaded.cubemap);
    let mip = &loaded.frames[0].mipmaps[0];
    assert_eq!((mip.width, mip.height), (2, 1));
    assert_eq!(mip.data, vec![1, 2, 3, 255, 4, 5, 6, 255]);
}

#[test]
fn pkim_save_load_and_delete() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let manager = DiskResourceManager::new(tmp);
    let path = Path::new("cache/sky_ibl.pkim");

    let mut image = Image::single(PixelFormat::Float16Rgba, 1, 1, vec![0, 60, 0, 60, 0, 60, 0, 60]);
    image.cubemap = true;
    image.frames[0].mipmaps = vec![image.frames[0].mipmaps[0].clone(); 6];

    manager
        .save_image(path, &image, CodecWriteFlags::WRITE_TEXELS)
        .unwrap();
    assert!(manager.exists(path));
    assert_eq!(manager.load_image(path).unwrap(), image);

    manager.delete(path).unwrap();
    assert!(!manager.exists(path));
    // Deleting twice is not an error.
    manager.delete(path).unwrap();
}

#[test]
fn only_pkim_is_writable() {
    let dir = tempdir().unwrap();
    let tmp = dir.path();
    let manager = DiskResourceManager::new(tmp);
    let image = Image::single(PixelFormat::Unorm8Rgba, 1, 1, vec![0; 4]);
    assert!(manager
        .save_image(Path::new("out.png"), &image, CodecWriteFlags::WRITE_TEXELS)
        .is_err());
    assert!(manager.load_image(Path::new("missing.png")).is_err());
}
