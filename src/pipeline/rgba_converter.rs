use anyhow::{Result, anyhow, ensure};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

/// Pixel layouts capture devices commonly hand out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Nv12,
    Yuyv,
    Mjpeg,
    Rgb,
    Bgr,
    Gray,
}

/// Decode one captured frame into `out` as RGBA8 and return its size.
///
/// `out` is resized only when the pixel count changes, so a steady stream
/// reuses the same allocation.
pub fn convert_into(
    layout: PixelLayout,
    data: &[u8],
    width: u32,
    height: u32,
    out: &mut Vec<u8>,
) -> Result<(u32, u32)> {
    match layout {
        PixelLayout::Nv12 => nv12_into(data, width, height, out)?,
        PixelLayout::Yuyv => yuyv_into(data, width, height, out)?,
        PixelLayout::Mjpeg => return mjpeg_into(data, out),
        PixelLayout::Rgb => rgb_like_into(data, width, height, false, out)?,
        PixelLayout::Bgr => rgb_like_into(data, width, height, true, out)?,
        PixelLayout::Gray => gray_into(data, width, height, out)?,
    }
    Ok((width, height))
}

fn prepare(
    layout: PixelLayout,
    data: &[u8],
    needed: usize,
    pixels: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    ensure!(
        data.len() >= needed,
        "{layout:?} buffer too small: got {}, expected {needed}",
        data.len()
    );
    out.resize(pixels * 4, 0);
    Ok(())
}

fn nv12_into(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) -> Result<()> {
    let y_len = width as usize * height as usize;
    let needed = y_len + y_len / 2;
    prepare(PixelLayout::Nv12, data, needed, y_len, out)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_len],
        y_stride: width,
        uv_plane: &data[y_len..needed],
        uv_stride: width,
        width,
        height,
    };
    yuv_nv12_to_rgba(
        &image,
        out,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))
}

fn yuyv_into(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) -> Result<()> {
    let pixels = width as usize * height as usize;
    prepare(PixelLayout::Yuyv, data, pixels * 2, pixels, out)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };
    yuyv422_to_rgba(
        &packed,
        out,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))
}

fn rgb_like_into(
    data: &[u8],
    width: u32,
    height: u32,
    swap_rb: bool,
    out: &mut Vec<u8>,
) -> Result<()> {
    let pixels = width as usize * height as usize;
    let layout = if swap_rb {
        PixelLayout::Bgr
    } else {
        PixelLayout::Rgb
    };
    prepare(layout, data, pixels * 3, pixels, out)?;

    out.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            let (r, b) = if swap_rb {
                (src[2], src[0])
            } else {
                (src[0], src[2])
            };
            dst.copy_from_slice(&[r, src[1], b, 255]);
        });
    Ok(())
}

fn gray_into(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) -> Result<()> {
    let pixels = width as usize * height as usize;
    prepare(PixelLayout::Gray, data, pixels, pixels, out)?;

    out.par_chunks_mut(4)
        .zip(data.par_iter().copied())
        .for_each(|(dst, v)| dst.copy_from_slice(&[v, v, v, 255]));
    Ok(())
}

fn mjpeg_into(data: &[u8], out: &mut Vec<u8>) -> Result<(u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;

    let width = u32::try_from(info.width).map_err(|_| anyhow!("MJPEG width out of range"))?;
    let height = u32::try_from(info.height).map_err(|_| anyhow!("MJPEG height out of range"))?;
    let expected = width as usize * height as usize * 4;
    ensure!(
        rgba.len() >= expected,
        "MJPEG decode produced too few bytes: got {}, expected {expected}",
        rgba.len()
    );

    *out = rgba;
    out.truncate(expected);
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_expands_with_opaque_alpha() {
        let mut out = Vec::new();
        let size = convert_into(PixelLayout::Rgb, &[1, 2, 3, 4, 5, 6], 2, 1, &mut out)
            .expect("convert");
        assert_eq!(size, (2, 1));
        assert_eq!(out, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn bgr_swaps_red_and_blue() {
        let mut out = Vec::new();
        convert_into(PixelLayout::Bgr, &[1, 2, 3], 1, 1, &mut out).expect("convert");
        assert_eq!(out, vec![3, 2, 1, 255]);
    }

    #[test]
    fn gray_replicates_luma() {
        let mut out = Vec::new();
        convert_into(PixelLayout::Gray, &[9, 200], 2, 1, &mut out).expect("convert");
        assert_eq!(out, vec![9, 9, 9, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut out = Vec::new();
        for layout in [
            PixelLayout::Nv12,
            PixelLayout::Yuyv,
            PixelLayout::Rgb,
            PixelLayout::Gray,
        ] {
            assert!(convert_into(layout, &[0; 3], 4, 4, &mut out).is_err());
        }
        assert!(convert_into(PixelLayout::Mjpeg, &[0xff, 0x00], 4, 4, &mut out).is_err());
    }

    #[test]
    fn output_buffer_is_reused() {
        let mut out = Vec::with_capacity(64);
        let ptr = out.as_ptr();
        convert_into(PixelLayout::Gray, &[0; 16], 4, 4, &mut out).expect("convert");
        convert_into(PixelLayout::Gray, &[1; 16], 4, 4, &mut out).expect("convert");
        assert_eq!(out.as_ptr(), ptr);
        assert_eq!(out.len(), 64);
    }
}
