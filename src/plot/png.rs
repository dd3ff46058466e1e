//! PNG encoder
//!
//! 8-bit truecolour, no interlace, filter type 0 on every scanline.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};

use crate::error::{ExceptionKind, Result, SandboxError};
use crate::plot::raster::Canvas;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

pub fn encode(canvas: &Canvas) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(canvas.pixels.len() / 4 + 64);
    out.extend_from_slice(&PNG_SIGNATURE);

    let mut header = Vec::with_capacity(13);
    header.extend_from_slice(&canvas.width.to_be_bytes());
    header.extend_from_slice(&canvas.height.to_be_bytes());
    // bit depth 8, colour type 2 (RGB), compression 0, filter 0, interlace 0
    header.extend_from_slice(&[8, 2, 0, 0, 0]);
    write_chunk(&mut out, b"IHDR", &header);

    let stride = canvas.width as usize * 3;
    let mut raw = Vec::with_capacity((stride + 1) * canvas.height as usize);
    for row in canvas.pixels.chunks(stride.max(1)) {
        raw.push(0);
        raw.extend_from_slice(row);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(encode_error)?;
    let compressed = encoder.finish().map_err(encode_error)?;
    write_chunk(&mut out, b"IDAT", &compressed);

    write_chunk(&mut out, b"IEND", &[]);
    Ok(out)
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc = Crc::new();
    crc.update(kind);
    crc.update(data);
    out.extend_from_slice(&crc.sum().to_be_bytes());
}

fn encode_error(err: std::io::Error) -> SandboxError {
    SandboxError::runtime(
        ExceptionKind::RuntimeError,
        format!("failed to encode image: {}", err),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_png_structure() {
        let canvas = Canvas::new(3, 2, [10, 20, 30]);
        let png = encode(&canvas).unwrap();
        assert_eq!(&png[..8], &PNG_SIGNATURE);
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(u32::from_be_bytes([png[16], png[17], png[18], png[19]]), 3);
        assert_eq!(u32::from_be_bytes([png[20], png[21], png[22], png[23]]), 2);
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
    }

    #[test]
    fn test_idat_inflates_to_filtered_scanlines() {
        let canvas = Canvas::new(2, 2, [1, 2, 3]);
        let png = encode(&canvas).unwrap();
        // IHDR chunk: 8 signature + 4 len + 4 type + 13 data + 4 crc
        let idat_start = 8 + 25;
        let len = u32::from_be_bytes([
            png[idat_start],
            png[idat_start + 1],
            png[idat_start + 2],
            png[idat_start + 3],
        ]) as usize;
        assert_eq!(&png[idat_start + 4..idat_start + 8], b"IDAT");
        let data = &png[idat_start + 8..idat_start + 8 + len];
        let mut inflated = Vec::new();
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut inflated)
            .unwrap();
        assert_eq!(inflated, vec![0, 1, 2, 3, 1, 2, 3, 0, 1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_iend_crc() {
        let png = encode(&Canvas::new(1, 1, [0, 0, 0])).unwrap();
        let crc = &png[png.len() - 4..];
        assert_eq!(crc, &[0xae, 0x42, 0x60, 0x82]);
    }
}
