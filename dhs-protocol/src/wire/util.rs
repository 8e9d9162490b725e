//!
//! Compression helpers shared by the payload codec
//!

use anyhow::Result;
use anyhow::bail;
#[cfg(feature = "zstd")]
use zstd_safe::InBuffer;
#[cfg(feature = "zstd")]
use zstd_safe::OutBuffer;

#[cfg(feature = "zstd")]
const BUFSIZE: usize = 0x4000;
#[cfg(feature = "zlib")]
const ZLIB_LEVEL: u8 = 6;

///
/// Streaming Zstd compress
#[cfg(feature = "zstd")]
pub fn zstd_compress<F>(input: &[u8], mut write: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut ctx = zstd_safe::CCtx::create();
    let mut buf = [0_u8; BUFSIZE];
    let mut input_buffer = InBuffer { src: input, pos: 0 };
    while input_buffer.pos < input.len() {
        let mut output_buffer = OutBuffer::around(&mut buf);
        match ctx.compress_stream(&mut output_buffer, &mut input_buffer) {
            Ok(_) => {
                let written = output_buffer.as_slice();
                if !written.is_empty() {
                    write(written)?;
                }
            }
            Err(error) => bail!("zstd_compress: {}", zstd_safe::get_error_name(error)),
        }
    }
    loop {
        let mut output_buffer = OutBuffer::around(&mut buf);
        match ctx.end_stream(&mut output_buffer) {
            Ok(code) => {
                let chunk = output_buffer.as_slice();
                if !chunk.is_empty() {
                    write(chunk)?;
                }
                if code == 0 {
                    break;
                }
            }
            Err(ec) => bail!("zstd_compress end: {}", zstd_safe::get_error_name(ec)),
        }
    }
    Ok(())
}

/// Streaming Zstd decompress
///
/// The input is allowed to contain more data than Zstd will consume.
/// Returns the actual number of bytes consumed from the input.
///
/// Fails if the input ends before the frame does or if more than `max_output` bytes would be
/// produced.
#[cfg(feature = "zstd")]
pub fn zstd_decompress<F>(input: &[u8], max_output: usize, mut write: F) -> Result<usize>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut buf = [0_u8; BUFSIZE];
    let mut ctx = zstd_safe::DCtx::create();
    let mut produced = 0_usize;

    let mut input_buffer = InBuffer { src: input, pos: 0 };
    loop {
        let consumed_before = input_buffer.pos;
        let mut output_buffer = OutBuffer::around(&mut buf);
        match ctx.decompress_stream(&mut output_buffer, &mut input_buffer) {
            Ok(code) => {
                let out = output_buffer.as_slice();
                produced = produced.saturating_add(out.len());
                if produced > max_output {
                    bail!("zstd_decompress: output exceeds {max_output} bytes");
                }
                if !out.is_empty() {
                    write(out)?;
                }
                if code == 0 {
                    break;
                }
                // the decoder wants more input but there's none left
                if out.is_empty() && input_buffer.pos == consumed_before {
                    bail!("zstd_decompress: truncated input");
                }
            }
            Err(ec) => bail!("zstd_decompress: {}", zstd_safe::get_error_name(ec)),
        }
    }
    Ok(input_buffer.pos())
}

/// Compresses `input` into a zlib stream.
#[cfg(feature = "zlib")]
#[must_use]
pub fn compress_zlib(input: &[u8]) -> Vec<u8> {
    miniz_oxide::deflate::compress_to_vec_zlib(input, ZLIB_LEVEL)
}

/// Decompresses a complete zlib stream, producing at most `max_output` bytes.
#[cfg(feature = "zlib")]
pub fn decompress_zlib(input: &[u8], max_output: usize) -> Result<Vec<u8>> {
    match miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(input, max_output) {
        Ok(decompressed) => Ok(decompressed),
        Err(err) => bail!("zlib decompression error: {:?}", err.status),
    }
}
