//! Snapshotting of client pixel data into tightly packed owned buffers.

use std::sync::Arc;

use dl_abi::*;

use crate::command::ErrorCode;

/// Where an image argument's bytes come from.
#[derive(Clone, Copy, Debug)]
pub enum PixelSource<'a> {
    None,
    Client(&'a [u8]),
    /// A bound pixel-unpack buffer; the client pointer is an offset into it.
    Buffer { data: &'a [u8], offset: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelStore {
    pub alignment: usize,
    pub row_length: usize,
    pub skip_rows: usize,
    pub skip_pixels: usize,
}

impl Default for PixelStore {
    fn default() -> Self {
        Self::with_alignment(4)
    }
}

impl PixelStore {
    pub fn with_alignment(alignment: usize) -> Self {
        Self {
            alignment,
            row_length: 0,
            skip_rows: 0,
            skip_pixels: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnpackError {
    InvalidDimensions { width: i32, height: i32 },
    UnsupportedFormat(u32),
    UnsupportedType(u32),
    OutOfBounds { needed: usize, available: usize },
    OutOfMemory(usize),
}

impl UnpackError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UnpackError::InvalidDimensions { .. } => ErrorCode::InvalidValue,
            UnpackError::UnsupportedFormat(_) | UnpackError::UnsupportedType(_) => {
                ErrorCode::InvalidEnum
            }
            UnpackError::OutOfBounds { .. } => ErrorCode::InvalidOperation,
            UnpackError::OutOfMemory(_) => ErrorCode::OutOfMemory,
        }
    }
}

impl std::fmt::Display for UnpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnpackError::InvalidDimensions { width, height } => {
                write!(f, "invalid image size {width}x{height}")
            }
            UnpackError::UnsupportedFormat(format) => write!(f, "unsupported format {format:#06x}"),
            UnpackError::UnsupportedType(ty) => write!(f, "unsupported type {ty:#06x}"),
            UnpackError::OutOfBounds { needed, available } => {
                write!(f, "pixel data needs {needed} bytes but {available} are readable")
            }
            UnpackError::OutOfMemory(bytes) => write!(f, "cannot allocate {bytes} bytes"),
        }
    }
}

impl std::error::Error for UnpackError {}

pub fn components(format: u32) -> Option<usize> {
    match format {
        COLOR_INDEX | STENCIL_INDEX | DEPTH_COMPONENT | RED | GREEN | BLUE | ALPHA | LUMINANCE => {
            Some(1)
        }
        LUMINANCE_ALPHA => Some(2),
        RGB => Some(3),
        RGBA | BGRA => Some(4),
        _ => None,
    }
}

pub fn type_size(ty: u32) -> Option<usize> {
    match ty {
        BYTE | UNSIGNED_BYTE => Some(1),
        SHORT | UNSIGNED_SHORT => Some(2),
        INT | UNSIGNED_INT | FLOAT => Some(4),
        _ => None,
    }
}

/// Row stride in bytes, or `None` when it does not fit in `usize`.
fn row_stride(row_bytes: usize, alignment: usize) -> Option<usize> {
    row_bytes.checked_next_multiple_of(alignment.max(1))
}

fn overflow(data: &[u8]) -> UnpackError {
    UnpackError::OutOfBounds {
        needed: usize::MAX,
        available: data.len(),
    }
}

fn readable<'a>(source: PixelSource<'a>) -> Option<Result<&'a [u8], UnpackError>> {
    match source {
        PixelSource::None => None,
        PixelSource::Client(data) => Some(Ok(data)),
        PixelSource::Buffer { data, offset } => Some(data.get(offset..).ok_or(
            UnpackError::OutOfBounds {
                needed: offset,
                available: data.len(),
            },
        )),
    }
}

fn alloc_output(len: usize) -> Result<Vec<u8>, UnpackError> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| UnpackError::OutOfMemory(len))?;
    Ok(out)
}

/// Copies a `width`x`height` image out of `source` honouring `store`. The
/// result has no row padding. `Ok(None)` means there was no source.
pub fn unpack_image(
    width: i32,
    height: i32,
    format: u32,
    ty: u32,
    source: PixelSource<'_>,
    store: &PixelStore,
) -> Result<Option<Arc<[u8]>>, UnpackError> {
    let (Ok(columns), Ok(rows)) = (usize::try_from(width), usize::try_from(height)) else {
        return Err(UnpackError::InvalidDimensions { width, height });
    };
    let pixel_components = components(format).ok_or(UnpackError::UnsupportedFormat(format))?;
    if ty == BITMAP {
        if !matches!(format, COLOR_INDEX | STENCIL_INDEX) {
            return Err(UnpackError::UnsupportedFormat(format));
        }
        return unpack_bits(columns, rows, source, store);
    }
    let pixel_bytes = pixel_components * type_size(ty).ok_or(UnpackError::UnsupportedType(ty))?;

    let Some(data) = readable(source) else {
        return Ok(None);
    };
    let data = data?;
    let row_bytes = columns
        .checked_mul(pixel_bytes)
        .ok_or_else(|| overflow(data))?;
    if rows == 0 || row_bytes == 0 {
        return Ok(Some(Arc::from([])));
    }

    let row_pixels = if store.row_length > 0 {
        store.row_length
    } else {
        columns
    };
    let stride = row_pixels
        .checked_mul(pixel_bytes)
        .and_then(|bytes| row_stride(bytes, store.alignment))
        .ok_or_else(|| overflow(data))?;
    let start = store
        .skip_pixels
        .checked_mul(pixel_bytes)
        .and_then(|lead| store.skip_rows.checked_mul(stride)?.checked_add(lead))
        .ok_or_else(|| overflow(data))?;
    let needed = (rows - 1)
        .checked_mul(stride)
        .and_then(|body| body.checked_add(start)?.checked_add(row_bytes))
        .ok_or_else(|| overflow(data))?;
    if needed > data.len() {
        return Err(UnpackError::OutOfBounds {
            needed,
            available: data.len(),
        });
    }

    let mut out = alloc_output(rows * row_bytes)?;
    for row in 0..rows {
        let at = start + row * stride;
        out.extend_from_slice(&data[at..at + row_bytes]);
    }
    Ok(Some(Arc::from(out)))
}

/// One-bit-per-pixel images, most significant bit first. Output rows are
/// `ceil(width / 8)` bytes.
fn unpack_bits(
    columns: usize,
    rows: usize,
    source: PixelSource<'_>,
    store: &PixelStore,
) -> Result<Option<Arc<[u8]>>, UnpackError> {
    let Some(data) = readable(source) else {
        return Ok(None);
    };
    let data = data?;
    let out_row = columns.div_ceil(8);
    if rows == 0 || out_row == 0 {
        return Ok(Some(Arc::from([])));
    }

    let row_pixels = if store.row_length > 0 {
        store.row_length
    } else {
        columns
    };
    let stride =
        row_stride(row_pixels.div_ceil(8), store.alignment).ok_or_else(|| overflow(data))?;
    let first_bit = store.skip_pixels;
    let needed = first_bit
        .checked_add(columns)
        .map(|bits| bits.div_ceil(8))
        .and_then(|last_row| {
            store
                .skip_rows
                .checked_add(rows - 1)?
                .checked_mul(stride)?
                .checked_add(last_row)
        })
        .ok_or_else(|| overflow(data))?;
    if needed > data.len() {
        return Err(UnpackError::OutOfBounds {
            needed,
            available: data.len(),
        });
    }

    let mut out = alloc_output(rows * out_row)?;
    for row in 0..rows {
        let base = (store.skip_rows + row) * stride;
        if first_bit % 8 == 0 {
            let at = base + first_bit / 8;
            out.extend_from_slice(&data[at..at + out_row]);
            if columns % 8 != 0
                && let Some(last) = out.last_mut()
            {
                *last &= 0xFF << (8 - columns % 8);
            }
            continue;
        }
        let mut packed = vec![0u8; out_row];
        for column in 0..columns {
            let bit = first_bit + column;
            if data[base + bit / 8] & (0x80 >> (bit % 8)) != 0 {
                packed[column / 8] |= 0x80 >> (column % 8);
            }
        }
        out.extend_from_slice(&packed);
    }
    Ok(Some(Arc::from(out)))
}

pub fn unpack_bitmap(
    width: i32,
    height: i32,
    source: PixelSource<'_>,
    store: &PixelStore,
) -> Result<Option<Arc<[u8]>>, UnpackError> {
    unpack_image(width, height, COLOR_INDEX, BITMAP, source, store)
}

pub const STIPPLE_BYTES: usize = 32 * 32 / 8;

pub fn unpack_polygon_stipple(
    source: PixelSource<'_>,
    store: &PixelStore,
) -> Result<Option<Arc<[u8]>>, UnpackError> {
    unpack_bitmap(32, 32, source, store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_is_dropped() {
        // 3 RGB bytes per row, aligned to 4.
        let data = [1, 2, 3, 0, 4, 5, 6, 0];
        let store = PixelStore::with_alignment(4);
        let out = unpack_image(1, 2, RGB, UNSIGNED_BYTE, PixelSource::Client(&data), &store)
            .expect("in bounds")
            .expect("has source");
        assert_eq!(&out[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn buffer_offset_is_bounds_checked() {
        let data = [0u8; 8];
        let store = PixelStore::with_alignment(1);
        let err = unpack_image(
            2,
            2,
            LUMINANCE,
            UNSIGNED_BYTE,
            PixelSource::Buffer {
                data: &data,
                offset: 6,
            },
            &store,
        )
        .expect_err("reads past the buffer");
        assert_eq!(err.code(), ErrorCode::InvalidOperation);
    }

    #[test]
    fn bitmap_rows_keep_only_width_bits() {
        let data = [0xFF, 0, 0, 0, 0xFF, 0, 0, 0];
        let store = PixelStore::with_alignment(4);
        let out = unpack_bitmap(3, 2, PixelSource::Client(&data), &store)
            .expect("in bounds")
            .expect("has source");
        assert_eq!(&out[..], &[0xE0, 0xE0]);
    }

    #[test]
    fn oversized_skips_are_out_of_bounds() {
        let data = [0u8; 64];
        let skip_rows = PixelStore {
            skip_rows: usize::MAX / 2,
            ..PixelStore::with_alignment(1)
        };
        let skip_pixels = PixelStore {
            skip_pixels: usize::MAX - 2,
            ..PixelStore::with_alignment(1)
        };
        let row_length = PixelStore {
            row_length: usize::MAX / 2,
            ..PixelStore::with_alignment(8)
        };
        for store in [skip_rows, skip_pixels, row_length] {
            for (format, ty) in [(RGBA, UNSIGNED_BYTE), (COLOR_INDEX, BITMAP)] {
                let err = unpack_image(2, 2, format, ty, PixelSource::Client(&data), &store)
                    .expect_err("offsets overflow");
                assert_eq!(err.code(), ErrorCode::InvalidOperation, "{store:?}");
            }
        }
    }

    #[test]
    fn missing_source_is_not_an_error() {
        let store = PixelStore::default();
        assert_eq!(
            unpack_polygon_stipple(PixelSource::None, &store).expect("no source is fine"),
            None
        );
    }
}
