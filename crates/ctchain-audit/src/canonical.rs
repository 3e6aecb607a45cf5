//! Canonical little-endian tensor byte encoding (spec §4.7).
//!
//! The encoding is deliberately flat and versioned: a fixed-width header
//! (format version, dtype tag, rank, up to [`MAX_DIMS`] padded dims, element
//! count) followed by each element as a little-endian `i32`. Hashing and
//! serialization share the header layout so `hash_tensor` is exactly
//! `sha256(serialize(tensor))`.

use ctchain_core::{CtError, CtResult, TensorView};

use crate::sha256::{self, Hash};

/// Dimensions recorded in the header, zero-padded beyond the tensor's rank.
pub const MAX_DIMS: usize = 4;
/// Current canonical encoding format version.
pub const SERIALIZE_VERSION: u32 = 1;
/// Dtype tag for Q16.16 (the only format carried over this wire encoding).
pub const DTYPE_Q16_16: u32 = 0;

const HEADER_SIZE: usize = 4 + 4 + 4 + (4 * MAX_DIMS) + 8;

fn write_header(tensor: &TensorView<'_>) -> CtResult<[u8; HEADER_SIZE]> {
    if tensor.shape().rank() > MAX_DIMS {
        return Err(CtError::Dimension);
    }
    let mut header = [0u8; HEADER_SIZE];
    let mut p = 0;

    header[p..p + 4].copy_from_slice(&SERIALIZE_VERSION.to_le_bytes());
    p += 4;
    header[p..p + 4].copy_from_slice(&DTYPE_Q16_16.to_le_bytes());
    p += 4;
    header[p..p + 4].copy_from_slice(&(tensor.shape().rank() as u32).to_le_bytes());
    p += 4;

    for i in 0..MAX_DIMS {
        let dim = tensor.shape().dims().get(i).copied().unwrap_or(0) as u32;
        header[p..p + 4].copy_from_slice(&dim.to_le_bytes());
        p += 4;
    }

    header[p..p + 8].copy_from_slice(&(tensor.shape().len() as u64).to_le_bytes());
    Ok(header)
}

/// Number of bytes [`serialize_tensor`] will write for this tensor.
pub fn serial_size(tensor: &TensorView<'_>) -> usize {
    HEADER_SIZE + tensor.shape().len() * 4
}

/// Serialize a contiguous tensor into `buffer` using the canonical header +
/// little-endian element layout (spec §4.7). Non-contiguous tensors are
/// rejected with [`CtError::State`].
pub fn serialize_tensor(tensor: &TensorView<'_>, buffer: &mut [u8]) -> CtResult<usize> {
    if !tensor.is_contiguous() {
        return Err(CtError::State);
    }
    let needed = serial_size(tensor);
    if buffer.len() < needed {
        return Err(CtError::Memory);
    }

    let header = write_header(tensor)?;
    buffer[..HEADER_SIZE].copy_from_slice(&header);

    let data = tensor.as_slice();
    for (i, &elem) in data[..tensor.shape().len()].iter().enumerate() {
        let off = HEADER_SIZE + i * 4;
        buffer[off..off + 4].copy_from_slice(&elem.to_le_bytes());
    }

    Ok(needed)
}

/// Hash a contiguous tensor's canonical byte encoding directly, without
/// materializing the serialized buffer (spec §4.7).
pub fn hash_tensor(tensor: &TensorView<'_>) -> CtResult<Hash> {
    if !tensor.is_contiguous() {
        return Err(CtError::State);
    }

    let header = write_header(tensor)?;
    let mut ctx = sha256::Sha256::new();
    ctx.update(&header);

    let data = tensor.as_slice();
    for &elem in &data[..tensor.shape().len()] {
        ctx.update(&elem.to_le_bytes());
    }

    Ok(ctx.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctchain_core::{DType, Shape};

    #[test]
    fn hash_tensor_matches_serialize_then_hash() {
        let shape = Shape::row_major(&[2, 2]).unwrap();
        let data = [1i32, 2, 3, 4];
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();

        let direct = hash_tensor(&view).unwrap();

        let mut buf = vec![0u8; serial_size(&view)];
        serialize_tensor(&view, &mut buf).unwrap();
        let via_serialize = sha256::sha256(&buf);

        assert_eq!(direct, via_serialize);
    }

    #[test]
    fn serialized_layout_is_fixed_header_then_little_endian_elements() {
        let shape = Shape::row_major(&[2, 2]).unwrap();
        let data = [1i32, 2, 3, 4];
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();

        let mut buf = vec![0u8; serial_size(&view)];
        serialize_tensor(&view, &mut buf).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&SERIALIZE_VERSION.to_le_bytes());
        expected.extend_from_slice(&DTYPE_Q16_16.to_le_bytes());
        expected.extend_from_slice(&2u32.to_le_bytes()); // ndims
        for dim in [2u32, 2, 0, 0] {
            expected.extend_from_slice(&dim.to_le_bytes());
        }
        expected.extend_from_slice(&4u64.to_le_bytes()); // total_size
        for elem in data {
            expected.extend_from_slice(&elem.to_le_bytes());
        }

        assert_eq!(buf, expected);
        assert_eq!(buf.len(), HEADER_SIZE + 16);
    }

    #[test]
    fn hash_is_sensitive_to_element_order() {
        let shape = Shape::row_major(&[1, 2]).unwrap();
        let a = TensorView::new(shape.clone(), DType::Q16_16, &[1, 2]).unwrap();
        let b = TensorView::new(shape, DType::Q16_16, &[2, 1]).unwrap();
        assert_ne!(hash_tensor(&a).unwrap(), hash_tensor(&b).unwrap());
    }

    #[test]
    fn non_contiguous_tensor_rejected() {
        let shape = Shape::with_strides(&[2, 2], &[1, 2]).unwrap();
        let data = [1i32, 2, 3, 4];
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();
        assert_eq!(hash_tensor(&view), Err(CtError::State));
    }

    #[test]
    fn rank_over_max_dims_rejected() {
        let shape = Shape::row_major(&[1, 1, 1, 1, 1]).unwrap();
        let data = [1i32];
        let view = TensorView::new(shape, DType::Q16_16, &data).unwrap();
        assert_eq!(hash_tensor(&view), Err(CtError::Dimension));
    }
}
