//! Flat Binary Parameter Dumps
//!
//! Model parameters persist as a headerless sequence of raw matrix and
//! vector blocks: each block is the coefficients of one tensor written
//! column-major as fixed-width little-endian floats. No shape, type tag,
//! or version is embedded; the reader must construct tensors of the exact
//! shapes in the exact order the writer used. A mismatch does not fail
//! loudly, it silently produces garbage; round-trip tests are the guard.

use std::io::{Read, Write};

use crate::{MatR, Real, VecR};

const ELEM: usize = std::mem::size_of::<Real>();

/// Write one matrix block, column-major.
pub fn write_mat<W: Write>(w: &mut W, mat: &MatR) -> std::io::Result<()> {
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            w.write_all(&mat[[i, j]].to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read one matrix block into an existing, correctly shaped matrix.
pub fn read_mat<R: Read>(r: &mut R, mat: &mut MatR) -> std::io::Result<()> {
    let mut buf = [0u8; ELEM];
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            r.read_exact(&mut buf)?;
            mat[[i, j]] = Real::from_le_bytes(buf);
        }
    }
    Ok(())
}

/// Write one vector block.
pub fn write_vec<W: Write>(w: &mut W, vec: &VecR) -> std::io::Result<()> {
    for &v in vec.iter() {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

/// Read one vector block into an existing, correctly sized vector.
pub fn read_vec<R: Read>(r: &mut R, vec: &mut VecR) -> std::io::Result<()> {
    let mut buf = [0u8; ELEM];
    for v in vec.iter_mut() {
        r.read_exact(&mut buf)?;
        *v = Real::from_le_bytes(buf);
    }
    Ok(())
}
