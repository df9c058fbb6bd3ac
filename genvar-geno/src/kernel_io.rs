//! Kernel (relationship) matrices in MatrixMarket coordinate format.
//!
//! A kernel is stored as two files:
//! - `<name>.mtx`: symmetric coordinate entries, upper triangle, 1-indexed
//! - `<name>.mtx.ids.txt`: individual IDs, one per line, in matrix order
//!
//! Kernels are read into dense matrices; entries absent from the file are 0.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use genvar_linalg::DenseMatrix;
use tracing::debug;

/// Path of the ID file that accompanies `mtx_path`.
pub fn ids_path_for(mtx_path: &Path) -> PathBuf {
    let mut s = mtx_path.as_os_str().to_os_string();
    s.push(".ids.txt");
    PathBuf::from(s)
}

/// Read a kernel and its individual IDs.
pub fn read_kernel(mtx_path: &Path) -> Result<(DenseMatrix, Vec<String>)> {
    let ids_path = ids_path_for(mtx_path);
    let ids: Vec<String> = std::fs::read_to_string(&ids_path)
        .with_context(|| format!("Failed to read kernel IDs: {}", ids_path.display()))?
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    let n = ids.len();

    let contents = std::fs::read_to_string(mtx_path)
        .with_context(|| format!("Failed to read kernel: {}", mtx_path.display()))?;

    let mut k = DenseMatrix::zeros(n, n);
    let mut header_done = false;
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if !header_done {
            header_done = true;
            let dims: Vec<usize> = fields
                .iter()
                .take(2)
                .map(|f| f.parse())
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Bad kernel header on line {}", line_num + 1))?;
            if dims.len() != 2 || dims[0] != n || dims[1] != n {
                bail!(
                    "Kernel header declares {:?} but {} IDs were listed",
                    dims,
                    n
                );
            }
            continue;
        }
        if fields.len() < 3 {
            bail!("Kernel line {} has fewer than 3 fields", line_num + 1);
        }
        let row: usize = fields[0].parse()?;
        let col: usize = fields[1].parse()?;
        let val: f64 = fields[2].parse()?;
        if row == 0 || col == 0 || row > n || col > n {
            bail!("Kernel entry ({}, {}) on line {} is out of range", row, col, line_num + 1);
        }
        k.set(row - 1, col - 1, val);
        k.set(col - 1, row - 1, val);
    }

    debug!("Read {}x{} kernel from {}", n, n, mtx_path.display());
    Ok((k, ids))
}

/// Write a symmetric kernel (upper triangle) and its IDs.
pub fn write_kernel(kernel: &DenseMatrix, ids: &[String], mtx_path: &Path) -> Result<()> {
    let n = kernel.nrows();
    if kernel.ncols() != n || ids.len() != n {
        bail!(
            "Kernel is {}x{} with {} IDs; expected a square matrix matching the IDs",
            n,
            kernel.ncols(),
            ids.len()
        );
    }

    let ids_path = ids_path_for(mtx_path);
    let mut f = BufWriter::new(
        File::create(&ids_path)
            .with_context(|| format!("Failed to create {}", ids_path.display()))?,
    );
    for id in ids {
        writeln!(f, "{}", id)?;
    }
    f.flush()?;

    let mut f = BufWriter::new(
        File::create(mtx_path).with_context(|| format!("Failed to create {}", mtx_path.display()))?,
    );
    writeln!(f, "%%MatrixMarket matrix coordinate real symmetric")?;
    let mut entries = Vec::new();
    for j in 0..n {
        for i in 0..=j {
            let v = kernel.get(i, j);
            if v != 0.0 {
                entries.push((i, j, v));
            }
        }
    }
    writeln!(f, "{} {} {}", n, n, entries.len())?;
    for (i, j, v) in entries {
        writeln!(f, "{} {} {:.12e}", i + 1, j + 1, v)?;
    }
    f.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_symmetrises_upper_triangle() {
        let dir = tempfile::tempdir().unwrap();
        let mtx = dir.path().join("k.mtx");
        std::fs::write(
            &mtx,
            "%%MatrixMarket matrix coordinate real symmetric\n3 3 4\n1 1 1.0\n2 2 1.0\n3 3 1.0\n1 2 0.25\n",
        )
        .unwrap();
        std::fs::write(ids_path_for(&mtx), "S1\nS2\nS3\n").unwrap();

        let (k, ids) = read_kernel(&mtx).unwrap();
        assert_eq!(ids, vec!["S1", "S2", "S3"]);
        assert!((k.get(0, 1) - 0.25).abs() < 1e-12);
        assert!((k.get(1, 0) - 0.25).abs() < 1e-12);
        assert_eq!(k.get(0, 2), 0.0);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mtx = dir.path().join("g.mtx");
        let k = DenseMatrix::from_row_major(2, 2, &[2.0, -0.5, -0.5, 1.5]);
        let ids = vec!["a".to_string(), "b".to_string()];
        write_kernel(&k, &ids, &mtx).unwrap();

        let (back, back_ids) = read_kernel(&mtx).unwrap();
        assert_eq!(back_ids, ids);
        for i in 0..2 {
            for j in 0..2 {
                assert!((back.get(i, j) - k.get(i, j)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_header_id_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mtx = dir.path().join("bad.mtx");
        std::fs::write(&mtx, "4 4 1\n1 1 1.0\n").unwrap();
        std::fs::write(ids_path_for(&mtx), "S1\nS2\n").unwrap();
        assert!(read_kernel(&mtx).is_err());
    }
}
