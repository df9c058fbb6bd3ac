//! PLINK bed/bim/fam input, converted into a byte-per-genotype store.
//!
//! PLINK binary format consists of three files:
//! - .bed: Binary genotype data (2 bits per genotype, packed)
//! - .bim: Variant information (chrom, id, cm, pos, a1, a2)
//! - .fam: Sample information (fid, iid, father, mother, sex, pheno)
//!
//! Reference: https://www.cog-genomics.org/plink/1.9/formats#bed

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use tracing::info;

use crate::store::{ByteCoding, GenotypeStore};

/// PLINK BIM file entry (one per variant).
#[derive(Debug, Clone)]
pub struct BimEntry {
    pub chrom: String,
    pub id: String,
    pub pos: u64,
    pub allele1: String,
    pub allele2: String,
}

/// Reader for SNP-major PLINK bed/bim/fam files.
pub struct PlinkReader {
    mmap: Mmap,
    bim: Vec<BimEntry>,
    sample_ids: Vec<String>,
    bytes_per_marker: usize,
}

impl PlinkReader {
    /// Open PLINK files from a base path (without extension).
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base = base_path.as_ref();
        let bed_path = base.with_extension("bed");
        let bim_path = base.with_extension("bim");
        let fam_path = base.with_extension("fam");

        let sample_ids = Self::parse_fam(&fam_path)?;
        let bim = Self::parse_bim(&bim_path)?;

        let bed_file = File::open(&bed_path)
            .with_context(|| format!("Failed to open bed file: {}", bed_path.display()))?;
        // SAFETY: the mapping is read-only and the file is not modified while mapped.
        let mmap = unsafe { Mmap::map(&bed_file)? };

        if mmap.len() < 3 {
            bail!("Bed file too small");
        }
        if mmap[0] != 0x6C || mmap[1] != 0x1B {
            bail!("Invalid PLINK bed file magic number");
        }
        if mmap[2] != 0x01 {
            bail!("Only SNP-major bed files are supported (mode byte = 0x01)");
        }

        let bytes_per_marker = sample_ids.len().div_ceil(4);
        let expected_size = 3 + bytes_per_marker * bim.len();
        if mmap.len() < expected_size {
            bail!(
                "Bed file too small: expected at least {} bytes, got {}",
                expected_size,
                mmap.len()
            );
        }

        Ok(Self {
            mmap,
            bim,
            sample_ids,
            bytes_per_marker,
        })
    }

    /// Individual IDs (IID column).
    fn parse_fam(path: &Path) -> Result<Vec<String>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fam file: {}", path.display()))?;
        let mut ids = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                bail!("Fam file line {} has fewer than 6 fields", line_num + 1);
            }
            ids.push(fields[1].to_string());
        }
        Ok(ids)
    }

    fn parse_bim(path: &Path) -> Result<Vec<BimEntry>> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bim file: {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_num, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                bail!("Bim file line {} has fewer than 6 fields", line_num + 1);
            }
            entries.push(BimEntry {
                chrom: fields[0].to_string(),
                id: fields[1].to_string(),
                pos: fields[3]
                    .parse()
                    .with_context(|| format!("Bad position on bim line {}", line_num + 1))?,
                allele1: fields[4].to_string(),
                allele2: fields[5].to_string(),
            });
        }
        Ok(entries)
    }

    /// Count of allele1 for one 2-bit call, `None` when missing.
    #[inline]
    fn decode_genotype(byte: u8, offset: usize) -> Option<u8> {
        match (byte >> (offset * 2)) & 0x03 {
            0b00 => Some(2),
            0b01 => None,
            0b10 => Some(1),
            _ => Some(0),
        }
    }

    pub fn n_markers(&self) -> usize {
        self.bim.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn bim(&self) -> &[BimEntry] {
        &self.bim
    }

    /// Allele1 counts for marker `index`, all samples.
    pub fn read_dosages(&self, index: usize) -> Result<Vec<Option<u8>>> {
        if index >= self.bim.len() {
            bail!("Marker index {} out of range ({})", index, self.bim.len());
        }
        let offset = 3 + index * self.bytes_per_marker;
        Ok((0..self.n_samples())
            .map(|s| Self::decode_genotype(self.mmap[offset + s / 4], s % 4))
            .collect())
    }

    /// Write all markers as a byte store at `raw_path`, its sidecar at
    /// `meta_path`, and return the described store.
    pub fn convert_to_store(
        &self,
        raw_path: &Path,
        meta_path: &Path,
        coding: ByteCoding,
    ) -> Result<GenotypeStore> {
        let n = self.n_samples();
        let m = self.n_markers();
        info!("Converting PLINK data: {} samples x {} markers", n, m);

        let file = File::create(raw_path)
            .with_context(|| format!("Failed to create genotype file: {}", raw_path.display()))?;
        let mut w = BufWriter::new(file);
        let mut freqs = Vec::with_capacity(m);
        let mut column = vec![0u8; n];

        for j in 0..m {
            let dosages = self.read_dosages(j)?;
            let (mut sum, mut count) = (0.0, 0usize);
            for (c, d) in column.iter_mut().zip(&dosages) {
                *c = coding.encode(*d)?;
                if let Some(d) = d {
                    sum += *d as f64;
                    count += 1;
                }
            }
            freqs.push(if count > 0 { sum / (2.0 * count as f64) } else { 0.0 });
            w.write_all(&column)?;
        }
        w.flush()?;
        drop(w);

        let marker_ids = self.bim.iter().map(|b| b.id.clone()).collect();
        let store = GenotypeStore::new(raw_path, self.sample_ids.clone(), marker_ids, freqs, coding)?;
        store.save_metadata(meta_path)?;
        info!("Genotype store written to {}", raw_path.display());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_genotype_offsets() {
        let byte: u8 = 0b11_10_01_00;
        assert_eq!(PlinkReader::decode_genotype(byte, 0), Some(2));
        assert_eq!(PlinkReader::decode_genotype(byte, 1), None);
        assert_eq!(PlinkReader::decode_genotype(byte, 2), Some(1));
        assert_eq!(PlinkReader::decode_genotype(byte, 3), Some(0));
    }

    #[test]
    fn test_convert_small_plink() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("toy");
        std::fs::write(
            base.with_extension("fam"),
            "F1 A 0 0 1 -9\nF2 B 0 0 2 -9\nF3 C 0 0 1 -9\n",
        )
        .unwrap();
        std::fs::write(
            base.with_extension("bim"),
            "1 rs1 0 100 A G\n1 rs2 0 200 C T\n",
        )
        .unwrap();
        // rs1: A=2, B=missing, C=1 -> bits (C,B,A) = 10 01 00
        // rs2: A=0, B=0, C=2      -> bits 00 11 11
        let bed = vec![0x6C, 0x1B, 0x01, 0b00_10_01_00, 0b00_00_11_11];
        std::fs::write(base.with_extension("bed"), bed).unwrap();

        let reader = PlinkReader::new(&base).unwrap();
        assert_eq!(reader.read_dosages(0).unwrap(), vec![Some(2), None, Some(1)]);

        let raw = dir.path().join("toy.raw");
        let meta = dir.path().join("toy.json");
        let store = reader
            .convert_to_store(&raw, &meta, ByteCoding::default())
            .unwrap();
        assert_eq!(std::fs::read(&raw).unwrap(), vec![3, 0, 2, 1, 1, 3]);
        assert!((store.allele_freqs()[0] - 0.75).abs() < 1e-12);
        assert!((store.allele_freqs()[1] - 1.0 / 3.0).abs() < 1e-12);

        let reloaded = GenotypeStore::load(&meta).unwrap();
        assert_eq!(reloaded.marker_ids(), &["rs1".to_string(), "rs2".to_string()]);
    }
}
