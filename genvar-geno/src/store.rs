//! Byte-per-genotype marker store.
//!
//! The genotype file is marker-major with no header: marker `j` occupies
//! bytes `[j * n, (j + 1) * n)` where `n` is the number of individuals,
//! one raw code per individual in file order.
//!
//! A [`GenotypeStore`] only describes the file (IDs, allele frequencies,
//! coding). Reads happen through a [`MarkerPass`], which owns the open
//! file handle for one traversal and closes it when dropped. Within a
//! pass the reader remembers which marker follows the current file
//! position and reaches the next requested marker with a relative seek,
//! so an ascending traversal never re-scans from the start of the file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How raw genotype bytes map to allele dosages.
///
/// A byte equal to `reserved_code` is left uncentered: its standardized
/// value is 0.0, the same value an individual at the population mean gets.
/// Every other byte `c` is read as dosage `c - dosage_offset`. The default
/// is the packed layout where 0 is reserved and 1/2/3 encode dosages 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteCoding {
    pub reserved_code: Option<u8>,
    pub dosage_offset: u8,
}

impl Default for ByteCoding {
    fn default() -> Self {
        Self {
            reserved_code: Some(0),
            dosage_offset: 1,
        }
    }
}

impl ByteCoding {
    /// Plain dosage bytes 0/1/2 with no reserved code.
    pub fn plain() -> Self {
        Self {
            reserved_code: None,
            dosage_offset: 0,
        }
    }

    /// Dosage for a raw byte, `None` for the reserved code.
    #[inline]
    pub fn dosage(&self, byte: u8) -> Option<f64> {
        if self.reserved_code == Some(byte) {
            None
        } else {
            Some(byte as f64 - self.dosage_offset as f64)
        }
    }

    /// Raw byte for a dosage; `None` maps to the reserved code.
    pub fn encode(&self, dosage: Option<u8>) -> Result<u8> {
        match dosage {
            Some(d) => {
                let code = d
                    .checked_add(self.dosage_offset)
                    .context("dosage code overflows a byte")?;
                if self.reserved_code == Some(code) {
                    bail!("dosage {} collides with the reserved code {}", d, code);
                }
                Ok(code)
            }
            None => self
                .reserved_code
                .context("coding has no reserved code for missing genotypes"),
        }
    }
}

/// Centering/scaling applied to one marker's bytes.
#[derive(Debug, Clone, Copy)]
struct Standardizer {
    coding: ByteCoding,
    mean: f64,
    inv_sd: f64,
}

impl Standardizer {
    fn new(coding: ByteCoding, allele_freq: f64) -> Self {
        let var = 2.0 * allele_freq * (1.0 - allele_freq);
        let inv_sd = if var > 0.0 { 1.0 / var.sqrt() } else { 0.0 };
        Self {
            coding,
            mean: 2.0 * allele_freq,
            inv_sd,
        }
    }

    #[inline]
    fn value(&self, byte: u8) -> f64 {
        match self.coding.dosage(byte) {
            Some(d) if self.inv_sd > 0.0 => (d - self.mean) * self.inv_sd,
            _ => 0.0,
        }
    }
}

/// Markers found by ID lookup, ascending by file position.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSelection {
    pub indices: Vec<usize>,
    /// Requested IDs that are not in the store.
    pub n_missing: usize,
}

/// Individuals found by ID lookup, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndividualSelection {
    pub rows: Vec<usize>,
    /// Requested IDs that are not in the store.
    pub n_missing: usize,
}

/// Persisted description of a genotype store (JSON sidecar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub path: PathBuf,
    pub individual_ids: Vec<String>,
    pub marker_ids: Vec<String>,
    pub allele_freqs: Vec<f64>,
    #[serde(default)]
    pub coding: ByteCoding,
}

/// Read-only handle on a genotype file.
///
/// Holds no open file; cloning is cheap enough to hand one to each
/// cross-validation fold, and any number of passes may be open at once.
#[derive(Debug, Clone)]
pub struct GenotypeStore {
    meta: StoreMetadata,
    marker_lookup: HashMap<String, usize>,
    individual_lookup: HashMap<String, usize>,
}

impl GenotypeStore {
    /// Describe an existing genotype file.
    ///
    /// Fails if the ID/frequency lengths disagree, a marker ID repeats, or
    /// the file is not exactly `n * m` bytes long.
    pub fn new<P: AsRef<Path>>(
        path: P,
        individual_ids: Vec<String>,
        marker_ids: Vec<String>,
        allele_freqs: Vec<f64>,
        coding: ByteCoding,
    ) -> Result<Self> {
        let meta = StoreMetadata {
            path: path.as_ref().to_path_buf(),
            individual_ids,
            marker_ids,
            allele_freqs,
            coding,
        };
        Self::from_metadata(meta)
    }

    /// Describe a genotype file and compute allele frequencies with one pass.
    pub fn with_computed_frequencies<P: AsRef<Path>>(
        path: P,
        individual_ids: Vec<String>,
        marker_ids: Vec<String>,
        coding: ByteCoding,
    ) -> Result<Self> {
        let m = marker_ids.len();
        let mut store = Self::new(path, individual_ids, marker_ids, vec![0.0; m], coding)?;
        let freqs = {
            let mut pass = store.open_pass()?;
            let mut freqs = Vec::with_capacity(m);
            for j in 0..m {
                let raw = pass.read_raw(j)?;
                freqs.push(allele_frequency(raw, &coding));
            }
            freqs
        };
        store.meta.allele_freqs = freqs;
        info!(
            "Computed allele frequencies for {} markers x {} individuals",
            m,
            store.n_individuals()
        );
        Ok(store)
    }

    /// Load a store from its JSON sidecar. A relative genotype path is
    /// resolved against the sidecar's directory.
    pub fn load<P: AsRef<Path>>(meta_path: P) -> Result<Self> {
        let meta_path = meta_path.as_ref();
        let text = std::fs::read_to_string(meta_path)
            .with_context(|| format!("Failed to read store metadata: {}", meta_path.display()))?;
        let mut meta: StoreMetadata = serde_json::from_str(&text)
            .with_context(|| format!("Invalid store metadata: {}", meta_path.display()))?;
        if meta.path.is_relative() {
            if let Some(dir) = meta_path.parent() {
                meta.path = dir.join(&meta.path);
            }
        }
        Self::from_metadata(meta)
    }

    /// Write the JSON sidecar.
    pub fn save_metadata<P: AsRef<Path>>(&self, meta_path: P) -> Result<()> {
        let meta_path = meta_path.as_ref();
        let json = serde_json::to_string_pretty(&self.meta)?;
        std::fs::write(meta_path, json)
            .with_context(|| format!("Failed to write store metadata: {}", meta_path.display()))?;
        Ok(())
    }

    fn from_metadata(meta: StoreMetadata) -> Result<Self> {
        let n = meta.individual_ids.len();
        let m = meta.marker_ids.len();
        if meta.allele_freqs.len() != m {
            bail!(
                "Store has {} marker IDs but {} allele frequencies",
                m,
                meta.allele_freqs.len()
            );
        }
        if let Some(bad) = meta.allele_freqs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            bail!("Allele frequency {} outside [0, 1]", bad);
        }

        let len = std::fs::metadata(&meta.path)
            .with_context(|| format!("Failed to stat genotype file: {}", meta.path.display()))?
            .len();
        let expected = (n as u64) * (m as u64);
        if len != expected {
            bail!(
                "Genotype file {} has {} bytes, expected {} ({} individuals x {} markers)",
                meta.path.display(),
                len,
                expected,
                n,
                m
            );
        }

        let mut marker_lookup = HashMap::with_capacity(m);
        for (j, id) in meta.marker_ids.iter().enumerate() {
            if marker_lookup.insert(id.clone(), j).is_some() {
                bail!("Duplicate marker ID in store: {}", id);
            }
        }
        let mut individual_lookup = HashMap::with_capacity(n);
        for (i, id) in meta.individual_ids.iter().enumerate() {
            if individual_lookup.insert(id.clone(), i).is_some() {
                bail!("Duplicate individual ID in store: {}", id);
            }
        }

        Ok(Self {
            meta,
            marker_lookup,
            individual_lookup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.meta.path
    }

    pub fn n_individuals(&self) -> usize {
        self.meta.individual_ids.len()
    }

    pub fn n_markers(&self) -> usize {
        self.meta.marker_ids.len()
    }

    pub fn individual_ids(&self) -> &[String] {
        &self.meta.individual_ids
    }

    pub fn marker_ids(&self) -> &[String] {
        &self.meta.marker_ids
    }

    pub fn allele_freqs(&self) -> &[f64] {
        &self.meta.allele_freqs
    }

    pub fn coding(&self) -> ByteCoding {
        self.meta.coding
    }

    /// Every row, in file order.
    pub fn all_rows(&self) -> Vec<usize> {
        (0..self.n_individuals()).collect()
    }

    /// Look up marker IDs. The result is sorted by file position and
    /// deduplicated; IDs not in the store are counted and logged.
    pub fn resolve_markers<S: AsRef<str>>(&self, ids: &[S]) -> MarkerSelection {
        let mut indices: Vec<usize> = Vec::with_capacity(ids.len());
        let mut n_missing = 0;
        for id in ids {
            match self.marker_lookup.get(id.as_ref()) {
                Some(&j) => indices.push(j),
                None => n_missing += 1,
            }
        }
        indices.sort_unstable();
        indices.dedup();
        if n_missing > 0 {
            warn!(
                "{} of {} requested markers not found in genotype store; continuing with {}",
                n_missing,
                ids.len(),
                indices.len()
            );
        }
        MarkerSelection { indices, n_missing }
    }

    /// Look up individual IDs, keeping the request order.
    pub fn resolve_individuals<S: AsRef<str>>(&self, ids: &[S]) -> IndividualSelection {
        let mut rows = Vec::with_capacity(ids.len());
        let mut n_missing = 0;
        for id in ids {
            match self.individual_lookup.get(id.as_ref()) {
                Some(&i) => rows.push(i),
                None => n_missing += 1,
            }
        }
        if n_missing > 0 {
            warn!(
                "{} of {} requested individuals not found in genotype store",
                n_missing,
                ids.len()
            );
        }
        IndividualSelection { rows, n_missing }
    }

    /// Open the genotype file for one traversal.
    pub fn open_pass(&self) -> Result<MarkerPass<'_>> {
        let file = File::open(&self.meta.path).with_context(|| {
            format!("Failed to open genotype file: {}", self.meta.path.display())
        })?;
        let n = self.n_individuals();
        let capacity = n.clamp(8 * 1024, 1 << 20);
        debug!("Opened marker pass over {}", self.meta.path.display());
        Ok(MarkerPass {
            store: self,
            reader: BufReader::with_capacity(capacity, file),
            next_marker: 0,
            column: vec![0; n],
            markers_read: 0,
        })
    }
}

/// One scoped traversal of the genotype file.
///
/// The file handle is released when the pass is dropped, including on
/// early return through `?`.
pub struct MarkerPass<'a> {
    store: &'a GenotypeStore,
    reader: BufReader<File>,
    /// Marker whose first byte is at the current file position.
    next_marker: usize,
    column: Vec<u8>,
    markers_read: usize,
}

impl MarkerPass<'_> {
    /// Number of marker columns read so far in this pass.
    pub fn markers_read(&self) -> usize {
        self.markers_read
    }

    fn seek_to(&mut self, marker: usize) -> Result<()> {
        let m = self.store.n_markers();
        if marker >= m {
            bail!("Marker index {} out of range ({})", marker, m);
        }
        let n = self.store.n_individuals() as i64;
        let offset = (marker as i64 - self.next_marker as i64) * n;
        if offset != 0 {
            self.reader
                .seek_relative(offset)
                .with_context(|| format!("Failed to seek to marker {}", marker))?;
        }
        Ok(())
    }

    /// Raw bytes of marker `marker`, all individuals in file order.
    pub fn read_raw(&mut self, marker: usize) -> Result<&[u8]> {
        self.seek_to(marker)?;
        self.reader
            .read_exact(&mut self.column)
            .with_context(|| format!("Failed to read marker {}", marker))?;
        self.next_marker = marker + 1;
        self.markers_read += 1;
        Ok(&self.column)
    }

    /// Centered and scaled genotypes of marker `marker` for `rows`,
    /// written into `out` (same length as `rows`).
    pub fn read_standardized(&mut self, marker: usize, rows: &[usize], out: &mut [f64]) -> Result<()> {
        if rows.len() != out.len() {
            bail!(
                "Output buffer has {} slots for {} rows",
                out.len(),
                rows.len()
            );
        }
        let freq = *self
            .store
            .meta
            .allele_freqs
            .get(marker)
            .with_context(|| format!("Marker index {} out of range ({})", marker, self.store.n_markers()))?;
        let std = Standardizer::new(self.store.meta.coding, freq);
        let n = self.store.n_individuals();
        let raw = self.read_raw(marker)?;
        for (o, &r) in out.iter_mut().zip(rows) {
            if r >= n {
                bail!("Individual row {} out of range ({})", r, n);
            }
            *o = std.value(raw[r]);
        }
        Ok(())
    }
}

impl Drop for MarkerPass<'_> {
    fn drop(&mut self) {
        debug!(
            "Closing marker pass over {} after {} markers",
            self.store.meta.path.display(),
            self.markers_read
        );
    }
}

/// Frequency of the counted allele among non-reserved codes.
pub fn allele_frequency(raw: &[u8], coding: &ByteCoding) -> f64 {
    let (sum, count) = raw
        .iter()
        .filter_map(|&b| coding.dosage(b))
        .fold((0.0, 0usize), |(s, c), d| (s + d, c + 1));
    if count > 0 {
        (sum / (2.0 * count as f64)).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Write raw marker columns (one `Vec<u8>` of length n per marker) as a
/// genotype file.
pub fn write_store_file<P: AsRef<Path>>(path: P, columns: &[Vec<u8>]) -> Result<()> {
    let path = path.as_ref();
    let n = columns.first().map_or(0, |c| c.len());
    let file = File::create(path)
        .with_context(|| format!("Failed to create genotype file: {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for (j, col) in columns.iter().enumerate() {
        if col.len() != n {
            bail!("Marker column {} has {} bytes, expected {}", j, col.len(), n);
        }
        w.write_all(col)?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(prefix: &str, k: usize) -> Vec<String> {
        (0..k).map(|i| format!("{}{}", prefix, i)).collect()
    }

    /// 4 individuals x 3 markers with default coding (code = dosage + 1).
    fn small_store(dir: &Path) -> GenotypeStore {
        let path = dir.join("geno.raw");
        let columns = vec![
            vec![1, 2, 3, 2], // dosages 0,1,2,1
            vec![3, 3, 0, 1], // 2,2,missing,0
            vec![2, 2, 2, 2], // all heterozygous
        ];
        write_store_file(&path, &columns).unwrap();
        GenotypeStore::with_computed_frequencies(
            &path,
            ids("I", 4),
            ids("M", 3),
            ByteCoding::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_coding() {
        let c = ByteCoding::default();
        assert_eq!(c.dosage(0), None);
        assert_eq!(c.dosage(1), Some(0.0));
        assert_eq!(c.dosage(3), Some(2.0));
        assert_eq!(c.encode(Some(2)).unwrap(), 3);
        assert_eq!(c.encode(None).unwrap(), 0);
        assert!(ByteCoding::plain().encode(None).is_err());
    }

    #[test]
    fn test_frequencies_skip_reserved_code() {
        let dir = tempfile::tempdir().unwrap();
        let store = small_store(dir.path());
        let p = store.allele_freqs();
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert!((p[1] - 4.0 / 6.0).abs() < 1e-12);
        assert!((p[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_file_length_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.raw");
        write_store_file(&path, &[vec![1, 2, 3]]).unwrap();
        let err = GenotypeStore::new(&path, ids("I", 4), ids("M", 1), vec![0.5], ByteCoding::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_standardized_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = small_store(dir.path());
        let mut pass = store.open_pass().unwrap();
        let rows = store.all_rows();
        let mut out = vec![0.0; 4];

        pass.read_standardized(0, &rows, &mut out).unwrap();
        let sd = (2.0f64 * 0.5 * 0.5).sqrt();
        assert!((out[0] - (0.0 - 1.0) / sd).abs() < 1e-12);
        assert!((out[1] - 0.0).abs() < 1e-12);
        assert!((out[2] - 1.0 / sd).abs() < 1e-12);

        // Reserved code stays at zero.
        pass.read_standardized(1, &rows, &mut out).unwrap();
        assert_eq!(out[2], 0.0);
        assert!(out[0] > 0.0 && out[3] < 0.0);
    }

    #[test]
    fn test_relative_seek_matches_absolute_reads() {
        let dir = tempfile::tempdir().unwrap();
        let store = small_store(dir.path());
        let expected: Vec<Vec<u8>> = {
            let bytes = std::fs::read(store.path()).unwrap();
            bytes.chunks(4).map(|c| c.to_vec()).collect()
        };

        // Ascending with gaps, then backwards.
        let mut pass = store.open_pass().unwrap();
        for &j in &[0usize, 2, 1, 1, 0, 2] {
            assert_eq!(pass.read_raw(j).unwrap(), expected[j].as_slice(), "marker {}", j);
        }
        assert_eq!(pass.markers_read(), 6);
        assert!(pass.read_raw(3).is_err());
    }

    #[test]
    fn test_row_subset_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = small_store(dir.path());
        let mut pass = store.open_pass().unwrap();
        let mut full = vec![0.0; 4];
        pass.read_standardized(0, &store.all_rows(), &mut full).unwrap();
        let mut sub = vec![0.0; 2];
        pass.read_standardized(0, &[3, 0], &mut sub).unwrap();
        assert_eq!(sub, vec![full[3], full[0]]);
    }

    #[test]
    fn test_resolve_markers_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = small_store(dir.path());
        let sel = store.resolve_markers(&["M2", "nope", "M0", "M2"]);
        assert_eq!(sel.indices, vec![0, 2]);
        assert_eq!(sel.n_missing, 1);

        let rows = store.resolve_individuals(&["I3", "I1", "X"]);
        assert_eq!(rows.rows, vec![3, 1]);
        assert_eq!(rows.n_missing, 1);
    }

    #[test]
    fn test_metadata_roundtrip_with_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = small_store(dir.path());
        let mut meta = store.meta.clone();
        meta.path = PathBuf::from("geno.raw");
        let meta_path = dir.path().join("geno.json");
        std::fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

        let loaded = GenotypeStore::load(&meta_path).unwrap();
        assert_eq!(loaded.n_markers(), 3);
        assert_eq!(loaded.n_individuals(), 4);
        assert_eq!(loaded.allele_freqs(), store.allele_freqs());
        assert_eq!(loaded.path(), dir.path().join("geno.raw"));
    }
}
