//! Phenotype and covariate table parser.
//!
//! Reads tab/space-delimited files with an ID column, one phenotype column
//! and any number of covariate columns. Missing entries parse as NaN.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use genvar_linalg::DenseMatrix;

/// Parsed phenotype table.
#[derive(Debug, Clone)]
pub struct PhenotypeTable {
    /// Individual IDs in file order.
    pub ids: Vec<String>,
    /// Phenotype values (NaN for missing).
    pub values: Vec<f64>,
    /// covariates[i][j] = individual i, covariate j.
    pub covariates: Vec<Vec<f64>>,
    pub covariate_names: Vec<String>,
}

/// Parse a phenotype/covariate file.
pub fn parse_phenotype_file(
    path: &Path,
    pheno_col: &str,
    covar_cols: &[String],
    id_col: &str,
) -> Result<PhenotypeTable> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read phenotype file: {}", path.display()))?;

    let mut lines = contents.lines();
    let header_line = lines.next().ok_or_else(|| anyhow!("Empty phenotype file"))?;
    let split = |line: &str| -> Vec<String> {
        if line.contains('\t') {
            line.split('\t').map(|s| s.trim().to_string()).collect()
        } else {
            line.split_whitespace().map(str::to_string).collect()
        }
    };

    let headers = split(header_line);
    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow!("Column '{}' not found in phenotype header", name))
    };
    let id_idx = column(id_col)?;
    let pheno_idx = column(pheno_col)?;
    let covar_indices = covar_cols
        .iter()
        .map(|c| column(c))
        .collect::<Result<Vec<_>>>()?;

    let mut table = PhenotypeTable {
        ids: Vec::new(),
        values: Vec::new(),
        covariates: Vec::new(),
        covariate_names: covar_cols.to_vec(),
    };

    for (line_num, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split(line);
        if fields.len() <= id_idx.max(pheno_idx) {
            bail!(
                "Line {} has too few fields (expected at least {})",
                line_num + 2,
                id_idx.max(pheno_idx) + 1
            );
        }
        table.ids.push(fields[id_idx].clone());
        table.values.push(parse_value(&fields[pheno_idx]));
        table.covariates.push(
            covar_indices
                .iter()
                .map(|&ci| fields.get(ci).map_or(f64::NAN, |s| parse_value(s)))
                .collect(),
        );
    }

    Ok(table)
}

/// Parse a string value to f64, treating NA/missing as NaN.
fn parse_value(s: &str) -> f64 {
    match s {
        "NA" | "na" | "Na" | "." | "" | "-" | "NaN" | "nan" => f64::NAN,
        _ => s.parse().unwrap_or(f64::NAN),
    }
}

impl PhenotypeTable {
    /// Rows with a phenotype and every covariate present.
    pub fn complete_rows(&self) -> Vec<usize> {
        (0..self.ids.len())
            .filter(|&i| {
                !self.values[i].is_nan() && self.covariates[i].iter().all(|c| !c.is_nan())
            })
            .collect()
    }

    /// Intercept + covariates for `rows`, in that order.
    pub fn design_matrix(&self, rows: &[usize]) -> DenseMatrix {
        let p = self.covariate_names.len() + 1;
        DenseMatrix::from_fn(rows.len(), p, |i, j| {
            if j == 0 {
                1.0
            } else {
                self.covariates[rows[i]][j - 1]
            }
        })
    }

    /// Phenotype values for `rows`.
    pub fn values_at(&self, rows: &[usize]) -> Vec<f64> {
        rows.iter().map(|&i| self.values[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1.5"), 1.5);
        assert!(parse_value("NA").is_nan());
        assert!(parse_value(".").is_nan());
    }

    #[test]
    fn test_parse_and_design() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pheno.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "IID\ty\tage").unwrap();
        writeln!(f, "S1\t1.5\t45").unwrap();
        writeln!(f, "S2\tNA\t50").unwrap();
        writeln!(f, "S3\t-0.5\t55").unwrap();

        let table = parse_phenotype_file(&path, "y", &["age".to_string()], "IID").unwrap();
        assert_eq!(table.ids, vec!["S1", "S2", "S3"]);
        assert!(table.values[1].is_nan());

        let rows = table.complete_rows();
        assert_eq!(rows, vec![0, 2]);
        let x = table.design_matrix(&rows);
        assert_eq!(x.ncols(), 2);
        assert_eq!(x.col(0), vec![1.0, 1.0]);
        assert_eq!(x.col(1), vec![45.0, 55.0]);
        assert_eq!(table.values_at(&rows), vec![1.5, -0.5]);
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pheno.txt");
        std::fs::write(&path, "IID y\nS1 1\n").unwrap();
        assert!(parse_phenotype_file(&path, "height", &[], "IID").is_err());
    }
}
