//! REML through an external executable.
//!
//! Inputs are written into a work directory as raw little-endian f64 files
//! plus a `param.txt`; the executable is started with the work directory as
//! its only argument and leaves whitespace-separated text files behind:
//!
//! | file | contents |
//! |---|---|
//! | `llik.txt` | REML log-likelihood |
//! | `theta.txt` | k+1 variance components |
//! | `theta_cov.txt` | (k+1)^2 covariance entries, row-major |
//! | `beta.txt` | p fixed effects |
//! | `beta_cov.txt` | p^2 covariance entries, row-major |
//! | `py.txt` | n entries of Py |
//! | `trpg.txt`, `trvg.txt` | k traces each |
//! | `niter.txt` | iteration count |

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use genvar_linalg::DenseMatrix;
use tracing::{debug, info, warn};

use super::ai_reml::default_theta;
use super::{validate_inputs, RemlConfig, RemlEstimates, RemlFit, VarianceEstimator};
use crate::error::{GenvarError, Result};

/// Out-of-process variance component estimator.
#[derive(Debug, Clone)]
pub struct ExternalReml {
    pub executable: PathBuf,
    pub work_dir: PathBuf,
    pub threads: usize,
    pub config: RemlConfig,
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> GenvarError {
    GenvarError::ExternalEstimator(format!("{}: {}", path.display(), err))
}

fn write_f64s(path: &Path, values: impl IntoIterator<Item = f64>) -> Result<()> {
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut w = BufWriter::new(file);
    for v in values {
        w.write_all(&v.to_le_bytes()).map_err(|e| io_error(path, e))?;
    }
    w.flush().map_err(|e| io_error(path, e))
}

fn read_numbers(path: &Path, expected: usize) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let values = text
        .split_whitespace()
        .map(|t| t.parse::<f64>().map_err(|e| io_error(path, format!("{} ({:?})", e, t))))
        .collect::<Result<Vec<f64>>>()?;
    if values.len() != expected {
        return Err(io_error(
            path,
            format!("expected {} values, found {}", expected, values.len()),
        ));
    }
    Ok(values)
}

impl ExternalReml {
    pub fn new(executable: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            work_dir: work_dir.into(),
            threads: 1,
            config: RemlConfig::default(),
        }
    }

    /// Write `y.bin`, `X.bin`, `G{i}.bin` and `param.txt`.
    pub fn write_inputs(
        &self,
        y: &[f64],
        x: Option<&DenseMatrix>,
        kernels: &[DenseMatrix],
        initial_theta: &[f64],
    ) -> Result<()> {
        std::fs::create_dir_all(&self.work_dir).map_err(|e| io_error(&self.work_dir, e))?;
        let dir = &self.work_dir;
        let p = x.map_or(0, |x| x.ncols());

        write_f64s(&dir.join("y.bin"), y.iter().copied())?;
        write_f64s(
            &dir.join("X.bin"),
            x.map(|x| x.to_col_major()).unwrap_or_default(),
        )?;

        let mut kernel_files = Vec::with_capacity(kernels.len());
        for (i, g) in kernels.iter().enumerate() {
            let name = format!("G{}.bin", i + 1);
            write_f64s(&dir.join(&name), g.to_packed_upper())?;
            kernel_files.push(name);
        }

        let theta0 = initial_theta
            .iter()
            .map(|t| format!("{:e}", t))
            .collect::<Vec<_>>()
            .join(" ");
        let mut param = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{:e}\n",
            y.len(),
            p,
            kernels.len() + 1,
            self.config.max_iter,
            self.threads.max(1),
            theta0,
            self.config.tol
        );
        for name in &kernel_files {
            param.push_str(name);
            param.push('\n');
        }
        let param_path = dir.join("param.txt");
        std::fs::write(&param_path, param).map_err(|e| io_error(&param_path, e))?;
        debug!("Wrote external REML inputs to {}", dir.display());
        Ok(())
    }

    fn run(&self) -> Result<()> {
        info!(
            "Running external REML: {} {}",
            self.executable.display(),
            self.work_dir.display()
        );
        let status = Command::new(&self.executable)
            .arg(&self.work_dir)
            .current_dir(&self.work_dir)
            .status()
            .map_err(|e| io_error(&self.executable, e))?;
        if !status.success() {
            return Err(GenvarError::ExternalEstimator(format!(
                "{} exited with {}",
                self.executable.display(),
                status
            )));
        }
        Ok(())
    }

    /// Parse the output files into a [`RemlFit`].
    pub fn read_outputs(
        &self,
        y: &[f64],
        x: Option<&DenseMatrix>,
        kernels: &[DenseMatrix],
    ) -> Result<RemlFit> {
        let dir = &self.work_dir;
        let n = y.len();
        let k = kernels.len();
        let p = x.map_or(0, |x| x.ncols());

        let log_likelihood = read_numbers(&dir.join("llik.txt"), 1)?[0];
        let theta = read_numbers(&dir.join("theta.txt"), k + 1)?;
        let theta_cov = DenseMatrix::from_row_major(
            k + 1,
            k + 1,
            &read_numbers(&dir.join("theta_cov.txt"), (k + 1) * (k + 1))?,
        );
        let fixed_effects = read_numbers(&dir.join("beta.txt"), p)?;
        let fixed_effect_cov =
            DenseMatrix::from_row_major(p, p, &read_numbers(&dir.join("beta_cov.txt"), p * p)?);
        let py = read_numbers(&dir.join("py.txt"), n)?;
        let trace_pg = read_numbers(&dir.join("trpg.txt"), k)?;
        let trace_vg = read_numbers(&dir.join("trvg.txt"), k)?;
        let iterations = read_numbers(&dir.join("niter.txt"), 1)?[0] as usize;

        let converged = iterations < self.config.max_iter;
        if !converged {
            warn!(
                "External REML stopped at the iteration limit ({})",
                self.config.max_iter
            );
        }

        Ok(RemlFit::assemble(
            y,
            x,
            kernels,
            RemlEstimates {
                theta,
                theta_cov,
                log_likelihood,
                fixed_effects,
                fixed_effect_cov,
                py,
                vy: None,
                y_vinv_y: None,
                trace_pg,
                trace_vg,
                iterations,
                final_delta: f64::NAN,
                converged,
            },
        ))
    }
}

impl VarianceEstimator for ExternalReml {
    fn estimate(
        &self,
        y: &[f64],
        x: Option<&DenseMatrix>,
        kernels: &[DenseMatrix],
        initial_theta: Option<&[f64]>,
    ) -> Result<RemlFit> {
        validate_inputs(y, x, kernels, initial_theta, &self.config)?;
        let theta0 = match initial_theta {
            Some(t) => t.to_vec(),
            None => default_theta(y, kernels.len() + 1),
        };
        self.write_inputs(y, x, kernels, &theta0)?;
        self.run()?;
        self.read_outputs(y, x, kernels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_f64s(path: &Path) -> Vec<f64> {
        std::fs::read(path)
            .unwrap()
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_input_files() {
        let dir = tempfile::tempdir().unwrap();
        let est = ExternalReml::new("/nonexistent/reml", dir.path());
        let y = vec![1.0, 2.0, 3.0];
        let x = DenseMatrix::from_row_major(3, 1, &[1.0, 1.0, 1.0]);
        let g = DenseMatrix::from_row_major(3, 3, &[1.0, 0.5, 0.0, 0.5, 1.0, 0.2, 0.0, 0.2, 1.0]);
        est.write_inputs(&y, Some(&x), &[g], &[0.5, 0.5]).unwrap();

        assert_eq!(read_f64s(&dir.path().join("y.bin")), y);
        assert_eq!(read_f64s(&dir.path().join("X.bin")), vec![1.0, 1.0, 1.0]);
        assert_eq!(
            read_f64s(&dir.path().join("G1.bin")),
            vec![1.0, 0.5, 0.0, 1.0, 0.2, 1.0]
        );

        let param = std::fs::read_to_string(dir.path().join("param.txt")).unwrap();
        let lines: Vec<&str> = param.lines().collect();
        assert_eq!(&lines[..5], &["3", "1", "2", "100", "1"]);
        assert_eq!(lines[7], "G1.bin");
    }

    #[test]
    fn test_parse_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let est = ExternalReml::new("/nonexistent/reml", dir.path());
        let d = dir.path();
        std::fs::write(d.join("llik.txt"), "-12.5\n").unwrap();
        std::fs::write(d.join("theta.txt"), "2.0 1.0\n").unwrap();
        std::fs::write(d.join("theta_cov.txt"), "0.1 0.0\n0.0 0.2\n").unwrap();
        std::fs::write(d.join("beta.txt"), "4.0\n").unwrap();
        std::fs::write(d.join("beta_cov.txt"), "0.3\n").unwrap();
        std::fs::write(d.join("py.txt"), "0.5 -0.5 0.0\n").unwrap();
        std::fs::write(d.join("trpg.txt"), "1.5\n").unwrap();
        std::fs::write(d.join("trvg.txt"), "1.7\n").unwrap();
        std::fs::write(d.join("niter.txt"), "6\n").unwrap();

        let y = vec![5.0, 3.0, 4.0];
        let x = DenseMatrix::from_row_major(3, 1, &[1.0, 1.0, 1.0]);
        let g = DenseMatrix::identity(3);
        let fit = est.read_outputs(&y, Some(&x), &[g]).unwrap();

        assert_eq!(fit.theta, vec![2.0, 1.0]);
        assert_eq!(fit.iterations, 6);
        assert!(fit.converged);
        assert_eq!(fit.fitted, vec![4.0, 4.0, 4.0]);
        // u = theta_1 * G * Py
        assert_eq!(fit.random_effects[0], vec![1.0, -1.0, 0.0]);
        assert_eq!(fit.predicted, vec![5.0, 3.0, 4.0]);
        assert_eq!(fit.residuals, vec![0.0, 0.0, 0.0]);
        assert!((fit.theta_cov.get(1, 1) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let est = ExternalReml::new("/nonexistent/reml", dir.path());
        let err = est.read_outputs(&[1.0, 2.0], None, &[]);
        assert!(matches!(err, Err(GenvarError::ExternalEstimator(_))));
    }

    #[test]
    fn test_missing_executable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let est = ExternalReml::new(dir.path().join("no-such-binary"), dir.path());
        let g = DenseMatrix::identity(3);
        let err = est.estimate(&[1.0, 2.0, 4.0], None, &[g], None);
        assert!(matches!(err, Err(GenvarError::ExternalEstimator(_))));
    }
}
