//! Predictive accuracy of held-out predictions.

use serde::{Deserialize, Serialize};

use crate::error::{check_len, Result};

/// Agreement between observed and predicted phenotypes.
///
/// `slope` and `intercept` come from regressing observed on predicted.
/// Statistics that need variance in the predictions are NaN without it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    pub n: usize,
    pub correlation: f64,
    pub slope: f64,
    pub intercept: f64,
    /// Mean squared prediction error.
    pub mspe: f64,
}

impl Accuracy {
    pub fn compute(observed: &[f64], predicted: &[f64]) -> Result<Self> {
        check_len("predictions", observed.len(), predicted.len())?;
        let n = observed.len();
        if n == 0 {
            return Ok(Self {
                n,
                correlation: f64::NAN,
                slope: f64::NAN,
                intercept: f64::NAN,
                mspe: f64::NAN,
            });
        }
        let nf = n as f64;
        let mean_o = observed.iter().sum::<f64>() / nf;
        let mean_p = predicted.iter().sum::<f64>() / nf;

        let (mut s_op, mut s_pp, mut s_oo, mut sse) = (0.0, 0.0, 0.0, 0.0);
        for (o, p) in observed.iter().zip(predicted) {
            let d_o = o - mean_o;
            let d_p = p - mean_p;
            s_op += d_o * d_p;
            s_pp += d_p * d_p;
            s_oo += d_o * d_o;
            sse += (o - p) * (o - p);
        }

        let slope = if s_pp > 0.0 { s_op / s_pp } else { f64::NAN };
        let correlation = if s_pp > 0.0 && s_oo > 0.0 {
            s_op / (s_pp * s_oo).sqrt()
        } else {
            f64::NAN
        };
        Ok(Self {
            n,
            correlation,
            slope,
            intercept: mean_o - slope * mean_p,
            mspe: sse / nf,
        })
    }
}
