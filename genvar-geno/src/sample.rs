//! Matching individual IDs across sources.
//!
//! Phenotype tables, kernels and genotype stores each carry their own
//! ID order; fits need one shared order.

use std::collections::HashMap;

/// Individuals present in every source.
#[derive(Debug, Clone)]
pub struct SampleIntersection {
    /// IDs in the order of the primary (first) source.
    pub ids: Vec<String>,
    /// indices[s][k] = position of ids[k] in source s.
    pub indices: Vec<Vec<usize>>,
}

/// Intersect ID lists, keeping the order of the first one.
pub fn intersect_samples(sources: &[&[String]]) -> SampleIntersection {
    let Some((primary, rest)) = sources.split_first() else {
        return SampleIntersection {
            ids: Vec::new(),
            indices: Vec::new(),
        };
    };

    let maps: Vec<HashMap<&str, usize>> = rest
        .iter()
        .map(|ids| ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect())
        .collect();

    let mut ids = Vec::new();
    let mut indices: Vec<Vec<usize>> = vec![Vec::new(); sources.len()];
    for (k, id) in primary.iter().enumerate() {
        let hits: Option<Vec<usize>> = maps.iter().map(|m| m.get(id.as_str()).copied()).collect();
        if let Some(hits) = hits {
            ids.push(id.clone());
            indices[0].push(k);
            for (s, h) in hits.into_iter().enumerate() {
                indices[s + 1].push(h);
            }
        }
    }

    SampleIntersection { ids, indices }
}

/// Pick `data[i]` for every `i` in `indices`.
pub fn reorder_f64(data: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| data[i]).collect()
}
