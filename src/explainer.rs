use crate::error::AppError;
use crate::forest::RandomForest;
use crate::types::{FEATURE_COUNT, FEATURE_NAMES};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Background reference rows used as the attribution baseline.
#[derive(Debug, Clone)]
pub struct BackgroundData {
    pub rows: Vec<[f64; FEATURE_COUNT]>,
}

impl BackgroundData {
    /// Parse the background CSV: a header with the canonical feature names
    /// followed by one numeric row per historical sample.
    pub fn load(path: &str) -> Result<Self, AppError> {
        if !Path::new(path).exists() {
            return Err(AppError::BackgroundData(format!(
                "background data not found: {}",
                path
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let header: Vec<&str> = lines
            .next()
            .ok_or_else(|| AppError::BackgroundData("background file is empty".to_string()))?
            .split(',')
            .map(str::trim)
            .collect();
        if header != FEATURE_NAMES {
            return Err(AppError::BackgroundData(format!(
                "header {:?} does not match expected feature order",
                header
            )));
        }

        let mut rows = Vec::new();
        for (lineno, line) in lines.enumerate() {
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            if cells.len() != FEATURE_COUNT {
                return Err(AppError::BackgroundData(format!(
                    "row {} has {} columns, expected {}",
                    lineno + 2,
                    cells.len(),
                    FEATURE_COUNT
                )));
            }
            let mut row = [0.0; FEATURE_COUNT];
            for (slot, cell) in row.iter_mut().zip(&cells) {
                *slot = cell.parse().map_err(|_| {
                    AppError::BackgroundData(format!(
                        "row {}: invalid value {:?}",
                        lineno + 2,
                        cell
                    ))
                })?;
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(AppError::BackgroundData(
                "background file contains no sample rows".to_string(),
            ));
        }

        info!("Loaded {} background rows from {}", rows.len(), path);
        Ok(Self { rows })
    }
}

/// Per-feature attribution for the forest's class probabilities, relative to
/// the background expectation. With nine features the full coalition lattice
/// has 512 entries, so the Shapley values are computed exactly rather than
/// sampled; the output is deterministic.
pub struct TreeExplainer {
    model: Arc<RandomForest>,
    background: Vec<[f64; FEATURE_COUNT]>,
    /// Mean model output over the background, one entry per class.
    expected_values: Vec<f64>,
    /// Shapley coalition weight per coalition size.
    weights: [f64; FEATURE_COUNT],
}

impl TreeExplainer {
    pub fn new(model: Arc<RandomForest>, background: BackgroundData) -> Result<Self, AppError> {
        if background.rows.is_empty() {
            return Err(AppError::BackgroundData(
                "explainer requires at least one background row".to_string(),
            ));
        }

        let mut expected_values = vec![0.0; model.n_classes()];
        for row in &background.rows {
            for (e, p) in expected_values.iter_mut().zip(model.predict_proba(row)) {
                *e += p;
            }
        }
        let m = background.rows.len() as f64;
        for e in &mut expected_values {
            *e /= m;
        }

        Ok(Self {
            model,
            background: background.rows,
            expected_values,
            weights: coalition_weights(),
        })
    }

    /// Mean prediction over the background: the attribution base value.
    pub fn expected_value(&self, class: usize) -> f64 {
        self.expected_values[class]
    }

    /// One signed attribution vector per class. For each class,
    /// `sum(attributions) == predict_proba(x) - expected_value` holds to
    /// floating tolerance.
    pub fn attribute(&self, x: &[f64; FEATURE_COUNT]) -> Vec<Vec<f64>> {
        let n_classes = self.model.n_classes();
        let n_masks = 1usize << FEATURE_COUNT;

        // Value function over the coalition lattice: features in the mask
        // take their values from x, the rest from each background row.
        let mut values = Vec::with_capacity(n_masks);
        for mask in 0..n_masks {
            values.push(self.coalition_value(x, mask));
        }

        let mut attributions = vec![vec![0.0; FEATURE_COUNT]; n_classes];
        for i in 0..FEATURE_COUNT {
            let bit = 1usize << i;
            for mask in 0..n_masks {
                if mask & bit != 0 {
                    continue;
                }
                let w = self.weights[mask.count_ones() as usize];
                for (c, phi) in attributions.iter_mut().enumerate() {
                    phi[i] += w * (values[mask | bit][c] - values[mask][c]);
                }
            }
        }
        attributions
    }

    fn coalition_value(&self, x: &[f64; FEATURE_COUNT], mask: usize) -> Vec<f64> {
        if mask == (1 << FEATURE_COUNT) - 1 {
            // Every feature comes from x; the background drops out.
            return self.model.predict_proba(x);
        }
        let mut acc = vec![0.0; self.model.n_classes()];
        for row in &self.background {
            let mut composite = *row;
            for (i, slot) in composite.iter_mut().enumerate() {
                if mask & (1 << i) != 0 {
                    *slot = x[i];
                }
            }
            for (a, p) in acc.iter_mut().zip(self.model.predict_proba(&composite)) {
                *a += p;
            }
        }
        let m = self.background.len() as f64;
        for a in &mut acc {
            *a /= m;
        }
        acc
    }
}

/// w[s] = s! * (n-1-s)! / n! for coalition size s.
fn coalition_weights() -> [f64; FEATURE_COUNT] {
    let n = FEATURE_COUNT;
    let factorial = |k: usize| -> f64 { (1..=k).map(|v| v as f64).product() };
    let mut weights = [0.0; FEATURE_COUNT];
    for (s, w) in weights.iter_mut().enumerate() {
        *w = factorial(s) * factorial(n - 1 - s) / factorial(n);
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::test_support::{forest, stump};

    fn fixture() -> (Arc<RandomForest>, BackgroundData) {
        let model = Arc::new(forest(
            vec![
                stump(2, 0.0, vec![80.0, 20.0], vec![10.0, 90.0]),
                stump(8, 0.0, vec![30.0, 70.0], vec![90.0, 10.0]),
            ],
            vec![0, 1],
        ));
        let background = BackgroundData {
            rows: vec![
                [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, -1.0],
                [-1.0, 0.0, -1.0, -1.0, -1.0, 0.0, -1.0, -1.0, 1.0],
                [1.0, 1.0, -1.0, 1.0, 0.0, 1.0, 0.0, 1.0, -1.0],
            ],
        };
        (model, background)
    }

    #[test]
    fn attribution_sums_to_prediction_minus_base_value() {
        let (model, background) = fixture();
        let explainer = TreeExplainer::new(model.clone(), background).unwrap();

        let x = [-1.0, 0.0, -1.0, -1.0, -1.0, 0.0, -1.0, -1.0, 1.0];
        let proba = model.predict_proba(&x);
        let attributions = explainer.attribute(&x);

        for class in 0..2 {
            let total: f64 = attributions[class].iter().sum();
            let expected = proba[class] - explainer.expected_value(class);
            assert!(
                (total - expected).abs() < 1e-9,
                "class {}: {} != {}",
                class,
                total,
                expected
            );
        }
    }

    #[test]
    fn unused_features_get_zero_attribution() {
        let (model, background) = fixture();
        let explainer = TreeExplainer::new(model, background).unwrap();

        let x = [-1.0, 0.0, -1.0, -1.0, -1.0, 0.0, -1.0, -1.0, 1.0];
        let attributions = explainer.attribute(&x);

        // The fixture forest only splits on sslfinal_state (2) and
        // having_ip_address (8).
        for class in 0..2 {
            for (i, phi) in attributions[class].iter().enumerate() {
                if i == 2 || i == 8 {
                    continue;
                }
                assert!(phi.abs() < 1e-12, "feature {} class {}: {}", i, class, phi);
            }
        }
    }

    #[test]
    fn single_split_attribution_is_the_full_gap() {
        // One tree, one split: the split feature must carry the entire
        // difference between f(x) and the background mean.
        let model = Arc::new(forest(
            vec![stump(2, 0.0, vec![80.0, 20.0], vec![10.0, 90.0])],
            vec![0, 1],
        ));
        let background = BackgroundData {
            rows: vec![
                [0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            ],
        };
        let explainer = TreeExplainer::new(model.clone(), background).unwrap();

        let mut x = [0.0; FEATURE_COUNT];
        x[2] = -1.0;
        let attributions = explainer.attribute(&x);
        let gap = model.predict_proba(&x)[0] - explainer.expected_value(0);
        assert!((attributions[0][2] - gap).abs() < 1e-9);
    }

    #[test]
    fn attribution_is_deterministic() {
        let (model, background) = fixture();
        let explainer = TreeExplainer::new(model, background).unwrap();
        let x = [1.0, -1.0, 0.0, 1.0, -1.0, 1.0, 0.0, 1.0, -1.0];
        assert_eq!(explainer.attribute(&x), explainer.attribute(&x));
    }

    #[test]
    fn class_attributions_mirror_for_binary_probabilities() {
        let (model, background) = fixture();
        let explainer = TreeExplainer::new(model, background).unwrap();
        let x = [-1.0, 0.0, -1.0, -1.0, -1.0, 0.0, -1.0, -1.0, 1.0];
        let attributions = explainer.attribute(&x);
        // p0 + p1 == 1 everywhere, so the per-class contributions negate.
        for i in 0..FEATURE_COUNT {
            assert!((attributions[0][i] + attributions[1][i]).abs() < 1e-12);
        }
    }

    #[test]
    fn coalition_weights_cover_the_lattice() {
        // Summed over all coalitions excluding one feature, the weights
        // must total exactly 1.
        let weights = coalition_weights();
        let mut total = 0.0;
        for mask in 0..(1usize << (FEATURE_COUNT - 1)) {
            total += weights[mask.count_ones() as usize];
        }
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn background_csv_parses() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "sfh,popupwidnow,sslfinal_state,request_url,url_of_anchor,web_traffic,url_length,age_of_domain,having_ip_address"
        )
        .unwrap();
        writeln!(file, "-1,0,-1,-1,-1,0,-1,-1,1").unwrap();
        writeln!(file, "1,1,1,1,1,1,1,1,-1").unwrap();

        let data = BackgroundData::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(data.rows.len(), 2);
        assert_eq!(data.rows[0][8], 1.0);
    }

    #[test]
    fn background_header_mismatch_is_rejected() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b,c").unwrap();
        writeln!(file, "1,2,3").unwrap();
        let err = BackgroundData::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::BackgroundData(_)));
    }

    #[test]
    fn background_without_rows_is_rejected() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "sfh,popupwidnow,sslfinal_state,request_url,url_of_anchor,web_traffic,url_length,age_of_domain,having_ip_address"
        )
        .unwrap();
        let err = BackgroundData::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::BackgroundData(_)));
    }
}
