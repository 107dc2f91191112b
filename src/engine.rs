use crate::{
    config::Config,
    error::AppError,
    explainer::{BackgroundData, TreeExplainer},
    features::UrlFeatureExtractor,
    forest::RandomForest,
    types::{
        FeatureVector, Label, PredictResponse, UrlPredictResponse, FEATURE_COUNT, FEATURE_NAMES,
    },
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Process-wide prediction context: the loaded classifier, the explainer
/// bound to it, and the URL heuristics. Built once at startup and shared
/// read-only across requests; `predict` takes `&self` and mutates nothing.
pub struct PredictionEngine {
    model: Arc<RandomForest>,
    explainer: TreeExplainer,
    extractor: UrlFeatureExtractor,
}

impl PredictionEngine {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        info!("Initializing prediction engine...");

        let model = Arc::new(RandomForest::load(&config.model_path)?);
        let background = BackgroundData::load(&config.background_data_path)?;

        Self::from_parts(model, background)
    }

    pub fn from_parts(
        model: Arc<RandomForest>,
        background: BackgroundData,
    ) -> Result<Self, AppError> {
        let explainer = TreeExplainer::new(Arc::clone(&model), background)?;
        let extractor = UrlFeatureExtractor::new()?;

        let base_values: Vec<f64> = (0..model.n_classes())
            .map(|c| explainer.expected_value(c))
            .collect();
        info!(
            "Prediction engine ready: {} trees, {} classes, base values {:?}",
            model.trees.len(),
            model.n_classes(),
            base_values
        );

        Ok(Self {
            model,
            explainer,
            extractor,
        })
    }

    /// One feature vector in, one classified and explained result out.
    /// Deterministic: the classifier and explainer are stateless after load.
    pub fn predict(&self, features: &FeatureVector) -> Result<PredictResponse, AppError> {
        let x = features.to_array();

        // Step 1: discrete label
        let predicted = self.model.predict(&x);
        let label = Label::from_class(self.model.classes[predicted]);

        // Step 2: confidence for the predicted label
        let proba = self.model.predict_proba(&x);
        let probability = match proba.len() {
            2 => proba[predicted],
            1 => {
                // Degenerate single-class artifact. Kept for parity with the
                // trained-model contract, but loud: it usually means the
                // model was fitted on one class only.
                warn!("Classifier produced a single-entry distribution; check the model artifact");
                proba[0]
            }
            n => {
                return Err(AppError::Prediction(format!(
                    "unexpected class distribution with {} entries",
                    n
                )))
            }
        };

        // Step 3: per-feature attribution for the predicted class
        let mut attributions = self.explainer.attribute(&x);
        let shap_values = match attributions.len() {
            0 => {
                return Err(AppError::Prediction(
                    "explainer returned no attribution vectors".to_string(),
                ))
            }
            1 => attributions.swap_remove(0),
            n if predicted < n => attributions.swap_remove(predicted),
            n => {
                return Err(AppError::Prediction(format!(
                    "no attribution vector for class index {} among {}",
                    predicted, n
                )))
            }
        };

        // Step 4: assemble and enforce the length invariant
        let feature_names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        if shap_values.len() != FEATURE_COUNT {
            return Err(AppError::Prediction(format!(
                "attribution length {} does not match feature count {}",
                shap_values.len(),
                FEATURE_COUNT
            )));
        }

        info!(
            "Prediction completed: {} (probability: {:.3})",
            label.as_text(),
            probability
        );

        Ok(PredictResponse {
            prediction: label.as_class(),
            prediction_text: label.as_text().to_string(),
            probability,
            shap_values,
            feature_names,
        })
    }

    /// Extract the nine signals from a raw URL, then run the same pipeline.
    pub fn predict_url(&self, url: &str) -> Result<UrlPredictResponse, AppError> {
        let features = self.extractor.extract(url)?;
        debug!("Extracted features for {}: {:?}", url, features);

        let result = self.predict(&features)?;
        Ok(UrlPredictResponse { features, result })
    }
}
