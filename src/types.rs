use serde::{Deserialize, Serialize};

/// Canonical feature order. Must match the order the persisted forest was
/// trained on; the artifact loader rejects any other ordering.
pub const FEATURE_NAMES: [&str; 9] = [
    "sfh",
    "popupwidnow",
    "sslfinal_state",
    "request_url",
    "url_of_anchor",
    "web_traffic",
    "url_length",
    "age_of_domain",
    "having_ip_address",
];

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// One URL's suspicious-signal profile: nine ternary signals in {-1, 0, 1}.
/// Arrives precomputed from the caller or from the URL extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub sfh: i32,
    pub popupwidnow: i32,
    pub sslfinal_state: i32,
    pub request_url: i32,
    pub url_of_anchor: i32,
    pub web_traffic: i32,
    pub url_length: i32,
    pub age_of_domain: i32,
    pub having_ip_address: i32,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.sfh as f64,
            self.popupwidnow as f64,
            self.sslfinal_state as f64,
            self.request_url as f64,
            self.url_of_anchor as f64,
            self.web_traffic as f64,
            self.url_length as f64,
            self.age_of_domain as f64,
            self.having_ip_address as f64,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Phishing,
    Legitimate,
}

impl Label {
    /// Class encoding of the persisted model: 0 = phishing, 1 = legitimate.
    pub fn from_class(class: i64) -> Self {
        if class == 1 {
            Label::Legitimate
        } else {
            Label::Phishing
        }
    }

    pub fn as_class(&self) -> i64 {
        match self {
            Label::Phishing => 0,
            Label::Legitimate => 1,
        }
    }

    pub fn as_text(&self) -> &'static str {
        match self {
            Label::Phishing => "Phishing",
            Label::Legitimate => "Legitimate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: i64,
    pub prediction_text: String,
    pub probability: f64,
    pub shap_values: Vec<f64>,
    pub feature_names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlPredictRequest {
    pub url: String,
}

/// Extracted signals echoed back alongside the prediction so callers can see
/// what the heuristics produced for their URL.
#[derive(Debug, Clone, Serialize)]
pub struct UrlPredictResponse {
    pub features: FeatureVector,
    #[serde(flatten)]
    pub result: PredictResponse,
}
