use crate::error::AppError;
use crate::types::FeatureVector;
use regex::Regex;
use url::Url;

/// Domains treated as high-traffic when scoring `web_traffic`.
const POPULAR_SITES: [&str; 5] = ["google", "youtube", "facebook", "microsoft", "amazon"];

/// Maps a raw URL string to the nine ternary signals the classifier was
/// trained on. String-local heuristics only; no network lookups.
pub struct UrlFeatureExtractor {
    ip_pattern: Regex,
}

impl UrlFeatureExtractor {
    pub fn new() -> Result<Self, AppError> {
        let ip_pattern = Regex::new(r"([0-9]{1,3}\.){3}[0-9]{1,3}")
            .map_err(|e| AppError::FeatureExtraction(format!("invalid IP pattern: {}", e)))?;
        Ok(Self { ip_pattern })
    }

    pub fn extract(&self, url: &str) -> Result<FeatureVector, AppError> {
        if url.trim().is_empty() {
            return Err(AppError::InvalidInput("url must not be empty".to_string()));
        }

        let lower = url.to_lowercase();
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        // data: URIs abuse the server-form-handler signal
        let sfh = if url.contains("data:") { -1 } else { 1 };

        let popupwidnow = if lower.contains("popup") { -1 } else { 1 };

        let sslfinal_state = if url.starts_with("https") { 1 } else { -1 };

        let request_url = if url.contains(&host) { 1 } else { -1 };

        let url_of_anchor = if !url.contains('#') && !url.contains('@') {
            1
        } else {
            -1
        };

        let web_traffic = if POPULAR_SITES.iter().any(|site| host.contains(site)) {
            1
        } else {
            -1
        };

        let url_length = match url.len() {
            0..=53 => 1,
            54..=75 => 0,
            _ => -1,
        };

        // Digits in the host suggest a throwaway registration
        let age_of_domain = if host.chars().any(|c| c.is_ascii_digit()) {
            -1
        } else {
            1
        };

        let having_ip_address = if self.ip_pattern.is_match(&host) { 1 } else { -1 };

        Ok(FeatureVector {
            sfh,
            popupwidnow,
            sslfinal_state,
            request_url,
            url_of_anchor,
            web_traffic,
            url_length,
            age_of_domain,
            having_ip_address,
        })
    }
}
