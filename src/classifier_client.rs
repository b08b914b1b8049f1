// src/classifier_client.rs
//
// Adapter for the hosted skin-condition classification model. The image is
// decoded locally, normalized to the 180x180 RGB footprint the model was
// trained on, then shipped to the scoring endpoint as base64 PNG.

use crate::errors::AdapterError;
use base64::Engine;
use image::imageops::FilterType;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

pub const IMG_WIDTH: u32 = 180;
pub const IMG_HEIGHT: u32 = 180;

/// The fixed label set the model predicts over.
pub const SKIN_CONDITION_LABELS: &[&str] = &[
    "acne", "actinickeratosis", "alopeciaareata", "chickenpox", "cold sores",
    "eczema", "folliculitis", "hives", "impetigo", "melanoma", "psoriasis",
    "ringworm", "rosacea", "shingles", "uticaria", "vitiligo", "warts",
];

#[derive(Debug, Clone)]
pub struct ClassifierClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    image: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    label: String,
    confidence: f64,
}

/// A classification result: label from the fixed set plus a confidence
/// percentage in [0, 100].
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

impl ClassifierClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    /// Classifies raw uploaded image bytes.
    pub async fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, AdapterError> {
        let encoded = preprocess_image(image_bytes)?;

        let request = PredictRequest {
            image: encoded,
            width: IMG_WIDTH,
            height: IMG_HEIGHT,
        };

        let mut req = self
            .client
            .post(format!("{}/predict", self.base_url))
            .timeout(Duration::from_secs(30))
            .json(&request);
        if let Some(ref key) = self.api_key {
            req = req.header("x-api-key", key);
        }

        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("Classifier returned {}: {}", status, body);
            return Err(AdapterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PredictResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::Decode(format!("{}: {}", e, body)))?;

        validate_prediction(&parsed.label, parsed.confidence)?;

        tracing::info!(
            "Predicted: {} ({:.2}%)",
            parsed.label,
            parsed.confidence
        );

        Ok(Prediction {
            label: parsed.label,
            confidence: parsed.confidence,
        })
    }
}

/// Decodes, converts to RGB and resizes to the model's fixed input size,
/// returning base64-encoded PNG bytes.
fn preprocess_image(image_bytes: &[u8]) -> Result<String, AdapterError> {
    let img = image::load_from_memory(image_bytes).map_err(|e| {
        tracing::warn!("Failed to decode uploaded image: {}", e);
        AdapterError::InvalidImage
    })?;

    let resized = img
        .resize_exact(IMG_WIDTH, IMG_HEIGHT, FilterType::Triangle)
        .to_rgb8();

    let mut png_bytes = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
        .map_err(|_| AdapterError::InvalidImage)?;

    Ok(base64::engine::general_purpose::STANDARD.encode(&png_bytes))
}

fn validate_prediction(label: &str, confidence: f64) -> Result<(), AdapterError> {
    if !SKIN_CONDITION_LABELS.contains(&label) {
        return Err(AdapterError::Decode(format!(
            "unknown condition label '{}'",
            label
        )));
    }
    if !(0.0..=100.0).contains(&confidence) || !confidence.is_finite() {
        return Err(AdapterError::Decode(format!(
            "confidence {} outside [0, 100]",
            confidence
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_labels_in_range() {
        assert!(validate_prediction("acne", 87.5).is_ok());
        assert!(validate_prediction("warts", 0.0).is_ok());
        assert!(validate_prediction("melanoma", 100.0).is_ok());
    }

    #[test]
    fn rejects_unknown_labels() {
        assert!(validate_prediction("sunburn", 90.0).is_err());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        assert!(validate_prediction("acne", -1.0).is_err());
        assert!(validate_prediction("acne", 100.1).is_err());
        assert!(validate_prediction("acne", f64::NAN).is_err());
    }

    #[test]
    fn rejects_garbage_image_bytes() {
        assert!(matches!(
            preprocess_image(b"definitely not an image"),
            Err(AdapterError::InvalidImage)
        ));
    }

    #[test]
    fn preprocesses_a_valid_image() {
        // 1x1 white pixel, upscaled to the model footprint.
        let img = image::RgbImage::from_pixel(1, 1, image::Rgb([255, 255, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let encoded = preprocess_image(&bytes).expect("preprocess");
        assert!(!encoded.is_empty());
    }
}
