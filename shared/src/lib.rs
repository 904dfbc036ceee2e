use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumCount, EnumIter};

/// Labels produced by the classifier head, in output index order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, EnumCount,
)]
pub enum TumorClass {
    Glioma,
    Meningioma,
    #[strum(serialize = "No Tumor")]
    #[serde(rename = "No Tumor")]
    NoTumor,
    Pituitary,
}

impl TumorClass {
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> String {
        self.to_string()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub class_name: String,
    pub confidence: f32,
}

/// Body of `POST /predict`, for both outcomes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictionResponse {
    pub success: bool,
    pub prediction: Option<PredictionResult>,
    pub class_probabilities: BTreeMap<String, f32>,
    pub gradcam_url: Option<String>,
    pub error: Option<String>,
}

impl PredictionResponse {
    pub fn success(
        prediction: PredictionResult,
        class_probabilities: BTreeMap<String, f32>,
        gradcam_url: Option<String>,
    ) -> Self {
        Self {
            success: true,
            prediction: Some(prediction),
            class_probabilities,
            gradcam_url,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            prediction: None,
            class_probabilities: BTreeMap::new(),
            gradcam_url: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiInfo {
    pub message: String,
    pub status: String,
    pub documentation: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteDoc {
    pub method: String,
    pub path: String,
    pub summary: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiDocs {
    pub title: String,
    pub description: String,
    pub version: String,
    pub routes: Vec<RouteDoc>,
}

/// Client error body, returned with a 4xx status.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::EnumCount;

    #[test]
    fn class_indices_follow_model_head_order() {
        assert_eq!(TumorClass::COUNT, 4);
        assert_eq!(TumorClass::from_index(0), Some(TumorClass::Glioma));
        assert_eq!(TumorClass::from_index(2), Some(TumorClass::NoTumor));
        assert_eq!(TumorClass::from_index(3), Some(TumorClass::Pituitary));
        assert_eq!(TumorClass::from_index(4), None);
        for class in TumorClass::iter() {
            assert_eq!(TumorClass::from_index(class.index()), Some(class));
        }
    }

    #[test]
    fn labels_are_human_readable() {
        let labels: Vec<String> = TumorClass::iter().map(TumorClass::label).collect();
        assert_eq!(labels, ["Glioma", "Meningioma", "No Tumor", "Pituitary"]);
        assert_eq!(
            serde_json::to_string(&TumorClass::NoTumor).unwrap(),
            "\"No Tumor\""
        );
    }

    #[test]
    fn failure_response_serializes_nulls() {
        let value = serde_json::to_value(PredictionResponse::failure("boom")).unwrap();
        assert_eq!(value["success"], false);
        assert!(value["prediction"].is_null());
        assert!(value["gradcam_url"].is_null());
        assert_eq!(value["error"], "boom");
        assert_eq!(value["class_probabilities"], serde_json::json!({}));
    }
}
