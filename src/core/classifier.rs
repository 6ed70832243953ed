//! Artifact classification of feature windows.
//!
//! The classifier does not own a model. It drives one or two [`Predictor`]s
//! (binary and multiclass) and turns their class probabilities into labels,
//! falling back to `Unknown` whenever the output cannot be trusted:
//!
//! - degenerate feature vectors are never sent to a predictor
//! - invalid or near-tied probabilities become `Unknown`
//! - in `Both` mode a multiclass `Clean` that the binary predictor disputes
//!   becomes `Unknown`
//!
//! Every such fallback carries an [`Annotation`].

use crate::config::ClassifierConfig;
use crate::core::features::{FeatureVector, FEATURE_NAMES};
use crate::error::AnalysisError;
use crate::quality::Annotation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Which predictor(s) label the windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierMode {
    /// Clean vs artifact
    #[default]
    Binary,
    /// Artifact subtype
    Multiclass,
    /// Both, cross-checked
    Both,
}

impl ClassifierMode {
    fn runs_binary(self) -> bool {
        matches!(self, ClassifierMode::Binary | ClassifierMode::Both)
    }

    fn runs_multiclass(self) -> bool {
        matches!(self, ClassifierMode::Multiclass | ClassifierMode::Both)
    }
}

impl FromStr for ClassifierMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(ClassifierMode::Binary),
            "multiclass" => Ok(ClassifierMode::Multiclass),
            "both" => Ok(ClassifierMode::Both),
            other => Err(format!(
                "unknown classifier mode '{other}' (expected binary, multiclass or both)"
            )),
        }
    }
}

impl fmt::Display for ClassifierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassifierMode::Binary => "binary",
            ClassifierMode::Multiclass => "multiclass",
            ClassifierMode::Both => "both",
        };
        f.write_str(name)
    }
}

/// Binary label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryClass {
    Clean,
    Artifact,
    Unknown,
}

impl BinaryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryClass::Clean => "clean",
            BinaryClass::Artifact => "artifact",
            BinaryClass::Unknown => "unknown",
        }
    }
}

/// Multiclass label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MulticlassClass {
    Clean,
    /// Neither clearly clean nor clearly an artifact
    Questionable,
    /// Movement-induced
    MotionArtifact,
    /// Electrode contact loss or pressure
    ContactArtifact,
    Unknown,
}

impl MulticlassClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MulticlassClass::Clean => "clean",
            MulticlassClass::Questionable => "questionable",
            MulticlassClass::MotionArtifact => "motion_artifact",
            MulticlassClass::ContactArtifact => "contact_artifact",
            MulticlassClass::Unknown => "unknown",
        }
    }

    /// Parse a predictor class name. `unknown` is not a predictable class.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "clean" => Some(MulticlassClass::Clean),
            "questionable" => Some(MulticlassClass::Questionable),
            "motion_artifact" => Some(MulticlassClass::MotionArtifact),
            "contact_artifact" => Some(MulticlassClass::ContactArtifact),
            _ => None,
        }
    }
}

/// Class name of the clean class in every predictor.
pub const CLEAN_CLASS: &str = "clean";

/// Per-class probabilities from one predictor, in the predictor's class order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities(pub Vec<(String, f64)>);

impl ClassProbabilities {
    pub fn get(&self, class: &str) -> Option<f64> {
        self.0.iter().find(|(c, _)| c == class).map(|(_, p)| *p)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Non-empty, finite, non-negative and not all zero.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.iter().all(|(_, p)| p.is_finite() && *p >= 0.0)
            && self.total() > 0.0
    }

    fn total(&self) -> f64 {
        self.0.iter().map(|(_, p)| p).sum()
    }

    /// Most probable class and its lead over the runner-up, both normalised.
    fn top(&self) -> Option<(&str, f64)> {
        let total = self.total();
        let mut ranked: Vec<&(String, f64)> = self.0.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let first = ranked.first()?;
        let second = ranked.get(1).map_or(0.0, |(_, p)| *p);
        Some((first.0.as_str(), (first.1 - second) / total))
    }

    /// Render as `class=p;class=p`.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(c, p)| format!("{c}={p:.4}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// A model that scores a feature vector.
///
/// Implementations must be deterministic; the classifier calls them from
/// whichever thread runs the pipeline.
pub trait Predictor: Send + Sync {
    /// Probability for each class the model knows.
    fn predict(&self, features: &FeatureVector) -> ClassProbabilities;
}

/// Model loading errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid model: {0}")]
    Invalid(String),
}

/// Bias and per-feature weights for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub class: String,
    #[serde(default)]
    pub bias: f64,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl ClassWeights {
    fn new(class: &str, bias: f64, weights: &[(&str, f64)]) -> Self {
        Self {
            class: class.to_string(),
            bias,
            weights: weights.iter().map(|(n, w)| (n.to_string(), *w)).collect(),
        }
    }

    fn logit(&self, features: &FeatureVector) -> f64 {
        self.weights.iter().fold(self.bias, |acc, (name, w)| {
            acc + w * features.get(name).unwrap_or(f64::NAN)
        })
    }
}

/// Multinomial logistic model: softmax over linear class scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    classes: Vec<ClassWeights>,
}

impl LinearModel {
    /// Build a model, checking class names and feature references.
    pub fn new(classes: Vec<ClassWeights>) -> Result<Self, ModelError> {
        if classes.len() < 2 {
            return Err(ModelError::Invalid("at least two classes are required".into()));
        }

        let mut seen = HashSet::new();
        for class in &classes {
            if !seen.insert(class.class.as_str()) {
                return Err(ModelError::Invalid(format!("duplicate class '{}'", class.class)));
            }
            if !class.bias.is_finite() {
                return Err(ModelError::Invalid(format!("bias of '{}' is not finite", class.class)));
            }
            for (name, weight) in &class.weights {
                if !FEATURE_NAMES.contains(&name.as_str()) {
                    return Err(ModelError::Invalid(format!("unknown feature '{name}'")));
                }
                if !weight.is_finite() {
                    return Err(ModelError::Invalid(format!("weight of '{name}' is not finite")));
                }
            }
        }
        if !seen.contains(CLEAN_CLASS) {
            return Err(ModelError::Invalid(format!("missing '{CLEAN_CLASS}' class")));
        }

        Ok(Self { classes })
    }

    /// Parse a model from JSON.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let model: LinearModel = serde_json::from_str(json)?;
        Self::new(model.classes)
    }

    /// Load a model from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Built-in clean/artifact weights.
    ///
    /// Motion shows up as a variable acceleration magnitude and contact
    /// problems as abrupt EDA jumps; either pushes a window to `artifact`.
    pub fn default_binary() -> Self {
        Self {
            classes: vec![
                ClassWeights::new(CLEAN_CLASS, 0.0, &[]),
                ClassWeights::new(
                    "artifact",
                    -4.0,
                    &[("accel_magnitude_cv", 40.0), ("eda_deriv_max_abs", 3.0)],
                ),
            ],
        }
    }

    /// Built-in weights for the artifact subtypes.
    pub fn default_multiclass() -> Self {
        Self {
            classes: vec![
                ClassWeights::new(CLEAN_CLASS, 0.0, &[]),
                ClassWeights::new(
                    "questionable",
                    -2.5,
                    &[("accel_magnitude_cv", 15.0), ("eda_deriv_max_abs", 1.5)],
                ),
                ClassWeights::new("motion_artifact", -5.0, &[("accel_magnitude_cv", 45.0)]),
                ClassWeights::new("contact_artifact", -5.0, &[("eda_deriv_max_abs", 5.0)]),
            ],
        }
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.class.as_str()).collect()
    }
}

impl Predictor for LinearModel {
    fn predict(&self, features: &FeatureVector) -> ClassProbabilities {
        let logits: Vec<f64> = self.classes.iter().map(|c| c.logit(features)).collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f64 = exp.iter().sum();

        ClassProbabilities(
            self.classes
                .iter()
                .zip(exp)
                .map(|(c, e)| (c.class.clone(), e / sum))
                .collect(),
        )
    }
}

/// The predictor pair a classifier draws on.
#[derive(Clone)]
pub struct Predictors {
    pub binary: Arc<dyn Predictor>,
    pub multiclass: Arc<dyn Predictor>,
}

impl Default for Predictors {
    fn default() -> Self {
        Self {
            binary: Arc::new(LinearModel::default_binary()),
            multiclass: Arc::new(LinearModel::default_multiclass()),
        }
    }
}

impl fmt::Debug for Predictors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictors").finish_non_exhaustive()
    }
}

impl Predictors {
    /// Load configured model files, using built-in weights where none is set.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ModelError> {
        let mut predictors = Self::default();
        if let Some(ref path) = config.binary_model {
            tracing::info!(path = %path.display(), "Loading binary model");
            predictors.binary = Arc::new(LinearModel::load(path)?);
        }
        if let Some(ref path) = config.multiclass_model {
            tracing::info!(path = %path.display(), "Loading multiclass model");
            predictors.multiclass = Arc::new(LinearModel::load(path)?);
        }
        Ok(predictors)
    }
}

/// Classification of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Set when the binary predictor ran
    pub binary: Option<BinaryClass>,
    /// Set when the multiclass predictor ran
    pub multiclass: Option<MulticlassClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_probabilities: Option<ClassProbabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiclass_probabilities: Option<ClassProbabilities>,
    pub annotations: Vec<Annotation>,
}

impl Label {
    fn new(features: &FeatureVector) -> Self {
        Self {
            window_start: features.window_start,
            window_end: features.window_end,
            binary: None,
            multiclass: None,
            binary_probabilities: None,
            multiclass_probabilities: None,
            annotations: Vec::new(),
        }
    }

    /// Whether any produced label is `Unknown`.
    pub fn is_unknown(&self) -> bool {
        self.binary == Some(BinaryClass::Unknown)
            || self.multiclass == Some(MulticlassClass::Unknown)
    }

    fn annotate(&mut self, annotation: Annotation) {
        if !self.annotations.contains(&annotation) {
            self.annotations.push(annotation);
        }
    }
}

/// Labels feature windows using pluggable predictors.
#[derive(Debug, Clone)]
pub struct ArtifactClassifier {
    predictors: Predictors,
    ambiguity_margin: f64,
}

impl ArtifactClassifier {
    /// Create a classifier. The margin must lie in [0, 1).
    pub fn new(predictors: Predictors, ambiguity_margin: f64) -> Result<Self, AnalysisError> {
        if !(0.0..1.0).contains(&ambiguity_margin) {
            return Err(AnalysisError::invalid(format!(
                "ambiguity_margin must be in [0, 1), got {ambiguity_margin}"
            )));
        }
        Ok(Self {
            predictors,
            ambiguity_margin,
        })
    }

    /// Label every vector, one label per vector in the same order.
    pub fn classify(&self, vectors: &[FeatureVector], mode: ClassifierMode) -> Vec<Label> {
        let labels: Vec<Label> = vectors.iter().map(|v| self.classify_one(v, mode)).collect();

        let unknown = labels.iter().filter(|l| l.is_unknown()).count();
        tracing::debug!(windows = labels.len(), unknown, %mode, "Classification complete");
        labels
    }

    /// Label a single window.
    pub fn classify_one(&self, features: &FeatureVector, mode: ClassifierMode) -> Label {
        let mut label = Label::new(features);

        if features.is_degenerate() {
            tracing::debug!(start = %features.window_start, "Degenerate feature vector");
            label.annotate(Annotation::DegenerateFeatures);
            label.binary = mode.runs_binary().then_some(BinaryClass::Unknown);
            label.multiclass = mode.runs_multiclass().then_some(MulticlassClass::Unknown);
            return label;
        }

        if mode.runs_binary() {
            let probabilities = self.predictors.binary.predict(features);
            label.binary = Some(self.decide_binary(&probabilities, &mut label));
            label.binary_probabilities = Some(probabilities);
        }

        if mode.runs_multiclass() {
            let probabilities = self.predictors.multiclass.predict(features);
            label.multiclass = Some(self.decide_multiclass(&probabilities, &mut label));
            label.multiclass_probabilities = Some(probabilities);
        }

        if label.multiclass == Some(MulticlassClass::Clean)
            && label.binary.is_some_and(|b| b != BinaryClass::Clean)
        {
            tracing::warn!(
                start = %features.window_start,
                binary = ?label.binary,
                "Multiclass clean contradicts binary label"
            );
            label.multiclass = Some(MulticlassClass::Unknown);
            label.annotate(Annotation::InconsistentPrediction);
        }

        label
    }

    fn decide_binary(&self, probabilities: &ClassProbabilities, label: &mut Label) -> BinaryClass {
        let clean = match (probabilities.is_valid(), probabilities.get(CLEAN_CLASS)) {
            (true, Some(p)) => p / probabilities.total(),
            _ => {
                label.annotate(Annotation::AmbiguousClassification);
                return BinaryClass::Unknown;
            }
        };

        // Every non-clean class counts towards artifact
        if (2.0 * clean - 1.0).abs() < self.ambiguity_margin {
            label.annotate(Annotation::AmbiguousClassification);
            BinaryClass::Unknown
        } else if clean > 0.5 {
            BinaryClass::Clean
        } else {
            BinaryClass::Artifact
        }
    }

    fn decide_multiclass(
        &self,
        probabilities: &ClassProbabilities,
        label: &mut Label,
    ) -> MulticlassClass {
        let decided = probabilities
            .is_valid()
            .then(|| probabilities.top())
            .flatten()
            .filter(|(_, margin)| *margin >= self.ambiguity_margin)
            .and_then(|(class, _)| MulticlassClass::from_name(class));

        decided.unwrap_or_else(|| {
            label.annotate(Annotation::AmbiguousClassification);
            MulticlassClass::Unknown
        })
    }
}

/// Classify with the built-in models and an explicit mode.
pub fn classify(vectors: &[FeatureVector], mode: ClassifierMode) -> Vec<Label> {
    ArtifactClassifier {
        predictors: Predictors::default(),
        ambiguity_margin: ClassifierConfig::default().ambiguity_margin,
    }
    .classify(vectors, mode)
}
