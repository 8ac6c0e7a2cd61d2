//! Word-list classifier. Reads SentiWS-style files:
//!
//! ```text
//! Abbau|NN	-0.058	Abbaus,Abbaues,Abbauen
//! ```
//!
//! Polarity is the mean weight of the matched words, with a word's sign
//! flipped when one of the three preceding tokens is a negation.

use crate::classifier::Classifier;
use sentiscan_core::{ClassifierError, CoreError};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const NEGATIONS: &[&str] = &[
    "nicht", "kein", "keine", "keinem", "keinen", "keiner", "keines", "nie", "niemals", "nichts",
    "weder", "not", "no", "never", "nothing", "neither",
];

const NEGATION_WINDOW: usize = 3;

const BUILTIN: &[(&str, f64)] = &[
    ("gut", 0.37),
    ("super", 0.9),
    ("toll", 0.8),
    ("schön", 0.6),
    ("liebe", 0.7),
    ("freude", 0.65),
    ("glücklich", 0.85),
    ("großartig", 0.95),
    ("danke", 0.5),
    ("schlecht", -0.77),
    ("hasse", -0.95),
    ("hass", -0.9),
    ("schrecklich", -0.9),
    ("traurig", -0.6),
    ("angst", -0.65),
    ("wut", -0.8),
    ("furchtbar", -0.85),
    ("katastrophe", -0.9),
    ("good", 0.4),
    ("great", 0.85),
    ("love", 0.75),
    ("happy", 0.8),
    ("bad", -0.7),
    ("hate", -0.95),
    ("awful", -0.9),
    ("sad", -0.6),
];

#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    name: String,
    weights: HashMap<String, f64>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl LexiconClassifier {
    pub fn builtin() -> Self {
        Self {
            name: "lexicon-builtin".to_string(),
            weights: BUILTIN
                .iter()
                .map(|(word, weight)| (word.to_string(), *weight))
                .collect(),
        }
    }

    /// Parses lexicon lines. Malformed lines are skipped.
    pub fn from_lines(name: impl Into<String>, contents: &str) -> Self {
        let mut weights = HashMap::new();
        for line in contents.lines() {
            let mut columns = line.split('\t');
            let (Some(head), Some(weight)) = (columns.next(), columns.next()) else {
                continue;
            };
            let Ok(weight) = weight.trim().parse::<f64>() else {
                continue;
            };
            let word = head.split('|').next().unwrap_or(head).trim();
            if word.is_empty() {
                continue;
            }

            weights.insert(word.to_lowercase(), weight);
            if let Some(inflections) = columns.next() {
                for form in inflections.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                    weights.insert(form.to_lowercase(), weight);
                }
            }
        }
        Self {
            name: name.into(),
            weights,
        }
    }

    /// Loads one or more lexicon files (e.g. the positive and negative halves
    /// of SentiWS). The classifier is named after the first file's stem.
    pub async fn load(paths: &[&Path]) -> Result<Self, CoreError> {
        let mut contents = String::new();
        for path in paths {
            let part = tokio::fs::read_to_string(path).await.map_err(|e| {
                debug!("Reading {} failed: {}", path.display(), e);
                ClassifierError::LexiconLoadFailed {
                    path: path.display().to_string(),
                }
            })?;
            contents.push_str(&part);
            contents.push('\n');
        }

        let stem = paths
            .first()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "lexicon".to_string());
        let classifier = Self::from_lines(format!("lexicon-{}", stem), &contents);
        if classifier.weights.is_empty() {
            return Err(ClassifierError::LexiconLoadFailed {
                path: paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into());
        }

        info!(
            "Loaded lexicon {} with {} entries",
            classifier.name,
            classifier.weights.len()
        );
        Ok(classifier)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn polarity(&self, text: &str) -> Option<f64> {
        let tokens = tokenize(text);
        let mut total = 0.0;
        let mut matched = 0usize;

        for (index, token) in tokens.iter().enumerate() {
            let Some(weight) = self.weights.get(token) else {
                continue;
            };
            let window = &tokens[index.saturating_sub(NEGATION_WINDOW)..index];
            let negated = window.iter().any(|t| NEGATIONS.contains(&t.as_str()));
            total += if negated { -weight } else { *weight };
            matched += 1;
        }

        (matched > 0).then(|| (total / matched as f64).clamp(-1.0, 1.0))
    }
}

impl Classifier for LexiconClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_polarity(&self, text: &str) -> Result<Option<f64>, CoreError> {
        Ok(self.polarity(text))
    }
}
