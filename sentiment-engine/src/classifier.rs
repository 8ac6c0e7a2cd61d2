use sentiscan_core::{AnalyzeSentimentConfig, CoreError, SentimentLabel};

/// Polarity thresholds for "extreme" labels. A post is extremely positive when
/// its polarity is strictly above `pos`, extremely negative when strictly below
/// `-neg`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtremeBoundaries {
    pub pos: f64,
    pub neg: f64,
}

impl ExtremeBoundaries {
    pub fn new(pos: f64, neg: f64) -> Self {
        Self { pos, neg }
    }

    pub fn from_config(config: &AnalyzeSentimentConfig) -> Self {
        Self::new(config.pos_boundary, config.neg_boundary)
    }

    /// Unscorable text is neutral.
    pub fn label(&self, polarity: Option<f64>) -> SentimentLabel {
        match polarity {
            Some(p) if p > self.pos => SentimentLabel::Pos,
            Some(p) if p < -self.neg => SentimentLabel::Neg,
            _ => SentimentLabel::Neut,
        }
    }
}

/// A sentiment model. `name` identifies the model in the on-disk cache, so two
/// classifiers must never share one.
pub trait Classifier {
    fn name(&self) -> &str;

    /// Polarity in `[-1, 1]`, or `None` when the text carries no signal.
    async fn get_polarity(&self, text: &str) -> Result<Option<f64>, CoreError>;

    async fn get_label(&self, text: &str) -> Result<SentimentLabel, CoreError> {
        let polarity = self.get_polarity(text).await?;
        Ok(ExtremeBoundaries::new(0.0, 0.0).label(polarity))
    }

    async fn get_labels_batch(&self, texts: &[String]) -> Result<Vec<SentimentLabel>, CoreError> {
        let mut labels = Vec::with_capacity(texts.len());
        for text in texts {
            labels.push(self.get_label(text).await?);
        }
        Ok(labels)
    }

    /// One label per text, in order: `Pos`/`Neg` only for clear cases.
    async fn extreme_labels(
        &self,
        texts: &[String],
        boundaries: ExtremeBoundaries,
    ) -> Result<Vec<SentimentLabel>, CoreError> {
        let mut labels = Vec::with_capacity(texts.len());
        for text in texts {
            labels.push(boundaries.label(self.get_polarity(text).await?));
        }
        Ok(labels)
    }
}
