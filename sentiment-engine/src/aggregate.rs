use crate::bucket::{BucketKey, TimeBucketer};
use sentiscan_core::{Post, SentimentLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SENTINEL: f64 = -1.0;

/// Share of extreme posts in one bucket. `Empty` means no posts fell into the
/// bucket, which is not the same as a measured zero. On the wire `Empty` is the
/// `(-1, -1)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBucketStat", into = "RawBucketStat")]
pub enum BucketStat {
    Measured {
        extremely_pos_percentage: f64,
        extremely_neg_percentage: f64,
    },
    Empty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawBucketStat {
    extremely_pos_percentage: f64,
    extremely_neg_percentage: f64,
}

impl From<RawBucketStat> for BucketStat {
    fn from(raw: RawBucketStat) -> Self {
        if raw.extremely_pos_percentage < 0.0 || raw.extremely_neg_percentage < 0.0 {
            BucketStat::Empty
        } else {
            BucketStat::Measured {
                extremely_pos_percentage: raw.extremely_pos_percentage,
                extremely_neg_percentage: raw.extremely_neg_percentage,
            }
        }
    }
}

impl From<BucketStat> for RawBucketStat {
    fn from(stat: BucketStat) -> Self {
        let (pos, neg) = stat.as_pair();
        RawBucketStat {
            extremely_pos_percentage: pos,
            extremely_neg_percentage: neg,
        }
    }
}

impl BucketStat {
    /// `(pos, neg)` percentages, or the sentinel pair.
    pub fn as_pair(&self) -> (f64, f64) {
        match self {
            BucketStat::Measured {
                extremely_pos_percentage,
                extremely_neg_percentage,
            } => (*extremely_pos_percentage, *extremely_neg_percentage),
            BucketStat::Empty => (SENTINEL, SENTINEL),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BucketStat::Empty)
    }
}

pub type AuthorBuckets = BTreeMap<BucketKey, BucketStat>;

/// Per-bucket extreme-label percentages for one author. Every bucket of the
/// range is present; posts outside the range are ignored.
pub fn author_bucket_stats<'a>(
    labeled_posts: impl IntoIterator<Item = (&'a Post, SentimentLabel)>,
    bucketer: &TimeBucketer,
) -> AuthorBuckets {
    let mut counts: BTreeMap<BucketKey, (usize, usize, usize)> =
        bucketer.keys().into_iter().map(|key| (key, (0, 0, 0))).collect();

    for (post, label) in labeled_posts {
        let Some(key) = bucketer.bucket_of(post.created_at) else {
            continue;
        };
        let Some((total, pos, neg)) = counts.get_mut(&key) else {
            continue;
        };
        *total += 1;
        match label {
            SentimentLabel::Pos => *pos += 1,
            SentimentLabel::Neg => *neg += 1,
            SentimentLabel::Neut => {}
        }
    }

    counts
        .into_iter()
        .map(|(key, (total, pos, neg))| {
            let stat = if total == 0 {
                BucketStat::Empty
            } else {
                BucketStat::Measured {
                    extremely_pos_percentage: pos as f64 / total as f64 * 100.0,
                    extremely_neg_percentage: neg as f64 / total as f64 * 100.0,
                }
            };
            (key, stat)
        })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Population mean per bucket over the union of all authors' keys. Empty
/// buckets are left out of the mean; a bucket empty for every author stays
/// `Empty`.
pub fn summarize(authors: &[AuthorBuckets]) -> AuthorBuckets {
    let mut columns: BTreeMap<BucketKey, (Vec<f64>, Vec<f64>)> = BTreeMap::new();

    for buckets in authors {
        for (key, stat) in buckets {
            let (pos_values, neg_values) = columns.entry(*key).or_default();
            let (pos, neg) = stat.as_pair();
            if pos != SENTINEL {
                pos_values.push(pos);
            }
            if neg != SENTINEL {
                neg_values.push(neg);
            }
        }
    }

    columns
        .into_iter()
        .map(|(key, (pos_values, neg_values))| {
            let stat = match (mean(&pos_values), mean(&neg_values)) {
                (Some(pos), Some(neg)) => BucketStat::Measured {
                    extremely_pos_percentage: pos,
                    extremely_neg_percentage: neg,
                },
                _ => BucketStat::Empty,
            };
            (key, stat)
        })
        .collect()
}
