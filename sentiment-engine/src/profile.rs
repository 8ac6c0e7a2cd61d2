use chrono::{DateTime, Utc};
use sentiscan_core::Post;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileCounts {
    pub retweets: usize,
    pub replies: usize,
    pub originals: usize,
}

/// Post ages in whole days, per kind, in timeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileAges {
    pub retweets: Vec<i64>,
    pub replies: Vec<i64>,
    pub originals: Vec<i64>,
}

/// Activity breakdown of one timeline. A retweet that is also a reply counts
/// as a retweet. Hashtags are counted over original posts only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineProfile {
    pub counts: ProfileCounts,
    pub ages: ProfileAges,
    pub hashtags: BTreeMap<String, usize>,
}

impl TimelineProfile {
    pub fn from_timeline(posts: &[Post], now: DateTime<Utc>) -> Self {
        let mut profile = Self::default();
        for post in posts {
            let age = post.age_in_days(now);
            if post.is_retweet() {
                profile.counts.retweets += 1;
                profile.ages.retweets.push(age);
            } else if post.is_reply() {
                profile.counts.replies += 1;
                profile.ages.replies.push(age);
            } else {
                profile.counts.originals += 1;
                profile.ages.originals.push(age);
                for tag in &post.hashtags {
                    *profile.hashtags.entry(tag.clone()).or_default() += 1;
                }
            }
        }
        profile
    }

    pub fn total(&self) -> usize {
        self.counts.retweets + self.counts.replies + self.counts.originals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sentiscan_core::{AuthorId, PostRef};

    #[test]
    fn test_profile_breakdown() {
        let now = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
        let base = Post {
            id: "1".to_string(),
            author_id: AuthorId::new("a"),
            created_at: now - Duration::days(2),
            text: String::new(),
            in_reply_to_id: None,
            retweeted_from: None,
            hashtags: ["corona".to_string(), "home".to_string()].into_iter().collect(),
        };
        let mut second = base.clone();
        second.created_at = now - Duration::days(5);
        second.hashtags = ["corona".to_string()].into_iter().collect();
        let mut reply = base.clone();
        reply.in_reply_to_id = Some("0".to_string());
        let mut retweet_reply = reply.clone();
        retweet_reply.retweeted_from = Some(PostRef {
            id: "9".to_string(),
            author_id: AuthorId::new("b"),
        });

        let profile = TimelineProfile::from_timeline(&[base, second, reply, retweet_reply], now);

        assert_eq!(
            profile.counts,
            ProfileCounts {
                retweets: 1,
                replies: 1,
                originals: 2
            }
        );
        assert_eq!(profile.ages.originals, vec![2, 5]);
        assert_eq!(profile.hashtags["corona"], 2);
        assert_eq!(profile.hashtags["home"], 1);
        assert_eq!(profile.total(), 4);
    }
}
