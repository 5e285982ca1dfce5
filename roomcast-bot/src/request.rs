//! Play requests
//!
//! One piece of media a user has asked to be played, with its resolution
//! state and vote-derived rating. Created on submission, resolved before
//! queuing, mutated by votes while queued or playing, and destroyed on
//! dequeue-to-play, explicit removal, or vote-out.

use crate::resolver::{MediaResolver, ResolveError};
use chrono::{DateTime, Utc};
use roomcast_common::human_time;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// What the requester handed us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSource {
    /// Free-text search terms
    Search(String),
    /// A page URL to run through the extractor
    Page(String),
    /// A raw media URL played as-is
    Direct(String),
}

impl RequestSource {
    /// The original reference as the requester typed it
    pub fn original(&self) -> &str {
        match self {
            RequestSource::Search(terms) => terms,
            RequestSource::Page(url) | RequestSource::Direct(url) => url,
        }
    }
}

/// One queued (or playing) request
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub id: Uuid,
    pub sender: String,
    pub source: RequestSource,
    /// Resolved playable location; None until resolution succeeds
    pub media_uri: Option<String>,
    pub title: String,
    /// Seconds; 0 means unknown
    pub duration_secs: u64,
    pub is_live: bool,
    pub source_site: String,
    /// Why the last resolution failed, if it did
    pub error: Option<String>,
    /// Resolution succeeded and the request may be queued/played
    pub ready: bool,
    pub requested_at: DateTime<Utc>,

    votes: HashMap<String, i8>,
    rating: i64,
    last_resolved_at: Option<Instant>,
}

impl PlayRequest {
    pub fn new(sender: impl Into<String>, source: RequestSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            source,
            media_uri: None,
            title: String::new(),
            duration_secs: 0,
            is_live: false,
            source_site: String::new(),
            error: None,
            ready: false,
            requested_at: Utc::now(),
            votes: HashMap::new(),
            rating: 0,
            last_resolved_at: None,
        }
    }

    /// Resolve (or re-resolve) the playable media location.
    ///
    /// On failure `error` is set, `ready` stays false, and the request must
    /// not be queued; a stale re-resolution failure at the head of the queue
    /// is reported as a playback error by the scheduler.
    pub fn resolve(&mut self, resolver: &dyn MediaResolver) -> Result<(), ResolveError> {
        match resolver.resolve(&self.source) {
            Ok(info) => {
                debug!("resolved '{}' to {}", self.source.original(), info.media_url);
                self.media_uri = Some(info.media_url);
                self.title = info.title;
                self.duration_secs = info.duration_secs;
                self.is_live = info.is_live;
                self.source_site = info.source_site;
                self.error = None;
                self.ready = true;
                self.last_resolved_at = Some(Instant::now());
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                self.ready = false;
                Err(e)
            }
        }
    }

    /// Apply an upvote. Rejected (false, no mutation) when the sender's
    /// stored vote is already positive.
    pub fn upvote(&mut self, sender: &str) -> bool {
        self.apply_vote(sender, 1)
    }

    /// Apply a downvote. Rejected when the stored vote is already negative.
    pub fn downvote(&mut self, sender: &str) -> bool {
        self.apply_vote(sender, -1)
    }

    fn apply_vote(&mut self, sender: &str, vote: i8) -> bool {
        let current = self.votes.get(sender).copied().unwrap_or(0);
        if current == vote {
            return false;
        }
        self.votes.insert(sender.to_string(), vote);
        self.rating = self.votes.values().map(|v| *v as i64).sum();
        true
    }

    /// Current vote-derived rating (always the sum of stored votes)
    pub fn rating(&self) -> i64 {
        self.rating
    }

    /// Whether the resolved media location has outlived the configured age.
    ///
    /// Only page-sourced requests go stale; direct URLs and search results
    /// are played with whatever resolution produced them.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        if !matches!(self.source, RequestSource::Page(_)) {
            return false;
        }
        match self.last_resolved_at {
            Some(at) => at.elapsed() > max_age,
            None => false,
        }
    }

    /// `LIVE`, `~`, or clock-format duration for announcements
    pub fn duration_label(&self) -> String {
        human_time::duration_label(self.duration_secs, self.is_live)
    }

    #[cfg(test)]
    pub(crate) fn set_resolved_at(&mut self, at: Instant) {
        self.last_resolved_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MediaInfo;

    struct FixedResolver(Result<MediaInfo, ()>);

    impl MediaResolver for FixedResolver {
        fn resolve(&self, _source: &RequestSource) -> Result<MediaInfo, ResolveError> {
            match &self.0 {
                Ok(info) => Ok(info.clone()),
                Err(()) => Err(ResolveError::NoPlayableMedia),
            }
        }
    }

    fn media_info() -> MediaInfo {
        MediaInfo {
            media_url: "https://cdn.example.com/v.mp4".into(),
            title: "A Title".into(),
            duration_secs: 120,
            is_live: false,
            source_site: "example.com".into(),
        }
    }

    fn resolved_request() -> PlayRequest {
        let mut request = PlayRequest::new("alice", RequestSource::Page("https://example.com/v".into()));
        request.resolve(&FixedResolver(Ok(media_info()))).unwrap();
        request
    }

    #[test]
    fn test_resolve_success_populates_request() {
        let request = resolved_request();
        assert!(request.ready);
        assert_eq!(request.media_uri.as_deref(), Some("https://cdn.example.com/v.mp4"));
        assert_eq!(request.title, "A Title");
        assert_eq!(request.duration_label(), "2:00");
        assert!(request.error.is_none());
    }

    #[test]
    fn test_resolve_failure_keeps_request_unready() {
        let mut request = PlayRequest::new("alice", RequestSource::Page("https://example.com/v".into()));
        assert!(request.resolve(&FixedResolver(Err(()))).is_err());
        assert!(!request.ready);
        assert!(request.error.is_some());
        assert!(request.media_uri.is_none());
    }

    #[test]
    fn test_same_signed_vote_rejected() {
        let mut request = resolved_request();

        assert!(request.upvote("bob"));
        assert_eq!(request.rating(), 1);
        assert!(!request.upvote("bob"));
        assert_eq!(request.rating(), 1);

        assert!(request.downvote("bob"));
        assert_eq!(request.rating(), -1);
        assert!(!request.downvote("bob"));
        assert_eq!(request.rating(), -1);
    }

    #[test]
    fn test_rating_is_sum_of_votes() {
        let mut request = resolved_request();

        assert!(request.upvote("a"));
        assert!(request.upvote("b"));
        assert!(request.upvote("c"));
        assert_eq!(request.rating(), 3);

        // a fourth voter who never voted pulls it back down
        assert!(request.downvote("d"));
        assert_eq!(request.rating(), 2);

        let sum: i64 = [("a", 1), ("b", 1), ("c", 1), ("d", -1)]
            .iter()
            .map(|(_, v)| *v as i64)
            .sum();
        assert_eq!(request.rating(), sum);
    }

    #[test]
    fn test_alternating_votes_allowed() {
        let mut request = resolved_request();

        assert!(request.upvote("bob"));
        assert!(request.downvote("bob"));
        assert!(request.upvote("bob"));
        assert_eq!(request.rating(), 1);
    }

    #[test]
    fn test_staleness_only_for_page_sources() {
        let max_age = Duration::from_secs(60);

        let mut page = resolved_request();
        page.set_resolved_at(Instant::now() - Duration::from_secs(120));
        assert!(page.is_stale(max_age));

        page.set_resolved_at(Instant::now());
        assert!(!page.is_stale(max_age));

        let mut direct =
            PlayRequest::new("alice", RequestSource::Direct("https://example.com/v.mp4".into()));
        direct.resolve(&FixedResolver(Ok(media_info()))).unwrap();
        direct.set_resolved_at(Instant::now() - Duration::from_secs(120));
        assert!(!direct.is_stale(max_age));
    }
}
