use chrono::{DateTime, Utc};

use crate::payload::GeneratedImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    pub image: GeneratedImage,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn download_name(&self) -> String {
        format!("roof-sketch-{}.{}", self.id, self.image.extension())
    }
}

/// Session-scoped list of successful sketches, most recent first.
///
/// Entries are never mutated or evicted. Ids derive from the creation time in
/// milliseconds and are bumped past the previous id so two sketches finished
/// within the same millisecond still get distinct ids.
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    entries: Vec<HistoryEntry>,
    last_id: i64,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, image: GeneratedImage) -> &HistoryEntry {
        self.record_at(image, Utc::now())
    }

    pub fn record_at(&mut self, image: GeneratedImage, created_at: DateTime<Utc>) -> &HistoryEntry {
        let stamp = created_at.timestamp_millis().max(self.last_id + 1);
        self.last_id = stamp;
        self.entries.insert(
            0,
            HistoryEntry {
                id: stamp.to_string(),
                image,
                created_at,
            },
        );
        &self.entries[0]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.first()
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::SessionHistory;
    use crate::payload::GeneratedImage;

    fn sketch(tag: &str) -> GeneratedImage {
        GeneratedImage {
            data: tag.to_string(),
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn newest_entry_comes_first() {
        let mut history = SessionHistory::new();
        history.record(sketch("one"));
        history.record(sketch("two"));
        history.record(sketch("three"));

        let order = history
            .entries()
            .iter()
            .map(|entry| entry.image.data.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["three", "two", "one"]);
        assert_eq!(history.latest().map(|entry| entry.image.data.as_str()), Some("three"));
    }

    #[test]
    fn ids_stay_distinct_within_one_millisecond() {
        let mut history = SessionHistory::new();
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let first = history.record_at(sketch("a"), at).id.clone();
        let second = history.record_at(sketch("b"), at).id.clone();
        let third = history.record_at(sketch("c"), at).id.clone();

        assert_eq!(first, "1700000000000");
        assert_eq!(second, "1700000000001");
        assert_eq!(third, "1700000000002");
        assert_eq!(history.get(&second).map(|entry| entry.image.data.as_str()), Some("b"));
    }

    #[test]
    fn download_name_uses_entry_id() {
        let mut history = SessionHistory::new();
        let at = Utc.timestamp_millis_opt(42).unwrap();
        let entry = history.record_at(sketch("a"), at);
        assert_eq!(entry.download_name(), "roof-sketch-42.png");
    }
}
