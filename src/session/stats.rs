use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::utils::format_minutes_seconds;

/// Counters for one reading session
///
/// Durations come from the tokio clock so paused-time tests see the
/// simulated session length; `started_at` is the wall-clock start for
/// reports.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub user: String,
    pub started_at: DateTime<Local>,
    pub target_minutes: u64,
    pub successes: u64,
    pub failures: u64,
    pub breaks: u32,
    pub break_time: Duration,
    started: Instant,
    finished: Option<Instant>,
    book_ids: Vec<String>,
    book_names: Vec<String>,
    chapters: HashSet<String>,
    latencies: Vec<Duration>,
}

impl SessionStats {
    pub fn new(user: impl Into<String>, target_minutes: u64) -> Self {
        Self::starting_at(user, target_minutes, Instant::now())
    }

    pub fn starting_at(user: impl Into<String>, target_minutes: u64, started: Instant) -> Self {
        Self {
            user: user.into(),
            started_at: Local::now(),
            target_minutes,
            successes: 0,
            failures: 0,
            breaks: 0,
            break_time: Duration::ZERO,
            started,
            finished: None,
            book_ids: Vec::new(),
            book_names: Vec::new(),
            chapters: HashSet::new(),
            latencies: Vec::new(),
        }
    }

    pub fn target(&self) -> Duration {
        Duration::from_secs(self.target_minutes * 60)
    }

    /// Count a successful read of `chapter_id` in `book_id`
    pub fn record_success(&mut self, book_id: &str, book_name: &str, chapter_id: &str) {
        self.successes += 1;
        if !self.book_ids.iter().any(|id| id == book_id) {
            self.book_ids.push(book_id.to_string());
        }
        if !book_name.is_empty() && !self.book_names.iter().any(|n| n == book_name) {
            self.book_names.push(book_name.to_string());
        }
        self.chapters.insert(chapter_id.to_string());
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_break(&mut self, duration: Duration) {
        self.breaks += 1;
        self.break_time += duration;
    }

    pub fn record_latency(&mut self, latency: Duration) {
        self.latencies.push(latency);
    }

    /// Stamp the end of the session; later calls keep the first stamp
    pub fn finish(&mut self) {
        self.finish_at(Instant::now());
    }

    pub fn finish_at(&mut self, at: Instant) {
        self.finished.get_or_insert(at);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Time since the session started, up to its end once finished
    pub fn elapsed(&self) -> Duration {
        self.finished
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started)
    }

    pub fn attempts(&self) -> u64 {
        self.successes + self.failures
    }

    /// Successful reads as a percentage of all reads, 0 when nothing ran
    pub fn success_rate(&self) -> f64 {
        match self.attempts() {
            0 => 0.0,
            total => self.successes as f64 / total as f64 * 100.0,
        }
    }

    pub fn average_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        self.latencies.iter().sum::<Duration>() / self.latencies.len() as u32
    }

    pub fn books_read(&self) -> usize {
        self.book_ids.len()
    }

    pub fn book_names(&self) -> &[String] {
        &self.book_names
    }

    pub fn chapters_read(&self) -> usize {
        self.chapters.len()
    }

    /// Human-readable report sent at the end of a session
    pub fn summary(&self) -> String {
        let books = if self.book_names.is_empty() {
            "no titles".to_string()
        } else {
            self.book_names.join(", ")
        };
        format!(
            "WeRead reading report\n\
             User: {user}\n\
             Started: {started}\n\
             Read for: {actual}\n\
             Target: {target} min\n\
             Successful reads: {ok}\n\
             Failed reads: {failed}\n\
             Success rate: {rate:.1}%\n\
             Books: {book_count} ({books})\n\
             Chapters: {chapters}\n\
             Breaks: {breaks} ({break_secs}s total)\n\
             Average response: {latency:.2}s",
            user = self.user,
            started = self.started_at.format("%Y-%m-%d %H:%M:%S"),
            actual = format_minutes_seconds(self.elapsed().as_secs()),
            target = self.target_minutes,
            ok = self.successes,
            failed = self.failures,
            rate = self.success_rate(),
            book_count = self.books_read(),
            chapters = self.chapters_read(),
            breaks = self.breaks,
            break_secs = self.break_time.as_secs(),
            latency = self.average_latency().as_secs_f64(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_books_and_chapters_deduplicated() {
        let mut stats = SessionStats::new("alice", 60);
        stats.record_success("b1", "Book One", "c1");
        stats.record_success("b1", "Book One", "c1");
        stats.record_success("b1", "Book One", "c2");
        stats.record_success("b2", "Book Two", "c3");

        assert_eq!(stats.successes, 4);
        assert_eq!(stats.books_read(), 2);
        assert_eq!(stats.chapters_read(), 3);
        assert_eq!(stats.book_names(), ["Book One", "Book Two"]);
    }

    #[test]
    fn test_success_rate() {
        let mut stats = SessionStats::new("bob", 1);
        assert_eq!(stats.success_rate(), 0.0);

        stats.record_success("b", "B", "c");
        stats.record_success("b", "B", "c");
        stats.record_success("b", "B", "c");
        stats.record_failure();
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_average_latency() {
        let mut stats = SessionStats::new("carol", 1);
        assert_eq!(stats.average_latency(), Duration::ZERO);
        stats.record_latency(Duration::from_millis(100));
        stats.record_latency(Duration::from_millis(300));
        assert_eq!(stats.average_latency(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_stops_at_finish() {
        let mut stats = SessionStats::new("dave", 1);
        tokio::time::advance(Duration::from_secs(90)).await;
        stats.finish();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(stats.elapsed(), Duration::from_secs(90));
        stats.finish();
        assert_eq!(stats.elapsed(), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_contents() {
        let mut stats = SessionStats::new("erin", 65);
        stats.record_success("b1", "Dream of the Red Chamber", "c1");
        stats.record_failure();
        stats.record_break(Duration::from_secs(15));
        stats.record_latency(Duration::from_millis(250));
        tokio::time::advance(Duration::from_secs(125)).await;
        stats.finish();

        let summary = stats.summary();
        assert!(summary.contains("User: erin"));
        assert!(summary.contains("Read for: 2m 5s"));
        assert!(summary.contains("Target: 65 min"));
        assert!(summary.contains("Success rate: 50.0%"));
        assert!(summary.contains("Books: 1 (Dream of the Red Chamber)"));
        assert!(summary.contains("Breaks: 1 (15s total)"));
        assert!(summary.contains("Average response: 0.25s"));
    }
}
