//! Per-resource progress state
//!
//! The model is owned by a single writer (the pipeline task); renderers only
//! ever see [`ProgressSnapshot`] copies.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::classifier::{ClassifiedLine, LineCategory};

/// Lifecycle status of a resource operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl ResourceStatus {
    pub const ALL: [ResourceStatus; 4] = [
        ResourceStatus::Pending,
        ResourceStatus::Running,
        ResourceStatus::Done,
        ResourceStatus::Failed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Running => "running",
            ResourceStatus::Done => "done",
            ResourceStatus::Failed => "failed",
        }
    }
}

/// State of one resource address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: String,
    pub status: ResourceStatus,
    pub started_at: Instant,
    pub last_updated_at: Instant,
    /// Lower-cased verb of the current operation (`creating`, `destroying`)
    pub verb: Option<String>,
    /// Last elapsed time reported by the tool itself
    pub reported_elapsed: Option<String>,
}

impl ResourceRecord {
    fn new(id: &str, status: ResourceStatus, now: Instant, verb: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            status,
            started_at: now,
            last_updated_at: now,
            verb: verb.map(str::to_lowercase),
            reported_elapsed: None,
        }
    }

    /// Time since the current operation started
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

/// Point-in-time copy of the model
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Every status is present, zero when unused
    pub counts: BTreeMap<ResourceStatus, usize>,
    /// Running records in insertion order
    pub active: Vec<ResourceRecord>,
    /// Failed records in insertion order
    pub failed: Vec<ResourceRecord>,
    pub elapsed: Duration,
    pub total_lines: usize,
    /// Last section footer seen (`Apply complete! ...`)
    pub footer: Option<String>,
    pub taken_at: Instant,
}

impl ProgressSnapshot {
    pub fn count(&self, status: ResourceStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total_resources(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Mutable state machine keyed by resource id
#[derive(Debug)]
pub struct ProgressModel {
    started_at: Instant,
    records: Vec<ResourceRecord>,
    index: HashMap<String, usize>,
    total_lines: usize,
    footer: Option<String>,
}

impl ProgressModel {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(started_at: Instant) -> Self {
        Self {
            started_at,
            records: Vec::new(),
            index: HashMap::new(),
            total_lines: 0,
            footer: None,
        }
    }

    /// Apply a classified line; returns whether any record changed
    pub fn apply(&mut self, event: &ClassifiedLine) -> bool {
        self.apply_at(event, Instant::now())
    }

    pub fn apply_at(&mut self, event: &ClassifiedLine, now: Instant) -> bool {
        self.total_lines += 1;

        match event.category {
            LineCategory::SectionFooter => {
                self.footer = Some(event.plain_text.trim().to_string());
                return false;
            }
            LineCategory::Plain | LineCategory::Noise => return false,
            _ => {}
        }

        let Some(id) = event.resource_id.as_deref() else {
            tracing::trace!("Resource event without resource id: {}", event.plain_text);
            return false;
        };
        let verb = event.verb();

        match event.category {
            LineCategory::ResourceStart => match self.get_mut(id) {
                Some(record) if record.status == ResourceStatus::Failed => false,
                Some(record) => {
                    record.status = ResourceStatus::Running;
                    record.started_at = now;
                    record.last_updated_at = now;
                    record.verb = verb.map(str::to_lowercase);
                    record.reported_elapsed = None;
                    true
                }
                None => {
                    self.insert(ResourceRecord::new(id, ResourceStatus::Running, now, verb));
                    true
                }
            },
            LineCategory::ResourceProgress => {
                let elapsed = event.duration().map(str::to_string);
                match self.get_mut(id) {
                    Some(record) => {
                        record.last_updated_at = now;
                        if elapsed.is_some() {
                            record.reported_elapsed = elapsed;
                        }
                        if record.status == ResourceStatus::Running && verb.is_some() {
                            record.verb = verb.map(str::to_lowercase);
                        }
                    }
                    None => {
                        tracing::debug!("Progress for unseen resource {}", id);
                        let mut record =
                            ResourceRecord::new(id, ResourceStatus::Running, now, verb);
                        record.reported_elapsed = elapsed;
                        self.insert(record);
                    }
                }
                true
            }
            LineCategory::ResourceComplete => self.finish(id, ResourceStatus::Done, now, verb),
            LineCategory::ResourceError => self.finish(id, ResourceStatus::Failed, now, verb),
            _ => false,
        }
    }

    fn finish(&mut self, id: &str, status: ResourceStatus, now: Instant, verb: Option<&str>) -> bool {
        match self.get_mut(id) {
            Some(record) if record.status == ResourceStatus::Failed => false,
            Some(record) => {
                record.status = status;
                record.last_updated_at = now;
                true
            }
            None => {
                self.insert(ResourceRecord::new(id, status, now, verb));
                true
            }
        }
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ResourceRecord> {
        let position = *self.index.get(id)?;
        self.records.get_mut(position)
    }

    fn insert(&mut self, record: ResourceRecord) {
        self.index.insert(record.id.clone(), self.records.len());
        self.records.push(record);
    }

    pub fn record(&self, id: &str) -> Option<&ResourceRecord> {
        self.index.get(id).and_then(|&position| self.records.get(position))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> ProgressSnapshot {
        let mut counts: BTreeMap<ResourceStatus, usize> =
            ResourceStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for record in &self.records {
            *counts.entry(record.status).or_insert(0) += 1;
        }

        let by_status = |status: ResourceStatus| -> Vec<ResourceRecord> {
            self.records
                .iter()
                .filter(|record| record.status == status)
                .cloned()
                .collect()
        };

        ProgressSnapshot {
            counts,
            active: by_status(ResourceStatus::Running),
            failed: by_status(ResourceStatus::Failed),
            elapsed: now.saturating_duration_since(self.started_at),
            total_lines: self.total_lines,
            footer: self.footer.clone(),
            taken_at: now,
        }
    }
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::classifier::LineClassifier;

    fn feed(model: &mut ProgressModel, lines: &[&str]) {
        let classifier = LineClassifier::terraform();
        for line in lines {
            model.apply(&classifier.classify(line));
        }
    }

    fn status_of(model: &ProgressModel, id: &str) -> Option<ResourceStatus> {
        model.record(id).map(|record| record.status)
    }

    #[test]
    fn test_start_then_complete() {
        let mut model = ProgressModel::new();
        let classifier = LineClassifier::terraform();

        assert!(model.apply(&classifier.classify("aws_instance.web: Creating...")));
        assert_eq!(status_of(&model, "aws_instance.web"), Some(ResourceStatus::Running));
        assert_eq!(
            model.record("aws_instance.web").unwrap().verb.as_deref(),
            Some("creating")
        );

        assert!(model.apply(
            &classifier.classify("aws_instance.web: Creation complete after 3s [id=i-1]")
        ));
        assert_eq!(status_of(&model, "aws_instance.web"), Some(ResourceStatus::Done));
    }

    #[test]
    fn test_progress_updates_timestamp_not_status() {
        let start = Instant::now();
        let later = start + Duration::from_secs(10);
        let classifier = LineClassifier::terraform();
        let mut model = ProgressModel::starting_at(start);

        model.apply_at(&classifier.classify("aws_instance.web: Creating..."), start);
        let changed = model.apply_at(
            &classifier.classify("aws_instance.web: Still creating... [10s elapsed]"),
            later,
        );

        let record = model.record("aws_instance.web").unwrap();
        assert!(changed);
        assert_eq!(record.status, ResourceStatus::Running);
        assert_eq!(record.started_at, start);
        assert_eq!(record.last_updated_at, later);
        assert_eq!(record.reported_elapsed.as_deref(), Some("10s"));
    }

    #[test]
    fn test_progress_before_start_synthesizes_running_record() {
        let mut model = ProgressModel::new();
        feed(&mut model, &["aws_instance.web: Still creating... [20s elapsed]"]);
        assert_eq!(status_of(&model, "aws_instance.web"), Some(ResourceStatus::Running));
    }

    #[test]
    fn test_terminal_events_for_unknown_ids_keep_counts_consistent() {
        let mut model = ProgressModel::new();
        feed(
            &mut model,
            &[
                "aws_instance.a: Creation complete after 1s [id=i-a]",
                "aws_instance.b: Creation errored after 2s",
                "│   with aws_instance.c,",
            ],
        );

        let snapshot = model.snapshot();
        assert_eq!(snapshot.total_resources(), model.len());
        assert_eq!(snapshot.count(ResourceStatus::Done), 1);
        assert_eq!(snapshot.count(ResourceStatus::Failed), 2);
        assert_eq!(snapshot.failed.len(), 2);
    }

    #[test]
    fn test_failure_is_sticky() {
        let mut model = ProgressModel::new();
        let classifier = LineClassifier::terraform();
        feed(
            &mut model,
            &[
                "aws_instance.web: Creating...",
                "aws_instance.web: Creation errored after 4s",
            ],
        );

        for line in [
            "aws_instance.web: Creation complete after 5s [id=i-1]",
            "aws_instance.web: Creating...",
            "aws_instance.web: Still creating... [10s elapsed]",
        ] {
            model.apply(&classifier.classify(line));
            assert_eq!(status_of(&model, "aws_instance.web"), Some(ResourceStatus::Failed));
        }
    }

    #[test]
    fn test_completion_after_failure_reports_no_change() {
        let mut model = ProgressModel::new();
        let classifier = LineClassifier::terraform();
        feed(&mut model, &["aws_instance.web: Creation errored after 4s"]);
        assert!(!model.apply(
            &classifier.classify("aws_instance.web: Creation complete after 5s [id=i-1]")
        ));
    }

    #[test]
    fn test_new_start_reopens_completed_resource() {
        let mut model = ProgressModel::new();
        feed(
            &mut model,
            &[
                "aws_instance.web: Destroying... [id=i-old]",
                "aws_instance.web: Destruction complete after 8s",
                "aws_instance.web: Creating...",
            ],
        );

        let record = model.record("aws_instance.web").unwrap();
        assert_eq!(record.status, ResourceStatus::Running);
        assert_eq!(record.verb.as_deref(), Some("creating"));
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn test_scripted_transcript_counts() {
        let starts = 7;
        let completes = 4;
        let classifier = LineClassifier::terraform();
        let mut model = ProgressModel::new();
        let mut lines = Vec::new();

        for i in 0..starts {
            lines.push(format!("null_resource.r{i}: Creating..."));
            lines.push(format!("some plain chatter {i}"));
        }
        for i in 0..completes {
            lines.push(format!("null_resource.r{i}: Creation complete after 1s [id={i}]"));
        }

        for line in &lines {
            model.apply(&classifier.classify(line));
        }

        let snapshot = model.snapshot();
        assert_eq!(snapshot.count(ResourceStatus::Done), completes);
        assert_eq!(snapshot.count(ResourceStatus::Running), starts - completes);
        assert_eq!(snapshot.count(ResourceStatus::Failed), 0);
        assert_eq!(snapshot.total_lines, lines.len());
    }

    #[test]
    fn test_plain_noise_and_footer_do_not_change_state() {
        let mut model = ProgressModel::new();
        let classifier = LineClassifier::terraform();

        assert!(!model.apply(&classifier.classify("")));
        assert!(!model.apply(&classifier.classify("Outputs:")));
        assert!(!model.apply(
            &classifier.classify("Apply complete! Resources: 1 added, 0 changed, 0 destroyed.")
        ));

        let snapshot = model.snapshot();
        assert_eq!(snapshot.total_lines, 3);
        assert_eq!(snapshot.total_resources(), 0);
        assert_eq!(
            snapshot.footer.as_deref(),
            Some("Apply complete! Resources: 1 added, 0 changed, 0 destroyed.")
        );
    }

    #[test]
    fn test_active_keeps_insertion_order() {
        let mut model = ProgressModel::new();
        feed(
            &mut model,
            &[
                "aws_vpc.main: Creating...",
                "aws_subnet.a: Creating...",
                "aws_subnet.b: Creating...",
                "aws_subnet.a: Creation complete after 1s [id=s-a]",
                "aws_vpc.main: Still creating... [10s elapsed]",
            ],
        );

        let ids: Vec<_> = model
            .snapshot()
            .active
            .iter()
            .map(|record| record.id.clone())
            .collect();
        assert_eq!(ids, vec!["aws_vpc.main", "aws_subnet.b"]);
    }

    #[test]
    fn test_snapshot_has_every_status_key() {
        let snapshot = ProgressModel::new().snapshot();
        for status in ResourceStatus::ALL {
            assert_eq!(snapshot.count(status), 0);
            assert!(snapshot.counts.contains_key(&status));
        }
    }

    #[test]
    fn test_snapshot_elapsed() {
        let start = Instant::now();
        let model = ProgressModel::starting_at(start);
        let snapshot = model.snapshot_at(start + Duration::from_secs(90));
        assert_eq!(snapshot.elapsed, Duration::from_secs(90));
    }
}
