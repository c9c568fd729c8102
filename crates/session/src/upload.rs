use std::collections::HashSet;

use lectern_api::UploadFile;

/// Identifier for one upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadBatchId(pub u64);

impl UploadBatchId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Filenames the server has accepted during this session.
///
/// Membership only grows. Uniqueness is decided by name, never by content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadRecord {
    names: HashSet<String>,
}

impl UploadRecord {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Adds names; re-adding an existing name is a no-op. Returns how many were new.
    pub fn extend<I, S>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.names.len();
        self.names.extend(names.into_iter().map(Into::into));
        self.names.len() - before
    }

    /// Names in sorted order, for stable rendering.
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names = self.names.iter().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }
}

/// Candidate files split against the upload record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StagedFiles {
    /// Files not yet uploaded, in input order.
    pub accepted: Vec<UploadFile>,
    /// Files whose name is already recorded, in input order.
    pub duplicates: Vec<UploadFile>,
}

impl StagedFiles {
    pub fn accepted_names(&self) -> Vec<String> {
        self.accepted.iter().map(|file| file.name.clone()).collect()
    }

    pub fn duplicate_names(&self) -> Vec<String> {
        self.duplicates.iter().map(|file| file.name.clone()).collect()
    }

    pub fn is_all_duplicates(&self) -> bool {
        self.accepted.is_empty() && !self.duplicates.is_empty()
    }
}

/// Why a batch could not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    /// Another batch is still in flight.
    Busy { in_flight: UploadBatchId },
    /// Nothing left to send after deduplication.
    NothingToUpload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InFlightBatch {
    id: UploadBatchId,
    names: Vec<String>,
}

/// Deduplicates uploads by filename and tracks the single in-flight batch.
#[derive(Debug)]
pub struct UploadTracker {
    record: UploadRecord,
    in_flight: Option<InFlightBatch>,
    next_batch_id: u64,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self {
            record: UploadRecord::default(),
            in_flight: None,
            next_batch_id: 1,
        }
    }

    pub fn record(&self) -> &UploadRecord {
        &self.record
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight_batch(&self) -> Option<UploadBatchId> {
        self.in_flight.as_ref().map(|batch| batch.id)
    }

    /// Names of the batch currently uploading; empty when idle.
    pub fn in_progress(&self) -> &[String] {
        self.in_flight
            .as_ref()
            .map(|batch| batch.names.as_slice())
            .unwrap_or_default()
    }

    /// Splits candidates into accepted and duplicate files, preserving order.
    pub fn stage_files(&self, candidates: Vec<UploadFile>) -> StagedFiles {
        let (duplicates, accepted): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|file| self.record.contains(&file.name));
        StagedFiles {
            accepted,
            duplicates,
        }
    }

    /// Marks `files` as the in-flight batch.
    pub fn begin(&mut self, files: &[UploadFile]) -> Result<UploadBatchId, UploadRejection> {
        if let Some(batch) = &self.in_flight {
            return Err(UploadRejection::Busy {
                in_flight: batch.id,
            });
        }
        if files.is_empty() {
            return Err(UploadRejection::NothingToUpload);
        }

        let id = UploadBatchId::new(self.next_batch_id);
        self.next_batch_id = self.next_batch_id.saturating_add(1);
        self.in_flight = Some(InFlightBatch {
            id,
            names: files.iter().map(|file| file.name.clone()).collect(),
        });
        Ok(id)
    }

    /// Resolves the in-flight batch.
    ///
    /// On success every name joins the record; on failure the record is left
    /// untouched. Returns the batch's names, or `None` if `batch_id` is not the
    /// batch in flight.
    pub fn finish(&mut self, batch_id: UploadBatchId, succeeded: bool) -> Option<Vec<String>> {
        if self.in_flight_batch() != Some(batch_id) {
            return None;
        }
        let batch = self.in_flight.take()?;
        if succeeded {
            self.record.extend(batch.names.iter().cloned());
        }
        Some(batch.names)
    }

    /// Seeds the record with names the server already holds.
    pub fn record_existing<I, S>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.extend(names)
    }
}

impl Default for UploadTracker {
    fn default() -> Self {
        Self::new()
    }
}
