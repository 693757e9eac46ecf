//! Round-robin serving of materialized frames.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Error;
use crate::materialize::{MaterializeObserver, StatusHandle};

/// A stored frame: its 1-based sequence number and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub index: u32,
    pub location: PathBuf,
}

/// A looping cursor over the frames of one materialization run.
///
/// Register it as a [`MaterializeObserver`] of the run whose
/// [`StatusHandle`] it was created with. Nothing is served until that run
/// has finished.
#[derive(Debug)]
pub struct ReplacementQueue {
    records: Mutex<VecDeque<FrameRecord>>,
    status: StatusHandle,
}

impl ReplacementQueue {
    pub fn new(status: StatusHandle) -> Self {
        ReplacementQueue {
            records: Mutex::new(VecDeque::new()),
            status,
        }
    }

    pub fn push(&self, record: FrameRecord) {
        self.records.lock().push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Whether [`request_next`](Self::request_next) can serve frames.
    pub fn is_available(&self) -> bool {
        self.status.is_finished() && !self.is_empty()
    }

    /// Rotate the queue by one and return the record that was at the head.
    pub fn next_record(&self) -> Option<FrameRecord> {
        if !self.status.is_finished() {
            return None;
        }
        let mut records = self.records.lock();
        let record = records.pop_front()?;
        records.push_back(record.clone());
        Some(record)
    }

    /// Bytes of the next frame in the rotation, or `None` while decoding is
    /// unfinished or when the stored frame cannot be read.
    pub fn request_next(&self) -> Option<Vec<u8>> {
        let record = self.next_record()?;
        match read_record(&record) {
            Ok(bytes) => {
                log::debug!("serving frame {}", record.index);
                Some(bytes)
            }
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }

    /// Drop every record, e.g. before the backing files are removed.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

fn read_record(record: &FrameRecord) -> Result<Vec<u8>, Error> {
    fs::read(&record.location).map_err(|source| Error::StorageRead {
        path: record.location.clone(),
        source,
    })
}

impl MaterializeObserver for ReplacementQueue {
    fn on_frame_stored(&self, index: u32, path: &Path) {
        self.push(FrameRecord {
            index,
            location: path.to_path_buf(),
        });
    }
}
