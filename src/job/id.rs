use std::{
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::utils::now_utc;

/// Allocates `task_<unix secs>_<worker>_<seq>` ids.
///
/// The worker part keeps ids of different processes apart, the sequence keeps ids
/// issued within the same second apart. The sequence starts at the sub-second clock
/// so a restart within the same second does not reissue an id.
#[derive(Debug)]
pub struct JobIdGenerator {
    worker: String,
    seq: AtomicU64,
}

/// ASCII alphanumerics are kept, every other byte becomes `-` plus two hex digits.
/// `-` only ever starts an escape, so distinct labels stay distinct.
fn encode_worker(label: &str) -> String {
    let mut encoded = String::with_capacity(label.len());
    for byte in label.bytes() {
        if byte.is_ascii_alphanumeric() {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "-{byte:02x}");
        }
    }
    encoded
}

impl JobIdGenerator {
    pub fn new(worker: impl AsRef<str>) -> Self {
        Self::with_seed(worker, u64::from(now_utc().nanosecond()))
    }

    fn with_seed(worker: impl AsRef<str>, seed: u64) -> Self {
        Self {
            worker: encode_worker(worker.as_ref()),
            seq: AtomicU64::new(seed),
        }
    }

    pub fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("task_{}_{}_{}", now_utc().unix_timestamp(), self.worker, seq)
    }
}
