//! The unconfirmed-secret-message journal.
//!
//! Every outbound secret-chat message is recorded here *before* it is
//! encrypted and sent; the record is removed when the server confirms it.
//! On restart the journal is replayed with the original message ids so the
//! server can deduplicate.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const JOURNAL_MAGIC: u32 = 0x4a524e4c; // "JRNL"

/// One journaled outbound message: enough to rebuild the exact query.
#[derive(Clone, Debug, PartialEq)]
pub struct UnconfirmedMessage {
    /// The 64-bit random message id the server dedupes on.
    pub message_id: i64,
    /// Constructor of the query this blob belongs to
    /// (`messages.sendEncrypted` or `messages.sendEncryptedFile`).
    pub constructor: u32,
    pub date: i64,
    /// Serialized plaintext blobs: the layer envelope, plus the file-info
    /// tail for file messages.
    pub blobs: Vec<Vec<u8>>,
}

/// A per-chat append-mostly journal file.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Journal for one secret chat under `dir`.
    pub fn for_chat(dir: &Path, chat_id: i32) -> Self {
        Self { path: dir.join(format!("secret-{chat_id}.journal")) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record durably (written and flushed before returning).
    pub fn append(&self, message: &UnconfirmedMessage) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&encode_record(message))?;
        file.sync_data()
    }

    /// All surviving records, in write order.
    pub fn load(&self) -> io::Result<Vec<UnconfirmedMessage>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            match decode_record(&bytes[pos..]) {
                Some((record, used)) => {
                    records.push(record);
                    pos += used;
                }
                None => {
                    // torn tail from a crash mid-append; everything before
                    // it is intact
                    log::warn!("[journal] truncated record in {:?}, dropping tail", self.path);
                    break;
                }
            }
        }
        Ok(records)
    }

    /// Remove the record for `message_id`. Rewrites the file atomically.
    pub fn remove(&self, message_id: i64) -> io::Result<()> {
        let survivors: Vec<_> = self
            .load()?
            .into_iter()
            .filter(|m| m.message_id != message_id)
            .collect();

        if survivors.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            }
        }

        let tmp = self.path.with_extension("journal.tmp");
        let mut encoded = Vec::new();
        for record in &survivors {
            encoded.extend(encode_record(record));
        }
        fs::write(&tmp, &encoded)?;
        fs::rename(&tmp, &self.path)
    }

    /// Drop the whole journal (chat deleted).
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn encode_record(message: &UnconfirmedMessage) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(JOURNAL_MAGIC.to_le_bytes());
    out.extend(message.message_id.to_le_bytes());
    out.extend(message.constructor.to_le_bytes());
    out.extend(message.date.to_le_bytes());
    out.extend((message.blobs.len() as u32).to_le_bytes());
    for blob in &message.blobs {
        out.extend((blob.len() as u32).to_le_bytes());
        out.extend(blob);
    }
    out
}

struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

fn decode_record(bytes: &[u8]) -> Option<(UnconfirmedMessage, usize)> {
    let mut r = RecordReader { bytes, pos: 0 };

    if r.u32()? != JOURNAL_MAGIC {
        return None;
    }
    let message_id = r.i64()?;
    let constructor = r.u32()?;
    let date = r.i64()?;
    let blob_count = r.u32()? as usize;
    if blob_count > 16 {
        return None;
    }
    let mut blobs = Vec::with_capacity(blob_count);
    for _ in 0..blob_count {
        let len = r.u32()? as usize;
        blobs.push(r.take(len)?.to_vec());
    }
    Some((UnconfirmedMessage { message_id, constructor, date, blobs }, r.pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("courier-journal-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample(id: i64) -> UnconfirmedMessage {
        UnconfirmedMessage {
            message_id: id,
            constructor: 0xa9776773,
            date: 1_700_000_000,
            blobs: vec![vec![1, 2, 3, 4], vec![9; 40]],
        }
    }

    #[test]
    fn round_trips_across_reopen() {
        let dir = temp_dir("rt");
        let journal = Journal::for_chat(&dir, 42);
        journal.append(&sample(100)).unwrap();
        journal.append(&sample(200)).unwrap();

        // a fresh handle sees both records, in order
        let reopened = Journal::for_chat(&dir, 42);
        let records = reopened.load().unwrap();
        assert_eq!(records, vec![sample(100), sample(200)]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn remove_is_persistent_and_selective() {
        let dir = temp_dir("rm");
        let journal = Journal::for_chat(&dir, 7);
        journal.append(&sample(1)).unwrap();
        journal.append(&sample(2)).unwrap();
        journal.append(&sample(3)).unwrap();
        journal.remove(2).unwrap();

        let records = Journal::for_chat(&dir, 7).load().unwrap();
        assert_eq!(
            records.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![1, 3]
        );

        journal.remove(1).unwrap();
        journal.remove(3).unwrap();
        assert!(!journal.path().exists(), "empty journal file is removed");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = temp_dir("torn");
        let journal = Journal::for_chat(&dir, 9);
        journal.append(&sample(5)).unwrap();

        // simulate a crash mid-append
        let mut bytes = fs::read(journal.path()).unwrap();
        bytes.extend(encode_record(&sample(6))[..10].to_vec());
        fs::write(journal.path(), &bytes).unwrap();

        let records = journal.load().unwrap();
        assert_eq!(records, vec![sample(5)]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = temp_dir("missing");
        let journal = Journal::for_chat(&dir, 1);
        assert!(journal.load().unwrap().is_empty());
        journal.clear().unwrap();
        let _ = fs::remove_dir_all(&dir);
    }
}
