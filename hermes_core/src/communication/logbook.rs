//! Serialized log data structures and codec
//!
//! The shared region holds exactly one serialized [`LogBook`]. The framing
//! is fixed-width little-endian and self-describing by position:
//!
//! ```text
//! book  := last_id:i64  entry*
//! entry := id:i64  instance:[u8;16]  timestamp_ns:u64  len:u32  message:[u8;len]
//! ```
//!
//! Decoding is strict: truncated input, a length word overrunning the
//! buffer, non-increasing ids, an id above `last_id`, or an empty message
//! all fail. Strictness is what lets the bus detect a half-written region
//! after a publisher crash and self-heal by treating the log as empty.

use std::collections::VecDeque;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::{HermesError, HermesResult};

/// Serialized size of the `last_id` header.
pub const LOG_HEADER_SIZE: usize = 8;

/// One published message with its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// Monotonically increasing sequence, unique within the book's lifetime.
    /// Assigned by the publisher under the write lock.
    pub id: i64,
    /// Identity of the publishing bus instance; receivers use it to filter
    /// their own entries.
    pub instance: Uuid,
    /// Monotonic clock reading in nanoseconds, taken once per write batch.
    pub timestamp_ns: u64,
    /// Opaque payload. Never empty in a valid book.
    pub message: Vec<u8>,
}

/// The single value serialized into the shared region.
///
/// `entries` is ordered by ascending id; insertion is append-only and
/// removal is prefix-only (trim), hence the deque.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogBook {
    /// Highest id ever assigned. Never decreases across writes.
    pub last_id: i64,
    pub entries: VecDeque<LogEntry>,
}

/// Serialized length of an entry minus its message bytes.
///
/// Measured once per process by encoding a sentinel entry with the widest
/// id/timestamp values and an empty message. Publishers cost an appended
/// entry at `entry_overhead() + message.len()`.
pub fn entry_overhead() -> usize {
    static OVERHEAD: OnceLock<usize> = OnceLock::new();
    *OVERHEAD.get_or_init(|| {
        let sentinel = LogEntry {
            id: i64::MAX,
            instance: Uuid::from_u128(u128::MAX),
            timestamp_ns: u64::MAX,
            message: Vec::new(),
        };
        let mut out = Vec::new();
        encode_entry(&sentinel, &mut out);
        out.len()
    })
}

fn encode_entry(entry: &LogEntry, out: &mut Vec<u8>) {
    out.extend_from_slice(&entry.id.to_le_bytes());
    out.extend_from_slice(entry.instance.as_bytes());
    out.extend_from_slice(&entry.timestamp_ns.to_le_bytes());
    out.extend_from_slice(&(entry.message.len() as u32).to_le_bytes());
    out.extend_from_slice(&entry.message);
}

/// Byte-stream reader used by [`LogBook::decode`].
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> HermesResult<[u8; N]> {
        let end = self.pos + N;
        if end > self.bytes.len() {
            return Err(HermesError::Decode(format!(
                "log truncated at byte {} (need {} more)",
                self.pos,
                end - self.bytes.len()
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn take_slice(&mut self, len: usize) -> HermesResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                HermesError::Decode(format!(
                    "message length {} overruns the log at byte {}",
                    len, self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

impl LogBook {
    /// Serialize the book. `decode(encode(book)) == book` for all valid
    /// books, including field ordering and integer widths.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.last_id.to_le_bytes());
        for entry in &self.entries {
            encode_entry(entry, &mut out);
        }
        out
    }

    /// Serialized size of the book without encoding it.
    pub fn encoded_len(&self) -> usize {
        LOG_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|e| entry_overhead() + e.message.len())
                .sum::<usize>()
    }

    /// Deserialize a book. A zero-length stream is the empty book; anything
    /// else must decode completely and satisfy the book invariants.
    pub fn decode(bytes: &[u8]) -> HermesResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }

        let mut reader = Reader { bytes, pos: 0 };
        let last_id = i64::from_le_bytes(reader.take()?);
        let mut entries = VecDeque::new();
        let mut previous_id = i64::MIN;

        while !reader.is_exhausted() {
            let id = i64::from_le_bytes(reader.take()?);
            let instance = Uuid::from_bytes(reader.take()?);
            let timestamp_ns = u64::from_le_bytes(reader.take()?);
            let len = u32::from_le_bytes(reader.take()?) as usize;
            let message = reader.take_slice(len)?.to_vec();

            if id <= previous_id {
                return Err(HermesError::Decode(format!(
                    "entry ids must be strictly increasing ({} after {})",
                    id, previous_id
                )));
            }
            if id > last_id {
                return Err(HermesError::Decode(format!(
                    "entry id {} above last_id {}",
                    id, last_id
                )));
            }
            if message.is_empty() {
                return Err(HermesError::Decode(format!("entry {} has no message", id)));
            }

            previous_id = id;
            entries.push_back(LogEntry {
                id,
                instance,
                timestamp_ns,
                message,
            });
        }

        Ok(Self { last_id, entries })
    }

    /// Decode, treating undecodable bytes as an empty book.
    ///
    /// This is the crash-recovery path: a publisher that died mid-write can
    /// leave torn bytes behind, and the next participant heals the log by
    /// rebuilding it from scratch on its next successful write.
    pub fn decode_or_empty(bytes: &[u8]) -> Self {
        match Self::decode(bytes) {
            Ok(book) => book,
            Err(e) => {
                log::warn!("shared log undecodable, treating as empty: {}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, message: &[u8]) -> LogEntry {
        LogEntry {
            id,
            instance: Uuid::from_u128(0x1234_5678_9abc_def0_1122_3344_5566_7788),
            timestamp_ns: 42_000_000,
            message: message.to_vec(),
        }
    }

    fn book(entries: Vec<LogEntry>) -> LogBook {
        let last_id = entries.iter().map(|e| e.id).max().unwrap_or(0);
        LogBook {
            last_id,
            entries: entries.into(),
        }
    }

    #[test]
    fn empty_stream_is_empty_book() {
        let decoded = LogBook::decode(&[]).unwrap();
        assert_eq!(decoded, LogBook::default());
        assert_eq!(decoded.last_id, 0);
    }

    #[test]
    fn round_trip() {
        let original = book(vec![
            entry(1, b"lorem"),
            entry(2, b"ipsum"),
            entry(7, &[0u8; 300]),
        ]);
        let bytes = original.encode();
        assert_eq!(bytes.len(), original.encoded_len());

        let decoded = LogBook::decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trip_preserves_gap_above_entries() {
        // last_id may exceed the highest live id after a trim.
        let mut original = book(vec![entry(3, b"x")]);
        original.last_id = 10;
        let decoded = LogBook::decode(&original.encode()).unwrap();
        assert_eq!(decoded.last_id, 10);
        assert_eq!(decoded.entries.len(), 1);
    }

    #[test]
    fn overhead_matches_encoding() {
        let e = entry(1, b"abcde");
        let single = book(vec![e.clone()]);
        assert_eq!(
            single.encode().len(),
            LOG_HEADER_SIZE + entry_overhead() + e.message.len()
        );
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = book(vec![entry(1, b"hello")]).encode();
        for cut in [4, 9, 20, bytes.len() - 1] {
            assert!(
                matches!(LogBook::decode(&bytes[..cut]), Err(HermesError::Decode(_))),
                "cut at {} must fail",
                cut
            );
        }
    }

    #[test]
    fn overrunning_length_fails() {
        let mut bytes = book(vec![entry(1, b"hi")]).encode();
        // Corrupt the message length word (follows id + instance + timestamp).
        let len_offset = LOG_HEADER_SIZE + 8 + 16 + 8;
        bytes[len_offset..len_offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            LogBook::decode(&bytes),
            Err(HermesError::Decode(_))
        ));
    }

    #[test]
    fn non_increasing_ids_fail() {
        let mut bad = book(vec![entry(2, b"a")]);
        bad.entries.push_back(entry(2, b"b"));
        assert!(matches!(
            LogBook::decode(&bad.encode()),
            Err(HermesError::Decode(_))
        ));
    }

    #[test]
    fn id_above_last_id_fails() {
        let mut bad = book(vec![entry(5, b"a")]);
        bad.last_id = 3;
        assert!(matches!(
            LogBook::decode(&bad.encode()),
            Err(HermesError::Decode(_))
        ));
    }

    #[test]
    fn decode_or_empty_heals_garbage() {
        let healed = LogBook::decode_or_empty(&[0xFF; 13]);
        assert_eq!(healed, LogBook::default());
    }
}
