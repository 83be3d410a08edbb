use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL frame"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first
/// (clean EOF or a torn trailing frame).
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

enum Frame {
    Event(Event, u64),
    /// The file ends inside this frame.
    Torn,
    /// A complete frame whose checksum or payload does not check out.
    Corrupt(u64),
}

/// Decode the next frame given the `remaining` bytes in the file.
/// `Ok(None)` at a clean EOF.
fn decode_next(reader: &mut impl Read, remaining: u64) -> io::Result<Option<Frame>> {
    if remaining == 0 {
        return Ok(None);
    }
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(Some(Frame::Torn));
    }
    let frame_len = u64::from(u32::from_le_bytes(len_buf)) + 8;
    if frame_len > remaining {
        return Ok(Some(Frame::Torn));
    }
    let mut payload = vec![0u8; (frame_len - 8) as usize];
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut crc_buf)? {
        return Ok(Some(Frame::Torn));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Some(Frame::Corrupt(frame_len)));
    }
    Ok(Some(match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Frame::Event(event, frame_len),
        Err(_) => Frame::Corrupt(frame_len),
    }))
}

/// Append-only Write-Ahead Log. One frame per committed transaction.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) fails the length or CRC check and is
///   dropped on replay, so a transaction is either fully durable or absent.
/// - A bad entry with intact data after it is corruption, not a torn write:
///   replay refuses it rather than dropping what follows.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append one event and fsync. Production code goes through the
    /// group-commit writer (`append_buffered` + `flush_sync`).
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted events to `<wal>.tmp` and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the WAL and reopen it for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning every intact event in order.
    /// A torn tail is cut off so later appends follow the last good frame.
    /// A corrupt frame in the middle of the file is an `InvalidData` error.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        while let Some(frame) = decode_next(&mut reader, file_len - valid_len)? {
            match frame {
                Frame::Event(event, frame_len) => {
                    events.push(event);
                    valid_len += frame_len;
                }
                Frame::Corrupt(frame_len) if valid_len + frame_len < file_len => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "corrupt WAL frame at byte {valid_len} of {} with {} bytes after it",
                            path.display(),
                            file_len - valid_len - frame_len
                        ),
                    ));
                }
                Frame::Torn | Frame::Corrupt(_) => break,
            }
        }
        if valid_len < file_len {
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = file_len - valid_len,
                "truncating torn WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shiftpick_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn staff(name: &str, priority: u32) -> Employee {
        Employee {
            id: Ulid::new(),
            name: name.into(),
            email: format!("{name}@example.com"),
            role: Role::Staff,
            active: true,
            priority: Some(priority),
            created_at: 0,
        }
    }

    fn claim_event(a: &Employee, b: &Employee) -> Event {
        Event::SelectionClaimed {
            selection: Selection {
                id: Ulid::new(),
                employee_id: a.id,
                service_id: Ulid::new(),
                year: 2024,
                created_at: 0,
            },
            ranking: vec![(b.id, 1), (a.id, 2)],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let a = staff("ana", 1);
        let b = staff("bea", 2);
        let events = vec![
            Event::EmployeeRegistered { employee: a.clone() },
            Event::EmployeeRegistered { employee: b.clone() },
            claim_event(&a, &b),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn torn_trailing_transaction_is_dropped() {
        let path = tmp_path("torn.wal");
        let a = staff("ana", 1);
        let b = staff("bea", 2);
        let registered = Event::EmployeeRegistered { employee: a.clone() };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&registered).unwrap();
        }

        // Simulate a crash halfway through writing a claim + re-rank frame.
        {
            let mut full = Vec::new();
            encode_event(&mut full, &claim_event(&a, &b)).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&full[..full.len() / 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![registered.clone()]);

        // The torn bytes are gone, so a new append is readable.
        let next = Event::SelectionDeleted { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&next).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![registered, next]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let event = Event::SelectionDeleted { id: Ulid::new() };

        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEF_u32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_middle_frame_refuses_replay() {
        let path = tmp_path("corrupt_middle.wal");
        let a = staff("ana", 1);
        let b = staff("bea", 2);
        let events = vec![
            Event::EmployeeRegistered { employee: a.clone() },
            Event::EmployeeRegistered { employee: b.clone() },
            claim_event(&a, &b),
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let len_before = fs::metadata(&path).unwrap().len();

        // Flip one payload byte of the second frame.
        let mut bytes = fs::read(&path).unwrap();
        let first_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize + 8;
        bytes[first_len + 6] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // The intact third frame is still on disk.
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_length_prefix_is_a_torn_tail() {
        let path = tmp_path("oversized_len.wal");
        let registered = Event::EmployeeRegistered { employee: staff("ana", 1) };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&registered).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 3]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![registered]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_replaces_history_with_snapshot() {
        let path = tmp_path("compact.wal");
        let a = staff("ana", 1);
        let b = staff("bea", 2);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&Event::EmployeeRegistered { employee: a.clone() }).unwrap();
            wal.append(&Event::EmployeeRegistered { employee: b.clone() }).unwrap();
            for _ in 0..10 {
                wal.append(&Event::RankingRewritten { ranking: vec![(b.id, 1), (a.id, 2)] })
                    .unwrap();
                wal.append(&Event::RankingRewritten { ranking: vec![(a.id, 1), (b.id, 2)] })
                    .unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![Event::Snapshot(Box::new(LedgerSnapshot {
            employees: vec![a, b],
            ..Default::default()
        }))];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), snapshot);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_after_compact() {
        let path = tmp_path("compact_append.wal");
        let a = staff("ana", 1);
        let compacted = vec![Event::EmployeeRegistered { employee: a.clone() }];
        let next = Event::EmployeeDeactivated { id: a.id, ranking: vec![] };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&compacted[0]).unwrap();
            wal.compact(&compacted).unwrap();
            wal.append(&next).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![compacted[0].clone(), next]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_durable_after_flush() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (1..=5)
            .map(|i| Event::EmployeeRegistered { employee: staff("x", i) })
            .collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
