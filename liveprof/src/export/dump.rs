//! Snapshot dump files.
//!
//! A dump holds exactly one `Message::Stats` payload, encoded as on the
//! wire minus the length prefix, so it can be opened with any JSON tool.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use liveprof_common::{Message, StatsSnapshot};

use crate::domain::ExportError;

/// Write `snapshot` to `writer` as a dump.
pub fn write_dump<W: Write>(mut writer: W, snapshot: &StatsSnapshot, captured_at: SystemTime) -> Result<(), ExportError> {
    let message = Message::Stats {
        snapshot: snapshot.clone(),
        captured_at,
    };
    serde_json::to_writer(&mut writer, &message)?;
    writer.flush()?;
    Ok(())
}

pub fn save_dump(path: &Path, snapshot: &StatsSnapshot) -> Result<(), ExportError> {
    let file = File::create(path)?;
    write_dump(BufWriter::new(file), snapshot, SystemTime::now())
}

/// Read a dump back. Returns the snapshot and when it was captured.
pub fn read_dump<R: Read>(reader: R) -> Result<(StatsSnapshot, SystemTime), ExportError> {
    match serde_json::from_reader(reader)? {
        Message::Stats { snapshot, captured_at } => Ok((snapshot, captured_at)),
        Message::Hello { .. } => Err(ExportError::NotStats("hello")),
    }
}

pub fn load_dump(path: &Path) -> Result<(StatsSnapshot, SystemTime), ExportError> {
    read_dump(BufReader::new(File::open(path)?))
}
