use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Follows a growing log file from its end, line by line. A file replaced
/// under the same path (log rotation) is reopened from its start.
pub struct LogTailer {
    path: PathBuf,
    reader: BufReader<File>,
    file_id: Option<u64>,
    position: u64,
    partial: Vec<u8>,
}

impl LogTailer {
    /// Open `path` positioned at its current end; earlier lines are ignored.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let mut file = File::open(path)?;
        let file_id = file_id(&file.metadata()?);
        let position = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            file_id,
            position,
            partial: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Complete lines appended since the last poll, without terminators.
    /// A trailing line still being written is held back until it ends.
    /// Bytes that are not UTF-8 are replaced, so a corrupt line reaches the
    /// caller as its own entry instead of hiding its neighbours.
    pub fn poll_lines(&mut self) -> std::io::Result<Vec<String>> {
        // Truncated in place: start over from the top.
        let len = self.reader.get_ref().metadata()?.len();
        if len < self.position {
            self.reader.seek(SeekFrom::Start(0))?;
            self.position = 0;
            self.partial.clear();
        }

        let mut lines = Vec::new();
        self.drain(&mut lines)?;

        // Old file fully read; follow the path if it now names another file.
        if let Ok(meta) = std::fs::metadata(&self.path) {
            let current = file_id(&meta);
            if current.is_some() && current != self.file_id {
                match File::open(&self.path) {
                    Ok(file) => {
                        tracing::info!(path = %self.path.display(), "event log rotated, reopening");
                        self.reader = BufReader::new(file);
                        self.file_id = current;
                        self.position = 0;
                        self.partial.clear();
                        self.drain(&mut lines)?;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to reopen rotated event log"),
                }
            }
        }

        Ok(lines)
    }

    fn drain(&mut self, lines: &mut Vec<String>) -> std::io::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = self.reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                return Ok(());
            }
            self.position += read as u64;
            self.partial.extend_from_slice(&buf);
            if buf.ends_with(b"\n") {
                let raw = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
            }
        }
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        append_bytes(path, text.as_bytes());
    }

    fn append_bytes(path: &Path, bytes: &[u8]) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn starts_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, "old line\n").unwrap();

        let mut tailer = LogTailer::open(&path).unwrap();
        assert!(tailer.poll_lines().unwrap().is_empty());

        append(&path, "first\nsecond\n");
        assert_eq!(tailer.poll_lines().unwrap(), vec!["first", "second"]);
        assert!(tailer.poll_lines().unwrap().is_empty());
    }

    #[test]
    fn partial_line_held_until_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, "").unwrap();
        let mut tailer = LogTailer::open(&path).unwrap();

        append(&path, "{\"half\":");
        assert!(tailer.poll_lines().unwrap().is_empty());
        append(&path, "1}\n\n");
        assert_eq!(tailer.poll_lines().unwrap(), vec!["{\"half\":1}"]);
    }

    #[test]
    fn truncation_restarts_from_top() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, "a long line that will vanish\n").unwrap();
        let mut tailer = LogTailer::open(&path).unwrap();

        std::fs::write(&path, "new\n").unwrap();
        assert_eq!(tailer.poll_lines().unwrap(), vec!["new"]);
    }

    #[test]
    fn invalid_utf8_line_keeps_its_neighbours() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, "").unwrap();
        let mut tailer = LogTailer::open(&path).unwrap();

        append_bytes(&path, b"valid-before\n\xff\xfe\nvalid-after\n");
        let lines = tailer.poll_lines().unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "valid-before");
        assert_eq!(lines[2], "valid-after");
        assert!(tailer.poll_lines().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn rotated_file_is_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        std::fs::write(&path, "").unwrap();
        let mut tailer = LogTailer::open(&path).unwrap();

        append(&path, "last of old\n");
        std::fs::rename(&path, dir.path().join("events.log.1")).unwrap();
        std::fs::write(&path, "first of new\n").unwrap();

        assert_eq!(tailer.poll_lines().unwrap(), vec!["last of old", "first of new"]);
        append(&path, "second of new\n");
        assert_eq!(tailer.poll_lines().unwrap(), vec!["second of new"]);
    }
}
