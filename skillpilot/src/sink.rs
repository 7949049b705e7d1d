//! Terminal event sink: streamed text to stdout, exported blobs to disk.

use std::io::Write;
use std::path::PathBuf;

use skillpilot_agent::types::{BlobMeta, EventSink};

pub struct TerminalEventSink {
    out_dir: PathBuf,
    pub saved_files: Vec<PathBuf>,
}

impl TerminalEventSink {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            out_dir,
            saved_files: Vec::new(),
        }
    }
}

impl EventSink for TerminalEventSink {
    fn on_text_chunk(&mut self, chunk: &str) {
        print!("{chunk}");
        let _ = std::io::stdout().flush();
    }

    fn on_blob(&mut self, bytes: Vec<u8>, meta: BlobMeta) {
        if let Err(e) = std::fs::create_dir_all(&self.out_dir) {
            eprintln!("failed to create output directory: {e}");
            return;
        }
        let path = self.out_dir.join(&meta.filename);
        match std::fs::write(&path, &bytes) {
            Ok(()) => {
                eprintln!(
                    "📎 saved {} ({}, {} bytes)",
                    path.display(),
                    meta.mime_type,
                    bytes.len()
                );
                self.saved_files.push(path);
            }
            Err(e) => eprintln!("failed to save {}: {e}", meta.filename),
        }
    }
}
