// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Payload preparation and per-attempt temp files.

use std::io::Write;
use std::path::Path;

use tempfile::TempPath;
use tracing::debug;

use spoolwerk_core::error::Result;
use spoolwerk_core::types::PrintRequest;

/// Bytes actually handed to the transports for `request`.
///
/// Plain text gets CRLF line endings (the `print` command and most line
/// printers need them); copies are concatenated back to back.
pub fn prepare_payload(request: &PrintRequest) -> Result<Vec<u8>> {
    request.validate()?;

    let single = if request.is_plain_text {
        normalize_line_endings(&request.payload)
    } else {
        request.payload.clone()
    };

    Ok(single.repeat(request.options.copies as usize))
}

/// Convert lone `\n` to `\r\n`, leaving existing `\r\n` untouched.
pub fn normalize_line_endings(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + text.len() / 32);
    let mut prev = 0u8;
    for &b in text {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

/// A payload materialised on disk for one strategy attempt.
///
/// The file has a fresh random name and is deleted when this value drops,
/// whichever way the owning strategy exits.
#[derive(Debug)]
pub struct PayloadFile {
    path: TempPath,
}

impl PayloadFile {
    pub fn create(dir: Option<&Path>, payload: &[u8]) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("spoolwerk-").suffix(".prn").rand_bytes(12);

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(payload)?;
        file.flush()?;

        // Close our handle so the print subprocess can open the file freely;
        // the `TempPath` still removes it on drop.
        let path = file.into_temp_path();
        debug!(path = %path.display(), bytes = payload.len(), "payload materialised");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path as a string for script interpolation.
    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    #[cfg(test)]
    pub(crate) fn to_path_buf(&self) -> std::path::PathBuf {
        self.path.to_path_buf()
    }
}
