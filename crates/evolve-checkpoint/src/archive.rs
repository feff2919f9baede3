//! Build and read gzip-compressed tar archives of a [`FileMap`].

use std::io::{Read, Write};

use evolve_core::files::FileContent;
use evolve_core::FileMap;
use evolve_error::{EvolveError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Serialize a [`FileMap`] into a gzip-compressed tar archive.
pub fn build_archive(files: &FileMap) -> Result<Vec<u8>> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, content) in files {
            let bytes = match content {
                FileContent::Text { content } => content.clone().into_bytes(),
                FileContent::Base64 { .. } => content.as_text_lossy().into_bytes(),
            };
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, bytes.as_slice())
                .map_err(EvolveError::Io)?;
        }
        builder.finish().map_err(EvolveError::Io)?;
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).map_err(EvolveError::Io)?;
    encoder.finish().map_err(EvolveError::Io)
}

/// Decompress and fully unpack an archive into a [`FileMap`].
pub fn extract_archive(archive: &[u8]) -> Result<FileMap> {
    extract_matching(archive, |_| true)
}

/// Decompress an archive, keeping only entries whose path satisfies
/// `predicate`. Used by `download_files` with a glob or explicit file list.
pub fn extract_matching(archive: &[u8], predicate: impl Fn(&str) -> bool) -> Result<FileMap> {
    let decoder = GzDecoder::new(archive);
    let mut tar_reader = tar::Archive::new(decoder);
    let mut files = FileMap::new();
    for entry in tar_reader.entries().map_err(EvolveError::Io)? {
        let mut entry = entry.map_err(EvolveError::Io)?;
        let path = entry.path().map_err(EvolveError::Io)?.to_string_lossy().into_owned();
        if !predicate(&path) {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(EvolveError::Io)?;
        let text = String::from_utf8_lossy(&buf).into_owned();
        files.insert(path, FileContent::text(text));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_small_file_set() {
        let mut files = FileMap::new();
        files.insert("output/hello.txt".into(), FileContent::text("Hi"));
        files.insert("context/notes.md".into(), FileContent::text("# notes"));

        let archive = build_archive(&files).unwrap();
        let restored = extract_archive(&archive).unwrap();

        assert_eq!(restored.get("output/hello.txt").unwrap().as_text_lossy(), "Hi");
        assert_eq!(restored.get("context/notes.md").unwrap().as_text_lossy(), "# notes");
    }

    #[test]
    fn extract_matching_filters_by_predicate() {
        let mut files = FileMap::new();
        files.insert("output/a.txt".into(), FileContent::text("a"));
        files.insert("output/b.txt".into(), FileContent::text("b"));
        let archive = build_archive(&files).unwrap();

        let restored = extract_matching(&archive, |p| p.ends_with("a.txt")).unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored.contains_key("output/a.txt"));
    }
}
