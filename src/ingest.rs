use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::error::MineError;
use crate::pipeline::SkippedDocument;

/// Largest archive member accepted as a document.
pub const MAX_MEMBER_BYTES: u64 = 256 * 1024 * 1024;

/// One source PDF. Bytes are dropped once findings are extracted.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Document {
            name: name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Pdf,
    Tar,
    TarGz,
    Other,
}

fn classify(path: &Path) -> InputKind {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".pdf") {
        InputKind::Pdf
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        InputKind::TarGz
    } else if name.ends_with(".tar") {
        InputKind::Tar
    } else {
        InputKind::Other
    }
}

/// Expand files, directories and tar archives into documents, in input order.
///
/// Unreadable inputs become skip notices; only the caller decides whether an
/// empty result is fatal.
pub fn collect_documents(inputs: &[PathBuf]) -> (Vec<Document>, Vec<SkippedDocument>) {
    let mut docs = Vec::new();
    let mut skipped = Vec::new();

    for input in inputs {
        if input.is_dir() {
            match pdfs_in_dir(input) {
                Ok(paths) => {
                    for p in paths {
                        read_pdf(&p, &mut docs, &mut skipped);
                    }
                }
                Err(e) => skipped.push(SkippedDocument::new(input.display().to_string(), &e)),
            }
            continue;
        }

        match classify(input) {
            InputKind::Pdf => read_pdf(input, &mut docs, &mut skipped),
            kind @ (InputKind::Tar | InputKind::TarGz) => {
                match read_archive(input, kind == InputKind::TarGz) {
                    Ok(found) => {
                        info!(archive = %input.display(), documents = found.len(), "Expanded archive");
                        docs.extend(found);
                    }
                    Err(e) => {
                        warn!(archive = %input.display(), error = %e, "Skipping archive");
                        skipped.push(SkippedDocument::new(input.display().to_string(), &e));
                    }
                }
            }
            InputKind::Other => {
                debug!(path = %input.display(), "Ignoring non-PDF input");
            }
        }
    }

    (docs, skipped)
}

fn pdfs_in_dir(dir: &Path) -> Result<Vec<PathBuf>, MineError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && classify(p) == InputKind::Pdf)
        .collect();
    paths.sort();
    Ok(paths)
}

fn read_pdf(path: &Path, docs: &mut Vec<Document>, skipped: &mut Vec<SkippedDocument>) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    match fs::read(path) {
        Ok(bytes) => docs.push(Document::new(name, bytes)),
        Err(e) => {
            warn!(document = %name, error = %e, "Skipping unreadable file");
            skipped.push(SkippedDocument::new(name, &MineError::Io(e)));
        }
    }
}

fn read_archive(path: &Path, gzipped: bool) -> Result<Vec<Document>, MineError> {
    let file = fs::File::open(path)?;
    let archive_err = |e: std::io::Error| MineError::Archive {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if gzipped {
        documents_from_tar(GzDecoder::new(file)).map_err(archive_err)
    } else {
        documents_from_tar(file).map_err(archive_err)
    }
}

/// PDF members of a tar stream; other members are ignored.
pub fn documents_from_tar<R: Read>(reader: R) -> std::io::Result<Vec<Document>> {
    let mut archive = tar::Archive::new(reader);
    let mut docs = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        if classify(&path) != InputKind::Pdf {
            continue;
        }
        // header sizes are untrusted; never pre-allocate from them
        if entry.size() > MAX_MEMBER_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "member {} claims {} bytes, limit is {MAX_MEMBER_BYTES}",
                    path.display(),
                    entry.size()
                ),
            ));
        }
        let mut bytes = Vec::new();
        entry.by_ref().take(MAX_MEMBER_BYTES).read_to_end(&mut bytes)?;
        docs.push(Document::new(path.display().to_string(), bytes));
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn classify_by_extension() {
        assert_eq!(classify(Path::new("a/LAUDO.PDF")), InputKind::Pdf);
        assert_eq!(classify(Path::new("lote.tar.gz")), InputKind::TarGz);
        assert_eq!(classify(Path::new("lote.tgz")), InputKind::TarGz);
        assert_eq!(classify(Path::new("lote.tar")), InputKind::Tar);
        assert_eq!(classify(Path::new("notes.txt")), InputKind::Other);
    }

    #[test]
    fn tar_keeps_only_pdfs_in_order() {
        let bytes = tar_bytes(&[
            ("lote/a.pdf", b"%PDF-a"),
            ("lote/readme.txt", b"hi"),
            ("lote/b.PDF", b"%PDF-b"),
        ]);
        let docs = documents_from_tar(&bytes[..]).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["lote/a.pdf", "lote/b.PDF"]);
        assert_eq!(docs[1].bytes, b"%PDF-b");
    }

    #[test]
    fn collects_from_dir_and_gz_archive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2.pdf"), b"%PDF-2").unwrap();
        fs::write(dir.path().join("1.pdf"), b"%PDF-1").unwrap();
        fs::write(dir.path().join("x.csv"), b"a,b").unwrap();

        let archive_path = dir.path().join("lote.tar.gz");
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut gz, &tar_bytes(&[("c.pdf", b"%PDF-c")])).unwrap();
        fs::write(&archive_path, gz.finish().unwrap()).unwrap();

        let sub = tempfile::tempdir().unwrap();
        fs::write(sub.path().join("3.pdf"), b"%PDF-3").unwrap();

        let (docs, skipped) =
            collect_documents(&[sub.path().to_path_buf(), archive_path, dir.path().join("1.pdf")]);
        let names: Vec<&str> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["3.pdf", "c.pdf", "1.pdf"]);
        assert!(skipped.is_empty());
    }

    #[test]
    fn corrupt_archive_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.tar.gz");
        fs::write(&bad, b"definitely not gzip").unwrap();
        let (docs, skipped) = collect_documents(&[bad]);
        assert!(docs.is_empty());
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].reason.contains("archive"));
    }

    #[test]
    fn oversized_member_header_is_skipped() {
        let mut header = tar::Header::new_gnu();
        header.set_path("lote/grande.pdf").unwrap();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(1 << 46);
        header.set_mode(0o644);
        header.set_cksum();
        let mut raw = header.as_bytes().to_vec();
        raw.extend_from_slice(b"%PDF-1.4\n\n");
        raw.resize(raw.len() + 502, 0);

        assert!(documents_from_tar(&raw[..]).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lote.tar");
        fs::write(&path, &raw).unwrap();
        let (docs, skipped) = collect_documents(&[path]);
        assert!(docs.is_empty());
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].reason.contains("archive"));
        assert!(skipped[0].reason.contains("limit"));
    }

    #[test]
    fn missing_file_is_skipped() {
        let (docs, skipped) = collect_documents(&[PathBuf::from("/nonexistent/laudo.pdf")]);
        assert!(docs.is_empty());
        assert_eq!(skipped[0].document, "laudo.pdf");
    }
}
