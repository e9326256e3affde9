//! Normalises a verified info dictionary into a [`MetadataRecord`] (§4.2
//! "file-list normalisation").
use crate::bencode::{self, RawFileEntry, RawInfoDict};
use crate::id::InfoHash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub info_hash: InfoHash,
    pub name: String,
    pub files: Vec<FileEntry>,
    pub total_size: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("info dictionary is not valid bencode: {0}")]
    Bencode(#[from] serde_bencode::Error),
    #[error("info dictionary has neither a length nor a files list")]
    NoSizeInformation,
}

/// Builds a [`MetadataRecord`] from the raw, already SHA-1-verified info
/// dictionary bytes. Returns `Ok(None)` for the semantic-reject cases in §7
/// (total size zero, every file path empty) rather than an error.
///
/// # Errors
///
/// Returns [`Error`] if `bytes` does not parse as a bencoded info dictionary
/// or declares neither `length` nor `files`.
pub fn normalize(info_hash: InfoHash, bytes: &[u8]) -> Result<Option<MetadataRecord>, Error> {
    let raw: RawInfoDict = bencode::parse_info_dict(bytes)?;
    let name = String::from_utf8_lossy(raw.name.as_ref()).into_owned();

    let files = match raw.files {
        Some(entries) => entries.into_iter().filter_map(normalize_multi_file_entry).collect(),
        None => {
            let length = raw.length.ok_or(Error::NoSizeInformation)?;
            if length < 0 {
                Vec::new()
            } else {
                vec![FileEntry { path: name.clone(), size: length }]
            }
        }
    };

    let total_size: i64 = files.iter().map(|f| f.size).sum();
    if total_size == 0 || files.is_empty() {
        return Ok(None);
    }

    Ok(Some(MetadataRecord { info_hash, name, files, total_size }))
}

/// A multi-file entry is dropped (not the whole torrent) when its size is
/// negative or its path has no non-empty components.
fn normalize_multi_file_entry(entry: RawFileEntry) -> Option<FileEntry> {
    if entry.length < 0 {
        return None;
    }

    let components: Vec<String> =
        entry.path.iter().map(|c| String::from_utf8_lossy(c.as_ref()).into_owned()).filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return None;
    }

    Some(FileEntry { path: components.join("/"), size: entry.length })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_single_file_torrent() {
        let raw = b"d6:lengthi12e4:name5:helloe";
        let record = normalize(InfoHash::random(), raw).unwrap().unwrap();
        assert_eq!(record.name, "hello");
        assert_eq!(record.files, vec![FileEntry { path: "hello".to_string(), size: 12 }]);
        assert_eq!(record.total_size, 12);
    }

    #[test]
    fn normalizes_multi_file_torrent_joining_path_components() {
        let raw = b"d5:filesld6:lengthi3e4:pathl1:a1:beed6:lengthi5e4:pathl1:ceee4:name3:foobare";
        let record = normalize(InfoHash::random(), raw).unwrap().unwrap();
        assert_eq!(record.name, "foobar");
        assert_eq!(record.files[0].path, "a/b");
        assert_eq!(record.files[1].path, "c");
        assert_eq!(record.total_size, 8);
    }

    #[test]
    fn rejects_total_size_zero_without_error() {
        let raw = b"d6:lengthi0e4:name5:emptye";
        assert!(normalize(InfoHash::random(), raw).unwrap().is_none());
    }

    #[test]
    fn drops_negative_size_multi_file_entries_but_keeps_the_rest() {
        let raw = b"d5:filesld6:lengthi-1e4:pathl4:skipeed6:lengthi5e4:pathl4:keepeee4:name1:xe";
        let record = normalize(InfoHash::random(), raw).unwrap().unwrap();
        assert_eq!(record.files.len(), 1);
        assert_eq!(record.files[0].path, "keep");
    }

    #[test]
    fn rejects_malformed_bencode() {
        let raw = b"not bencode";
        assert!(normalize(InfoHash::random(), raw).is_err());
    }
}
