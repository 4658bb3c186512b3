//! Property lists
//!
//! Transaction and revision properties are string maps serialized in the
//! hash-style dump format. Three internal marker properties steer commit
//! behavior and are stripped before the final revprop file is written.

use chrono::{SecondsFormat, Utc};
use revfs_core::{Error, Result};
use revfs_storage::format::write_file_atomic;
use revfs_storage::hashfile;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::Path;

/// A property list.
pub type PropList = BTreeMap<String, String>;

/// Commit timestamp, set at commit unless the client supplied one.
pub const PROP_REVISION_DATE: &str = "svn:date";
/// Commit log message.
pub const PROP_REVISION_LOG: &str = "svn:log";
/// Committing author.
pub const PROP_REVISION_AUTHOR: &str = "svn:author";

/// Marker: the client wants an out-of-date check against these paths.
pub const PROP_TXN_CHECK_OOD: &str = "check-ood";
/// Marker: the client wants path-lock enforcement.
pub const PROP_TXN_CHECK_LOCKS: &str = "check-locks";
/// Marker: the client supplied its own `svn:date`, keep it.
pub const PROP_TXN_CLIENT_DATE: &str = "client-date";

/// The three markers stripped before the final revprop file is written.
pub const TXN_MARKER_PROPS: [&str; 3] =
    [PROP_TXN_CHECK_OOD, PROP_TXN_CHECK_LOCKS, PROP_TXN_CLIENT_DATE];

/// Read a property file; a missing file is an empty list.
pub fn read_props(path: &Path) -> Result<PropList> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PropList::new()),
        Err(e) => return Err(e.into()),
    };
    let raw = hashfile::read_hash(&mut BufReader::new(file))?;
    raw.into_iter()
        .map(|(k, v)| {
            let v = String::from_utf8(v)
                .map_err(|_| Error::Corrupt(format!("non-UTF-8 property value for '{k}'")))?;
            Ok((k, v))
        })
        .collect()
}

/// Serialize a property list to dump bytes.
pub fn serialize_props(props: &PropList) -> Vec<u8> {
    let raw: BTreeMap<String, Vec<u8>> = props
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().into_bytes()))
        .collect();
    let mut out = Vec::new();
    hashfile::write_hash(&mut out, &raw).expect("vec sink");
    out
}

/// Atomically write a property file.
pub fn write_props(path: &Path, props: &PropList) -> Result<()> {
    write_file_atomic(path, &serialize_props(props))
}

/// Current wall-clock time in the revprop timestamp format.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("props");
        let mut props = PropList::new();
        props.insert(PROP_REVISION_LOG.to_string(), "first commit\n".to_string());
        props.insert(PROP_REVISION_AUTHOR.to_string(), "alice".to_string());

        write_props(&path, &props).unwrap();
        assert_eq!(read_props(&path).unwrap(), props);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(read_props(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = now_timestamp();
        // e.g. 2026-08-01T12:34:56.123456Z
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), "2026-08-01T12:34:56.123456Z".len());
    }
}
