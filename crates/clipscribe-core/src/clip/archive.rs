use std::collections::BTreeMap;
use std::io::Read;

use tracing::{debug, info, warn};

use super::{Clip, ClipMetadata};
use crate::error::FetchError;

#[derive(Default)]
struct Members {
    video: Option<Vec<u8>>,
    metadata: Option<Vec<u8>>,
}

/// Read `<stem>.mp4` + `<stem>.json` pairs out of a tar stream.
///
/// Clips are returned in stem order. Stems missing either half are skipped.
pub fn unpack_clips<R: Read>(reader: R) -> Result<Vec<Clip>, FetchError> {
    let mut archive = tar::Archive::new(reader);
    let mut groups: BTreeMap<String, Members> = BTreeMap::new();

    for entry in archive.entries().map_err(FetchError::Archive)? {
        let mut entry = entry.map_err(FetchError::Archive)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(FetchError::Archive)?
            .to_string_lossy()
            .into_owned();
        let Some((stem, ext)) = name.rsplit_once('.') else {
            debug!(%name, "skipping archive member without extension");
            continue;
        };
        if ext != "mp4" && ext != "json" {
            debug!(%name, "skipping archive member");
            continue;
        }

        // Header sizes are untrusted, let the buffer grow as data arrives.
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(FetchError::Archive)?;

        let members = groups.entry(stem.to_string()).or_default();
        if ext == "mp4" {
            members.video = Some(data);
        } else {
            members.metadata = Some(data);
        }
    }

    let mut clips = Vec::new();
    for (stem, members) in groups {
        let (Some(video), Some(metadata)) = (members.video, members.metadata) else {
            warn!(%stem, "archive entry lacks an mp4/json pair, skipping");
            continue;
        };
        let metadata: ClipMetadata =
            serde_json::from_slice(&metadata).map_err(|source| FetchError::Metadata {
                name: format!("{stem}.json"),
                source,
            })?;
        let label = stem.rsplit('/').next().unwrap_or(&stem).to_string();
        clips.push(Clip {
            label,
            video,
            metadata,
        });
    }

    info!(clip_count = clips.len(), "unpacked archive");
    Ok(clips)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn build_tar(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn groups_members_by_stem() {
        let tar = build_tar(&[
            ("f001_w001/b.json", br#"{"worker_id": 2, "factory_id": 1}"#),
            ("f001_w001/a.mp4", b"video-a"),
            ("f001_w001/b.mp4", b"video-b"),
            ("f001_w001/a.json", br#"{"worker_id": 1, "factory_id": 1}"#),
        ]);
        let clips = unpack_clips(tar.as_slice()).unwrap();
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].label, "a");
        assert_eq!(clips[0].video, b"video-a");
        assert_eq!(clips[0].metadata.worker_label(), "1");
        assert_eq!(clips[1].label, "b");
        assert_eq!(clips[1].video, b"video-b");
    }

    #[test]
    fn skips_incomplete_pairs_and_other_files() {
        let tar = build_tar(&[
            ("lonely.mp4", b"video"),
            ("README", b"hello"),
            ("notes.txt", b"hello"),
            ("ok.mp4", b"video"),
            ("ok.json", b"{}"),
        ]);
        let clips = unpack_clips(tar.as_slice()).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].label, "ok");
    }

    #[test]
    fn malformed_metadata_is_an_error() {
        let tar = build_tar(&[("x.mp4", b"video"), ("x.json", b"{not json")]);
        let err = unpack_clips(tar.as_slice()).unwrap_err();
        assert!(matches!(err, FetchError::Metadata { ref name, .. } if name == "x.json"));
    }

    #[test]
    fn oversized_header_does_not_preallocate() {
        let mut header = tar::Header::new_gnu();
        header.set_path("huge.mp4").unwrap();
        header.set_size(1 << 40);
        header.set_mode(0o644);
        header.set_cksum();
        let mut tar = header.as_bytes().to_vec();
        tar.extend_from_slice(b"only a few bytes");

        let result = unpack_clips(tar.as_slice());
        assert!(result.map_or(true, |clips| clips.is_empty()));
    }

    #[test]
    fn empty_archive_yields_no_clips() {
        let tar = build_tar(&[]);
        assert!(unpack_clips(tar.as_slice()).unwrap().is_empty());
    }
}
