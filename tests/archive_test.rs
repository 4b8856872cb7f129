//! Archive submissions end to end: classification, mixed bundles and
//! hostile entries.

mod common;

use common::{delivered, failed, Harness};
use ms_core::config::MixedArchivePolicy;
use ms_core::{MediaKind, OwnerSession, Profile};
use ms_pipeline::{DeliverableKind, Outcome};

#[tokio::test]
async fn mixed_archive_skips_the_other_kind() {
    let mut h = Harness::new();
    let bundle = h.zip_source(
        "mixed.zip",
        &[("c.txt", b"notes"), ("b.mp4", b"video"), ("a.mp3", b"audio")],
    );
    let id = h.submit("olga", bundle, "mixed.zip").unwrap();

    // Both kinds are present, so every profile is offered.
    let offered = h.offered(&id).await;
    assert_eq!(offered, Profile::ALL.to_vec());

    h.pipeline
        .choose_profile(&OwnerSession::from("olga"), &id, "audio-128k")
        .unwrap();

    let (file_name, kind, count, _, report) = delivered(h.next_for(&id).await);
    assert_eq!(kind, DeliverableKind::Single);
    assert_eq!(count, 1);
    assert_eq!(file_name, "compressed_a.mp3");

    let inputs: Vec<(&str, MediaKind)> = report
        .outcomes
        .iter()
        .map(|o| (o.input.original_name.as_str(), o.input.media_kind))
        .collect();
    assert_eq!(
        inputs,
        vec![("a.mp3", MediaKind::Audio), ("b.mp4", MediaKind::Video)]
    );
    assert!(report.outcomes[0].is_success());
    assert!(matches!(report.outcomes[1].outcome, Outcome::Skipped { .. }));

    assert_eq!(report.ignored.len(), 1);
    assert_eq!(report.ignored[0].original_name, "c.txt");
    let summary = report.summary();
    assert!(summary.contains("skipped: b.mp4"));
    assert!(summary.contains("ignored: c.txt"));

    // Only the audio input reached the encoder.
    assert_eq!(h.encoder.calls().len(), 1);
    h.wait_gone(&id).await;
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn mixed_archive_can_be_rejected() {
    let mut h = Harness::with_config(|c| c.archive.mixed_policy = MixedArchivePolicy::Reject);
    let bundle = h.zip_source("mixed.zip", &[("a.mp3", b"audio"), ("b.mp4", b"video")]);
    let id = h.submit("pete", bundle, "mixed.zip").unwrap();

    let (kind, message) = failed(h.next_for(&id).await);
    assert_eq!(kind, "UnsupportedInputError");
    assert!(message.contains("mixes audio and video"));
    h.wait_gone(&id).await;
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn traversal_entry_is_rejected_and_nothing_is_written() {
    let mut h = Harness::new();
    let bundle = h.zip_source(
        "evil.zip",
        &[("song.mp3", b"audio"), ("../../etc/passwd", b"root:x:0:0")],
    );
    let id = h.submit("quinn", bundle, "evil.zip").unwrap();

    let (kind, message) = failed(h.next_for(&id).await);
    assert_eq!(kind, "CorruptArchiveError");
    assert!(message.contains("../../etc/passwd"));

    // <root>/<job>/extract/../../etc/passwd would land at <root>/etc/passwd.
    assert!(!h.scratch_root().join("etc").exists());
    h.wait_gone(&id).await;
    assert!(h.scratch_is_empty());
    assert!(h.encoder.calls().is_empty());
}

#[tokio::test]
async fn garbage_zip_is_corrupt() {
    let mut h = Harness::new();
    let id = h
        .submit("sam", h.source("broken.zip", b"PK\x03\x04 not really"), "broken.zip")
        .unwrap();

    let (kind, _) = failed(h.next_for(&id).await);
    assert_eq!(kind, "CorruptArchiveError");
    h.wait_gone(&id).await;
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn archive_without_media_is_unsupported() {
    let mut h = Harness::new();
    let bundle = h.zip_source(
        "docs.zip",
        &[("readme.txt", b"hi"), ("__MACOSX/._song.mp3", b"junk")],
    );
    let id = h.submit("tina", bundle, "docs.zip").unwrap();

    let (kind, message) = failed(h.next_for(&id).await);
    assert_eq!(kind, "UnsupportedInputError");
    assert!(message.contains("no audio or video"));
}

#[tokio::test]
async fn extraction_limit_is_enforced() {
    let mut h = Harness::with_config(|c| c.storage.max_extracted_bytes = 100);
    let big = vec![7u8; 4096];
    let bundle = h.zip_source("big.zip", &[("big.wav", &big)]);
    let id = h.submit("uma", bundle, "big.zip").unwrap();

    let (kind, _) = failed(h.next_for(&id).await);
    assert_eq!(kind, "CorruptArchiveError");
    h.wait_gone(&id).await;
    assert!(h.scratch_is_empty());
}

#[tokio::test]
async fn duplicate_stems_get_distinct_outputs() {
    let mut h = Harness::new();
    let bundle = h.zip_source(
        "dupes.zip",
        &[("cd1/track.mp3", b"one"), ("cd2/track.mp3", b"two")],
    );
    let id = h.submit("vic", bundle, "dupes.zip").unwrap();

    h.offered(&id).await;
    h.pipeline
        .choose_profile(&OwnerSession::from("vic"), &id, "audio-64k")
        .unwrap();

    let (_, kind, count, mut entries, report) = delivered(h.next_for(&id).await);
    assert_eq!(kind, DeliverableKind::Archive);
    assert_eq!(count, 2);
    entries.sort();
    assert_eq!(entries, vec!["compressed_track.mp3", "compressed_track_2.mp3"]);

    let names: Vec<&str> = report
        .outcomes
        .iter()
        .map(|o| o.input.original_name.as_str())
        .collect();
    assert_eq!(names, vec!["cd1/track.mp3", "cd2/track.mp3"]);
}

#[tokio::test]
async fn zip_detected_by_mime_type() {
    let mut h = Harness::new();
    let bundle = h.zip_source("upload.bin", &[("a.mp3", b"a")]);
    let id = h
        .pipeline
        .submit(
            OwnerSession::from("wes"),
            bundle,
            "upload.bin",
            Some("application/zip"),
        )
        .unwrap();

    let offered = h.offered(&id).await;
    assert!(offered.iter().all(|p| p.kind() == MediaKind::Audio));
}
