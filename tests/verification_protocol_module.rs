use farmctl::verification::{
    verify_and_signal, verify_artifact, LocalFsProbe, VerificationConfig, VerificationStage,
};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn config() -> VerificationConfig {
    VerificationConfig {
        existence_poll_interval: Duration::from_millis(10),
        existence_timeout: Duration::from_secs(2),
        stability_poll_interval: Duration::from_millis(30),
        stability_timeout: Duration::from_secs(3),
        stable_polls: 3,
    }
}

#[test]
fn zero_byte_placeholder_is_not_reported_ready() {
    let dir = tempdir().expect("tempdir");
    let artifact = dir.path().join("capture.mp4");
    fs::write(&artifact, b"").expect("placeholder");

    let producer_path = artifact.clone();
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        let mut file = OpenOptions::new()
            .append(true)
            .open(&producer_path)
            .expect("open artifact");
        for _ in 0..4 {
            file.write_all(&[7_u8; 256]).expect("write chunk");
            file.flush().expect("flush");
            thread::sleep(Duration::from_millis(20));
        }
    });

    let marker = dir.path().join("ready").join("capture.json");
    let probe = LocalFsProbe::new();
    let report = verify_and_signal(
        &probe,
        artifact.to_str().expect("utf8 path"),
        &config(),
        Some(&marker),
        None,
    );
    producer.join().expect("producer");

    assert!(report.ready, "{}", report.summary());
    assert_eq!(report.final_size, Some(1024));
    let existence = report.stage(VerificationStage::Existence).expect("existence");
    assert!(existence.elapsed_ms >= 100, "ready before any bytes were written");

    let signalled: Value =
        serde_json::from_str(&fs::read_to_string(&marker).expect("marker")).expect("marker json");
    assert_eq!(signalled["ready"], Value::Bool(true));
    assert_eq!(signalled["final_size"], Value::from(1024));
}

#[test]
fn rooted_probe_resolves_device_style_paths() {
    let dir = tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join("sdcard")).expect("sdcard");
    fs::write(dir.path().join("sdcard/shot.png"), [1_u8; 64]).expect("artifact");

    let probe = LocalFsProbe::rooted(dir.path());
    let mut fast = config();
    fast.stability_poll_interval = Duration::from_millis(5);
    let report = verify_artifact(&probe, "/sdcard/shot.png", &fast, None);
    assert!(report.ready, "{}", report.summary());
    assert_eq!(report.final_size, Some(64));
}

#[test]
fn missing_artifact_still_writes_failed_marker() {
    let dir = tempdir().expect("tempdir");
    let marker = dir.path().join("missing.json");
    let mut quick = config();
    quick.existence_timeout = Duration::from_millis(60);
    let report = verify_and_signal(
        &LocalFsProbe::rooted(dir.path()),
        "nothing.bin",
        &quick,
        Some(&marker),
        None,
    );
    assert!(!report.ready);
    assert_eq!(report.failed_stage, Some(VerificationStage::Existence));
    let signalled: Value =
        serde_json::from_str(&fs::read_to_string(&marker).expect("marker")).expect("marker json");
    assert_eq!(signalled["ready"], Value::Bool(false));
}

#[test]
fn stop_flag_ends_a_pending_wait() {
    let dir = tempdir().expect("tempdir");
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
    });
    let mut patient = config();
    patient.existence_timeout = Duration::from_secs(30);
    let report = verify_artifact(
        &LocalFsProbe::rooted(dir.path()),
        "never.bin",
        &patient,
        Some(&stop),
    );
    stopper.join().expect("stopper");
    assert!(!report.ready);
    let existence = report.stage(VerificationStage::Existence).expect("existence");
    assert_eq!(existence.detail.as_deref(), Some("aborted"));
    assert!(existence.elapsed_ms < 5_000);
}
