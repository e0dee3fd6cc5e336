mod common;

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use chrono::Utc;
use polyslim_core::job::{JobStatus, NewJob};
use polyslim_core::storage_ref::StorageRef;
use polyslim_db::JobStore;
use polyslim_worker::Outcome;

use common::{optimize_invocations, FakeOptimizer, Harness, Optimize};

#[tokio::test]
async fn full_job_completes_with_resolvable_output() {
    let h = Harness::new(FakeOptimizer::default());
    let job = h.submit(5_000, false).await;

    assert_matches!(h.worker.execute(job.id).await, Outcome::Completed(_));

    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.vertex_count_before, Some(50_000));
    assert_eq!(done.vertex_count_after, Some(4_000));
    assert!(done.preview_ref.is_none());
    assert!(done.error_detail.is_none());
    assert!(done.updated_at >= done.created_at);

    let output = done.output_ref.expect("output ref");
    assert!(output.is_local());
    assert_eq!(h.files.get(&output).await.unwrap(), b"glTF fake model");

    let calls = optimize_invocations(h.tool_dir.path());
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("-si 0.1 -cc"), "unexpected args: {}", calls[0]);
}

#[tokio::test]
async fn output_key_is_namespaced_by_owner() {
    let h = Harness::new(FakeOptimizer::default());
    let job = h.submit(5_000, false).await;
    h.worker.execute(job.id).await;

    let done = h.job(job.id).await;
    let url = h.files.sign_download(&done.output_ref.unwrap(), None).await;
    assert_eq!(url, format!("/files/outputs/ada@example.com/{}.glb", job.id));
}

#[tokio::test]
async fn non_zero_exit_fails_with_exit_code_and_stderr() {
    let h = Harness::new(FakeOptimizer {
        optimize: Optimize::Exit(3),
        ..Default::default()
    });
    let job = h.submit(5_000, false).await;

    assert_matches!(h.worker.execute(job.id).await, Outcome::Failed(_));

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.output_ref.is_none());
    let detail = failed.error_detail.unwrap();
    assert!(detail.contains("exited with code 3"), "{detail}");
    assert!(detail.contains("bad mesh"), "{detail}");
    assert!(!detail.contains("timed out"));
}

#[tokio::test]
async fn timeout_fails_distinctly_within_budget() {
    let h = Harness::with_config(
        FakeOptimizer {
            optimize: Optimize::Hang,
            ..Default::default()
        },
        |config| config.optimizer_timeout = Duration::from_secs(1),
    );
    let job = h.submit(5_000, false).await;

    let started = Instant::now();
    h.worker.execute(job.id).await;
    assert!(started.elapsed() < Duration::from_secs(8));

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let detail = failed.error_detail.unwrap();
    assert!(detail.contains("timed out after 1s"), "{detail}");
    assert!(!detail.contains("exited with code"));
}

#[tokio::test]
async fn unreachable_optimizer_fails_with_invocation_marker() {
    let h = Harness::with_config(FakeOptimizer::default(), |config| {
        config.optimizer_path = "/nonexistent/gltfpack".into();
    });
    let job = h.submit(5_000, false).await;

    h.worker.execute(job.id).await;

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.output_ref.is_none());
    // The probe soft-failed to the configured default before the run.
    assert_eq!(failed.vertex_count_before, Some(100_000));
    let detail = failed.error_detail.unwrap();
    assert!(detail.contains("failed to invoke"), "{detail}");
}

#[tokio::test]
async fn success_without_output_file_is_a_failure() {
    let h = Harness::new(FakeOptimizer {
        optimize: Optimize::NoOutput,
        ..Default::default()
    });
    let job = h.submit(5_000, false).await;

    h.worker.execute(job.id).await;

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_detail.unwrap().contains("no output file"));
}

#[tokio::test]
async fn preview_job_short_circuits() {
    let h = Harness::new(FakeOptimizer::default());
    let job = h.submit(10_000, true).await;

    assert_matches!(h.worker.execute(job.id).await, Outcome::Completed(_));

    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.vertex_count_before, Some(50_000));
    assert_eq!(done.vertex_count_after, Some(5_000));
    assert_eq!(done.preview_ref, Some(done.input_ref.clone()));
    assert!(done.output_ref.is_none());
    assert!(optimize_invocations(h.tool_dir.path()).is_empty());
}

#[tokio::test]
async fn zero_vertices_yields_a_finite_ratio() {
    let h = Harness::new(FakeOptimizer {
        input_vertices: Some(0),
        ..Default::default()
    });
    let job = h.submit(5_000, false).await;

    h.worker.execute(job.id).await;

    assert_eq!(h.job(job.id).await.status, JobStatus::Completed);
    let calls = optimize_invocations(h.tool_dir.path());
    assert!(calls[0].contains("-si 1 -cc"), "unexpected args: {}", calls[0]);
}

#[tokio::test]
async fn unparseable_probes_fall_back_to_documented_defaults() {
    let h = Harness::with_config(
        FakeOptimizer {
            input_vertices: None,
            output_vertices: None,
            ..Default::default()
        },
        |config| config.default_vertex_count = 80_000,
    );
    let job = h.submit(8_000, false).await;

    h.worker.execute(job.id).await;

    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.vertex_count_before, Some(80_000));
    assert_eq!(done.vertex_count_after, Some(8_000));
}

#[tokio::test]
async fn missing_input_fails_outside_degraded_mode() {
    let h = Harness::new(FakeOptimizer::default());
    let job = h
        .create(StorageRef::Remote("uploads/ada/missing.glb".into()), 10_000, true)
        .await;

    h.worker.execute(job.id).await;

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_detail.unwrap().contains("missing.glb"));
}

#[tokio::test]
async fn degraded_mode_completes_previews_synthetically() {
    let h = Harness::with_config(FakeOptimizer::default(), |config| {
        config.degraded_mode = true;
    });
    let input = StorageRef::Local("uploads/ada/missing.glb".into());
    let job = h.create(input.clone(), 10_000, true).await;

    assert_matches!(h.worker.execute(job.id).await, Outcome::Completed(_));

    let done = h.job(job.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.vertex_count_before, Some(100_000));
    assert_eq!(done.vertex_count_after, Some(10_000));
    assert_eq!(done.preview_ref, Some(input));
    assert!(done.preview_ref.as_ref().unwrap().is_local());
}

#[tokio::test]
async fn degraded_mode_never_fakes_full_jobs() {
    let h = Harness::with_config(FakeOptimizer::default(), |config| {
        config.degraded_mode = true;
    });
    let job = h
        .create(StorageRef::Remote("uploads/ada/missing.glb".into()), 5_000, false)
        .await;

    h.worker.execute(job.id).await;

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.output_ref.is_none());
}

#[tokio::test]
async fn degraded_mode_uses_local_storage_end_to_end() {
    let h = Harness::with_config(FakeOptimizer::default(), |config| {
        config.degraded_mode = true;
    });
    assert!(!h.files.remote_enabled());

    let full = h.submit(5_000, false).await;
    let preview = h.submit(10_000, true).await;
    h.worker.execute(full.id).await;
    h.worker.execute(preview.id).await;

    let full = h.job(full.id).await;
    let preview = h.job(preview.id).await;
    assert_eq!(full.status, JobStatus::Completed);
    assert!(full.output_ref.unwrap().is_local());
    assert_eq!(preview.status, JobStatus::Completed);
    assert!(preview.preview_ref.unwrap().is_local());
}

#[tokio::test]
async fn expired_jobs_fail() {
    let h = Harness::new(FakeOptimizer::default());
    let owner = Harness::owner();
    let input = h
        .files
        .put(b"x".to_vec(), "uploads/ada/old.glb")
        .await
        .unwrap();
    let mut new = NewJob::new(owner, input, 5_000, false, true, Utc::now());
    new.expiry_at = Utc::now() - chrono::Duration::minutes(1);
    let job = h.jobs.create(new).await.unwrap();

    h.worker.execute(job.id).await;

    let failed = h.job(job.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error_detail.unwrap().contains("expired"));
}

#[tokio::test]
async fn second_execution_is_skipped() {
    let h = Harness::new(FakeOptimizer::default());
    let job = h.submit(5_000, false).await;

    h.worker.execute(job.id).await;
    let first = h.job(job.id).await;
    assert_matches!(h.worker.execute(job.id).await, Outcome::Skipped);
    assert_eq!(h.job(job.id).await, first);
    assert_eq!(optimize_invocations(h.tool_dir.path()).len(), 1);
}

#[tokio::test]
async fn unknown_job_is_skipped() {
    let h = Harness::new(FakeOptimizer::default());
    assert_matches!(h.worker.execute(9_999).await, Outcome::Skipped);
}
