//! Integration tests for the compile and rasterize pipelines.
//!
//! Compiler behaviour is simulated with small shell scripts standing in for
//! pdflatex and tectonic, so these run anywhere a POSIX shell exists. Tests
//! that need the real engines or libpdfium are gated behind `E2E_ENABLED`.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture
//!
//! Include the real-toolchain tests:
//!   E2E_ENABLED=1 cargo test --test pipeline -- --nocapture

#![cfg(unix)]

use pdfsmith::{
    compile_markup, compile_markup_chain, compile_markup_to_file, rasterize, Backend,
    CompilationAttempt, CompileRequest, ConversionConfig, FailureKind, PipelineObserver,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Test helpers ─────────────────────────────────────────────────────────────

const HELLO: &str = "\\documentclass{article}\n\\begin{document}\nHello\n\\end{document}\n";

/// Counts workspace and attempt events.
#[derive(Default)]
struct Recorder {
    acquired: AtomicUsize,
    released: AtomicUsize,
    passes: Mutex<Vec<(Backend, u32, Option<i32>)>>,
}

impl Recorder {
    fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn passes(&self) -> Vec<(Backend, u32, Option<i32>)> {
        self.passes.lock().unwrap().clone()
    }
}

impl PipelineObserver for Recorder {
    fn on_workspace_acquired(&self, _id: &str) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn on_workspace_released(&self, _id: &str, removed: bool) {
        assert!(removed, "workspace deletion failed");
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_complete(&self, attempt: &CompilationAttempt) {
        self.passes
            .lock()
            .unwrap()
            .push((attempt.backend, attempt.pass_number, attempt.exit_status));
    }
}

/// Write an executable `/bin/sh` script.
fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

const WRITES_PDF: &str = "printf '%%PDF-1.4\\n%%fake\\n' > document.pdf\necho 'Output written on document.pdf'\nexit 0";

struct Harness {
    _tools: tempfile::TempDir,
    scratch: tempfile::TempDir,
    tools_dir: PathBuf,
    recorder: Arc<Recorder>,
}

impl Harness {
    fn new() -> Self {
        let tools = tempfile::tempdir().unwrap();
        let tools_dir = tools.path().to_path_buf();
        Self {
            _tools: tools,
            scratch: tempfile::tempdir().unwrap(),
            tools_dir,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn tool(&self, name: &str, body: &str) -> PathBuf {
        script(&self.tools_dir, name, body)
    }

    fn config(&self, pdflatex: &Path, tectonic: Option<&Path>, budget: Duration) -> ConversionConfig {
        let observer: Arc<dyn PipelineObserver> = self.recorder.clone();
        // Without a script, point at a path that does not exist so the
        // fallback never reaches the network.
        let tectonic = tectonic
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.tools_dir.join("no-tectonic"));
        ConversionConfig::builder()
            .scratch_root(self.scratch.path())
            .pdflatex(pdflatex)
            .tectonic(tectonic)
            .compile_timeout(budget)
            .download_timeout_secs(5)
            .observer(observer)
            .build()
            .unwrap()
    }

    /// Every acquired workspace was released and nothing is left on disk.
    fn assert_clean(&self) {
        assert_eq!(self.recorder.acquired(), self.recorder.released());
        let leftovers: Vec<_> = std::fs::read_dir(self.scratch.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect();
        assert!(leftovers.is_empty(), "leftover workspaces: {leftovers:?}");
    }
}

fn request(src: &str) -> CompileRequest {
    CompileRequest::new(src, "out.pdf")
}

// ── Primary backend ──────────────────────────────────────────────────────────

#[tokio::test]
async fn primary_success_runs_two_passes() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", WRITES_PDF);
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let doc = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap();

    assert!(doc.bytes.starts_with(b"%PDF"));
    assert_eq!(doc.size, doc.bytes.len());
    assert_eq!(doc.output_name, "out.pdf");
    assert_eq!(doc.backend, Backend::Primary);
    assert_eq!(
        h.recorder.passes(),
        vec![(Backend::Primary, 1, Some(0)), (Backend::Primary, 2, Some(0))]
    );
    assert_eq!(h.recorder.acquired(), 1);
    h.assert_clean();
}

#[tokio::test]
async fn primary_receives_non_interactive_flags() {
    let h = Harness::new();
    let pdflatex = h.tool(
        "pdflatex",
        "[ \"$1\" = -interaction=nonstopmode ] || exit 9\n\
         [ \"$2\" = -halt-on-error ] || exit 9\n\
         case \"$3\" in -output-directory=*) ;; *) exit 9 ;; esac\n\
         [ \"$4\" = document.tex ] || exit 9\n\
         [ -f document.tex ] || exit 9\n\
         printf '%%PDF-1.4\\n' > \"${3#-output-directory=}/document.pdf\"",
    );
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let doc = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap();
    assert!(doc.attempts.iter().all(|a| a.succeeded()));
    h.assert_clean();
}

#[tokio::test]
async fn primary_retry_after_first_failure_succeeds() {
    let h = Harness::new();
    let pdflatex = h.tool(
        "pdflatex",
        "if [ -f first-pass-done ]; then\n\
           printf '%%PDF-1.4\\n' > document.pdf\n\
           exit 0\n\
         fi\n\
         touch first-pass-done\n\
         echo '! Undefined control sequence.'\n\
         exit 1",
    );
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let doc = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap();

    assert_eq!(doc.attempts.len(), 2);
    assert!(!doc.attempts[0].succeeded());
    assert!(doc.attempts[1].succeeded());
    h.assert_clean();
}

#[tokio::test]
async fn primary_failing_twice_is_rejected_with_scrubbed_diagnostics() {
    let h = Harness::new();
    let pdflatex = h.tool(
        "pdflatex",
        "echo 'This is pdfTeX, Version 3.141592653'\n\
         echo \"($3/document.tex\"\n\
         echo \"! LaTeX Error: File \\`moderncv.cls' not found.\"\n\
         echo 'l.1 \\documentclass{moderncv}'\n\
         exit 1",
    );
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let err = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::CompilationRejected);
    assert_eq!(err.http_status(), 400);
    assert!(err.message.contains("moderncv.cls"), "{}", err.message);
    let excerpt = err.diagnostic_excerpt.unwrap();
    let scratch = h.scratch.path().to_string_lossy().to_string();
    assert!(!excerpt.contains(&scratch), "workspace path leaked: {excerpt}");
    assert!(!err.message.contains(&scratch));
    assert_eq!(h.recorder.passes().len(), 2);
    h.assert_clean();
}

#[tokio::test]
async fn primary_without_output_is_output_missing() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "echo 'No pages of output.'\nexit 0");
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let err = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::OutputMissing);
    assert_eq!(err.http_status(), 500);
    h.assert_clean();
}

#[tokio::test]
async fn empty_output_file_counts_as_missing() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", ": > document.pdf\nexit 0");
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let err = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::OutputMissing);
    h.assert_clean();
}

#[tokio::test]
async fn primary_over_budget_times_out_without_retry() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "exec sleep 30");
    let config = h.config(&pdflatex, None, Duration::from_millis(500));

    let started = Instant::now();
    let err = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Timeout);
    assert_eq!(err.http_status(), 408);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(h.recorder.passes(), vec![(Backend::Primary, 1, None)]);
    h.assert_clean();
}

#[tokio::test]
async fn missing_primary_binary_is_resource_error() {
    let h = Harness::new();
    let config = h.config(&h.tools_dir.join("no-such-pdflatex"), None, Duration::from_secs(5));

    let err = compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::ResourceError);
    h.assert_clean();
}

#[tokio::test]
async fn compiler_sees_preprocessed_source() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", &format!("cat document.tex\n{WRITES_PDF}"));
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let src = "\\documentclass{article}\\begin{document}\\faEnvelope x@y.com\\end{document}";
    let doc = compile_markup(&request(src), Backend::Primary, &config)
        .await
        .unwrap();

    assert_eq!(doc.corrections.len(), 1);
    assert!(doc.corrections[0].description.contains("FontAwesome"));
    let seen = &doc.attempts[0].captured_stdout;
    assert!(seen.contains("\\textbf{@} x@y.com"), "{seen}");
    assert!(!seen.contains("\\faEnvelope"));
}

// ── Fallback backend ─────────────────────────────────────────────────────────

#[tokio::test]
async fn fallback_runs_once_with_outdir() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "exit 1");
    let tectonic = h.tool(
        "tectonic",
        "[ \"$1\" = --outdir ] || exit 9\n\
         [ \"$3\" = --chatter ] && [ \"$4\" = minimal ] || exit 9\n\
         [ \"$5\" = document.tex ] || exit 9\n\
         printf '%%PDF-1.5\\n' > \"$2/document.pdf\"",
    );
    let config = h.config(&pdflatex, Some(&tectonic), Duration::from_secs(10));

    let doc = compile_markup(&request(HELLO), Backend::Fallback, &config)
        .await
        .unwrap();

    assert_eq!(doc.backend, Backend::Fallback);
    assert!(doc.bytes.starts_with(b"%PDF-1.5"));
    assert_eq!(h.recorder.passes(), vec![(Backend::Fallback, 1, Some(0))]);
    h.assert_clean();
}

#[tokio::test]
async fn fallback_failure_lists_corrections_as_hints() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "exit 1");
    let tectonic = h.tool(
        "tectonic",
        "echo 'note: Running TeX ...' \n\
         echo 'error: document.tex:3: Undefined control sequence' >&2\n\
         exit 1",
    );
    let config = h.config(&pdflatex, Some(&tectonic), Duration::from_secs(10));

    let src = "\\documentclass{article}\n\\begin{document}\\faPhone 555 \\badmacro\\end{document}";
    let err = compile_markup(&request(src), Backend::Fallback, &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::CompilationRejected);
    assert_eq!(err.message, "error: document.tex:3: Undefined control sequence");
    let excerpt = err.diagnostic_excerpt.unwrap();
    assert!(excerpt.contains("Running TeX"));
    assert!(excerpt.contains("\\faPhone"), "{excerpt}");
    assert_eq!(h.recorder.passes().len(), 1);
    h.assert_clean();
}

#[tokio::test]
async fn fallback_without_output_is_output_missing() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "exit 1");
    let tectonic = h.tool("tectonic", "exit 0");
    let config = h.config(&pdflatex, Some(&tectonic), Duration::from_secs(10));

    let err = compile_markup(&request(HELLO), Backend::Fallback, &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::OutputMissing);
    h.assert_clean();
}

#[tokio::test]
async fn fallback_timeout() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "exit 1");
    let tectonic = h.tool("tectonic", "exec sleep 30");
    let config = h.config(&pdflatex, Some(&tectonic), Duration::from_millis(400));

    let err = compile_markup(&request(HELLO), Backend::Fallback, &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
    h.assert_clean();
}

#[tokio::test]
async fn unprovisionable_fallback_acquires_nothing() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", WRITES_PDF);
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let err = compile_markup(&request(HELLO), Backend::Fallback, &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::ProvisioningError);
    assert_eq!(err.http_status(), 500);
    assert_eq!(h.recorder.acquired(), 0);

    // The primary backend is unaffected.
    compile_markup(&request(HELLO), Backend::Primary, &config)
        .await
        .unwrap();
    h.assert_clean();
}

// ── Chains, files, cancellation, concurrency ─────────────────────────────────

#[tokio::test]
async fn chain_falls_through_to_primary() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", WRITES_PDF);
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let doc = compile_markup_chain(&request(HELLO), &[Backend::Fallback, Backend::Primary], &config)
        .await
        .unwrap();
    assert_eq!(doc.backend, Backend::Primary);
    h.assert_clean();
}

#[tokio::test]
async fn chain_returns_last_failure() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "echo '! Emergency stop.'\nexit 1");
    let config = h.config(&pdflatex, None, Duration::from_secs(10));

    let err = compile_markup_chain(&request(HELLO), &[Backend::Fallback, Backend::Primary], &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::CompilationRejected);
    h.assert_clean();
}

#[tokio::test]
async fn compile_to_file_writes_pdf() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", WRITES_PDF);
    let config = h.config(&pdflatex, None, Duration::from_secs(10));
    let out_dir = tempfile::tempdir().unwrap();
    let out = out_dir.path().join("nested").join("cv.pdf");

    let doc = compile_markup_to_file(&request(HELLO), Backend::Primary, &out, &config)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), doc.bytes);
    h.assert_clean();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_request_releases_workspace() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", "exec sleep 30");
    let config = h.config(&pdflatex, None, Duration::from_secs(60));

    let task = tokio::spawn(async move {
        compile_markup(&request(HELLO), Backend::Primary, &config).await
    });

    // Wait until the workspace exists, then abandon the request.
    let deadline = Instant::now() + Duration::from_secs(10);
    while h.recorder.acquired() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    task.abort();
    let _ = task.await;

    assert_eq!(h.recorder.acquired(), 1);
    h.assert_clean();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_use_distinct_workspaces() {
    let h = Harness::new();
    let pdflatex = h.tool("pdflatex", &format!("sleep 0.2\n{WRITES_PDF}"));
    let config = h.config(&pdflatex, None, Duration::from_secs(20));

    let mut tasks = Vec::new();
    for i in 0..6 {
        let config = config.clone();
        tasks.push(tokio::spawn(async move {
            compile_markup(&CompileRequest::new(HELLO, format!("doc-{i}")), Backend::Primary, &config)
                .await
        }));
    }
    for (i, t) in tasks.into_iter().enumerate() {
        let doc = t.await.unwrap().unwrap();
        assert_eq!(doc.output_name, format!("doc-{i}.pdf"));
    }

    assert_eq!(h.recorder.acquired(), 6);
    h.assert_clean();
}

// ── Real toolchain (E2E) ─────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set.
macro_rules! e2e_skip_unless_enabled {
    () => {
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
    };
}

/// A valid PDF with `pages` blank 200×200pt pages and a correct xref table.
fn minimal_pdf(pages: usize) -> Vec<u8> {
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            (0..pages)
                .map(|i| format!("{} 0 R", i + 3))
                .collect::<Vec<_>>()
                .join(" "),
            pages
        ),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 200] >>".to_string());
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for off in offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

#[tokio::test]
async fn e2e_one_page_pdf_rasterizes_to_one_jpeg() {
    e2e_skip_unless_enabled!();
    let config = ConversionConfig::default();

    let out = rasterize(minimal_pdf(1), 3, 150, &config).await.unwrap();
    assert_eq!(out.pages.len(), 1);
    assert_eq!(out.pages[0].index, 1);
    assert_eq!(out.pages[0].mime_format, "image/jpeg");
    assert!(out.pages[0].encoded_bytes.starts_with(&[0xFF, 0xD8]));
}

#[tokio::test]
async fn e2e_page_cap() {
    e2e_skip_unless_enabled!();
    let config = ConversionConfig::default();

    for (n, expected) in [(1usize, 1usize), (3, 3), (10, 3)] {
        let out = rasterize(minimal_pdf(n), 3, 150, &config).await.unwrap();
        let indices: Vec<_> = out.pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, (1..=expected).collect::<Vec<_>>(), "n={n}");
        assert_eq!(out.document_pages, n);
    }
}

#[tokio::test]
async fn e2e_zero_page_pdf_produces_nothing() {
    e2e_skip_unless_enabled!();
    let config = ConversionConfig::default();

    let err = rasterize(minimal_pdf(0), 3, 150, &config).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::NoPagesProduced, "{err}");
    assert_eq!(err.http_status(), 500);
}

#[tokio::test]
async fn e2e_pdflatex_compiles_icon_document() {
    e2e_skip_unless_enabled!();
    let scratch = tempfile::tempdir().unwrap();
    let config = ConversionConfig::builder()
        .scratch_root(scratch.path())
        .build()
        .unwrap();

    let src = "\\documentclass{article}\n\\begin{document}\n\\faEnvelope x@y.com \\href{https://x.org}{site}\n\\end{document}\n";
    let doc = compile_markup(&request(src), Backend::Primary, &config)
        .await
        .unwrap();
    assert!(doc.bytes.starts_with(b"%PDF"));
    assert_eq!(doc.corrections.len(), 2);

    let pages = rasterize(doc.bytes, 3, 150, &config).await.unwrap();
    assert_eq!(pages.pages.len(), 1);
}

#[tokio::test]
async fn e2e_tectonic_compiles_after_download() {
    e2e_skip_unless_enabled!();
    let scratch = tempfile::tempdir().unwrap();
    let config = ConversionConfig::builder()
        .scratch_root(scratch.path())
        .compile_timeout_secs(300)
        .download_timeout_secs(600)
        .build()
        .unwrap();

    let doc = compile_markup(&request(HELLO), Backend::Fallback, &config)
        .await
        .unwrap();
    assert!(doc.bytes.starts_with(b"%PDF"));
}
