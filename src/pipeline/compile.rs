//! Compilation orchestration: run a backend against preprocessed source
//! inside a fresh workspace and classify the outcome.
//!
//! ## Primary passes
//!
//! pdfLaTeX needs a second run to resolve cross-references, and a first run
//! that fails is worth one retry (stale aux state, transient font map
//! generation). Those are separate transitions:
//!
//! ```text
//! First ──ok──▶ ResolveReferences ──any──▶ CheckOutput
//!   │
//!   └─fail─▶ Retry ──ok──▶ CheckOutput
//!                  └─fail─▶ Reject
//! ```
//!
//! A pass that exceeds the time budget ends the sequence with
//! [`FailureKind::Timeout`] whatever state it was in.
//!
//! ## Fallback
//!
//! Tectonic runs its own reruns internally, so it gets exactly one process.

use crate::config::ConversionConfig;
use crate::error::{FailureKind, FailureRecord};
use crate::output::{Backend, CompilationAttempt, CompiledDocument};
use crate::pipeline::diagnostics::{
    bounded_capture, prefix_chars, scrub, suffix_chars, summarize, with_hints, MAX_EXCERPT_CHARS,
};
use crate::pipeline::preprocess::PreprocessResult;
use crate::pipeline::provision::provision;
use crate::pipeline::workspace::{Workspace, OUTPUT_FILE, SOURCE_FILE};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

// ── Primary state machine ────────────────────────────────────────────────────

/// A pdfLaTeX run within one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryPass {
    First,
    /// Second run after the first one failed.
    Retry,
    /// Second run after the first one succeeded; its exit status is ignored.
    ResolveReferences,
}

impl PrimaryPass {
    pub fn number(self) -> u32 {
        match self {
            PrimaryPass::First => 1,
            PrimaryPass::Retry | PrimaryPass::ResolveReferences => 2,
        }
    }
}

/// What happens after a pass exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Run(PrimaryPass),
    CheckOutput,
    Reject,
}

pub fn next_transition(pass: PrimaryPass, succeeded: bool) -> Transition {
    match (pass, succeeded) {
        (PrimaryPass::First, true) => Transition::Run(PrimaryPass::ResolveReferences),
        (PrimaryPass::First, false) => Transition::Run(PrimaryPass::Retry),
        (PrimaryPass::Retry, true) => Transition::CheckOutput,
        (PrimaryPass::Retry, false) => Transition::Reject,
        (PrimaryPass::ResolveReferences, _) => Transition::CheckOutput,
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

/// Compile `pre.transformed_source` with `backend`.
///
/// Each compiler process is bounded by `budget`. The workspace is released
/// before this returns, on success and failure alike.
pub async fn compile(
    pre: &PreprocessResult,
    backend: Backend,
    output_name: &str,
    budget: Duration,
    config: &ConversionConfig,
) -> Result<CompiledDocument, FailureRecord> {
    let program = match backend {
        Backend::Primary => config.pdflatex_program().to_path_buf(),
        Backend::Fallback => provision(config.provisioner(), config.download_timeout()).await?,
    };

    let ws = config.workspace_manager().acquire().await?;
    let result = compile_in(&ws, &program, pre, backend, output_name, budget, config).await;
    ws.release().await;

    match &result {
        Ok(doc) => info!(
            backend = %backend,
            bytes = doc.size,
            passes = doc.attempts.len(),
            "compilation succeeded"
        ),
        Err(e) => warn!(backend = %backend, kind = ?e.kind, "compilation failed: {}", e.message),
    }
    result
}

async fn compile_in(
    ws: &Workspace,
    program: &Path,
    pre: &PreprocessResult,
    backend: Backend,
    output_name: &str,
    budget: Duration,
    config: &ConversionConfig,
) -> Result<CompiledDocument, FailureRecord> {
    ws.write_source(&pre.transformed_source).await?;

    let attempts = match backend {
        Backend::Primary => run_primary(ws, program, budget, config).await?,
        Backend::Fallback => run_fallback(ws, program, pre, budget, config).await?,
    };

    let bytes = read_output(ws, backend).await.map_err(|missing| {
        if backend == Backend::Fallback {
            let text = scrubbed_output(attempts.last(), ws);
            missing.with_excerpt(with_hints(prefix_chars(&text, MAX_EXCERPT_CHARS), &pre.corrections))
        } else {
            missing
        }
    })?;

    Ok(CompiledDocument {
        size: bytes.len(),
        bytes,
        output_name: output_name.to_string(),
        backend,
        corrections: pre.corrections.clone(),
        attempts,
    })
}

async fn run_primary(
    ws: &Workspace,
    program: &Path,
    budget: Duration,
    config: &ConversionConfig,
) -> Result<Vec<CompilationAttempt>, FailureRecord> {
    let mut attempts = Vec::with_capacity(2);
    let mut pass = PrimaryPass::First;

    loop {
        let attempt = run_pass(
            Backend::Primary,
            program,
            primary_args(ws),
            pass.number(),
            ws,
            budget,
            config,
        )
        .await?;
        let ok = attempt.succeeded();
        attempts.push(attempt);

        match next_transition(pass, ok) {
            Transition::Run(next) => {
                debug!(workspace = %ws.id(), ?next, "running next pdflatex pass");
                pass = next;
            }
            Transition::CheckOutput => {
                if pass == PrimaryPass::ResolveReferences && !ok {
                    warn!(workspace = %ws.id(), "reference pass exited non-zero; keeping first-pass output");
                }
                return Ok(attempts);
            }
            Transition::Reject => {
                let text = scrubbed_output(attempts.last(), ws);
                return Err(FailureRecord::new(FailureKind::CompilationRejected, summarize(&text))
                    .with_excerpt(suffix_chars(&text, MAX_EXCERPT_CHARS)));
            }
        }
    }
}

async fn run_fallback(
    ws: &Workspace,
    program: &Path,
    pre: &PreprocessResult,
    budget: Duration,
    config: &ConversionConfig,
) -> Result<Vec<CompilationAttempt>, FailureRecord> {
    let attempt = run_pass(
        Backend::Fallback,
        program,
        fallback_args(ws),
        1,
        ws,
        budget,
        config,
    )
    .await?;

    if !attempt.succeeded() {
        let text = scrubbed_output(Some(&attempt), ws);
        return Err(FailureRecord::new(FailureKind::CompilationRejected, summarize(&text))
            .with_excerpt(with_hints(prefix_chars(&text, MAX_EXCERPT_CHARS), &pre.corrections)));
    }
    Ok(vec![attempt])
}

// ── Process plumbing ─────────────────────────────────────────────────────────

fn primary_args(ws: &Workspace) -> Vec<OsString> {
    let mut outdir = OsString::from("-output-directory=");
    outdir.push(ws.root_path());
    vec![
        "-interaction=nonstopmode".into(),
        "-halt-on-error".into(),
        outdir,
        SOURCE_FILE.into(),
    ]
}

fn fallback_args(ws: &Workspace) -> Vec<OsString> {
    vec![
        "--outdir".into(),
        ws.root_path().as_os_str().to_owned(),
        "--chatter".into(),
        "minimal".into(),
        SOURCE_FILE.into(),
    ]
}

/// Spawn one compiler process in the workspace and wait for it, killing it
/// if it outlives `budget`.
async fn run_pass(
    backend: Backend,
    program: &Path,
    args: Vec<OsString>,
    pass_number: u32,
    ws: &Workspace,
    budget: Duration,
    config: &ConversionConfig,
) -> Result<CompilationAttempt, FailureRecord> {
    if let Some(o) = &config.observer {
        o.on_attempt_start(backend, pass_number);
    }

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .current_dir(ws.root_path())
        .envs(config.subprocess_env().iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let child = cmd.spawn().map_err(|e| {
        let kind = match backend {
            Backend::Primary => FailureKind::ResourceError,
            Backend::Fallback => FailureKind::ProvisioningError,
        };
        FailureRecord::new(
            kind,
            format!("Could not launch {}: {}", backend.engine(), e),
        )
    })?;

    // Dropping the in-flight future on timeout drops the child, and
    // kill_on_drop terminates it.
    let waited = tokio::time::timeout(budget, child.wait_with_output()).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let attempt = match waited {
        Ok(Ok(output)) => CompilationAttempt {
            backend,
            pass_number,
            exit_status: output.status.code(),
            captured_stdout: bounded_capture(&output.stdout),
            captured_stderr: bounded_capture(&output.stderr),
            duration_ms,
        },
        Ok(Err(e)) => {
            return Err(FailureRecord::new(
                FailureKind::ResourceError,
                format!("Waiting for {} failed: {}", backend.engine(), e),
            ));
        }
        Err(_) => {
            let attempt = CompilationAttempt {
                backend,
                pass_number,
                exit_status: None,
                captured_stdout: String::new(),
                captured_stderr: String::new(),
                duration_ms,
            };
            if let Some(o) = &config.observer {
                o.on_attempt_complete(&attempt);
            }
            warn!(
                workspace = %ws.id(),
                backend = %backend,
                pass = pass_number,
                "compiler killed after exceeding time budget"
            );
            return Err(FailureRecord::new(
                FailureKind::Timeout,
                format!(
                    "{} exceeded the {:.1}s time budget on pass {}",
                    backend.engine(),
                    budget.as_secs_f64(),
                    pass_number
                ),
            ));
        }
    };

    info!(
        workspace = %ws.id(),
        backend = %backend,
        pass = pass_number,
        exit = ?attempt.exit_status,
        duration_ms,
        "compiler pass finished"
    );
    if let Some(o) = &config.observer {
        o.on_attempt_complete(&attempt);
    }
    Ok(attempt)
}

fn scrubbed_output(attempt: Option<&CompilationAttempt>, ws: &Workspace) -> String {
    attempt
        .map(|a| scrub(&a.combined_output(), ws.root_path()))
        .unwrap_or_default()
}

async fn read_output(ws: &Workspace, backend: Backend) -> Result<Vec<u8>, FailureRecord> {
    let missing = || {
        FailureRecord::new(
            FailureKind::OutputMissing,
            format!("{} finished without producing {}", backend.engine(), OUTPUT_FILE),
        )
    };

    match tokio::fs::read(ws.output_path()).await {
        Ok(bytes) if bytes.is_empty() => Err(missing()),
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(missing()),
        Err(e) => Err(FailureRecord::new(
            FailureKind::ResourceError,
            format!("Could not read {}: {}", OUTPUT_FILE, e),
        )),
    }
}
