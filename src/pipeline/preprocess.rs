//! Preprocessing: best-effort compatibility fixes applied to LaTeX source
//! before it reaches a compiler.
//!
//! Two static, ordered tables drive the whole stage:
//!
//! - [`PACKAGE_RULES`]: a package plus the commands that need it. If the
//!   source uses one of the commands but never loads the package, a
//!   `\usepackage{...}` line is inserted right after the `\documentclass`
//!   line.
//! - [`COMMAND_SUBSTITUTIONS`]: commands one engine understands and the
//!   other rejects, each with a plain-text stand-in. Every occurrence is
//!   replaced literally.
//!
//! Matching is textual, not syntactic. A command inside a `%` comment still
//! counts. The stage never fails: unrecognised input passes through untouched
//! with no corrections.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// One auto-applied fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub description: String,
}

impl Correction {
    fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

/// Output of [`preprocess`]: the rewritten source and the fixes, in the order
/// they were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessResult {
    pub transformed_source: String,
    pub corrections: Vec<Correction>,
}

/// A package and the commands that require it.
#[derive(Debug)]
pub struct PackageRule {
    pub package: &'static str,
    /// Packages that already provide the commands (the package itself first).
    pub satisfied_by: &'static [&'static str],
    pub triggers: &'static [&'static str],
}

/// A command that one engine rejects and its plain-text replacement.
#[derive(Debug)]
pub struct CommandSubstitution {
    pub command: &'static str,
    pub replacement: &'static str,
    /// Human-readable origin of the command, used in the correction text.
    pub family: &'static str,
}

pub static PACKAGE_RULES: &[PackageRule] = &[
    PackageRule {
        package: "hyperref",
        satisfied_by: &["hyperref"],
        triggers: &[r"\href{", r"\url{", r"\hypersetup"],
    },
    PackageRule {
        package: "xcolor",
        satisfied_by: &["xcolor", "color"],
        triggers: &[r"\textcolor{", r"\color{", r"\definecolor{", r"\colorbox{"],
    },
    PackageRule {
        package: "graphicx",
        satisfied_by: &["graphicx", "graphics"],
        triggers: &[r"\includegraphics"],
    },
    PackageRule {
        package: "amsmath",
        satisfied_by: &["amsmath", "mathtools"],
        triggers: &[r"\begin{align", r"\text{", r"\DeclareMathOperator"],
    },
    PackageRule {
        package: "enumitem",
        satisfied_by: &["enumitem"],
        triggers: &[r"\setlist", "leftmargin=", "noitemsep"],
    },
    PackageRule {
        package: "titlesec",
        satisfied_by: &["titlesec"],
        triggers: &[r"\titleformat", r"\titlespacing"],
    },
    PackageRule {
        package: "tabularx",
        satisfied_by: &["tabularx"],
        triggers: &[r"\begin{tabularx}"],
    },
    PackageRule {
        package: "multicol",
        satisfied_by: &["multicol"],
        triggers: &[r"\begin{multicols}"],
    },
    PackageRule {
        package: "geometry",
        satisfied_by: &["geometry"],
        triggers: &[r"\geometry{", r"\newgeometry"],
    },
];

// A command ending in a letter only matches where the control word ends, so
// `\faPhone` leaves `\faPhoneAlt` alone. `\faEnvelope[regular]` must still
// precede `\faEnvelope`.
pub static COMMAND_SUBSTITUTIONS: &[CommandSubstitution] = &[
    CommandSubstitution {
        command: r"\faEnvelope[regular]",
        replacement: r"\textbf{@}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faEnvelopeO",
        replacement: r"\textbf{@}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faEnvelope",
        replacement: r"\textbf{@}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faPhone",
        replacement: r"\textbf{Tel:}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faMapMarker",
        replacement: r"\textbf{Loc:}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faLinkedin",
        replacement: r"\textbf{in}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faGithub",
        replacement: r"\textbf{git}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faGlobe",
        replacement: r"\textbf{web}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faPhoneAlt",
        replacement: r"\textbf{Tel:}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faMobile",
        replacement: r"\textbf{Tel:}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faMobileAlt",
        replacement: r"\textbf{Tel:}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faMapMarkerAlt",
        replacement: r"\textbf{Loc:}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faLinkedinIn",
        replacement: r"\textbf{in}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faGithubSquare",
        replacement: r"\textbf{git}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faGithubAlt",
        replacement: r"\textbf{git}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faGlobeAmericas",
        replacement: r"\textbf{web}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faGlobeEurope",
        replacement: r"\textbf{web}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\faAt",
        replacement: r"\textbf{@}",
        family: "FontAwesome",
    },
    CommandSubstitution {
        command: r"\input{glyphtounicode}",
        replacement: "",
        family: "pdfTeX-only",
    },
    CommandSubstitution {
        command: r"\pdfgentounicode=1",
        replacement: "",
        family: "pdfTeX-only",
    },
];

/// Apply both correction tables to `source`.
///
/// Pure and deterministic. Package corrections precede substitution
/// corrections in the returned list.
pub fn preprocess(source: &str) -> PreprocessResult {
    let (with_packages, mut corrections) = insert_missing_packages(source);
    let (transformed_source, substitutions) = substitute_commands(&with_packages);
    corrections.extend(substitutions);

    PreprocessResult {
        transformed_source,
        corrections,
    }
}

// ── Step 1–2: missing package declarations ───────────────────────────────────

static RE_USEPACKAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:usepackage|RequirePackage)\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap()
});

/// Every package name loaded by `\usepackage` / `\RequirePackage`,
/// including comma-separated lists.
fn declared_packages(source: &str) -> BTreeSet<&str> {
    RE_USEPACKAGE
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .flat_map(|m| m.as_str().split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Byte offset just past the newline ending the first `\documentclass` line.
fn documentclass_line_end(source: &str) -> Option<usize> {
    let start = source.find(r"\documentclass")?;
    source[start..].find('\n').map(|nl| start + nl + 1)
}

fn insert_missing_packages(source: &str) -> (String, Vec<Correction>) {
    let declared = declared_packages(source);
    let mut queued: Vec<&'static str> = Vec::new();
    let mut pending: Vec<Correction> = Vec::new();

    for rule in PACKAGE_RULES {
        if rule.satisfied_by.iter().any(|p| declared.contains(p)) {
            continue;
        }
        if let Some(trigger) = rule.triggers.iter().find(|t| source.contains(**t)) {
            queued.push(rule.package);
            pending.push(Correction::new(format!(
                "Added \\usepackage{{{}}}: source uses {} without loading it",
                rule.package, trigger
            )));
        }
    }

    if queued.is_empty() {
        return (source.to_string(), Vec::new());
    }

    let Some(at) = documentclass_line_end(source) else {
        debug!(
            packages = ?queued,
            "no \\documentclass line; missing packages left undeclared"
        );
        return (source.to_string(), Vec::new());
    };

    let mut out = String::with_capacity(source.len() + queued.len() * 24);
    out.push_str(&source[..at]);
    for package in &queued {
        out.push_str(&format!("\\usepackage{{{package}}}\n"));
    }
    out.push_str(&source[at..]);

    (out, pending)
}

// ── Step 3: incompatible command substitution ────────────────────────────────

fn substitute_commands(source: &str) -> (String, Vec<Correction>) {
    let mut out = source.to_string();
    let mut corrections = Vec::new();

    for sub in COMMAND_SUBSTITUTIONS {
        let Some(replaced) = replace_command(&out, sub.command, sub.replacement) else {
            continue;
        };
        out = replaced;
        let description = if sub.replacement.is_empty() {
            format!("Removed {} command {}", sub.family, sub.command)
        } else {
            format!(
                "Replaced {} command {} with {}",
                sub.family, sub.command, sub.replacement
            )
        };
        corrections.push(Correction::new(description));
    }

    (out, corrections)
}

/// Replace every occurrence of `command` that is not the prefix of a longer
/// control word. `None` when nothing matched.
fn replace_command(text: &str, command: &str, replacement: &str) -> Option<String> {
    let is_letter = |c: char| c.is_ascii_alphabetic();
    let control_word = command.ends_with(is_letter);

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut hit = false;
    while let Some(pos) = rest.find(command) {
        let end = pos + command.len();
        out.push_str(&rest[..pos]);
        if control_word && rest[end..].starts_with(is_letter) {
            out.push_str(command);
        } else {
            out.push_str(replacement);
            hit = true;
        }
        rest = &rest[end..];
    }
    out.push_str(rest);

    hit.then_some(out)
}

// ── Tests ────────────────────────────────────────────────────────────────────
