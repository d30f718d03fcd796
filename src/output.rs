//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Plan
//!
//! ```text
//! Source: jpeg 1600x1200, 48213 bytes
//! Output: webp, quality 70, lossless
//! 001 resize {"width":300,"height":null,...}
//! 002 flip
//! 003 watermark {"name":"logo.png","gravity":"southeast"}
//! ```
//!
//! ## Render
//!
//! ```text
//! photos/a.jpg → out.webp
//!     Status: 200
//!     Content-Type: image/webp
//!     Content-Length: 10422
//!     Cache-Control: public, max-age=60
//! ```
//!
//! Failed renders print the failure payload instead of the headers.
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::imaging::{EncoderOptions, Format, FormatFlags, SourceMetadata};
use crate::pipeline::Step;
use crate::service::Response;
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Step arguments as compact JSON, or `None` for argument-free steps.
fn step_arguments(step: &Step) -> Option<String> {
    match serde_json::to_value(step).ok()? {
        serde_json::Value::Object(map) => map.into_iter().next().map(|(_, args)| args.to_string()),
        _ => None,
    }
}

fn describe_options(format: Format, options: &EncoderOptions) -> String {
    let mut line = format!("{format}, quality {}", options.quality.value());
    match options.flags {
        FormatFlags::Png {
            compression_level,
            palette,
        } => {
            line.push_str(&format!(", compression {compression_level}"));
            if palette {
                line.push_str(", palette");
            }
        }
        FormatFlags::Lossless(true) => line.push_str(", lossless"),
        FormatFlags::Lossless(false) | FormatFlags::None => {}
    }
    line
}

// ============================================================================
// Plan output
// ============================================================================

pub fn format_plan(
    metadata: &SourceMetadata,
    format: Format,
    options: &EncoderOptions,
    steps: &[Step],
) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Source: {} {}x{}, {} bytes{}",
            metadata.format,
            metadata.width,
            metadata.height,
            metadata.size,
            if metadata.has_alpha { ", alpha" } else { "" }
        ),
        format!("Output: {}", describe_options(format, options)),
    ];

    if steps.is_empty() {
        lines.push("No edits; re-encode only".to_string());
    }
    for (i, step) in steps.iter().enumerate() {
        match step_arguments(step) {
            Some(args) => lines.push(format!("{} {} {}", format_index(i + 1), step.name(), args)),
            None => lines.push(format!("{} {}", format_index(i + 1), step.name())),
        }
    }
    lines
}

pub fn print_plan(
    metadata: &SourceMetadata,
    format: Format,
    options: &EncoderOptions,
    steps: &[Step],
) {
    for line in format_plan(metadata, format, options, steps) {
        println!("{}", line);
    }
}

// ============================================================================
// Render output
// ============================================================================

pub fn format_render(key: &str, destination: &Path, response: &Response) -> Vec<String> {
    let mut lines = Vec::new();
    if response.is_success() {
        lines.push(format!("{} → {}", key, destination.display()));
    } else {
        lines.push(format!("{} (failed)", key));
    }

    let context = indent(1);
    lines.push(format!("{}Status: {}", context, response.status));
    if let Some(content_type) = &response.content_type {
        lines.push(format!("{}Content-Type: {}", context, content_type));
    }
    if response.is_success() {
        lines.push(format!("{}Content-Length: {}", context, response.content_length()));
    } else if !response.body.is_empty() {
        lines.push(format!(
            "{}{}",
            context,
            String::from_utf8_lossy(&response.body)
        ));
    }
    if let Some(cache_control) = &response.cache_control {
        lines.push(format!("{}Cache-Control: {}", context, cache_control));
    }
    lines
}

pub fn print_render(key: &str, destination: &Path, response: &Response) {
    for line in format_render(key, destination, response) {
        println!("{}", line);
    }
}
