//! onboard-cli - operator frontend for the Onboard HTTP API
//!
//! # Subcommands
//! - `upload <file> --user <uuid> [--type passport] [--process]` - upload a document
//! - `process <id>` / `reprocess <id>`                            - run extraction
//! - `document <id>` / `documents <user>`                         - inspect documents
//! - `assess <user> [--sift-score N] [--field key=value]`         - run a risk assessment
//! - `assessment <id>` / `assessments <user>`                     - inspect assessments
//! - `plugins`                                                    - list registered plugins
//! - `status`                                                     - show server health

use std::path::Path;

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "onboard-cli",
    version,
    about = "Onboard document intake and risk assessment CLI"
)]
struct Cli {
    /// Onboard HTTP server URL (overrides ONBOARD_HTTP_URL env var)
    #[arg(long, env = "ONBOARD_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a document file
    Upload {
        file: String,

        #[arg(long)]
        user: String,

        /// passport, id_card, utility_bill, business_registration, bank_statement
        #[arg(long = "type", default_value = "other")]
        document_type: String,

        /// Queue extraction right after upload
        #[arg(long)]
        process: bool,
    },

    /// Run extraction on an uploaded document
    Process { id: String },

    /// Rerun extraction on an extracted or failed document
    Reprocess { id: String },

    /// Show one document
    Document { id: String },

    /// List a user's documents
    Documents { user: String },

    /// Assess a user
    Assess {
        user: String,

        #[arg(long)]
        sift_score: Option<f64>,

        #[arg(long)]
        business: bool,

        /// Extra profile attribute, repeatable: --field country=SE
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Show one assessment
    Assessment { id: String },

    /// List a user's assessments, newest first
    Assessments { user: String },

    /// List registered plugins
    Plugins,

    /// Show Onboard server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DocumentView {
    pub id: String,
    pub document_type: String,
    pub file_name: String,
    pub state: String,
    pub attempts: u32,
    pub failure: Option<FailureView>,
}

#[derive(Debug, Deserialize)]
pub struct FailureView {
    pub kind: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AssessmentView {
    pub id: String,
    pub score: f64,
    pub verdict: String,
    pub llm_verdict: Option<String>,
    #[serde(default)]
    pub red_flags: Vec<String>,
    pub narrative: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PluginView {
    pub name: String,
    pub description: String,
    pub weight: f64,
    pub timeout_ms: u64,
    pub max_retries: usize,
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

/// Content type from the file extension; the server decides what it can read.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Build the profile body for `POST /assessments`. Known columns go to the
/// top level; everything else rides along as extra attributes.
pub fn build_profile(
    user: &str,
    sift_score: Option<f64>,
    business: bool,
    fields: &[(String, String)],
) -> serde_json::Value {
    let mut profile = serde_json::json!({ "id": user, "is_business": business });

    for (key, value) in fields {
        profile[key.as_str()] = serde_json::Value::String(value.clone());
    }
    if let Some(score) = sift_score {
        profile["sift_score"] = serde_json::json!(score);
    }
    profile
}

fn client() -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()?)
}

/// Send a request and return the JSON body. Non-2xx responses exit with the
/// server's error code.
fn send(request: reqwest::blocking::RequestBuilder, url: &str) -> anyhow::Result<serde_json::Value> {
    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("onboard-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();

    if !status.is_success() {
        eprintln!(
            "onboard-cli: server returned {} [{}{}]: {}",
            status,
            body["code"].as_str().unwrap_or("unknown"),
            if body["retryable"] == true { ", retryable" } else { "" },
            body["error"].as_str().unwrap_or("no details")
        );
        std::process::exit(1);
    }

    Ok(body)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_document(d: &DocumentView) {
    println!("{}  {:<22} {:<10} attempts={}  {}", d.id, d.document_type, d.state, d.attempts, d.file_name);
    if let Some(f) = &d.failure {
        println!("    failure: {} ({}) {}", f.code, f.kind, f.message);
    }
}

fn print_assessment(a: &AssessmentView) {
    println!("Assessment: {}", a.id);
    println!("Created:    {}", a.created_at);
    println!("Score:      {:.2}", a.score);
    match &a.llm_verdict {
        Some(llm) if llm != &a.verdict => println!("Verdict:    {} (LLM suggested {})", a.verdict, llm),
        _ => println!("Verdict:    {}", a.verdict),
    }
    match a.narrative["status"].as_str() {
        Some("available") => println!("\n{}", a.narrative["text"].as_str().unwrap_or("")),
        _ => println!(
            "\nNarrative unavailable: {}",
            a.narrative["reason"].as_str().unwrap_or("unknown")
        ),
    }
    if !a.red_flags.is_empty() {
        println!("\nRed flags:");
        for flag in &a.red_flags {
            println!("  - {}", flag);
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

fn do_upload(
    server: &str,
    file: &str,
    user: &str,
    document_type: &str,
    process: bool,
    json: bool,
) -> anyhow::Result<()> {
    let path = Path::new(file);
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.bin");

    let url = format!("{}/documents", server);
    let request = client()?
        .post(&url)
        .query(&[
            ("user_id", user),
            ("document_type", document_type),
            ("file_name", file_name),
            ("process", if process { "true" } else { "false" }),
        ])
        .header(reqwest::header::CONTENT_TYPE, content_type_for(path))
        .body(bytes);

    let body = send(request, &url)?;
    if json {
        return print_json(&body);
    }

    let document: DocumentView = serde_json::from_value(body["document"].clone())?;
    print_document(&document);
    if body["queued"] == true {
        println!("Extraction queued");
    }
    Ok(())
}

fn do_document_action(url: String, post: bool, json: bool) -> anyhow::Result<()> {
    let client = client()?;
    let request = if post { client.post(&url) } else { client.get(&url) };
    let body = send(request, &url)?;
    if json {
        return print_json(&body);
    }
    let document: DocumentView = serde_json::from_value(body)?;
    print_document(&document);
    Ok(())
}

fn do_documents(server: &str, user: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/users/{}/documents", server, user);
    let body = send(client()?.get(&url), &url)?;
    if json {
        return print_json(&body);
    }
    let documents: Vec<DocumentView> = serde_json::from_value(body)?;
    if documents.is_empty() {
        eprintln!("No documents for user {}", user);
    }
    for d in &documents {
        print_document(d);
    }
    Ok(())
}

fn do_assess(server: &str, profile: serde_json::Value, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/assessments", server);
    let body = send(client()?.post(&url).json(&profile), &url)?;
    if json {
        return print_json(&body);
    }
    let assessment: AssessmentView = serde_json::from_value(body)?;
    print_assessment(&assessment);
    Ok(())
}

fn do_assessment(server: &str, id: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/assessments/{}", server, id);
    let body = send(client()?.get(&url), &url)?;
    if json {
        return print_json(&body);
    }
    let assessment: AssessmentView = serde_json::from_value(body)?;
    print_assessment(&assessment);
    Ok(())
}

fn do_assessments(server: &str, user: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/users/{}/assessments", server, user);
    let body = send(client()?.get(&url), &url)?;
    if json {
        return print_json(&body);
    }
    let assessments: Vec<AssessmentView> = serde_json::from_value(body)?;
    if assessments.is_empty() {
        eprintln!("No assessments for user {}", user);
    }
    for a in &assessments {
        println!("{}  {}  {:<6} {:.2}", a.id, a.created_at, a.verdict, a.score);
    }
    Ok(())
}

fn do_plugins(server: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/plugins", server);
    let body = send(client()?.get(&url), &url)?;
    if json {
        return print_json(&body);
    }
    let plugins: Vec<PluginView> = serde_json::from_value(body)?;
    for p in &plugins {
        println!(
            "{:<16} weight={:<5} timeout={}ms retries={}  {}",
            p.name, p.weight, p.timeout_ms, p.max_retries, p.description
        );
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    let resp = client.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Onboard server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:        {}", body["version"].as_str().unwrap_or("?"));
            println!("Storage:        {}", body["storage"].as_str().unwrap_or("?"));
            println!("PostgreSQL:     {}", body["postgresql"].as_str().unwrap_or("-"));
            println!("Plugins:        {}", body["plugins"]);
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("onboard-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("onboard-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let json = cli.json;

    let result = match cli.command {
        Commands::Upload {
            file,
            user,
            document_type,
            process,
        } => do_upload(&server, &file, &user, &document_type, process, json),
        Commands::Process { id } => {
            do_document_action(format!("{}/documents/{}/process", server, id), true, json)
        }
        Commands::Reprocess { id } => {
            do_document_action(format!("{}/documents/{}/reprocess", server, id), true, json)
        }
        Commands::Document { id } => {
            do_document_action(format!("{}/documents/{}", server, id), false, json)
        }
        Commands::Documents { user } => do_documents(&server, &user, json),
        Commands::Assess {
            user,
            sift_score,
            business,
            fields,
        } => do_assess(&server, build_profile(&user, sift_score, business, &fields), json),
        Commands::Assessment { id } => do_assessment(&server, &id, json),
        Commands::Assessments { user } => do_assessments(&server, &user, json),
        Commands::Plugins => do_plugins(&server, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("onboard-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("scan.PDF")), "application/pdf");
        assert_eq!(content_type_for(Path::new("id.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("bill")), "application/octet-stream");
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("country = SE").unwrap(),
            ("country".to_string(), "SE".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_build_profile_places_extras_at_top_level() {
        let fields = vec![("country".to_string(), "SE".to_string())];
        let profile = build_profile("7b5c24ab-1234-5678-9abc-def012345678", Some(42.0), true, &fields);

        assert_eq!(profile["id"], "7b5c24ab-1234-5678-9abc-def012345678");
        assert_eq!(profile["is_business"], true);
        assert_eq!(profile["country"], "SE");
        assert_eq!(profile["sift_score"], 42.0);
    }

    #[test]
    fn test_assessment_view_reads_server_shape() {
        let body = serde_json::json!({
            "id": "a1",
            "user_id": "u1",
            "score": 0.42,
            "verdict": "medium",
            "llm_verdict": null,
            "narrative": {"status": "unavailable", "reason": "timeout"},
            "red_flags": [],
            "created_at": "2026-10-19T10:00:00Z"
        });
        let view: AssessmentView = serde_json::from_value(body).unwrap();
        assert_eq!(view.verdict, "medium");
        assert!(view.llm_verdict.is_none());
    }
}
