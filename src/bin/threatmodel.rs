//! CLI binary for edgequake-threatmodel.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ProviderConfig` / `ParseOptions` and prints the analysis as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_threatmodel::pipeline::source::{apply_failure_fallback, decode_buffer, Codec};
use edgequake_threatmodel::{
    AnalysisError, AnalysisProgressCallback, AnalysisRequest, Analyzer, AttachmentDescriptor,
    DocumentError, DocumentModel, DocumentType, InMemoryKnowledgeBase, ParseOptions, Provider, ProviderConfig,
    RequestState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that follows the request state machine.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_document_parsed(&self, document: &DocumentModel) {
        if document.success {
            self.bar.println(format!(
                "{} Parsed document  {}",
                cyan("◆"),
                dim(&format!(
                    "{} words, {} sections, {} tables, {} images",
                    document.metadata.word_count,
                    document.structure.sections.len(),
                    document.structure.tables.len(),
                    document.structure.images.len()
                ))
            ));
        }
    }

    fn on_state_change(&self, _request_id: u64, state: &RequestState) {
        match state {
            RequestState::Pending => {
                self.bar.set_prefix("Analysing");
                self.bar.set_message("building prompt");
            }
            RequestState::Sending { attempt } => {
                self.bar.set_message(format!("waiting for provider (attempt {attempt})"));
            }
            RequestState::Retrying { next_attempt, delay_ms } => {
                self.bar.set_message(format!("retrying in {delay_ms}ms (attempt {next_attempt})"));
            }
            RequestState::Succeeded { attempts } => {
                self.bar.finish_and_clear();
                eprintln!("{} Analysis complete  {}", green("✔"), dim(&format!("{attempts} attempt(s)")));
            }
            RequestState::Failed { attempts, error } => {
                self.bar.finish_and_clear();
                eprintln!("{} {}  {}", red("✘"), red(error), dim(&format!("{attempts} attempt(s)")));
            }
            RequestState::Cancelled { .. } => {
                self.bar.finish_and_clear();
                eprintln!("{} cancelled", cyan("⚠"));
            }
        }
    }

    fn on_attempt_failed(&self, _request_id: u64, attempt: u32, error: &AnalysisError) {
        let msg = error.to_string();
        // Keep one line per failure.
        let msg = if msg.chars().count() > 100 {
            format!("{}\u{2026}", msg.chars().take(99).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!("  {} attempt {attempt}: {}", red("✗"), dim(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a local design document (JSON on stdout)
  threatmodel design.pdf

  # Analyse an attachment URL, writing the result to a file
  threatmodel https://wiki.example.com/files/checkout.docx -o checkout.json

  # No attachment: analyse scraped page text
  threatmodel --text-file page.txt

  # Fall back to page text if the attachment cannot be processed
  threatmodel https://x/spec.pdf --text-file page.txt --fallback-on-failure

  # Use persisted settings ({provider, endpoint, apiKey, model, threatPlatform})
  threatmodel --config settings.json design.docx

  # Extract only, no provider call
  threatmodel --parse-only design.pdf

  # Check credentials and endpoint
  threatmodel --test-connection --provider anthropic

PROVIDERS:
  openai        https://api.openai.com/v1/chat/completions  (default model gpt-4.1-mini)
  azure_openai  {endpoint}/openai/deployments/{model}/chat/completions
  anthropic     https://api.anthropic.com/v1/messages  (default claude-sonnet-4-20250514)
  custom        {endpoint} verbatim, Bearer auth only when a key is set

ENVIRONMENT VARIABLES:
  THREATMODEL_PROVIDER    openai, azure_openai, anthropic, custom
  THREATMODEL_API_KEY     API key (falls back to OPENAI_API_KEY / AZURE_OPENAI_API_KEY /
                          ANTHROPIC_API_KEY for the selected provider)
  THREATMODEL_ENDPOINT    Endpoint URL (required for azure_openai and custom)
  THREATMODEL_MODEL       Model or deployment name
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Threat-model PDF/DOCX design documents with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "threatmodel",
    version,
    about = "Threat-model PDF/DOCX design documents and page text with an LLM",
    long_about = "Extract text and structure from a PDF or DOCX (local file or URL), or use \
plain page text, and ask an LLM provider (OpenAI, Azure OpenAI, Anthropic, or a custom \
endpoint) for a structured security analysis: assets, threats, test scenarios, and \
recommendations.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/DOCX path or HTTP/HTTPS URL. Omit to analyse --text-file alone.
    input: Option<String>,

    /// Declared attachment type (pdf, docx). Inferred from the extension if omitted.
    #[arg(long = "type", env = "THREATMODEL_TYPE")]
    doc_type: Option<String>,

    /// Page text used when there is no attachment.
    #[arg(long, env = "THREATMODEL_TEXT_FILE")]
    text_file: Option<PathBuf>,

    /// Use --text-file when the attachment cannot be fetched or decoded.
    #[arg(long, env = "THREATMODEL_FALLBACK_ON_FAILURE")]
    fallback_on_failure: bool,

    /// Analysis request sent along with the document.
    #[arg(long, env = "THREATMODEL_PROMPT", default_value = "")]
    prompt: String,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "THREATMODEL_OUTPUT")]
    output: Option<PathBuf>,

    /// Settings file: {provider, endpoint, apiKey, model, threatPlatform}.
    #[arg(long, env = "THREATMODEL_CONFIG")]
    config: Option<PathBuf>,

    /// Knowledge base JSON: {"keyword": [{"topic": ..., "guidance": ...}]}.
    #[arg(long, env = "THREATMODEL_KNOWLEDGE")]
    knowledge: Option<PathBuf>,

    /// LLM provider: openai, azure_openai, anthropic, custom.
    #[arg(long, env = "THREATMODEL_PROVIDER")]
    provider: Option<String>,

    /// Provider endpoint URL.
    #[arg(long, env = "THREATMODEL_ENDPOINT")]
    endpoint: Option<String>,

    /// API key.
    #[arg(long, env = "THREATMODEL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model ID (or Azure deployment name).
    #[arg(long, env = "THREATMODEL_MODEL")]
    model: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "THREATMODEL_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Provider call timeout in seconds.
    #[arg(long, env = "THREATMODEL_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// Total provider attempts, including the first.
    #[arg(long, env = "THREATMODEL_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "THREATMODEL_TEMPERATURE")]
    temperature: Option<f32>,

    /// Max LLM output tokens.
    #[arg(long, env = "THREATMODEL_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// Attachment download timeout in seconds.
    #[arg(long, env = "THREATMODEL_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Decode time budget in seconds.
    #[arg(long, env = "THREATMODEL_PARSE_TIMEOUT", default_value_t = 30)]
    parse_timeout: u64,

    /// Print the parsed DocumentModel and stop; no provider call.
    #[arg(long)]
    parse_only: bool,

    /// Send a one-line request to the provider and report the outcome.
    #[arg(long)]
    test_connection: bool,

    /// Disable the spinner.
    #[arg(long, env = "THREATMODEL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "THREATMODEL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "THREATMODEL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives the feedback that matters; keep INFO logs out of it.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(CliProgressCallback::new);
    let mut analyzer = Analyzer::new();
    if let Some(ref cb) = progress {
        analyzer = analyzer.with_progress(cb.clone());
    }
    if let Some(ref path) = cli.knowledge {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read knowledge base {:?}", path))?;
        let kb = InMemoryKnowledgeBase::from_json(&json).context("Invalid knowledge base")?;
        analyzer = analyzer.with_knowledge_base(Arc::new(kb));
    }

    // ── Connection test ──────────────────────────────────────────────────
    if cli.test_connection {
        let config = build_config(&cli).await?;
        let status = analyzer.test_connection(&config).await;
        if let Some(ref cb) = progress {
            cb.bar.finish_and_clear();
        }
        if status.success {
            println!("{} {}", green("✔"), status.detail);
            return Ok(());
        }
        anyhow::bail!("Connection test failed: {}", status.detail);
    }

    // ── Document ─────────────────────────────────────────────────────────
    let options = build_parse_options(&cli).await?;
    let document = load_document(&cli, &analyzer, &options).await;
    if let Some(ref warning) = document.warning {
        if !cli.quiet {
            eprintln!("{} {}", cyan("⚠"), warning);
        }
    }

    if cli.parse_only {
        if let Some(ref cb) = progress {
            cb.bar.finish_and_clear();
        }
        write_json(&document, cli.output.as_deref()).await?;
        if !document.success {
            anyhow::bail!(
                "Document could not be processed: {}",
                document.error.as_deref().unwrap_or("unknown error")
            );
        }
        return Ok(());
    }

    if !document.success {
        if let Some(ref cb) = progress {
            cb.bar.finish_and_clear();
        }
        anyhow::bail!(
            "Document could not be processed: {}",
            document.error.as_deref().unwrap_or("unknown error")
        );
    }

    // ── Analysis ─────────────────────────────────────────────────────────
    let config = build_config(&cli).await?;
    let request = AnalysisRequest::new(document, cli.prompt.clone());
    let result = analyzer
        .analyze(&request, &config)
        .await
        .context("Analysis failed")?;

    write_json(&result, cli.output.as_deref()).await?;

    if !cli.quiet {
        let level = result
            .max_level()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "none".into());
        eprintln!(
            "   {} threats (max {})  /  {} test scenarios  /  {} recommendations",
            bold(&result.threats.len().to_string()),
            bold(&level),
            result.test_scenarios.len(),
            result.recommendations.len(),
        );
        if let Some(ref path) = cli.output {
            eprintln!("   →  {}", bold(&path.display().to_string()));
        }
    }

    Ok(())
}

/// Resolve the input into a DocumentModel: URL through the source selector,
/// local file decoded in place, or page text alone.
async fn load_document(cli: &Cli, analyzer: &Analyzer, options: &ParseOptions) -> DocumentModel {
    let declared = cli.doc_type.as_deref().map(DocumentType::parse).unwrap_or_default();

    let Some(ref input) = cli.input else {
        return analyzer.parse_document(None, options).await;
    };

    if input.starts_with("http://") || input.starts_with("https://") {
        let name = input.rsplit('/').next().unwrap_or_default().to_string();
        let attachment = AttachmentDescriptor::new(input.clone(), declared, name);
        return analyzer.parse_document(Some(&attachment), options).await;
    }

    let kind = match declared {
        DocumentType::Unknown => DocumentType::from_url(input),
        other => other,
    };
    let codec = match kind {
        DocumentType::Pdf => Codec::Pdf,
        DocumentType::Docx => Codec::Docx,
        other => {
            let err = DocumentError::UnsupportedType(other.as_str().to_string());
            return DocumentModel::failed(&err, None);
        }
    };

    let model = match tokio::fs::read(input).await {
        Ok(bytes) => decode_buffer(bytes, codec, options.parse_timeout_secs).await,
        Err(e) => DocumentModel::failed(
            &DocumentError::Parse {
                format: codec.format_name(),
                detail: format!("cannot read '{input}': {e}"),
            },
            Some(codec.source_type()),
        ),
    };
    apply_failure_fallback(model, options)
}

async fn build_parse_options(cli: &Cli) -> Result<ParseOptions> {
    let fallback_content = match cli.text_file {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read page text from {:?}", path))?,
        ),
        None => None,
    };
    Ok(ParseOptions {
        fallback_content,
        fallback_on_failure: cli.fallback_on_failure,
        download_timeout_secs: cli.download_timeout,
        parse_timeout_secs: cli.parse_timeout,
        ..ParseOptions::default()
    })
}

/// Map CLI args (over an optional settings file) to `ProviderConfig`.
async fn build_config(cli: &Cli) -> Result<ProviderConfig> {
    let base = match cli.config {
        Some(ref path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read settings from {:?}", path))?;
            ProviderConfig::from_json(&json).context("Invalid settings file")?
        }
        None => ProviderConfig::default(),
    };

    let mut builder = base.into_builder();
    if let Some(ref p) = cli.provider {
        let provider: Provider = p.parse().context("Invalid --provider")?;
        builder = builder.provider(provider);
    }
    if let Some(ref e) = cli.endpoint {
        builder = builder.endpoint(e.clone());
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m.clone());
    }
    if let Some(secs) = cli.api_timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(n) = cli.max_attempts {
        builder = builder.max_attempts(n);
    }
    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(n) = cli.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    let mut config = builder.build().context("Invalid configuration")?;
    if let Some(ref key) = cli.api_key {
        config.api_key = key.clone();
    } else if config.api_key.is_empty() {
        config.api_key = conventional_key(config.provider).unwrap_or_default();
    }
    Ok(config)
}

fn conventional_key(provider: Provider) -> Option<String> {
    let var = match provider {
        Provider::Openai => "OPENAI_API_KEY",
        Provider::AzureOpenai => "AZURE_OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Custom => return None,
    };
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

/// Pretty JSON to stdout, or atomically to `path` (temp file + rename).
async fn write_json<T: serde::Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;

    let Some(path) = path else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(json.as_bytes())
            .and_then(|_| handle.write_all(b"\n"))
            .context("Failed to write to stdout")?;
        return Ok(());
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json.as_bytes())
        .await
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move output into place at {:?}", path))?;
    Ok(())
}
