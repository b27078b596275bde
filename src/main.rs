//! agri-sentry: command-line front end for scan verification, diagnosis,
//! history and report export.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use agri_sentry::diagnosis::DEFAULT_LANGUAGE;
use agri_sentry::ledger::{LedgerConnector, LedgerService, MemoryLedger};
use agri_sentry::media;
use agri_sentry::report::{
    ExportArtifact, ExportError, HttpMailRelay, ReportExporter, ReportLayout, ReportSubject,
    ShareError, ShareOutcome, SharePayload, SharePlatform,
};
use agri_sentry::scan::{CaptureSurface, ReplaySource, SessionState, VerificationOrchestrator};
use agri_sentry::{
    ApiClient, AuthClient, Config, CredentialStore, CurrentUser, DiagnosisClient,
    DiagnosisService, ExportExecutor, ExportKind, HistoryClient, HistoryRecorder, HistoryStore,
    HistoryView, LabelClient, LabelReader, RegistrationForm, ScanRecord, ScanType, ServiceError,
    SessionContext, SignupRequest,
};

const FRAME_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "agri-sentry")]
#[command(about = "Crop scan verification, provenance lookup and report export")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "agri-sentry.toml", env = "AGRI_SENTRY_CONFIG")]
    config: PathBuf,

    /// Auth/history/mail backend (overrides config file)
    #[arg(long, env = "AGRI_SENTRY_DB_URL")]
    db_url: Option<String>,

    /// AI diagnosis engine (overrides config file)
    #[arg(long, env = "AGRI_SENTRY_AI_URL")]
    ai_url: Option<String>,

    /// Public read-only RPC node (overrides config file)
    #[arg(long, env = "AGRI_SENTRY_RPC_URL")]
    rpc_url: Option<String>,

    /// Signing wallet JSON-RPC endpoint (overrides config file)
    #[arg(long, env = "AGRI_SENTRY_WALLET_URL")]
    wallet_url: Option<String>,

    /// Registry contract address (overrides config file)
    #[arg(long, env = "AGRI_SENTRY_CONTRACT")]
    contract: Option<String>,

    /// Use an in-process ledger seeded with a sample product
    #[arg(long)]
    demo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with an email address or phone number
    Login {
        identifier: String,
        #[arg(long, env = "AGRI_SENTRY_PASSWORD")]
        password: String,
    },

    /// Create an account
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long, env = "AGRI_SENTRY_PASSWORD")]
        password: String,
    },

    /// Forget the stored session
    Logout,

    /// Verify a product by code, uploaded image or replayed camera frames
    Verify {
        /// Code to look up, verbatim
        #[arg(conflicts_with_all = ["image", "frames"])]
        code: Option<String>,

        /// Single image to decode
        #[arg(long, conflicts_with = "frames")]
        image: Option<PathBuf>,

        /// Frames replayed as a live camera stream
        #[arg(long, num_args = 1..)]
        frames: Vec<PathBuf>,
    },

    /// Register an unknown code on the ledger (needs a signing wallet)
    Register {
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        manufacturer: String,
        #[arg(long, default_value = "")]
        batch: String,
        /// Photo of the product label; manufacturer and batch read off it
        /// replace the typed values
        #[arg(long)]
        label: Option<PathBuf>,
    },

    /// Diagnose a leaf image
    Diagnose {
        image: PathBuf,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        /// Save the result to the signed-in user's history
        #[arg(long)]
        save: bool,
    },

    /// Count and identify pests in a field or trap image
    Monitor {
        image: PathBuf,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        /// Save the result to the signed-in user's history
        #[arg(long)]
        save: bool,
    },

    /// Scan history of the signed-in user
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Export a saved scan or a verified product as a report
    Export {
        #[arg(value_enum)]
        format: ExportFormat,
        /// Saved scan id
        #[arg(long, required_unless_present = "product", conflicts_with = "product")]
        scan: Option<String>,
        /// Product code, verified before export
        #[arg(long)]
        product: Option<String>,
        /// Email recipient; the relay's default when omitted
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    List {
        #[arg(long = "type", value_enum)]
        kind: Option<ScanKind>,
    },
    Delete {
        scan_id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScanKind {
    Disease,
    Pest,
}

impl From<ScanKind> for ScanType {
    fn from(kind: ScanKind) -> Self {
        match kind {
            ScanKind::Disease => ScanType::Disease,
            ScanKind::Pest => ScanType::Pest,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Pdf,
    Jpg,
    Email,
    Share,
}

/// Terminal host: no native share sheet and no clipboard; links are printed.
struct TerminalPlatform;

#[async_trait]
impl SharePlatform for TerminalPlatform {
    fn can_share_files(&self, _mime: &str) -> bool {
        false
    }

    async fn share_files(&self, _payload: &SharePayload) -> Result<(), ShareError> {
        Err(ShareError::Unsupported)
    }

    async fn write_clipboard(&self, _text: &str) -> Result<(), ShareError> {
        Err(ShareError::Unsupported)
    }

    async fn open_link(&self, url: &str) -> Result<(), ShareError> {
        println!("Open to share: {}", url);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agri_sentry=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Apply CLI overrides
    if let Some(db_url) = cli.db_url {
        config.api.db_url = db_url;
    }
    if let Some(ai_url) = cli.ai_url {
        config.api.ai_url = ai_url;
    }
    if let Some(rpc_url) = cli.rpc_url {
        config.ledger.public_rpc_url = rpc_url;
    }
    if cli.wallet_url.is_some() {
        config.ledger.wallet_rpc_url = cli.wallet_url;
    }
    if cli.contract.is_some() {
        config.ledger.contract_address = cli.contract;
    }

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let db_api = ApiClient::with_client(http.clone(), config.api.db_url.clone());
    let mut session = SessionContext::load(&config.session.path)?;

    match cli.command {
        Command::Login {
            identifier,
            password,
        } => {
            let auth = AuthClient::new(db_api);
            let signed_in = auth.login(&identifier, &password).await?;
            println!("Signed in as {}", signed_in.user.name);
            session.store(signed_in)?;
        }

        Command::Signup {
            name,
            email,
            phone,
            password,
        } => {
            let auth = AuthClient::new(db_api);
            let request = SignupRequest {
                name,
                email,
                phone,
                password,
            };
            let signed_in = auth.signup(&request).await?;
            println!("Welcome, {}", signed_in.user.name);
            session.store(signed_in)?;
        }

        Command::Logout => {
            session.clear()?;
            println!("Signed out");
        }

        Command::Verify {
            code,
            image,
            frames,
        } => {
            let ledger = connect_ledger(&config, http, cli.demo).await?;
            let orchestrator = VerificationOrchestrator::new(ledger)
                .with_verify_timeout(config.ledger_timeout());

            let state = if !frames.is_empty() {
                let mut surface =
                    CaptureSurface::new(ReplaySource::new(frames), config.frame_interval());
                let state = orchestrator.activate(&mut surface).await?;
                if !matches!(state, SessionState::Scanning) {
                    state
                } else {
                    // Leave the lookup its own full timeout once a code is found
                    let scanned = tokio::time::timeout(
                        FRAME_SCAN_TIMEOUT + config.ledger_timeout(),
                        orchestrator.scan_continuous(&mut surface),
                    )
                    .await;
                    match scanned {
                        Ok(state) => state?,
                        Err(_) => {
                            surface.deactivate().await;
                            let state = orchestrator.state();
                            if matches!(state, SessionState::Scanning) {
                                bail!("No QR code found in the replayed frames");
                            }
                            state
                        }
                    }
                }
            } else if let Some(path) = image {
                orchestrator.activate_static()?;
                let bytes = read_file(&path).await?;
                orchestrator.scan_image(&bytes).await?
            } else if let Some(code) = code {
                orchestrator.activate_static()?;
                orchestrator.submit_code(code).await?
            } else {
                bail!("Provide a code, --image or --frames");
            };

            print_json(&state)?;
            if state.can_register() {
                info!("Code is not registered; `agri-sentry register` can add it");
            }
        }

        Command::Register {
            code,
            name,
            manufacturer,
            batch,
            label,
        } => {
            let mut form = RegistrationForm {
                product_name: name,
                manufacturer,
                batch_number: batch,
            };
            if let Some(label) = label {
                let bytes = read_file(&label).await?;
                let data_uri = media::to_data_uri(media::sniff_mime(&bytes), &bytes);
                let fields = LabelClient::new(db_api).read_label(&data_uri).await?;
                form.prefill(&fields);
            }

            let ledger = connect_ledger(&config, http, cli.demo).await?;
            let orchestrator = VerificationOrchestrator::new(ledger)
                .with_verify_timeout(config.ledger_timeout());

            orchestrator.activate_static()?;
            let mut state = orchestrator.submit_code(code).await?;
            if state.can_register() {
                orchestrator.request_registration()?;
                state = orchestrator.submit_registration(&form).await?;
            } else if state.product().is_some() {
                warn!("Code is already registered");
            }
            print_json(&state)?;
        }

        Command::Diagnose {
            image,
            language,
            save,
        } => {
            let bytes = read_file(&image).await?;
            let data_uri = media::to_data_uri(media::sniff_mime(&bytes), &bytes);
            let client =
                DiagnosisClient::new(ApiClient::with_client(http, config.api.ai_url.clone()));
            let diagnosis = client.diagnose(&data_uri, &language).await?;
            print_json(&diagnosis)?;

            if save {
                let user = require_user(&session)?;
                let recorder = HistoryRecorder::new(Arc::new(HistoryClient::new(db_api)));
                let record = ScanRecord::from_diagnosis(diagnosis, data_uri);
                let history = recorder.record(&user.id, &record).await?;
                println!("Saved ({} scans in history)", history.len());
            }
        }

        Command::Monitor {
            image,
            language,
            save,
        } => {
            let bytes = read_file(&image).await?;
            let data_uri = media::to_data_uri(media::sniff_mime(&bytes), &bytes);
            let client =
                DiagnosisClient::new(ApiClient::with_client(http, config.api.ai_url.clone()));
            let monitoring = client.monitor(&data_uri, &language).await?;
            print_json(&monitoring)?;

            if save {
                let user = require_user(&session)?;
                let recorder = HistoryRecorder::new(Arc::new(HistoryClient::new(db_api)));
                let record = ScanRecord::from_diagnosis(monitoring, data_uri);
                let history = recorder.record(&user.id, &record).await?;
                println!("Saved ({} scans in history)", history.len());
            }
        }

        Command::History { action } => {
            let user = require_user(&session)?;
            let store = Arc::new(HistoryClient::new(db_api));

            match action {
                HistoryAction::List { kind } => {
                    let mut view = HistoryView::new(store, user.id.clone());
                    if let Some(kind) = kind {
                        view = view.with_filter(kind.into());
                    }
                    view.refresh().await?;
                    for scan in view.entries()? {
                        println!(
                            "{}  {}  {:<7}  {:<24}  {:<7}  {:.0}%",
                            scan.id.as_deref().unwrap_or("-"),
                            scan.captured_at.format("%Y-%m-%d %H:%M"),
                            scan.scan_type.as_str(),
                            scan.subject_name,
                            scan.severity.as_str(),
                            scan.confidence * 100.0
                        );
                    }
                }
                HistoryAction::Delete { scan_id } => {
                    let view = HistoryView::new(store, user.id.clone());
                    view.refresh().await?;
                    view.delete(&scan_id)
                        .await
                        .map_err(|e| anyhow!("Could not delete record: {}", e))?;
                    println!("Deleted {}", scan_id);
                }
            }
        }

        Command::Export {
            format,
            scan,
            product,
            to,
        } => {
            let (subject, layout) = match (scan, product) {
                (Some(scan_id), _) => {
                    let user = require_user(&session)?;
                    let history = HistoryClient::new(db_api.clone()).list(&user.id).await?;
                    let record = history
                        .into_iter()
                        .find(|scan| scan.id.as_deref() == Some(scan_id.as_str()))
                        .with_context(|| format!("No saved scan with id {}", scan_id))?;
                    let image = decode_scan_image(&record);
                    let subject = ReportSubject::Diagnosis(record);
                    let layout = ReportLayout::for_subject(&subject);
                    let layout = match image {
                        Some(image) => layout.with_image(image),
                        None => layout,
                    };
                    (subject, layout)
                }
                (None, Some(code)) => {
                    let ledger = connect_ledger(&config, http, cli.demo).await?;
                    let product = tokio::time::timeout(
                        config.ledger_timeout(),
                        ledger.verify_product(&code),
                    )
                    .await
                    .context("Ledger lookup timed out")??;
                    if !product.is_authentic {
                        bail!("Product {} is not registered on the ledger", code);
                    }
                    let subject = ReportSubject::Product(product);
                    let layout = ReportLayout::for_subject(&subject);
                    (subject, layout)
                }
                (None, None) => bail!("Provide --scan or --product"),
            };

            let exporter = ReportExporter::new(config.export.brand.clone())
                .with_scale(config.export.scale)
                .with_quality(config.export.jpeg_quality, config.export.pdf_jpeg_quality);
            let executor = ExportExecutor::new();
            let output_dir = config.export.output_dir.clone();
            let at = Utc::now();

            let (kind, result) = match format {
                ExportFormat::Pdf => (
                    ExportKind::Pdf,
                    executor
                        .execute(ExportKind::Pdf, async {
                            let pdf = exporter.export_pdf(&layout, &subject, at)?;
                            write_artifact(&output_dir, pdf).await
                        })
                        .await,
                ),
                ExportFormat::Jpg => (
                    ExportKind::Image,
                    executor
                        .execute(ExportKind::Image, async {
                            let jpg = exporter.export_image(&layout, &subject, at)?;
                            write_artifact(&output_dir, jpg).await
                        })
                        .await,
                ),
                ExportFormat::Email => {
                    let relay = HttpMailRelay::new(db_api);
                    (
                        ExportKind::Email,
                        executor
                            .execute(ExportKind::Email, async {
                                exporter
                                    .email(&relay, &layout, &subject, to.as_deref(), at)
                                    .await?;
                                Ok("Email sent successfully.".to_string())
                            })
                            .await,
                    )
                }
                ExportFormat::Share => (
                    ExportKind::Share,
                    executor
                        .execute(ExportKind::Share, async {
                            let outcome = exporter
                                .share(&TerminalPlatform, &layout, &subject, at)
                                .await?;
                            Ok(describe_share(&outcome))
                        })
                        .await,
                ),
            };

            match result {
                Ok(message) => println!("{}", message),
                Err(e) => bail!(kind.failure_message(&e)),
            }
        }
    }

    Ok(())
}

async fn connect_ledger(
    config: &Config,
    http: reqwest::Client,
    demo: bool,
) -> anyhow::Result<Arc<dyn LedgerService>> {
    if demo {
        let ledger = MemoryLedger::new();
        ledger
            .seed("GLS-1234", "GreenLife Seeds", "GreenLife Ltd", "B-001")
            .await;
        info!("Using in-process demo ledger");
        return Ok(Arc::new(ledger));
    }

    let contract = config
        .ledger
        .contract_address
        .clone()
        .context("ledger.contract_address is not configured")?;

    let ledger = LedgerConnector::new(http, contract, config.ledger.public_rpc_url.clone())
        .with_wallet(config.ledger.wallet_rpc_url.clone())
        .with_receipt_poll(config.receipt_poll())
        .connect()
        .await;
    info!(strategy = ?ledger.strategy(), "Ledger connected");
    Ok(Arc::new(ledger))
}

fn require_user(session: &SessionContext) -> Result<CurrentUser, ServiceError> {
    session.user().cloned().ok_or(ServiceError::NotSignedIn)
}

async fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// Remote image URLs are left out of the report
fn decode_scan_image(record: &ScanRecord) -> Option<image::RgbaImage> {
    media::decode_data_uri(&record.image_ref)
        .ok()
        .and_then(|(_, bytes)| image::load_from_memory(&bytes).ok())
        .map(|decoded| decoded.to_rgba8())
}

async fn write_artifact(dir: &Path, artifact: ExportArtifact) -> Result<String, ExportError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&artifact.filename);
    tokio::fs::write(&path, &artifact.bytes).await?;
    Ok(format!("Saved {}", path.display()))
}

fn describe_share(outcome: &ShareOutcome) -> String {
    match outcome {
        ShareOutcome::Native => "Shared".to_string(),
        ShareOutcome::Cancelled => "Share cancelled".to_string(),
        ShareOutcome::Fallback {
            copied_to_clipboard,
            link_opened,
            ..
        } => format!(
            "Shared via link (clipboard: {}, link opened: {})",
            if *copied_to_clipboard { "copied" } else { "unavailable" },
            if *link_opened { "yes" } else { "no" }
        ),
    }
}
