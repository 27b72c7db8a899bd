// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{ArgAction, Args, Parser, Subcommand, ValueEnum},
    log::{debug, info, warn, LevelFilter},
    quill::{
        app_store_connect::NotaryApi,
        certificate_store::CertificateStore,
        embedded_signature_builder::APPLE_TIMESTAMP_URL,
        event_bus::{Event, EventBus},
        notarization::{ensure_developer_signed, NotarizationResult, S3Uploader},
        payload::{is_zip, Payload},
        prompt::{EventPrompter, Prompter, TerminalPrompter},
        reader::{describe_path, signature_certificates, CertificateInfo},
        redaction::{self, RedactingLogger},
        signing_material::{decode_p12_interactive, load_p12, load_pem, resolve_secret},
        CancellationToken, ChainPolicy, ChainVerification, InputSource, MachOSigner,
        NotaryConfig, QuillError, SigningMaterial, SigningOptions, StatusConfig, Submission,
    },
    serde::Serialize,
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
    tokio::{runtime::Runtime, sync::broadcast::error::RecvError},
    x509_certificate::CapturedX509Certificate,
};

/// State shared by every command.
pub struct Context {
    runtime: Runtime,
    events: EventBus,
    cancel: CancellationToken,
    prompter: EventPrompter<TerminalPrompter>,
}

impl Context {
    fn new() -> Result<Self, QuillError> {
        let events = EventBus::default();

        Ok(Self {
            runtime: Runtime::new()?,
            prompter: EventPrompter::new(events.clone(), TerminalPrompter),
            events,
            cancel: CancellationToken::new(),
        })
    }

    /// Cancel async work on Ctrl-C.
    fn install_interrupt_handler(&self) {
        let cancel = self.cancel.clone();

        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling");
                cancel.cancel();
            }
        });
    }

    /// Mirror bus events into the log.
    fn log_events(&self) {
        let mut rx = self.events.subscribe();

        self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::Task(task)) => debug!("task: {}", task.title()),
                    Ok(Event::Notification { title, body }) => info!("{}: {}", title, body),
                    Ok(Event::Report { title, body }) => info!("{}\n{}", title, body),
                    Ok(Event::InputPrompt { .. }) => {}
                    Ok(Event::Exit) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(count)) => debug!("missed {} events", count),
                }
            }
        });
    }
}

pub trait CliCommand {
    fn run(&self, context: &Context) -> Result<(), QuillError>;
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Clone, Debug)]
struct OutputArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, env = "QUILL_OUTPUT")]
    output: OutputFormat,
}

impl OutputArgs {
    fn is_json(&self) -> bool {
        self.output == OutputFormat::Json
    }
}

fn print_json(value: &impl Serialize) -> Result<(), QuillError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Interpret a key or bundle argument, hiding literal content from logs.
fn secret_source(value: &str) -> InputSource {
    let source = InputSource::parse(value);

    if matches!(source, InputSource::Base64(_)) {
        redaction::add(value);
    }

    source
}

#[derive(Args, Clone, Debug)]
struct SigningArgs {
    /// Identifier embedded in the signature. Defaults to the file name.
    #[arg(long, env = "QUILL_SIGN_IDENTITY")]
    identity: Option<String>,

    /// PKCS#12 bundle with the signing key and certificates: a path, base64 content or env:NAME
    #[arg(long, env = "QUILL_SIGN_P12", hide_env_values = true, conflicts_with_all = ["cert", "ad_hoc"])]
    p12: Option<String>,

    /// PEM certificate chain, leaf first
    #[arg(long, env = "QUILL_SIGN_CERT", requires = "key", conflicts_with = "ad_hoc")]
    cert: Option<String>,

    /// PEM PKCS#8 private key matching the leaf certificate
    #[arg(long, env = "QUILL_SIGN_KEY", hide_env_values = true, requires = "cert")]
    key: Option<String>,

    /// Password for the P12 bundle or encrypted key. May be env:NAME.
    #[arg(long, env = "QUILL_SIGN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// RFC 3161 time-stamp server. An empty value disables time-stamping.
    #[arg(long, env = "QUILL_SIGN_TIMESTAMP_SERVER", default_value = APPLE_TIMESTAMP_URL)]
    timestamp_server: String,

    /// Sign without a certificate
    #[arg(long, env = "QUILL_SIGN_AD_HOC")]
    ad_hoc: bool,

    /// Refuse to sign unless the chain reaches a trusted Apple root
    #[arg(
        long,
        env = "QUILL_SIGN_FAIL_WITHOUT_FULL_CHAIN",
        default_value_t = true,
        action = ArgAction::Set
    )]
    fail_without_full_chain: bool,

    /// Entitlements plist to embed
    #[arg(long, env = "QUILL_SIGN_ENTITLEMENTS")]
    entitlements: Option<PathBuf>,

    /// Keychain searched for missing certificates (macOS only)
    #[arg(long, env = "QUILL_SIGN_KEYCHAIN")]
    keychain: Option<PathBuf>,
}

impl SigningArgs {
    fn chain_policy(&self) -> ChainPolicy {
        ChainPolicy {
            mode: if self.fail_without_full_chain {
                ChainVerification::Strict
            } else {
                ChainVerification::Lenient
            },
            keychain: self.keychain.clone(),
            ..Default::default()
        }
    }

    /// Load and verify signing material. `None` means sign ad-hoc.
    fn material(&self, prompter: &dyn Prompter) -> Result<Option<SigningMaterial>, QuillError> {
        if self.ad_hoc {
            return Ok(None);
        }

        let password = self.password.as_deref().map(resolve_secret).transpose()?;

        let material = match (&self.p12, &self.cert, &self.key) {
            (Some(p12), _, _) => load_p12(&secret_source(p12), password.as_deref(), prompter)?,
            (None, Some(cert), Some(key)) => load_pem(
                &InputSource::parse(cert),
                &secret_source(key),
                password.as_deref(),
                prompter,
            )?,
            _ => {
                warn!("no signing material given; signing ad-hoc");
                return Ok(None);
            }
        };

        Ok(Some(material.verify_for_code_signing(&self.chain_policy())?))
    }

    fn options(&self, path: &Path) -> Result<SigningOptions, QuillError> {
        let identifier = match &self.identity {
            Some(identity) => identity.clone(),
            None => path
                .file_name()
                .map(|x| x.to_string_lossy().to_string())
                .ok_or_else(|| {
                    QuillError::CliGeneralError(format!("{} has no file name", path.display()))
                })?,
        };

        let entitlements = self
            .entitlements
            .as_ref()
            .map(|p| std::fs::read_to_string(p).map_err(|e| QuillError::IoPath(p.clone(), e)))
            .transpose()?;

        Ok(SigningOptions {
            timestamp_url: Some(self.timestamp_server.clone()).filter(|url| !url.is_empty()),
            entitlements,
            ..SigningOptions::new(identifier)
        })
    }

    /// Load signing material for a binary that will be notarized.
    ///
    /// Apple rejects ad-hoc signatures, so missing material is an error.
    fn notarizable_material(&self, prompter: &dyn Prompter) -> Result<SigningMaterial, QuillError> {
        self.material(prompter)?.ok_or(QuillError::NotarizeAdHoc)
    }

    fn sign(&self, context: &Context, path: &Path) -> Result<(), QuillError> {
        let material = self.material(&context.prompter)?;

        self.sign_with(path, material.as_ref())
    }

    fn sign_with(&self, path: &Path, material: Option<&SigningMaterial>) -> Result<(), QuillError> {
        MachOSigner::new(self.options(path)?, material).sign_path(path)
    }
}

#[derive(Args, Clone, Debug)]
struct NotaryAuthArgs {
    /// App Store Connect issuer ID
    #[arg(long, env = "QUILL_NOTARY_ISSUER")]
    notary_issuer: Option<String>,

    /// App Store Connect API key ID
    #[arg(long, env = "QUILL_NOTARY_KEY_ID")]
    notary_key_id: Option<String>,

    /// App Store Connect API private key: a path, base64 content or env:NAME.
    /// Defaults to AuthKey_<KEY_ID>.p8 in the standard key directories.
    #[arg(long, env = "QUILL_NOTARY_KEY", hide_env_values = true)]
    notary_key: Option<String>,
}

impl NotaryAuthArgs {
    fn config(&self, status: StatusConfig) -> Result<NotaryConfig, QuillError> {
        let issuer = self.notary_issuer.clone().ok_or_else(|| {
            QuillError::CliGeneralError("--notary-issuer is required".to_string())
        })?;
        let key_id = self.notary_key_id.clone().ok_or_else(|| {
            QuillError::CliGeneralError("--notary-key-id is required".to_string())
        })?;

        Ok(NotaryConfig {
            issuer,
            key_id,
            key: self.notary_key.as_deref().map(secret_source),
            status,
        })
    }
}

#[derive(Args, Clone, Debug)]
struct NotaryArgs {
    #[command(flatten)]
    auth: NotaryAuthArgs,

    /// Wait for Apple's verdict
    #[arg(long, env = "QUILL_NOTARY_WAIT")]
    wait: bool,

    /// Seconds between status checks
    #[arg(long, env = "QUILL_NOTARY_POLL_SECONDS", default_value_t = 10)]
    poll_seconds: u64,

    /// Give up waiting after this many seconds
    #[arg(long, env = "QUILL_NOTARY_TIMEOUT_SECONDS", default_value_t = 900)]
    timeout_seconds: u64,

    /// Prepare the payload without contacting Apple
    #[arg(long, env = "QUILL_NOTARY_DRY_RUN")]
    dry_run: bool,
}

impl NotaryArgs {
    fn status_config(&self) -> StatusConfig {
        StatusConfig {
            poll_interval: Duration::from_secs(self.poll_seconds.max(1)),
            timeout: Duration::from_secs(self.timeout_seconds),
            wait: self.wait,
        }
    }

    fn notarize(
        &self,
        context: &Context,
        path: &Path,
        output: &OutputArgs,
    ) -> Result<(), QuillError> {
        let data = std::fs::read(path).map_err(|e| QuillError::IoPath(path.to_path_buf(), e))?;
        if !is_zip(&data) {
            ensure_developer_signed(&data)?;
        }
        drop(data);

        let payload = Payload::prepare(path)?;

        if self.dry_run {
            return print_payload(&payload, output);
        }

        let config = self.auth.config(self.status_config())?;
        let client = config.client()?;
        let uploader = S3Uploader::default();

        let result = context.runtime.block_on(async {
            Submission::new(&client, config.status)
                .with_events(context.events.clone())
                .notarize(&payload, &uploader, &context.cancel)
                .await
        })?;

        print_result(&result, output)?;
        result.into_result()?;

        Ok(())
    }
}

fn print_payload(payload: &Payload, output: &OutputArgs) -> Result<(), QuillError> {
    if output.is_json() {
        print_json(&serde_json::json!({
            "name": payload.name(),
            "size": payload.len(),
            "sha256": payload.sha256(),
        }))
    } else {
        println!("payload: {}", payload.name());
        println!("size: {} bytes", payload.len());
        println!("sha256: {}", payload.sha256());
        println!("dry run; nothing submitted");
        Ok(())
    }
}

fn print_result(result: &NotarizationResult, output: &OutputArgs) -> Result<(), QuillError> {
    if output.is_json() {
        return print_json(&serde_json::json!({
            "submission_id": result.submission_id,
            "status": result.status.to_string(),
            "log": result.log,
        }));
    }

    println!("submission {}: {}", result.submission_id, result.status);

    if !result.status.is_completed() {
        println!(
            "check progress with `quill submission status {}`",
            result.submission_id
        );
    }

    Ok(())
}

fn print_certificate(info: &CertificateInfo) {
    println!("subject: {}", info.subject);
    if let Some(issuer) = &info.issuer {
        println!("issuer: {}", issuer);
    }
    println!("sha256 fingerprint: {}", info.sha256_fingerprint);
    println!("valid: {} to {}", info.not_before, info.not_after);
    if let Some(alg) = &info.key_algorithm {
        println!("key algorithm: {}", alg);
    }
    println!("code signing: {}", info.code_signing);
    if let Some(team_id) = &info.team_id {
        println!("team id: {}", team_id);
    }
}

fn describe_certificates(
    certs: &[CapturedX509Certificate],
    output: &OutputArgs,
) -> Result<(), QuillError> {
    let infos = certs
        .iter()
        .map(CertificateInfo::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    if output.is_json() {
        return print_json(&infos);
    }

    for (i, info) in infos.iter().enumerate() {
        println!("# Certificate {}", i);
        println!();
        print_certificate(info);
        println!();
    }

    Ok(())
}

#[derive(Args, Clone, Debug)]
struct Sign {
    /// Mach-O binary to sign in place
    path: PathBuf,

    #[command(flatten)]
    signing: SigningArgs,
}

impl CliCommand for Sign {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        self.signing.sign(context, &self.path)
    }
}

#[derive(Args, Clone, Debug)]
struct Notarize {
    /// Signed Mach-O binary or zip archive to notarize
    path: PathBuf,

    #[command(flatten)]
    notary: NotaryArgs,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for Notarize {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        self.notary.notarize(context, &self.path, &self.output)
    }
}

#[derive(Args, Clone, Debug)]
struct SignAndNotarize {
    /// Mach-O binary to sign in place and notarize
    path: PathBuf,

    #[command(flatten)]
    signing: SigningArgs,

    #[command(flatten)]
    notary: NotaryArgs,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for SignAndNotarize {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        let material = self.signing.notarizable_material(&context.prompter)?;

        self.signing.sign_with(&self.path, Some(&material))?;
        self.notary.notarize(context, &self.path, &self.output)
    }
}

#[derive(Args, Clone, Debug)]
struct SubmissionList {
    #[command(flatten)]
    auth: NotaryAuthArgs,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for SubmissionList {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        let client = self.auth.config(StatusConfig::default())?.client()?;

        let response = context.runtime.block_on(client.list())?;

        if self.output.is_json() {
            return print_json(&response.data);
        }

        for submission in response.data {
            println!(
                "{}\t{}\t{}\t{}",
                submission.id,
                submission.attributes.name,
                submission.attributes.status,
                submission.attributes.created_date
            );
        }

        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
struct SubmissionStatusCommand {
    /// Submission ID
    id: String,

    #[command(flatten)]
    auth: NotaryAuthArgs,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for SubmissionStatusCommand {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        let client = self.auth.config(StatusConfig::default())?.client()?;

        let response = context.runtime.block_on(client.status(&self.id))?;

        if self.output.is_json() {
            return print_json(&response.data);
        }

        println!(
            "{}: {} ({}, created {})",
            response.data.id,
            response.data.attributes.status,
            response.data.attributes.name,
            response.data.attributes.created_date
        );

        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
struct SubmissionLogs {
    /// Submission ID
    id: String,

    #[command(flatten)]
    auth: NotaryAuthArgs,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for SubmissionLogs {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        let config = self.auth.config(StatusConfig::default())?;
        let client = config.client()?;

        let log = context
            .runtime
            .block_on(Submission::existing(&client, config.status, &self.id).logs())?;

        if self.output.is_json() {
            let value = serde_json::from_str::<serde_json::Value>(&log)
                .unwrap_or(serde_json::Value::String(log));
            print_json(&value)
        } else {
            println!("{}", log);
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Subcommand)]
enum SubmissionCommand {
    /// List recent submissions
    List(SubmissionList),
    /// Show the status of a submission
    Status(SubmissionStatusCommand),
    /// Print the developer log of a submission
    Logs(SubmissionLogs),
}

impl SubmissionCommand {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Self::List(c) => c,
            Self::Status(c) => c,
            Self::Logs(c) => c,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct P12Describe {
    /// PKCS#12 bundle: a path, base64 content or env:NAME
    path: String,

    /// Bundle password. May be env:NAME.
    #[arg(long, env = "QUILL_P12_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for P12Describe {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        let password = self.password.as_deref().map(resolve_secret).transpose()?;
        let data = secret_source(&self.path).read()?;

        let contents = decode_p12_interactive(&data, password.as_deref(), &context.prompter)?;

        describe_certificates(&contents.certificates, &self.output)
    }
}

#[derive(Args, Clone, Debug)]
struct P12AttachChain {
    /// PKCS#12 bundle holding a signing key and its leaf certificate
    path: PathBuf,

    /// Bundle password. May be env:NAME. The new bundle uses the same password.
    #[arg(long, env = "QUILL_P12_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Keychain searched for missing certificates (macOS only)
    #[arg(long, env = "QUILL_P12_KEYCHAIN")]
    keychain: Option<PathBuf>,
}

impl P12AttachChain {
    fn output_path(&self) -> Result<PathBuf, QuillError> {
        let stem = self
            .path
            .file_stem()
            .map(|x| x.to_string_lossy().to_string())
            .ok_or_else(|| {
                QuillError::CliGeneralError(format!("{} has no file name", self.path.display()))
            })?;

        Ok(self.path.with_file_name(format!("{}-with-chain.p12", stem)))
    }
}

impl CliCommand for P12AttachChain {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        let password = self.password.as_deref().map(resolve_secret).transpose()?;
        let data =
            std::fs::read(&self.path).map_err(|e| QuillError::IoPath(self.path.clone(), e))?;

        let contents = decode_p12_interactive(&data, password.as_deref(), &context.prompter)?;

        let policy = ChainPolicy {
            keychain: self.keychain.clone(),
            ..Default::default()
        };

        let material = SigningMaterial::new(contents.key, contents.certificates)?
            .verify_for_code_signing(&policy)?;

        let dest = self.output_path()?;
        std::fs::write(&dest, material.to_p12(&contents.password)?)
            .map_err(|e| QuillError::IoPath(dest.clone(), e))?;

        info!("wrote {}", dest.display());

        Ok(())
    }
}

#[derive(Clone, Debug, Subcommand)]
enum P12Command {
    /// Print the certificates in a PKCS#12 bundle
    Describe(P12Describe),
    /// Write a copy of a PKCS#12 bundle with its full certificate chain
    AttachChain(P12AttachChain),
}

impl P12Command {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Self::Describe(c) => c,
            Self::AttachChain(c) => c,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ExtractCertificates {
    /// Signed Mach-O binary
    path: PathBuf,
}

impl CliCommand for ExtractCertificates {
    fn run(&self, _context: &Context) -> Result<(), QuillError> {
        let certs = signature_certificates(&self.path)?;

        if certs.is_empty() {
            warn!("{} carries no certificates", self.path.display());
        }

        for cert in certs {
            print!("{}", cert.encode_pem());
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Subcommand)]
enum ExtractCommand {
    /// Print the PEM certificates in a binary's signature
    Certificates(ExtractCertificates),
}

impl ExtractCommand {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Self::Certificates(c) => c,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct Describe {
    /// Mach-O binary to describe
    path: PathBuf,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for Describe {
    fn run(&self, _context: &Context) -> Result<(), QuillError> {
        let entities = describe_path(&self.path)?;

        if self.output.is_json() {
            print_json(&entities)
        } else {
            print!("{}", serde_yaml::to_string(&entities)?);
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct EmbeddedCertificate {
    kind: &'static str,
    #[serde(flatten)]
    info: CertificateInfo,
}

#[derive(Args, Clone, Debug)]
struct EmbeddedCertificates {
    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for EmbeddedCertificates {
    fn run(&self, _context: &Context) -> Result<(), QuillError> {
        let store = CertificateStore::embedded();

        let certs = store
            .roots()
            .iter()
            .map(|cert| ("root", cert))
            .chain(store.intermediates().iter().map(|cert| ("intermediate", cert)))
            .map(|(kind, cert)| {
                Ok(EmbeddedCertificate {
                    kind,
                    info: CertificateInfo::try_from(cert)?,
                })
            })
            .collect::<Result<Vec<_>, QuillError>>()?;

        if self.output.is_json() {
            return print_json(&certs);
        }

        for cert in certs {
            println!(
                "{}\t{}\t{}\t{} to {}",
                cert.kind,
                cert.info.subject,
                cert.info.sha256_fingerprint,
                cert.info.not_before,
                cert.info.not_after
            );
        }

        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
struct TestNotarize {
    #[command(flatten)]
    signing: SigningArgs,

    #[command(flatten)]
    notary: NotaryArgs,

    #[command(flatten)]
    output: OutputArgs,
}

impl CliCommand for TestNotarize {
    fn run(&self, context: &Context) -> Result<(), QuillError> {
        let material = self.signing.notarizable_material(&context.prompter)?;

        let exe = std::env::current_exe()?;
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("quill");

        std::fs::copy(&exe, &path).map_err(|e| QuillError::IoPath(exe.clone(), e))?;
        info!("signing a copy of {}", exe.display());

        match self.signing.sign_with(&path, Some(&material)) {
            Err(QuillError::AlreadySigned) => {
                warn!("{} is already signed; notarizing as is", exe.display());
            }
            res => res?,
        }

        let notary = NotaryArgs {
            wait: true,
            ..self.notary.clone()
        };

        notary.notarize(context, &path, &self.output)
    }
}

#[derive(Args, Clone, Debug)]
struct Version {}

impl CliCommand for Version {
    fn run(&self, _context: &Context) -> Result<(), QuillError> {
        println!("quill {}", env!("CARGO_PKG_VERSION"));
        Ok(())
    }
}

#[derive(Clone, Debug, Subcommand)]
enum Subcommands {
    /// Sign a Mach-O binary in place
    Sign(Sign),
    /// Submit a signed binary to Apple's notary service
    Notarize(Notarize),
    /// Sign a binary, then notarize it
    SignAndNotarize(SignAndNotarize),
    /// Inspect notary submissions
    #[command(subcommand)]
    Submission(SubmissionCommand),
    /// Work with PKCS#12 bundles
    #[command(subcommand)]
    P12(P12Command),
    /// Extract content from a signed binary
    #[command(subcommand)]
    Extract(ExtractCommand),
    /// Describe a binary and its embedded signature
    Describe(Describe),
    /// List the Apple certificates built into this program
    EmbeddedCertificates(EmbeddedCertificates),
    /// Sign and notarize a copy of this program to check credentials
    TestNotarize(TestNotarize),
    /// Print the version
    Version(Version),
}

impl Subcommands {
    fn as_cli_command(&self) -> &dyn CliCommand {
        match self {
            Self::Sign(c) => c,
            Self::Notarize(c) => c,
            Self::SignAndNotarize(c) => c,
            Self::Submission(c) => c.as_cli_command(),
            Self::P12(c) => c.as_cli_command(),
            Self::Extract(c) => c.as_cli_command(),
            Self::Describe(c) => c,
            Self::EmbeddedCertificates(c) => c,
            Self::TestNotarize(c) => c,
            Self::Version(c) => c,
        }
    }
}

/// Sign and notarize Mach-O binaries.
#[derive(Parser)]
#[command(author, version, about, arg_required_else_help = true)]
struct Cli {
    /// Increase logging verbosity. Can be specified multiple times
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Subcommands,
}

fn install_logger(verbose: u8) -> Result<(), QuillError> {
    let log_level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    // This spews unwanted output at default level. Nerf it by default.
    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
    }

    let logger = builder.build();
    let max_level = logger.filter();

    log::set_boxed_logger(Box::new(RedactingLogger::new(logger)))
        .map_err(|e| QuillError::CliGeneralError(format!("failed to install logger: {}", e)))?;
    log::set_max_level(max_level);

    Ok(())
}

fn main_impl() -> Result<(), QuillError> {
    let cli = Cli::parse();

    install_logger(cli.verbose)?;

    let context = Context::new()?;
    context.install_interrupt_handler();
    context.log_events();

    let res = cli.command.as_cli_command().run(&context);

    context.events.publish(Event::Exit);

    res
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", redaction::apply(&err.to_string()));
            1
        }
    };

    std::process::exit(exit_code)
}
