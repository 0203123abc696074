use std::path::PathBuf;

use anyhow::Result;
use clap::builder::NonEmptyStringValueParser;
use clap::{ArgAction, ArgGroup, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use color_eyre::config::HookBuilder;
use kracli_core::tus::chunk_size_from_mib;
use kracli_core::{
    get_config_path, load_config, CopyObject, CreateObject, DeleteObject, Error, ListQuery,
    ObjectKind, UpdateObject, UploadRequest,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod exit_code;
mod handlers;
mod output;
mod prompt;

use exit_code::ExitCode;
use handlers::Context;
use output::OutputConfig;

const AFTER_HELP: &str = "\
For editing objects with -e | --edit you can change the following:
  -p NEWPARENT | -n NEWNAME | -P PASSWORD | --shared or --no-shared

For copying with -o | --copy IDENT you can specify the following:
  -p PARENT | -n NEWNAME | -P CURRENT_PASSWORD | -N NEW_PASSWORD | --shared or --no-shared

For uploading with -u | --upload you can specify the following:
  -p PARENT | -I FILESLOT_IDENT | -T UPLOAD_RESOURCE | -C UPLOAD_CHUNK_MB

Credentials are read from KRAUSER/KRAPASS or the [login] section of the
configuration file, which also stores the session
(default location: ~/.config/kracli/config.toml).

Example configuration file:
  [login]
  username = \"YOUR_USERNAME\"
  password = \"YOUR_PASSWORD\"";

/// kracli - kra.sk storage client
#[derive(Parser, Debug)]
#[command(name = "kracli")]
#[command(about = "kra.sk storage client", long_about = None)]
#[command(disable_version_flag = true, after_help = AFTER_HELP)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args([
            "list", "create", "edit", "copy", "remove", "download", "upload",
            "userinfo", "objectinfo", "version", "completion",
        ])
))]
struct Cli {
    /// Configuration file
    #[arg(short = 'i', long = "config", env = "KRACLI_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// List files and folders
    #[arg(short, long)]
    list: bool,

    /// Create folder or file slot (see --shared, --password)
    #[arg(short, long, value_name = "NAME", value_parser = NonEmptyStringValueParser::new())]
    create: Option<String>,

    /// Edit object, multiple options
    #[arg(short, long, value_name = "IDENT", value_parser = NonEmptyStringValueParser::new())]
    edit: Option<String>,

    /// Copy file, multiple options
    #[arg(short = 'o', long, value_name = "IDENT", value_parser = NonEmptyStringValueParser::new())]
    copy: Option<String>,

    /// Delete file or folder (see --recursive)
    #[arg(short, long, value_name = "IDENT", value_parser = NonEmptyStringValueParser::new())]
    remove: Option<String>,

    /// Download file
    #[arg(short, long, value_name = "IDENT", value_parser = NonEmptyStringValueParser::new())]
    download: Option<String>,

    /// Upload file
    #[arg(short, long, value_name = "PATH_TO_FILE", value_parser = NonEmptyStringValueParser::new())]
    upload: Option<String>,

    /// Show user info
    #[arg(short = 'U', long)]
    userinfo: bool,

    /// Show object info
    #[arg(short = 'O', long, value_name = "IDENT", value_parser = NonEmptyStringValueParser::new())]
    objectinfo: Option<String>,

    /// Show version
    #[arg(short = 'V', long)]
    version: bool,

    /// Print a shell completion script
    #[arg(long, value_name = "SHELL")]
    completion: Option<Shell>,

    /// Download: resume file download
    #[arg(short = 'W', long)]
    resume: bool,

    /// Create, copy or upload as shared; edit: set shared
    #[arg(short = 'S', long, overrides_with = "no_shared")]
    shared: bool,

    /// Edit: unset shared
    #[arg(long, overrides_with = "shared")]
    no_shared: bool,

    /// Set file/folder password, use an empty string to unset
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Copy: password of the copy
    #[arg(short = 'N', long = "newpassword", value_name = "NEWPASSWORD")]
    new_password: Option<String>,

    /// Delete: delete recursively
    #[arg(short = 'R', long)]
    recursive: bool,

    /// Upload: use a pre-existing file ident
    #[arg(short = 'I', long, value_name = "IDENT")]
    ident: Option<String>,

    /// Folder ident to operate on
    #[arg(short, long, value_name = "IDENT")]
    parent: Option<String>,

    /// List: filter name (allowed globs: * .)
    #[arg(short = 'F', long)]
    filter: Option<String>,

    /// Download/upload: store file under this name; edit: new name
    #[arg(short, long, value_name = "FILENAME")]
    name: Option<String>,

    /// List: limit to object type; create: file slot instead of folder
    #[arg(short = 't', long = "type", value_enum)]
    kind: Option<ObjectType>,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Upload chunk in MB, 0 or less uploads the whole file at once [default: 10]
    #[arg(short = 'C', long = "upload-chunk", value_name = "MB", allow_negative_numbers = true)]
    upload_chunk: Option<i64>,

    /// Upload: resume into an existing upload resource
    #[arg(short = 'T', long = "upload-resource", value_name = "RESOURCE")]
    upload_resource: Option<String>,

    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ObjectType {
    File,
    Folder,
}

impl From<ObjectType> for ObjectKind {
    fn from(kind: ObjectType) -> Self {
        match kind {
            ObjectType::File => ObjectKind::File,
            ObjectType::Folder => ObjectKind::Folder,
        }
    }
}

impl Cli {
    /// `Some` only when --shared or --no-shared was given
    fn shared_flag(&self) -> Option<bool> {
        match (self.shared, self.no_shared) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// Log level: RUST_LOG, then -v, then the config file, then warn
fn init_tracing(verbose: u8, configured: Option<&str>) {
    let fallback = match verbose {
        0 => configured.unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// First Ctrl+C cancels the running operation, the second exits at once
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to listen for Ctrl+C");
            return;
        }
        eprintln!();
        eprintln!("Interrupted, stopping after the current step (Ctrl+C again to abort)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(ExitCode::Interrupted.as_i32());
        }
    });
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<ExitCode> {
    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::Success);
    }
    if let Some(shell) = cli.completion {
        return handlers::handle_completion(shell, &mut Cli::command());
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };
    let config = load_config(&config_path)?;
    init_tracing(
        cli.verbose,
        config.logging.as_ref().map(|logging| logging.level.as_str()),
    );

    let chunk_mb = cli.upload_chunk.unwrap_or_else(|| config.chunk_size_mb());
    let shared = cli.shared_flag();
    let output = OutputConfig { quiet: cli.quiet };
    let mut ctx = Context::new(config, config_path, output, cancel);

    if cli.list {
        let query = ListQuery {
            parent: cli.parent,
            filter: cli.filter,
            kind: cli.kind.map(ObjectKind::from),
        };
        return handlers::handle_list(&mut ctx, query).await;
    }

    if let Some(ident) = cli.objectinfo {
        return handlers::handle_objectinfo(&mut ctx, &ident).await;
    }

    if let Some(name) = cli.create {
        let object = CreateObject::new(name, cli.kind != Some(ObjectType::File))
            .parent(cli.parent)
            .shared(shared == Some(true))
            .password(cli.password);
        return handlers::handle_create(&mut ctx, object).await;
    }

    if let Some(ident) = cli.copy {
        let copy = CopyObject {
            ident,
            name: cli.name,
            parent: cli.parent,
            shared: shared == Some(true),
            password: cli.password.filter(|p| !p.is_empty()),
            new_password: cli.new_password.filter(|p| !p.is_empty()),
        };
        return handlers::handle_copy(&mut ctx, copy).await;
    }

    if let Some(ident) = cli.remove {
        let delete = DeleteObject {
            ident,
            recursive: cli.recursive,
        };
        return handlers::handle_remove(&mut ctx, delete).await;
    }

    if let Some(ident) = cli.edit {
        let update = UpdateObject {
            name: cli.name,
            parent: cli.parent,
            shared,
            ..UpdateObject::new(ident)
        }
        .password(cli.password);
        if !update.has_changes() {
            return Err(Error::NothingToEdit.into());
        }
        return handlers::handle_edit(&mut ctx, update).await;
    }

    if let Some(ident) = cli.download {
        return handlers::handle_download(&mut ctx, &ident, cli.name, cli.resume).await;
    }

    if let Some(path) = cli.upload {
        let request = UploadRequest {
            name: cli.name,
            parent: cli.parent,
            shared: shared == Some(true),
            ident: cli.ident,
            resource: cli.upload_resource,
            chunk_size: chunk_size_from_mib(chunk_mb),
            ..UploadRequest::new(path)
        };
        return handlers::handle_upload(&mut ctx, request, chunk_mb).await;
    }

    if cli.userinfo {
        return handlers::handle_userinfo(&mut ctx).await;
    }

    anyhow::bail!("no action given")
}

#[tokio::main]
async fn main() {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let code = match run(cli, cancel).await {
        Ok(code) => code,
        Err(err) => match err.downcast_ref::<Error>() {
            Some(Error::Envelope(envelope)) => {
                output::print_envelope(envelope).unwrap_or(ExitCode::Failure)
            }
            _ => {
                output::print_error(&err);
                ExitCode::from_anyhow(&err)
            }
        },
    };

    std::process::exit(code.as_i32());
}
